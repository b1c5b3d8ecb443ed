//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MontageError, MontageResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default render and export settings.
    #[serde(default)]
    pub render: RenderDefaults,

    /// Fonts available to text and timecode nodes.
    #[serde(default)]
    pub fonts: FontConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default render/export parameters, used when a project does not specify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Video bitrate in bits per second.
    pub bitrate: u64,

    /// Container format (`mp4` or `webm`).
    pub format: String,

    /// Path to the ffmpeg executable.
    pub ffmpeg_path: PathBuf,

    /// Path to the ffprobe executable.
    pub ffprobe_path: PathBuf,
}

/// Font faces loaded into the renderer's font book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Family used when a requested family is not loaded.
    pub default_family: Option<String>,

    /// Individual font files.
    pub faces: Vec<FontFaceConfig>,
}

/// A single font file registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontFaceConfig {
    /// CSS family name this face answers to (e.g. "Inter").
    pub family: String,

    /// TTF/OTF file path.
    pub path: PathBuf,

    /// CSS weight (100-900).
    #[serde(default = "default_font_weight")]
    pub weight: u16,

    /// Whether this is an italic face.
    #[serde(default)]
    pub italic: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "montage=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// Default export bitrate: 4 Mbit/s.
pub const DEFAULT_BITRATE: u64 = 4_000_000;

fn default_font_weight() -> u16 {
    400
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate: DEFAULT_BITRATE,
            format: "mp4".to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path. Unlike [`AppConfig::load`], a
    /// missing or malformed file is an error.
    pub fn load_from(path: &Path) -> MontageResult<Self> {
        if !path.exists() {
            return Err(MontageError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| MontageError::config(format!("Invalid config {}: {e}", path.display())))
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("montage").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.render.bitrate, 4_000_000);
        assert_eq!(config.render.fps, 30);
        assert_eq!(config.render.format, "mp4");
        assert!(config.fonts.faces.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{
            "render": { "fps": 60 },
            "fonts": { "faces": [ { "family": "Inter", "path": "/fonts/Inter.ttf" } ] }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.render.fps, 60);
        assert_eq!(config.render.width, 1280);
        assert_eq!(config.fonts.faces[0].weight, 400);
        assert!(!config.fonts.faces[0].italic);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = std::env::temp_dir().join("montage_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{ "render": { "format": "webm" } }"#).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap().render.format, "webm");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(MontageError::Config { .. })
        ));
        std::fs::remove_dir_all(&dir).ok();

        assert!(AppConfig::load_from(&dir.join("missing.json")).is_err());
    }
}
