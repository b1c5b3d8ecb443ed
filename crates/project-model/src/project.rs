//! Project metadata and configuration types.
//!
//! A project is the top-level container that ties together the media
//! library, the timeline tracks, and export configuration. It is stored as a
//! single pretty-printed JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::{find_media, MediaItem};
use crate::timeline::{total_duration, TimelineElement, TimelineTrack};

/// Top-level project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Schema version.
    pub version: String,

    /// Human-readable project name.
    pub name: String,

    /// Unique project identifier (UUID).
    pub id: String,

    /// Creation timestamp (ISO 8601).
    pub created_at: String,

    /// Last modified timestamp (ISO 8601).
    pub modified_at: String,

    /// Output canvas size in pixels.
    pub canvas_size: CanvasSize,

    /// Project frame rate.
    pub fps: u32,

    /// Export configuration.
    #[serde(default)]
    pub export: ExportConfig,

    /// Timeline tracks, front-most first.
    #[serde(default)]
    pub tracks: Vec<TimelineTrack>,

    /// Media library.
    #[serde(default)]
    pub media_items: Vec<MediaItem>,
}

/// Canvas dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output container/codec.
    pub format: ExportFormat,

    /// Video bitrate in bits per second.
    pub bitrate: u64,
}

/// Output container and its video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// MP4 container, H.264 video.
    #[default]
    Mp4,
    /// WebM container, VP9 video.
    Webm,
}

impl ExportFormat {
    /// Mime type of the produced container.
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Mp4 => "video/mp4",
            ExportFormat::Webm => "video/webm",
        }
    }

    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Mp4 => "mp4",
            ExportFormat::Webm => "webm",
        }
    }

    /// Parse a user-facing format name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mp4" | "mp4-h264" | "h264" | "avc" => Some(ExportFormat::Mp4),
            "webm" | "vp9" => Some(ExportFormat::Webm),
            _ => None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::Mp4,
            bitrate: 4_000_000,
        }
    }
}

impl Project {
    /// Create a new empty project with defaults.
    pub fn new(name: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            version: "1.0".to_string(),
            name: name.into(),
            id: Uuid::new_v4().to_string(),
            created_at: now.clone(),
            modified_at: now,
            canvas_size: CanvasSize { width, height },
            fps,
            export: ExportConfig::default(),
            tracks: vec![],
            media_items: vec![],
        }
    }

    /// Load a project file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref().to_path_buf();
        let json = std::fs::read_to_string(&path).map_err(|e| ProjectError::IoError {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ProjectError::ParseError { path, source: e })
    }

    /// Save the project file, refreshing `modified_at`.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProjectError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        self.modified_at = chrono::Utc::now().to_rfc3339();
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| ProjectError::IoError { path, source: e })
    }

    /// Timeline duration in seconds.
    pub fn duration(&self) -> f64 {
        total_duration(&self.tracks)
    }

    /// Report problems that would degrade an export.
    ///
    /// None of these are fatal: the scene builder skips what it cannot use.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = vec![];

        if self.canvas_size.width == 0 || self.canvas_size.height == 0 {
            issues.push(format!(
                "Canvas size {}x{} is empty",
                self.canvas_size.width, self.canvas_size.height
            ));
        }
        if self.fps == 0 {
            issues.push("Frame rate is zero".to_string());
        }

        for track in &self.tracks {
            for element in &track.elements {
                if !element.fits_track(track.track_type) {
                    issues.push(format!(
                        "Element {} does not belong on {:?} track {}",
                        element.id(),
                        track.track_type,
                        track.name
                    ));
                }
                if element.visible_duration() <= 0.0 {
                    issues.push(format!("Element {} is trimmed to nothing", element.id()));
                }

                let TimelineElement::Media(media) = element else {
                    continue;
                };
                match find_media(&self.media_items, &media.media_id) {
                    None => issues.push(format!(
                        "Element {} references missing media {}",
                        media.id, media.media_id
                    )),
                    Some(item) => match item.path.as_deref().map(locator_path) {
                        None => issues.push(format!("Media {} has no source", item.id)),
                        Some(path) if !path.exists() => issues.push(format!(
                            "Media {} source missing: {}",
                            item.id,
                            path.display()
                        )),
                        Some(_) => {}
                    },
                }
            }
        }

        issues
    }
}

/// Resolve a media locator (`file://` URL or plain path) to a filesystem path.
pub fn locator_path(locator: &str) -> PathBuf {
    PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator))
}

/// Errors that can occur when working with projects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
}
