//! Export a declarative scene definition.

use std::path::PathBuf;

use anyhow::Context;

use montage_common::config::AppConfig;
use montage_render_engine::export::{ExportSettings, Exporter};
use montage_render_engine::scene::{build_scene_from_definition, NodeDefinition};

use super::{load_fonts, parse_format, run_export};

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    output: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    format: Option<String>,
) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read scene definition {}", path.display()))?;
    let definition: NodeDefinition = serde_json::from_str(&json)
        .with_context(|| format!("Invalid scene definition {}", path.display()))?;

    let mut settings = ExportSettings::from_defaults(&config.render);
    settings.width = width.unwrap_or(settings.width);
    settings.height = height.unwrap_or(settings.height);
    settings.fps = fps.unwrap_or(settings.fps);
    if let Some(format) = format {
        settings.format = parse_format(&format)?;
    }

    let mut scene = build_scene_from_definition(&definition, &settings.tools)?;
    let output_path = output.unwrap_or_else(|| path.with_extension(settings.format.extension()));

    println!("Exporting scene: {}", path.display());
    println!("  Output: {}", output_path.display());
    println!(
        "  Resolution: {}x{} @ {}fps, {:.2}s ({} frames)",
        settings.width,
        settings.height,
        settings.fps,
        scene.duration(),
        scene.frame_count(settings.fps)
    );

    let exporter = Exporter::new(settings, load_fonts(config)?)?;
    run_export(exporter, &mut scene, &output_path).await
}
