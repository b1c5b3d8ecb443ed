//! Export a project to video.

use std::path::PathBuf;

use montage_common::config::AppConfig;
use montage_render_engine::build::SceneBuilder;
use montage_render_engine::export::{ExportSettings, Exporter};

use super::{load_fonts, load_project, parse_format, run_export};

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    output: Option<PathBuf>,
    format: Option<String>,
    bitrate: Option<u64>,
) -> anyhow::Result<()> {
    println!("Exporting project at: {}", path.display());

    let project = load_project(&path)?;
    for issue in project.validate() {
        tracing::warn!(%issue, "Project issue");
    }

    let mut settings = ExportSettings::for_project(&project, &config.render);
    if let Some(format) = format {
        settings.format = parse_format(&format)?;
    }
    if let Some(bitrate) = bitrate {
        settings.bitrate = bitrate;
    }

    let output_path = output.unwrap_or_else(|| path.with_extension(settings.format.extension()));

    println!("  Output: {}", output_path.display());
    println!("  Format: {:?}", settings.format);
    println!(
        "  Resolution: {}x{} @ {}fps",
        settings.width, settings.height, settings.fps
    );
    println!("  Duration: {:.2}s", project.duration());

    let mut scene = SceneBuilder::new(settings.tools.clone()).build_project(&project);
    let exporter = Exporter::new(settings, load_fonts(config)?)?;
    run_export(exporter, &mut scene, &output_path).await
}
