//! Subcommand implementations.

pub mod check;
pub mod export;
pub mod frame;
pub mod info;
pub mod scene;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use montage_common::config::AppConfig;
use montage_project_model::project::{ExportFormat, Project};
use montage_render_engine::export::{ExportEvent, ExportOutcome, Exporter};
use montage_render_engine::scene::Scene;
use montage_render_engine::text::FontBook;

/// Load a project file with a readable error.
pub(crate) fn load_project(path: &Path) -> anyhow::Result<Project> {
    Project::load(path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))
}

/// Load the configured font faces.
pub(crate) fn load_fonts(config: &AppConfig) -> anyhow::Result<Arc<FontBook>> {
    let fonts = FontBook::from_config(&config.fonts).context("Failed to load configured fonts")?;
    if fonts.is_empty() {
        tracing::warn!("No fonts configured; text and timecode will not be drawn");
    }
    Ok(Arc::new(fonts))
}

/// Parse a `--format` flag.
pub(crate) fn parse_format(format: &str) -> anyhow::Result<ExportFormat> {
    ExportFormat::parse(format)
        .ok_or_else(|| anyhow::anyhow!("Unknown format: {format}. Use: mp4, webm"))
}

/// Run an export with a terminal progress line; ctrl-c cancels between frames.
pub(crate) async fn run_export(
    mut exporter: Exporter,
    scene: &mut Scene,
    output_path: &Path,
) -> anyhow::Result<()> {
    let mut events = exporter.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ExportEvent::Progress(p) => {
                    print!(
                        "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
                        p.progress * 100.0,
                        p.frames_rendered,
                        p.total_frames,
                        p.eta_secs,
                    );
                    std::io::stdout().flush().ok();
                }
                ExportEvent::Complete(output) => {
                    println!("\n  Encoded {} bytes ({})", output.len(), output.mime_type);
                }
                ExportEvent::Error(message) => println!("\n  Export failed: {message}"),
                ExportEvent::Cancelled => println!("\n  Export cancelled"),
            }
        }
    });

    let cancel = exporter.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling export");
            cancel.cancel();
        }
    });

    let result = exporter.export(scene).await;
    interrupt.abort();
    drop(exporter);
    printer.await.ok();

    match result? {
        ExportOutcome::Completed(output) => {
            output.save(output_path).await?;
            println!("Export complete: {}", output_path.display());
            Ok(())
        }
        ExportOutcome::Cancelled => {
            println!("Nothing written.");
            Ok(())
        }
        ExportOutcome::Failed => Err(anyhow::anyhow!("Export produced no output")),
    }
}
