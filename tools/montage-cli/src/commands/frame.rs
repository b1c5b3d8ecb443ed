//! Render a single project frame to PNG.

use std::path::PathBuf;

use anyhow::Context;
use image::RgbaImage;

use montage_common::config::AppConfig;
use montage_render_engine::build::SceneBuilder;
use montage_render_engine::media::FfmpegTools;
use montage_render_engine::renderer::Renderer;

use super::{load_fonts, load_project};

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    frame: u64,
    output: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
) -> anyhow::Result<()> {
    let project = load_project(&path)?;
    let tools = FfmpegTools::from_config(&config.render);
    let mut scene = SceneBuilder::new(tools).build_project(&project);

    let canvas = project.canvas_size;
    let mut renderer = Renderer::new(canvas.width, canvas.height, project.fps, load_fonts(config)?)?;

    let total = scene.frame_count(project.fps);
    if frame >= total {
        tracing::warn!(frame, total, "Frame is past the end of the timeline");
    }

    let image = match (width, height) {
        (None, None) => {
            renderer.render(&mut scene, frame).await?;
            renderer.frame().clone()
        }
        (w, h) => {
            // Keep the aspect ratio when only one side is given.
            let aspect = canvas.height as f64 / canvas.width as f64;
            let w = w.unwrap_or_else(|| (h.unwrap_or(canvas.height) as f64 / aspect).round() as u32);
            let h = h.unwrap_or_else(|| (w as f64 * aspect).round() as u32);
            let mut display = RgbaImage::new(w, h);
            renderer.render_to(&mut scene, frame, &mut display).await?;
            display
        }
    };

    image
        .save(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Rendered frame {frame} (t={:.3}s) to {} ({}x{})",
        renderer.frame_time(frame),
        output.display(),
        image.width(),
        image.height()
    );
    Ok(())
}
