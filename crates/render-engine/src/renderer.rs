//! Frame renderer: one surface, one node tree, one frame at a time.

use std::sync::Arc;

use image::{imageops, RgbaImage};

use montage_common::error::{MontageError, MontageResult};

use crate::color::BLACK;
use crate::node::{Render, RenderContext};
use crate::surface::Canvas;
use crate::text::FontBook;

/// Renders node trees into an owned CPU surface.
///
/// Time is derived from the frame index alone: frame `i` is rendered at
/// `i / fps` seconds, so identical trees produce identical frames.
#[derive(Debug)]
pub struct Renderer {
    canvas: Canvas,
    fps: u32,
}

impl Renderer {
    pub fn new(width: u32, height: u32, fps: u32, fonts: Arc<FontBook>) -> MontageResult<Self> {
        if fps == 0 {
            return Err(MontageError::render("Frame rate must be at least 1"));
        }
        let canvas = Canvas::new(width, height, fonts)?;
        tracing::debug!(width, height, fps, "Renderer created");
        Ok(Self { canvas, fps })
    }

    pub fn width(&self) -> u32 {
        self.canvas.pixels().width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.pixels().height()
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Timeline time of a frame index.
    pub fn frame_time(&self, frame: u64) -> f64 {
        frame as f64 / self.fps as f64
    }

    /// Clear to opaque black and render `node` at frame `frame`.
    pub async fn render(&mut self, node: &mut dyn Render, frame: u64) -> MontageResult<()> {
        let time = self.frame_time(frame);
        self.canvas.clear(BLACK);
        let mut ctx = RenderContext {
            surface: &mut self.canvas,
            fps: self.fps,
        };
        node.render(&mut ctx, time).await
    }

    /// Render, then scale the result onto a caller-owned display buffer.
    pub async fn render_to(
        &mut self,
        node: &mut dyn Render,
        frame: u64,
        display: &mut RgbaImage,
    ) -> MontageResult<()> {
        if display.width() == 0 || display.height() == 0 {
            return Err(MontageError::render("Display buffer is empty"));
        }
        self.render(node, frame).await?;

        let pixels = self.canvas.pixels();
        if pixels.dimensions() == display.dimensions() {
            display.copy_from_slice(pixels.as_raw());
        } else {
            *display = imageops::resize(
                pixels,
                display.width(),
                display.height(),
                imageops::FilterType::Triangle,
            );
        }
        Ok(())
    }

    /// Reallocate the surface. Only valid between exports.
    pub fn set_size(&mut self, width: u32, height: u32) -> MontageResult<()> {
        self.canvas = Canvas::new(width, height, Arc::clone(self.canvas.fonts()))?;
        Ok(())
    }

    /// Pixels of the most recent render.
    pub fn frame(&self) -> &RgbaImage {
        self.canvas.pixels()
    }
}
