//! 2D drawing surfaces.
//!
//! [`Surface`] is the drawing contract nodes render against: a small subset
//! of a canvas 2D context with an explicit save/restore state stack.
//! [`Canvas`] implements it over an RGBA8 pixel buffer.
//!
//! Temporary state overrides go through [`StateGuard`], which restores the
//! previous state when dropped, including on early returns and `?` exits.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use image::{imageops, RgbaImage};

use montage_common::error::{MontageError, MontageResult};

use crate::color::{Paint, BLACK};
use crate::text::{layout_line, FontBook};

/// Horizontal anchor of drawn text relative to its `x` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// Vertical anchor of drawn text relative to its `y` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextBaseline {
    Top,
    Middle,
    #[default]
    Alphabetic,
    Bottom,
}

/// Font selection for text drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    /// CSS family list, e.g. `"Inter, sans-serif"`.
    pub family: String,
    /// Size in pixels.
    pub size: f32,
    /// CSS weight (100-900).
    pub weight: u16,
    pub italic: bool,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            family: "sans-serif".to_string(),
            size: 10.0,
            weight: 400,
            italic: false,
        }
    }
}

/// Mutable drawing state, saved and restored as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawState {
    pub fill: Paint,
    /// Multiplier applied to every draw, in `[0.0, 1.0]`.
    pub global_alpha: f32,
    pub font: FontSpec,
    pub text_align: TextAlign,
    pub text_baseline: TextBaseline,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            fill: BLACK,
            global_alpha: 1.0,
            font: FontSpec::default(),
            text_align: TextAlign::default(),
            text_baseline: TextBaseline::default(),
        }
    }
}

/// A 2D drawing target.
pub trait Surface: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn state(&self) -> &DrawState;
    fn state_mut(&mut self) -> &mut DrawState;

    /// Push a copy of the current state.
    fn save(&mut self);
    /// Pop the most recently saved state. Unbalanced calls are ignored.
    fn restore(&mut self);

    /// Fill a rectangle with the current fill paint.
    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64);

    /// Draw a single line of text at `(x, y)` using the current font,
    /// alignment, baseline, and fill.
    fn fill_text(&mut self, text: &str, x: f64, y: f64);

    /// Draw `image` scaled into the destination rectangle.
    fn draw_image(&mut self, image: &RgbaImage, x: f64, y: f64, width: f64, height: f64);
}

/// Scoped drawing-state override.
///
/// Saves the surface state on creation and restores it on drop.
pub struct StateGuard<'a, S: Surface + ?Sized> {
    surface: &'a mut S,
}

impl<'a, S: Surface + ?Sized> StateGuard<'a, S> {
    pub fn new(surface: &'a mut S) -> Self {
        surface.save();
        Self { surface }
    }
}

impl<S: Surface + ?Sized> Deref for StateGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.surface
    }
}

impl<S: Surface + ?Sized> DerefMut for StateGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.surface
    }
}

impl<S: Surface + ?Sized> Drop for StateGuard<'_, S> {
    fn drop(&mut self) {
        self.surface.restore();
    }
}

/// Largest surface side accepted, in pixels.
pub const MAX_SURFACE_DIMENSION: u32 = 16_384;

/// CPU raster surface over an RGBA8 buffer.
pub struct Canvas {
    pixels: RgbaImage,
    state: DrawState,
    stack: Vec<DrawState>,
    fonts: Arc<FontBook>,
    warned_missing_font: bool,
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("width", &self.pixels.width())
            .field("height", &self.pixels.height())
            .field("state", &self.state)
            .field("saved", &self.stack.len())
            .finish()
    }
}

impl Canvas {
    /// Allocate a surface, failing if the dimensions cannot back a buffer.
    pub fn new(width: u32, height: u32, fonts: Arc<FontBook>) -> MontageResult<Self> {
        if width == 0 || height == 0 {
            return Err(MontageError::render(format!(
                "Cannot acquire a {width}x{height} drawing surface"
            )));
        }
        if width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION {
            return Err(MontageError::render(format!(
                "Drawing surface {width}x{height} exceeds {MAX_SURFACE_DIMENSION}px"
            )));
        }

        Ok(Self {
            pixels: RgbaImage::from_pixel(width, height, BLACK),
            state: DrawState::default(),
            stack: Vec::new(),
            fonts,
            warned_missing_font: false,
        })
    }

    /// Current pixel contents.
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn fonts(&self) -> &Arc<FontBook> {
        &self.fonts
    }

    /// Fill every pixel with `paint` and drop all saved and current state.
    pub fn clear(&mut self, paint: Paint) {
        for pixel in self.pixels.pixels_mut() {
            *pixel = paint;
        }
        self.state = DrawState::default();
        self.stack.clear();
    }

    /// Blend `paint` at coverage `coverage` (0..=1) into pixel `(x, y)`.
    fn blend(&mut self, x: u32, y: u32, paint: Paint, coverage: f32) {
        let alpha = (paint[3] as f32 / 255.0) * coverage * self.state.global_alpha;
        if alpha <= 0.0 {
            return;
        }
        let alpha = alpha.min(1.0);
        let dst = self.pixels.get_pixel_mut(x, y);
        for c in 0..3 {
            let src = paint[c] as f32;
            let out = src * alpha + dst[c] as f32 * (1.0 - alpha);
            dst[c] = out.round().clamp(0.0, 255.0) as u8;
        }
        let dst_a = dst[3] as f32 / 255.0;
        dst[3] = ((alpha + dst_a * (1.0 - alpha)) * 255.0).round() as u8;
    }

    /// Clip a float rectangle to pixel bounds, returning `x0..x1, y0..y1`.
    fn clip(&self, x: f64, y: f64, width: f64, height: f64) -> Option<(u32, u32, u32, u32)> {
        let (w, h) = (self.pixels.width() as f64, self.pixels.height() as f64);
        let x0 = x.round().clamp(0.0, w) as u32;
        let y0 = y.round().clamp(0.0, h) as u32;
        let x1 = (x + width).round().clamp(0.0, w) as u32;
        let y1 = (y + height).round().clamp(0.0, h) as u32;
        (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
    }
}

impl Surface for Canvas {
    fn width(&self) -> u32 {
        self.pixels.width()
    }

    fn height(&self) -> u32 {
        self.pixels.height()
    }

    fn state(&self) -> &DrawState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DrawState {
        &mut self.state
    }

    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        let Some((x0, y0, x1, y1)) = self.clip(x, y, width, height) else {
            return;
        };
        let paint = self.state.fill;

        // Opaque fills overwrite directly.
        if paint[3] == 255 && self.state.global_alpha >= 1.0 {
            for py in y0..y1 {
                for px in x0..x1 {
                    self.pixels.put_pixel(px, py, paint);
                }
            }
            return;
        }

        for py in y0..y1 {
            for px in x0..x1 {
                self.blend(px, py, paint, 1.0);
            }
        }
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64) {
        let fonts = Arc::clone(&self.fonts);
        let spec = &self.state.font;
        let Some(font) = fonts.resolve(&spec.family, spec.weight, spec.italic) else {
            if !self.warned_missing_font {
                tracing::warn!(family = %spec.family, "No font loaded; text will not be drawn");
                self.warned_missing_font = true;
            }
            return;
        };

        let run = layout_line(font, text, spec.size);
        let origin_x = match self.state.text_align {
            TextAlign::Left => x as f32,
            TextAlign::Center => x as f32 - run.width / 2.0,
            TextAlign::Right => x as f32 - run.width,
        };
        let baseline_y = match self.state.text_baseline {
            TextBaseline::Top => y as f32 + run.ascent,
            TextBaseline::Middle => y as f32 + (run.ascent + run.descent) / 2.0,
            TextBaseline::Alphabetic => y as f32,
            TextBaseline::Bottom => y as f32 + run.descent,
        };

        let paint = self.state.fill;
        let (width, height) = (self.pixels.width() as i64, self.pixels.height() as i64);
        for glyph in &run.glyphs {
            let m = &glyph.metrics;
            let left = (origin_x + glyph.pen_x).round() as i64 + m.xmin as i64;
            let top = baseline_y.round() as i64 - m.ymin as i64 - m.height as i64;
            for gy in 0..m.height {
                let py = top + gy as i64;
                if py < 0 || py >= height {
                    continue;
                }
                for gx in 0..m.width {
                    let px = left + gx as i64;
                    if px < 0 || px >= width {
                        continue;
                    }
                    let coverage = glyph.coverage[gy * m.width + gx];
                    if coverage > 0 {
                        self.blend(px as u32, py as u32, paint, coverage as f32 / 255.0);
                    }
                }
            }
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, x: f64, y: f64, width: f64, height: f64) {
        let Some((x0, y0, x1, y1)) = self.clip(x, y, width, height) else {
            return;
        };
        let dest_w = width.round().max(1.0) as u32;
        let dest_h = height.round().max(1.0) as u32;

        let scaled;
        let source = if image.width() == dest_w && image.height() == dest_h {
            image
        } else {
            scaled = imageops::resize(image, dest_w, dest_h, imageops::FilterType::Triangle);
            &scaled
        };

        let origin_x = x.round() as i64;
        let origin_y = y.round() as i64;
        for py in y0..y1 {
            for px in x0..x1 {
                let sx = px as i64 - origin_x;
                let sy = py as i64 - origin_y;
                if sx < 0 || sy < 0 || sx >= source.width() as i64 || sy >= source.height() as i64 {
                    continue;
                }
                let src = *source.get_pixel(sx as u32, sy as u32);
                self.blend(px, py, src, 1.0);
            }
        }
    }
}
