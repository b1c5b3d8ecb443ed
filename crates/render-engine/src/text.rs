//! Font registry and single-line glyph layout.

use std::path::Path;

use fontdue::{Font, FontSettings, Metrics};

use montage_common::config::FontConfig;
use montage_common::error::{MontageError, MontageResult};

/// Fonts available to the canvas, keyed by CSS family name.
#[derive(Default)]
pub struct FontBook {
    faces: Vec<FontFace>,
    default_family: Option<String>,
}

struct FontFace {
    family: String,
    weight: u16,
    italic: bool,
    font: Font,
}

impl std::fmt::Debug for FontBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontBook")
            .field("faces", &self.faces.len())
            .field("default_family", &self.default_family)
            .finish()
    }
}

impl FontBook {
    /// An empty font book. Text draws are no-ops until a face is added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every face listed in the configuration.
    pub fn from_config(config: &FontConfig) -> MontageResult<Self> {
        let mut book = Self::new();
        book.default_family = config.default_family.as_ref().map(|f| normalize_family(f));
        for face in &config.faces {
            book.load_face(&face.family, &face.path, face.weight, face.italic)?;
        }
        tracing::debug!(faces = book.faces.len(), "Font book loaded");
        Ok(book)
    }

    /// Read a TTF/OTF file and register it.
    pub fn load_face(
        &mut self,
        family: &str,
        path: &Path,
        weight: u16,
        italic: bool,
    ) -> MontageResult<()> {
        if !path.exists() {
            return Err(MontageError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        self.add_face(family, weight, italic, bytes)
    }

    /// Register a face from raw font bytes.
    pub fn add_face(
        &mut self,
        family: &str,
        weight: u16,
        italic: bool,
        bytes: Vec<u8>,
    ) -> MontageResult<()> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| MontageError::config(format!("Invalid font for {family}: {e}")))?;
        self.faces.push(FontFace {
            family: normalize_family(family),
            weight,
            italic,
            font,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Resolve a CSS family list (`"Inter, sans-serif"`) to a loaded face.
    ///
    /// Families are tried left to right, then the default family, then any
    /// loaded face. Within a family, a matching style beats a closer weight.
    pub fn resolve(&self, families: &str, weight: u16, italic: bool) -> Option<&Font> {
        families
            .split(',')
            .map(normalize_family)
            .chain(self.default_family.clone())
            .find_map(|family| self.best_in_family(&family, weight, italic))
            .or_else(|| self.faces.first().map(|face| &face.font))
    }

    fn best_in_family(&self, family: &str, weight: u16, italic: bool) -> Option<&Font> {
        self.faces
            .iter()
            .filter(|face| face.family == family)
            .min_by_key(|face| {
                let style_penalty = if face.italic == italic { 0 } else { 1000 };
                style_penalty + (face.weight as i32 - weight as i32).unsigned_abs()
            })
            .map(|face| &face.font)
    }
}

fn normalize_family(family: &str) -> String {
    family
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_ascii_lowercase()
}

/// A rasterized glyph placed on the pen line.
pub(crate) struct PlacedGlyph {
    /// Pen x offset from the start of the line.
    pub pen_x: f32,
    pub metrics: Metrics,
    pub coverage: Vec<u8>,
}

/// A laid-out single line of text.
pub(crate) struct TextRun {
    pub glyphs: Vec<PlacedGlyph>,
    /// Total advance width.
    pub width: f32,
    /// Distance from baseline to the top of the line box.
    pub ascent: f32,
    /// Distance from baseline to the bottom of the line box (negative).
    pub descent: f32,
}

/// Lay out `text` on a single line at `px` pixels, applying kerning.
pub(crate) fn layout_line(font: &Font, text: &str, px: f32) -> TextRun {
    let (ascent, descent) = font
        .horizontal_line_metrics(px)
        .map(|m| (m.ascent, m.descent))
        .unwrap_or((px * 0.8, -px * 0.2));

    let mut glyphs = Vec::with_capacity(text.len());
    let mut pen_x = 0.0f32;
    let mut previous: Option<char> = None;

    for ch in text.chars().filter(|c| !c.is_control()) {
        if let Some(prev) = previous {
            pen_x += font.horizontal_kern(prev, ch, px).unwrap_or(0.0);
        }
        let (metrics, coverage) = font.rasterize(ch, px);
        let advance = metrics.advance_width;
        glyphs.push(PlacedGlyph {
            pen_x,
            metrics,
            coverage,
        });
        pen_x += advance;
        previous = Some(ch);
    }

    TextRun {
        glyphs,
        width: pen_x,
        ascent,
        descent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_book_resolves_nothing() {
        let book = FontBook::new();
        assert!(book.is_empty());
        assert!(book.resolve("Inter, sans-serif", 400, false).is_none());
    }

    #[test]
    fn test_invalid_font_bytes_rejected() {
        let mut book = FontBook::new();
        let err = book.add_face("Broken", 400, false, vec![0, 1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("Invalid font for Broken"));
        assert!(book.is_empty());
    }

    #[test]
    fn test_missing_font_file() {
        let mut book = FontBook::new();
        let err = book
            .load_face("Inter", Path::new("/nonexistent/Inter.ttf"), 400, false)
            .unwrap_err();
        assert!(matches!(err, MontageError::FileNotFound { .. }));
    }

    #[test]
    fn test_normalize_family() {
        assert_eq!(normalize_family(" \"Open Sans\" "), "open sans");
        assert_eq!(normalize_family("'Inter'"), "inter");
    }
}
