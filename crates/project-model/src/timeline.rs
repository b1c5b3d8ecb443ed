//! Timeline tracks and elements.
//!
//! Tracks are stored front-to-back as the editor shows them: the first track
//! is drawn on top. Each element occupies `[start_time, start_time + visible)`
//! on the master timeline, where the visible duration is the element's source
//! duration minus both trims.

use serde::{Deserialize, Serialize};

/// Kind of content a track accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Media,
    Text,
    Audio,
}

/// One timeline track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineTrack {
    pub id: String,
    pub name: String,

    #[serde(rename = "type")]
    pub track_type: TrackType,

    /// Elements in insertion order.
    #[serde(default)]
    pub elements: Vec<TimelineElement>,

    /// Muted tracks are excluded from rendering.
    #[serde(default)]
    pub muted: bool,

    /// The main track holds the primary footage.
    #[serde(default)]
    pub is_main: bool,
}

/// An element placed on a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineElement {
    Media(MediaElement),
    Text(TextElement),
}

/// Element referencing a media item by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaElement {
    pub id: String,
    pub name: String,

    /// Placement on the master timeline (seconds).
    pub start_time: f64,

    /// Untrimmed source duration (seconds).
    pub duration: f64,

    /// Seconds cut from the head of the source.
    #[serde(default)]
    pub trim_start: f64,

    /// Seconds cut from the tail of the source.
    #[serde(default)]
    pub trim_end: f64,

    /// Id of the referenced [`crate::media::MediaItem`].
    pub media_id: String,
}

/// Element carrying its own text content and style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextElement {
    pub id: String,
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub trim_start: f64,
    #[serde(default)]
    pub trim_end: f64,

    pub content: String,
    pub font_size: f32,
    pub font_family: String,
    pub color: String,
    #[serde(default = "default_background")]
    pub background_color: String,
    #[serde(default)]
    pub text_align: TextAlignment,
    #[serde(default)]
    pub font_weight: FontWeight,
    #[serde(default)]
    pub font_style: FontStyle,
    #[serde(default)]
    pub text_decoration: TextDecoration,

    /// Offset from the canvas center (pixels).
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,

    /// Rotation in degrees.
    #[serde(default)]
    pub rotation: f64,

    /// Opacity in `[0.0, 1.0]`.
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

/// Horizontal text alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextAlignment {
    Left,
    #[default]
    Center,
    Right,
}

/// Font weight as offered by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

impl FontWeight {
    /// Numeric CSS weight.
    pub fn css_weight(self) -> u16 {
        match self {
            FontWeight::Normal => 400,
            FontWeight::Bold => 700,
        }
    }
}

/// Font style as offered by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

/// Text decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
    LineThrough,
}

fn default_background() -> String {
    "transparent".to_string()
}

fn default_opacity() -> f32 {
    1.0
}

impl TimelineElement {
    pub fn id(&self) -> &str {
        match self {
            TimelineElement::Media(e) => &e.id,
            TimelineElement::Text(e) => &e.id,
        }
    }

    pub fn start_time(&self) -> f64 {
        match self {
            TimelineElement::Media(e) => e.start_time,
            TimelineElement::Text(e) => e.start_time,
        }
    }

    /// Duration left after trimming both ends.
    pub fn visible_duration(&self) -> f64 {
        let (duration, trim_start, trim_end) = match self {
            TimelineElement::Media(e) => (e.duration, e.trim_start, e.trim_end),
            TimelineElement::Text(e) => (e.duration, e.trim_start, e.trim_end),
        };
        duration - trim_start - trim_end
    }

    /// Master-timeline time at which the element stops being visible.
    pub fn end_time(&self) -> f64 {
        self.start_time() + self.visible_duration()
    }

    /// Whether this element may be placed on a track of the given type.
    pub fn fits_track(&self, track_type: TrackType) -> bool {
        match self {
            TimelineElement::Text(_) => track_type == TrackType::Text,
            TimelineElement::Media(_) => {
                matches!(track_type, TrackType::Media | TrackType::Audio)
            }
        }
    }
}

/// Total timeline duration: the latest element end across all tracks.
///
/// Muted tracks still count, so muting does not shorten an export.
pub fn total_duration(tracks: &[TimelineTrack]) -> f64 {
    tracks
        .iter()
        .flat_map(|track| track.elements.iter())
        .map(TimelineElement::end_time)
        .fold(0.0, f64::max)
}
