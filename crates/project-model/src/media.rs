//! Media items referenced by timeline elements.

use serde::{Deserialize, Serialize};

/// Kind of media a [`MediaItem`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Image,
    Audio,
}

/// A media library entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    /// Unique id referenced by media elements.
    pub id: String,

    /// Display name.
    pub name: String,

    #[serde(rename = "type")]
    pub media_type: MediaType,

    /// Source locator: a filesystem path or `file://` URL.
    #[serde(default)]
    pub path: Option<String>,

    /// Intrinsic duration in seconds, when known.
    #[serde(default)]
    pub duration: Option<f64>,

    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
}

impl MediaItem {
    /// Whether this item produces pixels when composited.
    pub fn is_visual(&self) -> bool {
        matches!(self.media_type, MediaType::Video | MediaType::Image)
    }
}

/// Look up a media item by id.
pub fn find_media<'a>(items: &'a [MediaItem], id: &str) -> Option<&'a MediaItem> {
    items.iter().find(|item| item.id == id)
}
