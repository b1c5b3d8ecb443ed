//! Scene construction from project state.

use montage_project_model::media::{find_media, MediaItem};
use montage_project_model::project::{CanvasSize, Project};
use montage_project_model::timeline::{
    FontStyle, MediaElement, TextAlignment, TextElement, TimelineElement, TimelineTrack,
};

use crate::color::{parse_color, WHITE};
use crate::media::FfmpegTools;
use crate::node::{Node, TextNode};
use crate::scene::Scene;
use crate::surface::{FontSpec, TextAlign, TextBaseline};
use crate::video::{VideoNode, VideoParams};

/// Turns timeline tracks into a scene tree.
#[derive(Debug, Clone, Default)]
pub struct SceneBuilder {
    tools: FfmpegTools,
}

impl SceneBuilder {
    pub fn new(tools: FfmpegTools) -> Self {
        Self { tools }
    }

    /// Build the scene for a whole project.
    pub fn build_project(&self, project: &Project) -> Scene {
        self.build(
            project.canvas_size,
            &project.tracks,
            &project.media_items,
            project.duration(),
        )
    }

    /// Build a scene lasting `duration` seconds.
    ///
    /// Tracks are painted back to front, so the first track ends up on top.
    /// Muted tracks are left out. Elements that cannot be resolved are
    /// skipped with a warning; building never fails.
    pub fn build(
        &self,
        canvas_size: CanvasSize,
        tracks: &[TimelineTrack],
        media_items: &[MediaItem],
        duration: f64,
    ) -> Scene {
        let mut scene = Scene::new(duration);
        let mut skipped = 0usize;

        for track in tracks.iter().rev().filter(|track| !track.muted) {
            for element in &track.elements {
                let node = match element {
                    TimelineElement::Media(media) => self.media_node(media, media_items),
                    TimelineElement::Text(text) => Some(text_node(text, canvas_size)),
                };
                match node {
                    Some(node) => {
                        scene.add(node);
                    }
                    None => skipped += 1,
                }
            }
        }

        scene.add(Node::timecode());

        tracing::debug!(
            nodes = scene.root().count(),
            skipped,
            duration = scene.duration(),
            "Scene built"
        );
        scene
    }

    fn media_node(&self, element: &MediaElement, media_items: &[MediaItem]) -> Option<Node> {
        let Some(item) = find_media(media_items, &element.media_id) else {
            tracing::warn!(
                element = %element.id,
                media_id = %element.media_id,
                "Media item not found, skipping element"
            );
            return None;
        };

        if !item.is_visual() {
            tracing::debug!(element = %element.id, "Audio element has no visual node");
            return None;
        }

        let Some(locator) = item.path.as_deref() else {
            tracing::warn!(element = %element.id, media_id = %item.id, "Media item has no source, skipping element");
            return None;
        };

        Some(Node::video(VideoNode::from_locator(
            locator,
            self.tools.clone(),
            VideoParams {
                duration: Some(element.duration),
                time_offset: element.start_time,
                trim_start: element.trim_start,
                trim_end: element.trim_end,
            },
        )))
    }
}

/// Build a scene with the default `ffmpeg` and `ffprobe` from `PATH`.
pub fn build_scene(
    canvas_size: CanvasSize,
    tracks: &[TimelineTrack],
    media_items: &[MediaItem],
    duration: f64,
) -> Scene {
    SceneBuilder::default().build(canvas_size, tracks, media_items, duration)
}

fn text_node(element: &TextElement, canvas_size: CanvasSize) -> Node {
    let color = parse_color(&element.color).unwrap_or_else(|err| {
        tracing::warn!(element = %element.id, error = %err, "Falling back to white text");
        WHITE
    });

    let text_align = match element.text_align {
        TextAlignment::Left => TextAlign::Left,
        TextAlignment::Center => TextAlign::Center,
        TextAlignment::Right => TextAlign::Right,
    };

    Node::text(TextNode {
        text: element.content.clone(),
        font: FontSpec {
            family: element.font_family.clone(),
            size: element.font_size,
            weight: element.font_weight.css_weight(),
            italic: element.font_style == FontStyle::Italic,
        },
        text_align,
        text_baseline: TextBaseline::Middle,
        color,
        opacity: element.opacity,
        x: element.x + canvas_size.width as f64 / 2.0,
        y: element.y + canvas_size.height as f64 / 2.0,
        time_start: element.start_time,
        duration: element.duration - element.trim_end - element.trim_start,
    })
}
