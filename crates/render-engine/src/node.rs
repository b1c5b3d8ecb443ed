//! Scene graph nodes.
//!
//! A [`Node`] is a closed [`NodeKind`] plus an ordered list of owned
//! children. Rendering walks the tree depth-first; children render in list
//! order, so later children paint over earlier ones.

use async_trait::async_trait;
use serde::Deserialize;

use montage_common::error::MontageResult;

use crate::color::{parse_color, Paint, WHITE};
use crate::surface::{FontSpec, StateGuard, Surface, TextAlign, TextBaseline};
use crate::video::VideoNode;

/// Everything a node needs while drawing one frame.
pub struct RenderContext<'a> {
    pub surface: &'a mut dyn Surface,
    /// Frame rate of the renderer driving this pass.
    pub fps: u32,
}

/// Something that can draw itself at a point on the timeline.
#[async_trait]
pub trait Render: Send {
    async fn render(&mut self, ctx: &mut RenderContext<'_>, time: f64) -> MontageResult<()>;
}

/// A node in the scene tree.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    children: Vec<Node>,
}

/// Closed set of node behaviours.
#[derive(Debug)]
pub enum NodeKind {
    /// Tree root. Renders its children unchanged.
    Scene { duration: f64 },
    /// Solid fill over the whole surface.
    Color(ColorNode),
    /// Frames from a media source, placed on the timeline.
    Video(VideoNode),
    /// A single line of text visible inside a time window.
    Text(TextNode),
    /// `MM:SS:FF` burn-in in the top-left corner.
    Timecode,
    /// Shifts the time seen by the subtree by the given seconds.
    TimeOffset(f64),
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    pub fn color(color: Paint) -> Self {
        Self::new(NodeKind::Color(ColorNode { color }))
    }

    pub fn text(text: TextNode) -> Self {
        Self::new(NodeKind::Text(text))
    }

    pub fn video(video: VideoNode) -> Self {
        Self::new(NodeKind::Video(video))
    }

    pub fn timecode() -> Self {
        Self::new(NodeKind::Timecode)
    }

    pub fn time_offset(offset: f64) -> Self {
        Self::new(NodeKind::TimeOffset(offset))
    }

    /// Append a child. The child is moved in, so it has exactly one parent.
    pub fn add(&mut self, child: Node) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Builder-style [`Node::add`].
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Short name of the node kind, as used in node definitions.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Scene { .. } => "scene",
            NodeKind::Color(_) => "color",
            NodeKind::Video(_) => "video",
            NodeKind::Text(_) => "text",
            NodeKind::Timecode => "timecode",
            NodeKind::TimeOffset(_) => "time_offset",
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }
}

#[async_trait]
impl Render for Node {
    async fn render(&mut self, ctx: &mut RenderContext<'_>, time: f64) -> MontageResult<()> {
        match &mut self.kind {
            NodeKind::Scene { .. } => render_children(&mut self.children, ctx, time).await,
            NodeKind::Color(color) => {
                color.draw(&mut *ctx.surface);
                render_children(&mut self.children, ctx, time).await
            }
            NodeKind::Text(text) => {
                text.draw(&mut *ctx.surface, time);
                render_children(&mut self.children, ctx, time).await
            }
            NodeKind::Timecode => {
                draw_timecode(&mut *ctx.surface, time, ctx.fps);
                render_children(&mut self.children, ctx, time).await
            }
            NodeKind::Video(video) => {
                render_children(&mut self.children, ctx, time).await?;
                video.draw(ctx, time).await
            }
            NodeKind::TimeOffset(offset) => {
                let local = time - *offset;
                render_children(&mut self.children, ctx, local).await
            }
        }
    }
}

async fn render_children(
    children: &mut [Node],
    ctx: &mut RenderContext<'_>,
    time: f64,
) -> MontageResult<()> {
    for child in children.iter_mut() {
        child.render(ctx, time).await?;
    }
    Ok(())
}

/// Solid color fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorNode {
    pub color: Paint,
}

impl ColorNode {
    fn draw(&self, surface: &mut dyn Surface) {
        let mut surface = StateGuard::new(surface);
        surface.state_mut().fill = self.color;
        let (w, h) = (surface.width() as f64, surface.height() as f64);
        surface.fill_rect(0.0, 0.0, w, h);
    }
}

/// Text drawn while `time_start <= t < time_start + duration`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub font: FontSpec,
    pub text_align: TextAlign,
    pub text_baseline: TextBaseline,
    pub color: Paint,
    pub opacity: f32,
    pub x: f64,
    pub y: f64,
    pub time_start: f64,
    pub duration: f64,
}

impl TextNode {
    pub fn is_in_range(&self, time: f64) -> bool {
        time >= self.time_start && time < self.time_start + self.duration
    }

    fn draw(&self, surface: &mut dyn Surface, time: f64) {
        if !self.is_in_range(time) {
            return;
        }

        let mut surface = StateGuard::new(surface);
        let state = surface.state_mut();
        state.font = self.font.clone();
        state.text_align = self.text_align;
        state.text_baseline = self.text_baseline;
        state.fill = self.color;
        state.global_alpha = self.opacity.clamp(0.0, 1.0);
        surface.fill_text(&self.text, self.x, self.y);
    }
}

/// Parameters of a text node as written in a node definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextParams {
    pub text: String,
    pub font_size: f32,
    pub font_family: String,
    pub font_weight: u16,
    /// `"normal"` or `"italic"`.
    pub font_style: String,
    pub text_align: TextAlign,
    pub text_baseline: TextBaseline,
    pub color: String,
    pub opacity: f32,
    pub x: f64,
    pub y: f64,
    pub time_start: f64,
    pub duration: f64,
}

impl Default for TextParams {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 48.0,
            font_family: "sans-serif".to_string(),
            font_weight: 400,
            font_style: "normal".to_string(),
            text_align: TextAlign::Center,
            text_baseline: TextBaseline::Middle,
            color: "#ffffff".to_string(),
            opacity: 1.0,
            x: 0.0,
            y: 0.0,
            time_start: 0.0,
            duration: f64::INFINITY,
        }
    }
}

impl TryFrom<TextParams> for TextNode {
    type Error = montage_common::error::MontageError;

    fn try_from(params: TextParams) -> MontageResult<Self> {
        let color = parse_color(&params.color)?;
        Ok(TextNode {
            text: params.text,
            font: FontSpec {
                family: params.font_family,
                size: params.font_size,
                weight: params.font_weight,
                italic: params.font_style.eq_ignore_ascii_case("italic"),
            },
            text_align: params.text_align,
            text_baseline: params.text_baseline,
            color,
            opacity: params.opacity,
            x: params.x,
            y: params.y,
            time_start: params.time_start,
            duration: params.duration,
        })
    }
}

const TIMECODE_FONT_SIZE: f32 = 24.0;
const TIMECODE_MARGIN: f64 = 12.0;

fn draw_timecode(surface: &mut dyn Surface, time: f64, fps: u32) {
    let label = format_timecode(time, fps);
    let mut surface = StateGuard::new(surface);
    let state = surface.state_mut();
    state.fill = WHITE;
    state.global_alpha = 1.0;
    state.font = FontSpec {
        family: "monospace".to_string(),
        size: TIMECODE_FONT_SIZE,
        weight: 400,
        italic: false,
    };
    state.text_align = TextAlign::Left;
    state.text_baseline = TextBaseline::Top;
    surface.fill_text(&label, TIMECODE_MARGIN, TIMECODE_MARGIN);
}

/// Format seconds as `MM:SS:FF` at the given frame rate.
///
/// Negative times are prefixed with `-`.
pub fn format_timecode(time: f64, fps: u32) -> String {
    let fps = fps.max(1) as u64;
    let sign = if time < 0.0 { "-" } else { "" };
    let total_frames = (time.abs() * fps as f64).round() as u64;
    let frames = total_frames % fps;
    let total_secs = total_frames / fps;
    format!(
        "{sign}{:02}:{:02}:{:02}",
        total_secs / 60,
        total_secs % 60,
        frames
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Canvas, DrawState};
    use crate::text::FontBook;
    use image::Rgba;
    use std::sync::Arc;

    fn canvas() -> Canvas {
        Canvas::new(4, 4, Arc::new(FontBook::new())).unwrap()
    }

    #[test]
    fn test_format_timecode() {
        assert_eq!(format_timecode(0.0, 30), "00:00:00");
        assert_eq!(format_timecode(1.5, 30), "00:01:15");
        assert_eq!(format_timecode(61.0 + 29.0 / 30.0, 30), "01:01:29");
        assert_eq!(format_timecode(-2.0, 25), "-00:02:00");
    }

    #[test]
    fn test_text_window_is_half_open() {
        let node = TextNode::try_from(TextParams {
            text: "hi".to_string(),
            time_start: 2.0,
            duration: 3.0,
            ..Default::default()
        })
        .unwrap();
        assert!(!node.is_in_range(1.999));
        assert!(node.is_in_range(2.0));
        assert!(node.is_in_range(3.5));
        assert!(!node.is_in_range(5.0));
    }

    #[test]
    fn test_text_params_reject_bad_color() {
        let err = TextNode::try_from(TextParams {
            color: "nope".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("Invalid color value"));
    }

    #[test]
    fn test_add_takes_ownership_and_counts() {
        let mut root = Node::new(NodeKind::Scene { duration: 1.0 });
        root.add(Node::color(WHITE))
            .add(Node::time_offset(1.0).with_child(Node::timecode()));
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.count(), 4);
        assert_eq!(root.children()[1].kind_name(), "time_offset");
    }

    #[tokio::test]
    async fn test_later_children_paint_over_earlier() {
        let mut surface = canvas();
        let mut root = Node::new(NodeKind::Scene { duration: 1.0 })
            .with_child(Node::color(Rgba([255, 0, 0, 255])))
            .with_child(Node::color(Rgba([0, 0, 255, 255])));
        let mut ctx = RenderContext {
            surface: &mut surface,
            fps: 30,
        };
        root.render(&mut ctx, 0.0).await.unwrap();
        assert!(surface.pixels().pixels().all(|p| *p == Rgba([0, 0, 255, 255])));
    }

    #[tokio::test]
    async fn test_text_restores_draw_state() {
        let mut surface = canvas();
        let mut node = Node::text(
            TextNode::try_from(TextParams {
                text: "hi".to_string(),
                opacity: 0.3,
                color: "red".to_string(),
                ..Default::default()
            })
            .unwrap(),
        );
        let mut ctx = RenderContext {
            surface: &mut surface,
            fps: 30,
        };
        node.render(&mut ctx, 0.5).await.unwrap();
        assert_eq!(surface.state(), &DrawState::default());
    }
}
