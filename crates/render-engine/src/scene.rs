//! Scene roots and declarative node definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use montage_common::error::{MontageError, MontageResult};

use crate::color::parse_color;
use crate::media::FfmpegTools;
use crate::node::{Node, NodeKind, Render, RenderContext, TextNode, TextParams};
use crate::video::{VideoNode, VideoParams};

/// Root of a renderable tree with a fixed output duration.
#[derive(Debug)]
pub struct Scene {
    root: Node,
    duration: f64,
}

impl Scene {
    /// An empty scene lasting `duration` seconds (negative clamps to zero).
    pub fn new(duration: f64) -> Self {
        let duration = duration.max(0.0);
        Self {
            root: Node::new(NodeKind::Scene { duration }),
            duration,
        }
    }

    /// Wrap a node of kind [`NodeKind::Scene`].
    pub fn from_node(root: Node) -> MontageResult<Self> {
        match root.kind {
            NodeKind::Scene { duration } => Ok(Self {
                duration: duration.max(0.0),
                root,
            }),
            _ => Err(MontageError::build(format!(
                "Scene root must be a scene node, found {}",
                root.kind_name()
            ))),
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Frames needed to cover the duration at `fps`: `ceil(duration * fps)`.
    pub fn frame_count(&self, fps: u32) -> u64 {
        frame_count(self.duration, fps)
    }

    pub fn add(&mut self, child: Node) -> &mut Self {
        self.root.add(child);
        self
    }

    pub fn root(&self) -> &Node {
        &self.root
    }
}

#[async_trait]
impl Render for Scene {
    async fn render(&mut self, ctx: &mut RenderContext<'_>, time: f64) -> MontageResult<()> {
        self.root.render(ctx, time).await
    }
}

/// `ceil(duration * fps)`, ignoring float noise below a nanoframe.
pub fn frame_count(duration: f64, fps: u32) -> u64 {
    let exact = duration.max(0.0) * fps as f64;
    (exact - 1e-9).ceil().max(0.0) as u64
}

/// Node kinds accepted in a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Scene,
    Color,
    Video,
    Text,
    Timecode,
    TimeOffset,
}

/// Declarative description of a node tree, as stored in JSON.
///
/// ```json
/// { "type": "scene", "params": { "duration": 5 },
///   "children": [{ "type": "color", "params": { "color": "#202020" } }] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(rename = "type")]
    pub node_type: NodeType,

    #[serde(default)]
    pub params: serde_json::Value,

    #[serde(default)]
    pub children: Vec<NodeDefinition>,
}

#[derive(Deserialize)]
struct SceneParams {
    #[serde(default)]
    duration: f64,
}

#[derive(Deserialize)]
struct ColorParams {
    color: String,
}

#[derive(Deserialize)]
struct VideoDefinitionParams {
    video: String,
    #[serde(flatten)]
    placement: VideoParams,
}

#[derive(Deserialize)]
struct TimeOffsetParams {
    time_offset: f64,
}

fn params<T: serde::de::DeserializeOwned>(def: &NodeDefinition) -> MontageResult<T> {
    let value = if def.params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        def.params.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| MontageError::build(format!("Invalid {:?} node params: {e}", def.node_type)))
}

/// Build a node tree from its definition.
pub fn build_node(def: &NodeDefinition, tools: &FfmpegTools) -> MontageResult<Node> {
    let mut node = match def.node_type {
        NodeType::Scene => {
            let p: SceneParams = params(def)?;
            Node::new(NodeKind::Scene {
                duration: p.duration,
            })
        }
        NodeType::Color => {
            let p: ColorParams = params(def)?;
            Node::color(parse_color(&p.color)?)
        }
        NodeType::Video => {
            let p: VideoDefinitionParams = params(def)?;
            Node::video(VideoNode::from_locator(p.video, tools.clone(), p.placement))
        }
        NodeType::Text => {
            let p: TextParams = params(def)?;
            Node::text(TextNode::try_from(p)?)
        }
        NodeType::Timecode => Node::timecode(),
        NodeType::TimeOffset => {
            let p: TimeOffsetParams = params(def)?;
            Node::time_offset(p.time_offset)
        }
    };

    for child in &def.children {
        node.add(build_node(child, tools)?);
    }
    Ok(node)
}

/// Build a scene from a definition whose root is a `scene` node.
pub fn build_scene_from_definition(
    def: &NodeDefinition,
    tools: &FfmpegTools,
) -> MontageResult<Scene> {
    if def.node_type != NodeType::Scene {
        return Err(MontageError::build(format!(
            "Scene definition root must be a scene node, found {:?}",
            def.node_type
        )));
    }
    Scene::from_node(build_node(def, tools)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(json: &str) -> NodeDefinition {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(Scene::new(2.5).frame_count(30), 75);
        assert_eq!(Scene::new(0.1).frame_count(30), 3);
        assert_eq!(Scene::new(1.01).frame_count(30), 31);
        assert_eq!(Scene::new(0.0).frame_count(30), 0);
        assert_eq!(Scene::new(-3.0).frame_count(30), 0);
    }

    #[test]
    fn test_build_scene_from_definition() {
        let def = definition(
            r##"{
                "type": "scene",
                "params": { "duration": 4 },
                "children": [
                    { "type": "color", "params": { "color": "#202020" } },
                    { "type": "time_offset", "params": { "time_offset": 1.5 }, "children": [
                        { "type": "video", "params": { "video": "file:///clips/a.mp4", "trim_start": 0.5 } }
                    ] },
                    { "type": "text", "params": { "text": "Title", "x": 640, "y": 360, "duration": 2 } },
                    { "type": "timecode" }
                ]
            }"##,
        );
        let scene = build_scene_from_definition(&def, &FfmpegTools::default()).unwrap();
        assert_eq!(scene.duration(), 4.0);
        let kinds: Vec<_> = scene.root().children().iter().map(Node::kind_name).collect();
        assert_eq!(kinds, ["color", "time_offset", "text", "timecode"]);

        let NodeKind::Video(video) = &scene.root().children()[1].children()[0].kind else {
            panic!("expected video node");
        };
        assert_eq!(video.locator(), Some("file:///clips/a.mp4"));
        assert_eq!(video.params().trim_start, 0.5);
        assert_eq!(video.params().duration, None);
    }

    #[test]
    fn test_non_scene_root_rejected() {
        let def = definition(r#"{ "type": "timecode" }"#);
        let err = build_scene_from_definition(&def, &FfmpegTools::default()).unwrap_err();
        assert!(err.to_string().contains("must be a scene node"));
    }

    #[test]
    fn test_invalid_params_are_build_errors() {
        let def = definition(r#"{ "type": "color", "params": { "colour": "red" } }"#);
        let err = build_node(&def, &FfmpegTools::default()).unwrap_err();
        assert!(matches!(err, MontageError::Build { .. }));

        let def = definition(r#"{ "type": "color", "params": { "color": "chartreuse-ish" } }"#);
        assert!(build_node(&def, &FfmpegTools::default()).is_err());
    }

    #[test]
    fn test_non_ascii_hex_color_is_build_error() {
        let def = definition(r##"{ "type": "color", "params": { "color": "#éa" } }"##);
        let err = build_node(&def, &FfmpegTools::default()).unwrap_err();
        assert!(matches!(err, MontageError::Build { .. }));

        let def = definition(r##"{ "type": "text", "params": { "text": "Hi", "color": "#aaaaaéa" } }"##);
        assert!(matches!(
            build_node(&def, &FfmpegTools::default()),
            Err(MontageError::Build { .. })
        ));
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let result: Result<NodeDefinition, _> = serde_json::from_str(r#"{ "type": "blur" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_node_requires_scene_kind() {
        assert!(Scene::from_node(Node::timecode()).is_err());
        let scene = Scene::from_node(Node::new(NodeKind::Scene { duration: 2.0 })).unwrap();
        assert_eq!(scene.frame_count(25), 50);
    }

    proptest::proptest! {
        #[test]
        fn frame_count_matches_whole_frame_durations(frames in 0u64..100_000, fps in 1u32..240) {
            let duration = frames as f64 / fps as f64;
            proptest::prop_assert_eq!(frame_count(duration, fps), frames);
        }

        #[test]
        fn last_frame_starts_inside_duration(duration in 0.001f64..600.0, fps in 1u32..240) {
            let count = frame_count(duration, fps);
            proptest::prop_assert!(count >= 1);
            proptest::prop_assert!((count - 1) as f64 / (fps as f64) < duration);
        }
    }
}
