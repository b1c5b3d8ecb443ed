//! Montage Render Engine
//!
//! Node-based scene compositor and frame-accurate export pipeline.
//!
//! # Pipeline Architecture
//!
//! ```text
//! project.json ──┐
//!                ├── SceneBuilder ──► Scene (node tree)
//! media items ───┘                        │
//!                                         ▼
//!                       Renderer::render(scene, frame i)   (t = i / fps)
//!                                         │
//!                                         ▼
//!                       EncoderSink::add(frame, i / fps, 1 / fps)
//!                                         │
//!                                         ▼
//!                          ExportOutput (container bytes + mime type)
//! ```
//!
//! Frames are rendered strictly in order. Time always comes from the frame
//! index, never from a wall clock.

pub mod build;
pub mod color;
pub mod encoder;
pub mod export;
pub mod media;
pub mod node;
pub mod renderer;
pub mod scene;
pub mod surface;
pub mod text;
pub mod video;

pub use build::{build_scene, SceneBuilder};
pub use encoder::{EncodeSettings, EncoderSink, FfmpegSink};
pub use export::*;
pub use media::{FfmpegMedia, FfmpegTools};
pub use node::{Node, NodeKind, Render, RenderContext, TextNode};
pub use renderer::Renderer;
pub use scene::{build_node, build_scene_from_definition, NodeDefinition, NodeType, Scene};
pub use surface::{Canvas, StateGuard, Surface};
pub use text::FontBook;
pub use video::{MediaHandle, VideoNode, VideoParams};
