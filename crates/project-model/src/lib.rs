//! Montage Project Model
//!
//! Defines the data contracts the editor hands to the render engine:
//! - **Timeline:** Ordered tracks of media and text elements with trims
//! - **Media:** Media items referenced by id from media elements
//! - **Project:** Top-level metadata, canvas size, frame rate, export settings
//!
//! All times are in seconds. Text positions are relative to the canvas center.

pub mod media;
pub mod project;
pub mod timeline;

pub use media::*;
pub use project::*;
pub use timeline::*;
