//! Frame resource lifecycle and command recording for Vulkan samples
//!
//! A host window drives a [`LifecycleHandler`] through init, frames, resizes
//! and close. The bundled [`SampleRenderer`] shows the protocol end to end:
//! - GPU objects are owned by a [`ResourceRegistry`] and released once, in
//!   reverse dependency order
//! - pipelines are immutable and rebuilt for a new extent on resize
//! - every frame is recorded into one reusable command buffer in a fixed order
//!
//! All device access goes through the [`backend::Device`] trait. The Vulkan
//! implementation lives in [`backend::vulkan`]; the `dummy` feature adds an
//! in-memory device used by the tests.

pub mod backend;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod pipeline;
pub mod resources;
pub mod sample;
pub mod window;

use std::path::PathBuf;

pub use error::{Error, Result};
pub use frame::{ClearColor, FrameRecorder};
pub use lifecycle::{InitArgs, LifecycleHandler, LifecycleState};
pub use pipeline::{PipelineBuilder, PipelineState, RenderContext};
pub use resources::ResourceRegistry;
pub use sample::{SampleConfig, SampleKind, SampleRenderer};

/// Configuration for the window host
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Present in FIFO mode
    pub vsync: bool,
    /// Enable the Khronos validation layer if it is installed
    pub validation: bool,
    /// Close after this many frames
    pub max_frames: Option<u64>,
    /// Directory shaders and textures are loaded from
    pub resource_dir: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            title: "vk-samples".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
            max_frames: None,
            resource_dir: PathBuf::from("resource"),
        }
    }
}
