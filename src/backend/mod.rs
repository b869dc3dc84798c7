//! Backend abstraction layer
//!
//! Provides the device and surface traits the lifecycle protocol is written
//! against, a Vulkan implementation and an in-memory implementation for tests.

pub mod mapping;
pub mod traits;
pub mod types;
pub mod vulkan;

#[cfg(feature = "dummy")]
pub mod dummy;

pub use mapping::{upload_slice, Mapping};
pub use traits::*;
pub use types::*;
