//! Resource management
//!
//! Ownership of GPU objects, texture files, shader binaries and sample geometry.

mod mesh;
mod registry;
mod shader;
mod texture;

pub use mesh::*;
pub use registry::*;
pub use shader::*;
pub use texture::*;
