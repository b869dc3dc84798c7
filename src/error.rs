//! Error types for the lifecycle protocol.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::lifecycle::LifecycleState;
use crate::resources::TextureError;

/// Errors surfaced to the host by setup, per-frame recording and teardown.
#[derive(Debug, Error)]
pub enum Error {
    /// A device or surface call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A texture file could not be read or is not a supported TGA variant.
    #[error(transparent)]
    Texture(#[from] TextureError),

    /// A SPIR-V binary could not be read or is malformed.
    #[error("Failed to load shader {}: {reason}", path.display())]
    ShaderLoad { path: PathBuf, reason: String },

    /// A vertex attribute does not fit inside its binding's stride.
    #[error("Invalid vertex layout: {0}")]
    InvalidVertexLayout(String),

    /// Descriptor layout, pipeline layout and writes disagree about a slot.
    #[error("Descriptor binding {binding} mismatch: {reason}")]
    DescriptorMismatch { binding: u32, reason: String },

    /// A lifecycle notification arrived in a state that does not accept it.
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DescriptorMismatch {
            binding: 1,
            reason: "layout declares UniformBuffer, write provides CombinedImageSampler".into(),
        };
        assert_eq!(
            err.to_string(),
            "Descriptor binding 1 mismatch: layout declares UniformBuffer, write provides CombinedImageSampler"
        );

        let err = Error::InvalidState {
            operation: "frame",
            state: LifecycleState::Uninitialized,
        };
        assert_eq!(err.to_string(), "frame is not valid in state Uninitialized");
    }

    #[test]
    fn test_backend_error_is_transparent() {
        let err: Error = BackendError::SurfaceLost.into();
        assert_eq!(err.to_string(), "Surface lost");
    }
}
