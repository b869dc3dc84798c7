//! Host-facing lifecycle protocol
//!
//! The host owns the window, the device and the surface and drives one
//! [`LifecycleHandler`] through init, any number of frames and resizes, and a
//! single close. Calls arrive one at a time on the render-loop thread.

use crate::backend::{Device, HostSurface, QueueHandle};
use crate::error::Result;

/// Queue information handed to the handler at init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitArgs {
    pub graphics_queue: QueueHandle,
    pub graphics_queue_family: u32,
}

/// Where a handler is in its lifetime.
///
/// `Uninitialized -> Built -> (Resizing -> Built)* -> Destroyed`. Frames are
/// only accepted in `Built`; close is accepted from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Built,
    /// A pipeline rebuild is in progress, or failed and left no usable pipeline
    Resizing,
    Destroyed,
}

impl LifecycleState {
    pub fn accepts_frames(&self) -> bool {
        matches!(self, LifecycleState::Built)
    }
}

/// Receiver of host lifecycle notifications
pub trait LifecycleHandler {
    /// Whether the host must give the render pass a depth attachment
    fn needs_depth_attachment(&self) -> bool {
        false
    }

    fn state(&self) -> LifecycleState;

    /// Create every resource the handler draws with
    fn on_init<D, S>(&mut self, device: &mut D, surface: &S, args: InitArgs) -> Result<()>
    where
        D: Device + ?Sized,
        S: HostSurface + ?Sized;

    /// Record, submit and present one frame
    fn on_frame<D, S>(&mut self, device: &mut D, surface: &mut S, queue: QueueHandle) -> Result<()>
    where
        D: Device + ?Sized,
        S: HostSurface + ?Sized;

    /// Rebuild whatever depends on the target size. Called after the host has
    /// recreated the swapchain.
    fn on_resize<D, S>(&mut self, device: &mut D, surface: &S) -> Result<()>
    where
        D: Device + ?Sized,
        S: HostSurface + ?Sized;

    /// Release everything. The device is idle when this is called.
    fn on_close<D: Device + ?Sized>(&mut self, device: &mut D) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_built_accepts_frames() {
        assert!(LifecycleState::Built.accepts_frames());
        assert!(!LifecycleState::Uninitialized.accepts_frames());
        assert!(!LifecycleState::Resizing.accepts_frames());
        assert!(!LifecycleState::Destroyed.accepts_frames());
    }
}
