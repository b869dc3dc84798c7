//! Per-frame command recording
//!
//! One reusable command buffer is re-recorded for every frame in a fixed
//! order: acquire, begin, optional transition, render pass with clears,
//! binds, one draw, end, submit, present. A frame either completes every step
//! or returns the first error; the frame counter only advances on success.

use crate::backend::*;
use crate::error::Result;
use crate::pipeline::RenderContext;

/// Color the target is cleared to at the start of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearColor {
    Static([f32; 4]),
    /// Blue channel follows `0.5 * sin(frame * 0.1) + 0.5`
    Pulse,
}

pub const DEFAULT_CLEAR: [f32; 4] = [0.125, 0.25, 0.4, 1.0];

/// Animated blue channel of [`ClearColor::Pulse`]
pub fn pulse_blue(frame: u64) -> f32 {
    (0.5 * (frame as f64 * 0.1).sin() + 0.5) as f32
}

impl ClearColor {
    pub fn at(&self, frame: u64) -> [f32; 4] {
        match self {
            ClearColor::Static(color) => *color,
            ClearColor::Pulse => [0.125, 0.25, pulse_blue(frame), 1.0],
        }
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        ClearColor::Static(DEFAULT_CLEAR)
    }
}

/// The one draw issued per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Draw { vertex_count: u32 },
    Indexed { index_count: u32 },
}

/// Everything bound for a draw frame
#[derive(Debug, Clone, Copy)]
pub struct DrawBindings<'a> {
    pub context: &'a RenderContext,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<(BufferHandle, IndexFormat)>,
    pub descriptor_set: Option<DescriptorSetHandle>,
    pub draw: DrawCall,
}

/// What a successfully submitted frame used
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedFrame {
    pub index: u64,
    pub image: ImageHandle,
    pub clear_color: [f32; 4],
}

/// Records and submits frames into one reusable command buffer
#[derive(Debug)]
pub struct FrameRecorder {
    command_buffer: CommandBufferHandle,
    frame_count: u64,
}

impl FrameRecorder {
    pub fn new(command_buffer: CommandBufferHandle) -> Self {
        Self {
            command_buffer,
            frame_count: 0,
        }
    }

    /// Frames submitted so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    /// Record, submit and present one frame.
    ///
    /// With `draw` set the frame runs the render pass and issues one draw;
    /// without it the acquired image is only cleared. The caller guarantees
    /// the previous submission of this command buffer has completed.
    pub fn record_frame<D, S>(
        &mut self,
        device: &mut D,
        surface: &mut S,
        queue: QueueHandle,
        clear: &ClearColor,
        draw: Option<&DrawBindings<'_>>,
    ) -> Result<RecordedFrame>
    where
        D: Device + ?Sized,
        S: HostSurface + ?Sized,
    {
        let clear_color = clear.at(self.frame_count);
        let cmd = self.command_buffer;

        let acquired = surface.acquire_next_image()?;
        let framebuffer = match draw {
            Some(_) => Some(surface.acquire_next_framebuffer()?),
            None => None,
        };

        device.begin_command_buffer(cmd)?;
        match (draw, framebuffer) {
            (Some(draw), Some(framebuffer)) => {
                let begin = RenderPassBegin {
                    render_pass: surface.render_pass(),
                    framebuffer,
                    extent: draw.context.extent,
                    clear_values: clear_values(clear_color, surface.has_depth_attachment()),
                };
                record_draw(device, cmd, &acquired, &begin, draw);
            }
            _ => record_clear(device, cmd, acquired.image, clear_color),
        }
        device.end_command_buffer(cmd)?;

        device.queue_submit(
            queue,
            &SubmitInfo {
                command_buffer: cmd,
                wait_semaphore: acquired.wait_semaphore,
                signal_semaphore: acquired.signal_semaphore,
                fence: None,
            },
        )?;
        surface.swap_buffers()?;

        let index = self.frame_count;
        self.frame_count += 1;
        log::trace!("Submitted frame {}", index);

        Ok(RecordedFrame {
            index,
            image: acquired.image,
            clear_color,
        })
    }
}

fn clear_values(color: [f32; 4], depth: bool) -> Vec<ClearValue> {
    let mut values = vec![ClearValue::Color(color)];
    if depth {
        values.push(ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 0,
        });
    }
    values
}

fn record_draw<D: Device + ?Sized>(
    device: &mut D,
    cmd: CommandBufferHandle,
    acquired: &AcquiredImage,
    begin: &RenderPassBegin,
    draw: &DrawBindings<'_>,
) {
    if acquired.needs_transition {
        device.cmd_image_barrier(
            cmd,
            &ImageBarrier {
                image: acquired.image,
                old_layout: ImageLayout::PresentSrc,
                new_layout: ImageLayout::ColorAttachment,
                src_access: AccessFlags::MEMORY_READ,
                dst_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
                depth: false,
            },
        );
    }

    device.cmd_begin_render_pass(cmd, begin);
    device.cmd_bind_pipeline(cmd, draw.context.pipeline);
    device.cmd_bind_vertex_buffer(cmd, 0, draw.vertex_buffer);
    if let Some((buffer, format)) = draw.index_buffer {
        device.cmd_bind_index_buffer(cmd, buffer, format);
    }
    if let Some(set) = draw.descriptor_set {
        device.cmd_bind_descriptor_set(cmd, draw.context.pipeline_layout, set);
    }
    match draw.draw {
        DrawCall::Draw { vertex_count } => device.cmd_draw(cmd, vertex_count, 1, 0, 0),
        DrawCall::Indexed { index_count } => device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0),
    }
    device.cmd_end_render_pass(cmd);

    if acquired.needs_transition {
        device.cmd_image_barrier(
            cmd,
            &ImageBarrier {
                image: acquired.image,
                old_layout: ImageLayout::ColorAttachment,
                new_layout: ImageLayout::PresentSrc,
                src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access: AccessFlags::MEMORY_READ,
                depth: false,
            },
        );
    }
}

fn record_clear<D: Device + ?Sized>(
    device: &mut D,
    cmd: CommandBufferHandle,
    image: ImageHandle,
    color: [f32; 4],
) {
    device.cmd_image_barrier(
        cmd,
        &ImageBarrier {
            image,
            old_layout: ImageLayout::PresentSrc,
            new_layout: ImageLayout::TransferDst,
            src_access: AccessFlags::MEMORY_READ,
            dst_access: AccessFlags::TRANSFER_WRITE,
            depth: false,
        },
    );
    device.cmd_clear_color_image(cmd, image, color);
    device.cmd_image_barrier(
        cmd,
        &ImageBarrier {
            image,
            old_layout: ImageLayout::TransferDst,
            new_layout: ImageLayout::PresentSrc,
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_access: AccessFlags::MEMORY_READ,
            depth: false,
        },
    );
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DeviceCall, DummyDevice, DummySurface, FailPoint};

    fn recorder(device: &mut DummyDevice) -> FrameRecorder {
        let pool = device.create_command_pool(0).unwrap();
        FrameRecorder::new(device.allocate_command_buffers(pool, 1).unwrap()[0])
    }

    #[test]
    fn test_pulse_values() {
        assert_eq!(pulse_blue(0), 0.5);
        assert_eq!(ClearColor::Pulse.at(0), [0.125, 0.25, 0.5, 1.0]);
        assert_eq!(ClearColor::default().at(42), DEFAULT_CLEAR);
    }

    #[test]
    fn test_clear_only_sequence() {
        let mut device = DummyDevice::new();
        let mut surface = DummySurface::new(Extent2d::new(64, 64), false);
        let mut recorder = recorder(&mut device);
        device.clear_calls();

        let queue = device.graphics_queue();
        let frame = recorder
            .record_frame(&mut device, &mut surface, queue, &ClearColor::Pulse, None)
            .unwrap();

        let calls = device.calls();
        assert_eq!(calls.len(), 6);
        assert!(matches!(calls[0], DeviceCall::BeginCommandBuffer(_)));
        assert!(matches!(
            calls[1],
            DeviceCall::ImageBarrier(ImageBarrier {
                old_layout: ImageLayout::PresentSrc,
                new_layout: ImageLayout::TransferDst,
                ..
            })
        ));
        assert_eq!(
            calls[2],
            DeviceCall::ClearColorImage {
                image: frame.image,
                color: [0.125, 0.25, 0.5, 1.0]
            }
        );
        assert!(matches!(
            calls[3],
            DeviceCall::ImageBarrier(ImageBarrier {
                old_layout: ImageLayout::TransferDst,
                new_layout: ImageLayout::PresentSrc,
                ..
            })
        ));
        assert!(matches!(calls[4], DeviceCall::EndCommandBuffer(_)));
        assert!(matches!(calls[5], DeviceCall::QueueSubmit(_)));
        assert_eq!(surface.presented_count(), 1);
        assert_eq!(recorder.frame_count(), 1);
    }

    #[test]
    fn test_failed_submit_keeps_counter() {
        let mut device = DummyDevice::new();
        let mut surface = DummySurface::new(Extent2d::new(64, 64), false);
        let mut recorder = recorder(&mut device);
        device.fail_on(FailPoint::QueueSubmit);

        let queue = device.graphics_queue();
        let result =
            recorder.record_frame(&mut device, &mut surface, queue, &ClearColor::Pulse, None);
        assert!(result.is_err());
        assert_eq!(recorder.frame_count(), 0);
        assert_eq!(surface.presented_count(), 0);

        device.clear_failures();
        let frame = recorder
            .record_frame(&mut device, &mut surface, queue, &ClearColor::Pulse, None)
            .unwrap();
        assert_eq!(frame.index, 0);
        assert_eq!(recorder.frame_count(), 1);
    }

    #[test]
    fn test_failed_acquire_records_nothing() {
        let mut device = DummyDevice::new();
        let mut surface = DummySurface::new(Extent2d::new(64, 64), false);
        let mut recorder = recorder(&mut device);
        surface.set_fail_acquire(true);
        device.clear_calls();

        let queue = device.graphics_queue();
        assert!(recorder
            .record_frame(&mut device, &mut surface, queue, &ClearColor::default(), None)
            .is_err());
        assert!(device.calls().is_empty());
    }
}
