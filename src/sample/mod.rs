//! Sample renderer
//!
//! Every sample is the same [`SampleRenderer`] driven by a different
//! [`SampleConfig`]. A config without draw state clears the swapchain image
//! each frame; otherwise the renderer uploads the geometry, builds descriptors
//! and one pipeline, and issues a single draw per frame.

mod presets;

pub use presets::*;

use std::path::PathBuf;

use glam::{Mat4, Vec3};

use crate::backend::*;
use crate::error::{Error, Result};
use crate::frame::{ClearColor, DrawBindings, DrawCall, FrameRecorder};
use crate::lifecycle::{InitArgs, LifecycleHandler, LifecycleState};
use crate::pipeline::{check_visibility, check_writes, DescriptorBindings, PipelineState, RenderContext};
use crate::resources::{
    create_shader_module, Geometry, ResourceRegistry, TgaImage, Texture, UploadContext,
    SHADER_ENTRY_POINT,
};

/// Binding the transform uniform is written to
pub const UNIFORM_BINDING: u32 = 0;
/// Binding the texture and its sampler are written to
pub const TEXTURE_BINDING: u32 = 1;

const FIELD_OF_VIEW: f32 = std::f32::consts::PI / 3.0;
const Z_NEAR: f32 = 1.0;
const Z_FAR: f32 = 100.0;

/// How the world matrix changes with the frame counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// Rotate about Y by `frame * 0.1`
    SpinY,
    /// `rotY(frame * 0.05) * rotX(frame * 0.01)`
    Tumble,
}

/// Per-frame world/view/projection update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformAnimation {
    pub eye: Vec3,
    pub motion: Motion,
}

impl TransformAnimation {
    pub fn at(&self, frame: u64, aspect: f32) -> TransformUniform {
        let t = frame as f32;
        let world = match self.motion {
            Motion::SpinY => Mat4::from_rotation_y(t * 0.1),
            Motion::Tumble => Mat4::from_rotation_y(t * 0.05) * Mat4::from_rotation_x(t * 0.01),
        };
        TransformUniform {
            world,
            view: Mat4::look_at_rh(self.eye, Vec3::ZERO, Vec3::Y),
            proj: Mat4::perspective_rh(FIELD_OF_VIEW, aspect, Z_NEAR, Z_FAR),
        }
    }
}

/// Draw state of a sample that renders geometry
#[derive(Debug, Clone, PartialEq)]
pub struct DrawConfig {
    pub geometry: Geometry,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub rasterization: RasterizationState,
    pub depth_test: bool,
    pub descriptor_slots: Vec<DescriptorLayoutEntry>,
    pub transform: Option<TransformAnimation>,
    pub texture: Option<PathBuf>,
}

/// One sample, as data
#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub name: String,
    pub clear: ClearColor,
    /// `None` clears the target and draws nothing
    pub draw: Option<DrawConfig>,
}

/// Resources a drawing sample binds every frame
#[derive(Debug)]
struct DrawResources {
    pipeline_state: PipelineState,
    context: RenderContext,
    vertex_buffer: BufferHandle,
    draw: DrawCall,
    index_buffer: Option<BufferHandle>,
    descriptor_set: Option<DescriptorSetHandle>,
    transform: Option<(MemoryHandle, TransformAnimation)>,
}

/// [`LifecycleHandler`] that renders one [`SampleConfig`]
#[derive(Debug)]
pub struct SampleRenderer {
    config: SampleConfig,
    state: LifecycleState,
    registry: Option<ResourceRegistry>,
    /// Freed back to their pool before the pool is destroyed
    command_buffers: Option<(CommandPoolHandle, Vec<CommandBufferHandle>)>,
    recorder: Option<FrameRecorder>,
    resources: Option<DrawResources>,
}

impl SampleRenderer {
    pub fn new(config: SampleConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Uninitialized,
            registry: None,
            command_buffers: None,
            recorder: None,
            resources: None,
        }
    }

    pub fn config(&self) -> &SampleConfig {
        &self.config
    }

    /// Frames submitted since init
    pub fn frame_count(&self) -> u64 {
        self.recorder.as_ref().map_or(0, FrameRecorder::frame_count)
    }

    /// Pipeline currently used for drawing
    pub fn render_context(&self) -> Option<&RenderContext> {
        self.resources.as_ref().map(|resources| &resources.context)
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl LifecycleHandler for SampleRenderer {
    fn needs_depth_attachment(&self) -> bool {
        self.config.draw.as_ref().is_some_and(|draw| draw.depth_test)
    }

    fn state(&self) -> LifecycleState {
        self.state
    }

    fn on_init<D, S>(&mut self, device: &mut D, surface: &S, args: InitArgs) -> Result<()>
    where
        D: Device + ?Sized,
        S: HostSurface + ?Sized,
    {
        // A failed init keeps its registry for on_close, so it cannot be retried
        if self.state != LifecycleState::Uninitialized || self.registry.is_some() {
            return Err(self.invalid("init"));
        }
        log::info!("Initializing sample '{}'", self.config.name);

        // Partially created resources stay in the registry for on_close
        let registry = self.registry.insert(ResourceRegistry::new());

        let pool = registry.create_command_pool(device, args.graphics_queue_family)?;
        let command_buffers = device.allocate_command_buffers(pool, 2)?;
        // 0 records frames, 1 is reserved for one-shot uploads
        let (frame_cmd, upload_cmd) = match self
            .command_buffers
            .insert((pool, command_buffers))
            .1
            .as_slice()
        {
            [frame, upload, ..] => (*frame, *upload),
            other => {
                return Err(BackendError::CommandRecordingFailed(format!(
                    "expected 2 command buffers, got {}",
                    other.len()
                ))
                .into())
            }
        };
        self.recorder = Some(FrameRecorder::new(frame_cmd));

        if let Some(draw) = &self.config.draw {
            let upload = UploadContext {
                queue: args.graphics_queue,
                command_buffer: upload_cmd,
            };
            let resources =
                build_draw_resources(device, surface, registry, &self.config.name, draw, &upload)?;
            self.resources = Some(resources);
        }

        self.state = LifecycleState::Built;
        log::info!(
            "Sample '{}' ready ({} GPU objects)",
            self.config.name,
            registry.len()
        );
        Ok(())
    }

    fn on_frame<D, S>(&mut self, device: &mut D, surface: &mut S, queue: QueueHandle) -> Result<()>
    where
        D: Device + ?Sized,
        S: HostSurface + ?Sized,
    {
        if !self.state.accepts_frames() {
            return Err(self.invalid("frame"));
        }
        let Some(recorder) = self.recorder.as_mut() else {
            return Err(Error::InvalidState {
                operation: "frame",
                state: self.state,
            });
        };

        match &self.resources {
            None => {
                recorder.record_frame(device, surface, queue, &self.config.clear, None)?;
            }
            Some(resources) => {
                if let Some((memory, animation)) = resources.transform {
                    let transform =
                        animation.at(recorder.frame_count(), resources.context.extent.aspect_ratio());
                    Mapping::new(&mut *device, memory)?.write(0, &transform)?;
                }

                let bindings = DrawBindings {
                    context: &resources.context,
                    vertex_buffer: resources.vertex_buffer,
                    index_buffer: resources
                        .index_buffer
                        .map(|buffer| (buffer, IndexFormat::Uint16)),
                    descriptor_set: resources.descriptor_set,
                    draw: resources.draw,
                };
                recorder.record_frame(device, surface, queue, &self.config.clear, Some(&bindings))?;
            }
        }
        Ok(())
    }

    fn on_resize<D, S>(&mut self, device: &mut D, surface: &S) -> Result<()>
    where
        D: Device + ?Sized,
        S: HostSurface + ?Sized,
    {
        // A failed rebuild leaves the state at Resizing; a later resize may retry
        if !matches!(self.state, LifecycleState::Built | LifecycleState::Resizing) {
            return Err(self.invalid("resize"));
        }
        let Some(resources) = self.resources.as_mut() else {
            return Ok(());
        };

        self.state = LifecycleState::Resizing;
        let next = resources.context.rebuild(
            device,
            &resources.pipeline_state,
            surface.render_pass(),
            surface.current_extent(),
        )?;
        std::mem::replace(&mut resources.context, next).retire(device);
        self.state = LifecycleState::Built;
        Ok(())
    }

    fn on_close<D: Device + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        if self.state == LifecycleState::Destroyed {
            log::warn!("Sample '{}' closed twice", self.config.name);
            return Ok(());
        }

        let frames = self.frame_count();
        let mut released = 0;
        if let Some((pool, buffers)) = self.command_buffers.take() {
            device.free_command_buffers(pool, &buffers);
        }
        if let Some(mut registry) = self.registry.take() {
            // The live pipeline is owned by the render context until now
            if let Some(resources) = self.resources.take() {
                registry.track(resources.context.pipeline);
            }
            released = registry.destroy_all(device);
        }
        self.recorder = None;
        self.state = LifecycleState::Destroyed;

        log::info!(
            "Closed sample '{}' after {} frames, released {} GPU objects",
            self.config.name,
            frames,
            released
        );
        Ok(())
    }
}

fn build_draw_resources<D, S>(
    device: &mut D,
    surface: &S,
    registry: &mut ResourceRegistry,
    name: &str,
    draw: &DrawConfig,
    upload: &UploadContext,
) -> Result<DrawResources>
where
    D: Device + ?Sized,
    S: HostSurface + ?Sized,
{
    let vertex_module = create_shader_module(device, registry, &draw.vertex_shader)?;
    let fragment_module = create_shader_module(device, registry, &draw.fragment_shader)?;

    let geometry = &draw.geometry;
    let (vertex_buffer, _) =
        registry.create_buffer_init(device, "vertices", BufferUsage::VERTEX, &geometry.vertex_bytes)?;
    let (index_buffer, draw_call) = match &geometry.indices {
        Some(indices) => {
            let (buffer, _) =
                registry.create_buffer_init(device, "indices", BufferUsage::INDEX, indices)?;
            let index_count = indices.len() as u32;
            (Some(buffer), DrawCall::Indexed { index_count })
        }
        None => (
            None,
            DrawCall::Draw {
                vertex_count: geometry.vertex_count,
            },
        ),
    };

    let mut writes = Vec::new();
    let transform = match draw.transform {
        Some(animation) => {
            let initial = animation.at(0, surface.current_extent().aspect_ratio());
            let (buffer, memory) = registry.create_buffer_init(
                device,
                "transform",
                BufferUsage::UNIFORM,
                std::slice::from_ref(&initial),
            )?;
            writes.push(DescriptorWrite {
                binding: UNIFORM_BINDING,
                resource: DescriptorResource::UniformBuffer {
                    buffer,
                    offset: 0,
                    range: std::mem::size_of::<TransformUniform>() as u64,
                },
            });
            Some((memory, animation))
        }
        None => None,
    };

    if let Some(path) = &draw.texture {
        let image = TgaImage::load(path)?;
        let texture = Texture::create(device, registry, upload, &image, "texture")?;
        writes.push(DescriptorWrite {
            binding: TEXTURE_BINDING,
            resource: DescriptorResource::CombinedImageSampler {
                view: texture.view,
                sampler: texture.sampler,
            },
        });
    }

    let stages = vec![
        ShaderStageDescriptor {
            stage: ShaderStage::Vertex,
            module: vertex_module,
            entry_point: SHADER_ENTRY_POINT.to_string(),
        },
        ShaderStageDescriptor {
            stage: ShaderStage::Fragment,
            module: fragment_module,
            entry_point: SHADER_ENTRY_POINT.to_string(),
        },
    ];
    let mut pipeline_state =
        PipelineState::new(name, geometry.layout.clone(), geometry.topology, stages)
            .with_rasterization(draw.rasterization);
    if draw.depth_test {
        if !surface.has_depth_attachment() {
            log::warn!("Depth test requested but the render pass has no depth attachment");
        }
        pipeline_state = pipeline_state.with_depth(DepthState::less_equal());
    }

    let (descriptor_set, set_layouts) = if draw.descriptor_slots.is_empty() {
        check_writes(&[], &writes)?;
        (None, Vec::new())
    } else {
        check_visibility(&draw.descriptor_slots, pipeline_state.stage_flags())?;
        let bindings = DescriptorBindings::create(device, registry, &draw.descriptor_slots)?;
        bindings.write(device, &writes)?;
        (Some(bindings.set), vec![bindings.layout])
    };

    let pipeline_layout = registry.create_pipeline_layout(device, &set_layouts)?;
    let context = RenderContext::build(
        device,
        &pipeline_state,
        pipeline_layout,
        surface.render_pass(),
        surface.current_extent(),
    )?;

    Ok(DrawResources {
        pipeline_state,
        context,
        vertex_buffer,
        draw: draw_call,
        index_buffer,
        descriptor_set,
        transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_matches_rotation() {
        let animation = TransformAnimation {
            eye: Vec3::new(0.0, 0.0, 3.0),
            motion: Motion::SpinY,
        };
        let transform = animation.at(10, 1.0);
        assert!(transform.world.abs_diff_eq(Mat4::from_rotation_y(1.0), 1e-6));
        assert_eq!(
            transform.view,
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y)
        );
        assert_eq!(animation.at(0, 1.0).world, Mat4::IDENTITY);
    }

    #[test]
    fn test_tumble_order() {
        let animation = TransformAnimation {
            eye: Vec3::new(0.0, 0.0, 6.0),
            motion: Motion::Tumble,
        };
        let expected = Mat4::from_rotation_y(5.0) * Mat4::from_rotation_x(1.0);
        assert!(animation.at(100, 1.5).world.abs_diff_eq(expected, 1e-5));
    }
}
