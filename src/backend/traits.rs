//! Core backend abstraction traits
//!
//! [`Device`] is the slice of the graphics API the lifecycle protocol needs:
//! resource creation and destruction, scoped memory mapping, command recording
//! and queue submission. [`HostSurface`] is the window-side collaborator that
//! owns the swapchain images and the render pass.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create descriptor: {0}")]
    DescriptorCreationFailed(String),
    #[error("Command recording failed: {0}")]
    CommandRecordingFailed(String),
    #[error("Queue submission failed: {0}")]
    SubmitFailed(String),
    #[error("Failed to map memory: {0}")]
    MemoryMapFailed(String),
    #[error("Fence wait failed: {0}")]
    FenceWaitFailed(String),
    #[error("Unknown handle: {0}")]
    InvalidHandle(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Wrap a raw backend value
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw backend value
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Handle to a GPU buffer
    BufferHandle
);
define_handle!(
    /// Handle to a GPU image
    ImageHandle
);
define_handle!(
    /// Handle to an image view
    ImageViewHandle
);
define_handle!(
    /// Handle to a sampler
    SamplerHandle
);
define_handle!(
    /// Handle to a memory allocation backing a buffer or image
    MemoryHandle
);
define_handle!(
    /// Handle to a compiled shader module
    ShaderModuleHandle
);
define_handle!(
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle
);
define_handle!(
    /// Handle to a descriptor pool
    DescriptorPoolHandle
);
define_handle!(
    /// Handle to a descriptor set
    DescriptorSetHandle
);
define_handle!(
    /// Handle to a pipeline layout
    PipelineLayoutHandle
);
define_handle!(
    /// Handle to a graphics pipeline
    PipelineHandle
);
define_handle!(
    /// Handle to a command pool
    CommandPoolHandle
);
define_handle!(
    /// Handle to a command buffer
    CommandBufferHandle
);
define_handle!(
    /// Handle to a fence
    FenceHandle
);
define_handle!(
    /// Handle to a semaphore
    SemaphoreHandle
);
define_handle!(
    /// Handle to a queue
    QueueHandle
);
define_handle!(
    /// Handle to a render pass owned by the host surface
    RenderPassHandle
);
define_handle!(
    /// Handle to a framebuffer owned by the host surface
    FramebufferHandle
);

/// Descriptor set layout entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorLayoutEntry {
    pub binding: u32,
    pub ty: BindingType,
    pub visibility: ShaderStageFlags,
}

/// Number of descriptors of one type a pool can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    pub ty: BindingType,
    pub count: u32,
}

/// Resource written into one descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    UniformBuffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    CombinedImageSampler {
        view: ImageViewHandle,
        sampler: SamplerHandle,
    },
}

impl DescriptorResource {
    pub fn binding_type(&self) -> BindingType {
        match self {
            DescriptorResource::UniformBuffer { .. } => BindingType::UniformBuffer,
            DescriptorResource::CombinedImageSampler { .. } => BindingType::CombinedImageSampler,
        }
    }
}

/// A write of one resource into one slot of a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub resource: DescriptorResource,
}

/// One programmable stage of a graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageDescriptor {
    pub stage: ShaderStage,
    pub module: ShaderModuleHandle,
    pub entry_point: String,
}

/// Viewport rectangle and depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-target viewport with the default 0..1 depth range
    pub fn from_extent(extent: Extent2d) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub extent: Extent2d,
}

/// Culling and winding. Both are always spelled out by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
}

impl RasterizationState {
    /// No culling, counter-clockwise front faces
    pub fn pass_through() -> Self {
        Self {
            cull_mode: CullMode::None,
            front_face: FrontFace::Ccw,
        }
    }
}

/// Depth test state; absent means depth testing is disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub write_enabled: bool,
    pub compare: CompareFunction,
}

impl DepthState {
    /// Less-or-equal test with depth writes
    pub fn less_equal() -> Self {
        Self {
            write_enabled: true,
            compare: CompareFunction::LessEqual,
        }
    }
}

/// Everything the device needs to compile one graphics pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<String>,
    pub stages: Vec<ShaderStageDescriptor>,
    pub vertex_layout: VertexBufferLayout,
    pub topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    pub depth: Option<DepthState>,
    pub sample_count: u32,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
}

/// Image layout transition recorded as a pipeline barrier.
///
/// The barrier waits for all prior commands' memory access to finish before the
/// new layout is usable by later stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub depth: bool,
}

/// Clear value for one render pass attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Arguments for beginning a render pass
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBegin {
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub extent: Extent2d,
    pub clear_values: Vec<ClearValue>,
}

/// Region copied from a buffer into the first mip of a color image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub width: u32,
    pub height: u32,
}

/// One queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    pub command_buffer: CommandBufferHandle,
    pub wait_semaphore: Option<SemaphoreHandle>,
    pub signal_semaphore: Option<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

/// The graphics API surface the lifecycle protocol drives.
///
/// Destruction methods do not fail; a handle the device does not know is
/// ignored and logged so a teardown pass always drains completely.
pub trait Device {
    // Command pools

    /// Create a resettable command pool for `queue_family`
    fn create_command_pool(&mut self, queue_family: u32) -> BackendResult<CommandPoolHandle>;

    /// Allocate primary command buffers from `pool`
    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>>;

    // Resource creation

    /// Create a buffer and bind a fresh allocation to it
    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
    ) -> BackendResult<(BufferHandle, MemoryHandle)>;

    /// Create a device-local 2D image and bind a fresh allocation to it
    fn create_image(
        &mut self,
        desc: &TextureDescriptor,
    ) -> BackendResult<(ImageHandle, MemoryHandle)>;

    /// Create a 2D view over the whole image
    fn create_image_view(
        &mut self,
        image: ImageHandle,
        format: TextureFormat,
    ) -> BackendResult<ImageViewHandle>;

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&mut self, code: &[u32]) -> BackendResult<ShaderModuleHandle>;

    // Host-visible memory

    /// Make a host-visible allocation writable from the CPU
    fn map_memory(&mut self, memory: MemoryHandle) -> BackendResult<()>;

    /// Copy `data` into a mapped allocation at `offset`
    fn write_mapped(&mut self, memory: MemoryHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    /// End a mapping started by [`Device::map_memory`]
    fn unmap_memory(&mut self, memory: MemoryHandle);

    // Descriptors and layouts

    fn create_descriptor_set_layout(
        &mut self,
        entries: &[DescriptorLayoutEntry],
    ) -> BackendResult<DescriptorSetLayoutHandle>;

    fn create_descriptor_pool(
        &mut self,
        sizes: &[DescriptorPoolSize],
        max_sets: u32,
    ) -> BackendResult<DescriptorPoolHandle>;

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> BackendResult<PipelineLayoutHandle>;

    /// Compile a graphics pipeline
    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    // Synchronization

    fn create_fence(&mut self) -> BackendResult<FenceHandle>;

    /// Block until `fence` is signaled
    fn wait_for_fence(&mut self, fence: FenceHandle) -> BackendResult<()>;

    // Command recording

    fn begin_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;

    fn cmd_image_barrier(&mut self, cmd: CommandBufferHandle, barrier: &ImageBarrier);

    fn cmd_clear_color_image(&mut self, cmd: CommandBufferHandle, image: ImageHandle, color: [f32; 4]);

    fn cmd_begin_render_pass(&mut self, cmd: CommandBufferHandle, begin: &RenderPassBegin);

    fn cmd_end_render_pass(&mut self, cmd: CommandBufferHandle);

    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle);

    fn cmd_bind_vertex_buffer(&mut self, cmd: CommandBufferHandle, binding: u32, buffer: BufferHandle);

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        format: IndexFormat,
    );

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    );

    fn cmd_draw(
        &mut self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn cmd_draw_indexed(
        &mut self,
        cmd: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        image: ImageHandle,
        region: &BufferImageCopy,
    );

    // Execution

    fn queue_submit(&mut self, queue: QueueHandle, submit: &SubmitInfo) -> BackendResult<()>;

    // Resource cleanup

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);
    fn destroy_shader_module(&mut self, module: ShaderModuleHandle);
    fn destroy_sampler(&mut self, sampler: SamplerHandle);
    fn destroy_image_view(&mut self, view: ImageViewHandle);
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn destroy_image(&mut self, image: ImageHandle);
    fn free_memory(&mut self, memory: MemoryHandle);
    fn destroy_fence(&mut self, fence: FenceHandle);
    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);
    fn destroy_command_pool(&mut self, pool: CommandPoolHandle);
}

/// Swapchain image handed out for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image: ImageHandle,
    /// Signaled by the presentation engine once the image may be written
    pub wait_semaphore: Option<SemaphoreHandle>,
    /// To be signaled by the frame's submission; presentation waits on it
    pub signal_semaphore: Option<SemaphoreHandle>,
    /// The image sits in `PresentSrc` and the render pass does not move it
    /// to an attachment layout itself
    pub needs_transition: bool,
}

/// Window-side collaborator owning the swapchain, framebuffers and render pass
pub trait HostSurface {
    /// Acquire the image the next frame renders into
    fn acquire_next_image(&mut self) -> BackendResult<AcquiredImage>;

    /// Framebuffer wrapping the most recently acquired image
    fn acquire_next_framebuffer(&mut self) -> BackendResult<FramebufferHandle>;

    /// Current size of the swapchain images
    fn current_extent(&self) -> Extent2d;

    /// Render pass compatible with the surface framebuffers
    fn render_pass(&self) -> RenderPassHandle;

    /// Whether the surface framebuffers carry a depth attachment
    fn has_depth_attachment(&self) -> bool;

    /// Present the most recently acquired image
    fn swap_buffers(&mut self) -> BackendResult<()>;
}
