//! Dummy backend for testing and development.
//!
//! [`DummyDevice`] performs no GPU work. It hands out unique handles, keeps
//! the bytes written to mappable memory, and records every call in order so
//! tests can assert on the exact command sequence and on teardown counts.
//! [`DummySurface`] stands in for a swapchain.

use std::collections::{HashMap, HashSet};

use super::traits::*;
use super::types::*;

/// Kind of object a destroy call released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pipeline,
    ShaderModule,
    PipelineLayout,
    DescriptorSetLayout,
    DescriptorPool,
    Sampler,
    ImageView,
    Buffer,
    Image,
    Memory,
    Fence,
    CommandPool,
}

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateCommandPool(CommandPoolHandle),
    AllocateCommandBuffers(Vec<CommandBufferHandle>),
    CreateBuffer {
        buffer: BufferHandle,
        memory: MemoryHandle,
        size: u64,
    },
    CreateImage {
        image: ImageHandle,
        memory: MemoryHandle,
        width: u32,
        height: u32,
    },
    CreateImageView(ImageViewHandle),
    CreateSampler(SamplerHandle),
    CreateShaderModule(ShaderModuleHandle),
    MapMemory(MemoryHandle),
    WriteMapped {
        memory: MemoryHandle,
        offset: u64,
        len: usize,
    },
    UnmapMemory(MemoryHandle),
    CreateDescriptorSetLayout(DescriptorSetLayoutHandle),
    CreateDescriptorPool(DescriptorPoolHandle),
    AllocateDescriptorSet(DescriptorSetHandle),
    UpdateDescriptorSet {
        set: DescriptorSetHandle,
        writes: Vec<DescriptorWrite>,
    },
    CreatePipelineLayout(PipelineLayoutHandle),
    CreateGraphicsPipeline(PipelineHandle),
    CreateFence(FenceHandle),
    WaitForFence(FenceHandle),
    BeginCommandBuffer(CommandBufferHandle),
    EndCommandBuffer(CommandBufferHandle),
    ImageBarrier(ImageBarrier),
    ClearColorImage {
        image: ImageHandle,
        color: [f32; 4],
    },
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    BindPipeline(PipelineHandle),
    BindVertexBuffer {
        binding: u32,
        buffer: BufferHandle,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    BindDescriptorSet {
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    CopyBufferToImage {
        buffer: BufferHandle,
        image: ImageHandle,
        region: BufferImageCopy,
    },
    QueueSubmit(SubmitInfo),
    FreeCommandBuffers(Vec<CommandBufferHandle>),
    Destroy(ResourceKind, u64),
}

/// Device call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateBuffer,
    CreateImage,
    CreateShaderModule,
    CreateDescriptorPool,
    CreatePipeline,
    MapMemory,
    BeginCommandBuffer,
    QueueSubmit,
    WaitForFence,
}

/// In-memory [`Device`] that records every call
#[derive(Debug, Default)]
pub struct DummyDevice {
    next_id: u64,
    calls: Vec<DeviceCall>,
    created: HashSet<(ResourceKind, u64)>,
    destroy_counts: HashMap<(ResourceKind, u64), u32>,
    memory: HashMap<u64, Vec<u8>>,
    mapped: HashSet<u64>,
    recording: HashSet<u64>,
    pipelines: HashMap<u64, GraphicsPipelineDescriptor>,
    failures: HashSet<FailPoint>,
}

impl DummyDevice {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    /// Queue handle to submit to
    pub fn graphics_queue(&self) -> QueueHandle {
        QueueHandle(0xFFFF_0000)
    }

    /// Make every later call at `point` fail until [`DummyDevice::clear_failures`]
    pub fn fail_on(&mut self, point: FailPoint) {
        self.failures.insert(point);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Forget recorded calls, keeping all object state
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// How many times an object was destroyed
    pub fn destroy_count(&self, kind: ResourceKind, raw: u64) -> u32 {
        self.destroy_counts.get(&(kind, raw)).copied().unwrap_or(0)
    }

    /// Every object ever created, sorted
    pub fn created(&self) -> Vec<(ResourceKind, u64)> {
        let mut created: Vec<_> = self.created.iter().copied().collect();
        created.sort();
        created
    }

    /// Objects created and not destroyed yet, sorted
    pub fn live(&self) -> Vec<(ResourceKind, u64)> {
        let mut live: Vec<_> = self
            .created
            .iter()
            .filter(|key| !self.destroy_counts.contains_key(key))
            .copied()
            .collect();
        live.sort();
        live
    }

    /// Objects of `kind` currently alive
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.live().iter().filter(|(k, _)| *k == kind).count()
    }

    /// Bytes last written to a host-visible allocation
    pub fn memory_contents(&self, memory: MemoryHandle) -> Option<&[u8]> {
        self.memory.get(&memory.raw()).map(Vec::as_slice)
    }

    pub fn is_mapped(&self, memory: MemoryHandle) -> bool {
        self.mapped.contains(&memory.raw())
    }

    /// Descriptor a pipeline was compiled from
    pub fn pipeline_descriptor(&self, pipeline: PipelineHandle) -> Option<&GraphicsPipelineDescriptor> {
        self.pipelines.get(&pipeline.raw())
    }

    /// Index of the first recorded call matching `predicate`
    pub fn position(&self, predicate: impl Fn(&DeviceCall) -> bool) -> Option<usize> {
        self.calls.iter().position(predicate)
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    fn create(&mut self, kind: ResourceKind) -> u64 {
        let raw = self.next_handle();
        self.created.insert((kind, raw));
        raw
    }

    fn check(&self, point: FailPoint) -> BackendResult<()> {
        if self.failures.contains(&point) {
            log::trace!("DummyDevice: injected failure at {:?}", point);
            return Err(match point {
                FailPoint::CreateBuffer => BackendError::BufferCreationFailed("injected".into()),
                FailPoint::CreateImage => BackendError::TextureCreationFailed("injected".into()),
                FailPoint::CreateShaderModule => {
                    BackendError::ShaderCreationFailed("injected".into())
                }
                FailPoint::CreateDescriptorPool => {
                    BackendError::DescriptorCreationFailed("injected".into())
                }
                FailPoint::CreatePipeline => {
                    BackendError::PipelineCreationFailed("injected".into())
                }
                FailPoint::MapMemory => BackendError::MemoryMapFailed("injected".into()),
                FailPoint::BeginCommandBuffer => {
                    BackendError::CommandRecordingFailed("injected".into())
                }
                FailPoint::QueueSubmit => BackendError::SubmitFailed("injected".into()),
                FailPoint::WaitForFence => BackendError::FenceWaitFailed("injected".into()),
            });
        }
        Ok(())
    }

    fn destroy(&mut self, kind: ResourceKind, raw: u64) {
        log::trace!("DummyDevice: destroying {:?} {}", kind, raw);
        if !self.created.contains(&(kind, raw)) {
            log::warn!("DummyDevice: destroy of unknown {:?} {}", kind, raw);
        }
        *self.destroy_counts.entry((kind, raw)).or_insert(0) += 1;
        self.calls.push(DeviceCall::Destroy(kind, raw));
    }

    fn record(&mut self, cmd: CommandBufferHandle, call: DeviceCall) {
        if !self.recording.contains(&cmd.raw()) {
            log::warn!("DummyDevice: {:?} recorded outside begin/end", call);
        }
        self.calls.push(call);
    }
}

impl Device for DummyDevice {
    fn create_command_pool(&mut self, queue_family: u32) -> BackendResult<CommandPoolHandle> {
        let pool = CommandPoolHandle(self.create(ResourceKind::CommandPool));
        log::trace!("DummyDevice: creating command pool for family {}", queue_family);
        self.calls.push(DeviceCall::CreateCommandPool(pool));
        Ok(pool)
    }

    fn allocate_command_buffers(
        &mut self,
        _pool: CommandPoolHandle,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>> {
        let buffers: Vec<_> = (0..count)
            .map(|_| CommandBufferHandle(self.next_handle()))
            .collect();
        self.calls.push(DeviceCall::AllocateCommandBuffers(buffers.clone()));
        Ok(buffers)
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
    ) -> BackendResult<(BufferHandle, MemoryHandle)> {
        self.check(FailPoint::CreateBuffer)?;
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let buffer = BufferHandle(self.create(ResourceKind::Buffer));
        let memory = MemoryHandle(self.create(ResourceKind::Memory));
        if desc.location == MemoryLocation::HostVisible {
            self.memory.insert(memory.raw(), vec![0; desc.size as usize]);
        }
        self.calls.push(DeviceCall::CreateBuffer {
            buffer,
            memory,
            size: desc.size,
        });
        Ok((buffer, memory))
    }

    fn create_image(
        &mut self,
        desc: &TextureDescriptor,
    ) -> BackendResult<(ImageHandle, MemoryHandle)> {
        self.check(FailPoint::CreateImage)?;
        log::trace!(
            "DummyDevice: creating image {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let image = ImageHandle(self.create(ResourceKind::Image));
        let memory = MemoryHandle(self.create(ResourceKind::Memory));
        self.calls.push(DeviceCall::CreateImage {
            image,
            memory,
            width: desc.width,
            height: desc.height,
        });
        Ok((image, memory))
    }

    fn create_image_view(
        &mut self,
        _image: ImageHandle,
        _format: TextureFormat,
    ) -> BackendResult<ImageViewHandle> {
        let view = ImageViewHandle(self.create(ResourceKind::ImageView));
        self.calls.push(DeviceCall::CreateImageView(view));
        Ok(view)
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyDevice: creating sampler {:?}", desc.label);
        let sampler = SamplerHandle(self.create(ResourceKind::Sampler));
        self.calls.push(DeviceCall::CreateSampler(sampler));
        Ok(sampler)
    }

    fn create_shader_module(&mut self, code: &[u32]) -> BackendResult<ShaderModuleHandle> {
        self.check(FailPoint::CreateShaderModule)?;
        log::trace!("DummyDevice: creating shader module ({} words)", code.len());
        let module = ShaderModuleHandle(self.create(ResourceKind::ShaderModule));
        self.calls.push(DeviceCall::CreateShaderModule(module));
        Ok(module)
    }

    fn map_memory(&mut self, memory: MemoryHandle) -> BackendResult<()> {
        self.check(FailPoint::MapMemory)?;
        if !self.memory.contains_key(&memory.raw()) {
            return Err(BackendError::MemoryMapFailed(format!(
                "memory {} is not host visible",
                memory.raw()
            )));
        }
        if !self.mapped.insert(memory.raw()) {
            return Err(BackendError::MemoryMapFailed(format!(
                "memory {} is already mapped",
                memory.raw()
            )));
        }
        self.calls.push(DeviceCall::MapMemory(memory));
        Ok(())
    }

    fn write_mapped(
        &mut self,
        memory: MemoryHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        if !self.mapped.contains(&memory.raw()) {
            return Err(BackendError::MemoryMapFailed(format!(
                "memory {} is not mapped",
                memory.raw()
            )));
        }
        let contents = self
            .memory
            .get_mut(&memory.raw())
            .ok_or_else(|| BackendError::InvalidHandle(format!("memory {}", memory.raw())))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(BackendError::MemoryMapFailed(format!(
                "write of {} bytes at {} exceeds allocation of {} bytes",
                data.len(),
                offset,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        self.calls.push(DeviceCall::WriteMapped {
            memory,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn unmap_memory(&mut self, memory: MemoryHandle) {
        if !self.mapped.remove(&memory.raw()) {
            log::warn!("DummyDevice: unmapping memory {} that is not mapped", memory.raw());
        }
        self.calls.push(DeviceCall::UnmapMemory(memory));
    }

    fn create_descriptor_set_layout(
        &mut self,
        entries: &[DescriptorLayoutEntry],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        log::trace!("DummyDevice: creating set layout with {} entries", entries.len());
        let layout = DescriptorSetLayoutHandle(self.create(ResourceKind::DescriptorSetLayout));
        self.calls.push(DeviceCall::CreateDescriptorSetLayout(layout));
        Ok(layout)
    }

    fn create_descriptor_pool(
        &mut self,
        _sizes: &[DescriptorPoolSize],
        _max_sets: u32,
    ) -> BackendResult<DescriptorPoolHandle> {
        self.check(FailPoint::CreateDescriptorPool)?;
        let pool = DescriptorPoolHandle(self.create(ResourceKind::DescriptorPool));
        self.calls.push(DeviceCall::CreateDescriptorPool(pool));
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &mut self,
        _pool: DescriptorPoolHandle,
        _layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let set = DescriptorSetHandle(self.next_handle());
        self.calls.push(DeviceCall::AllocateDescriptorSet(set));
        Ok(set)
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        self.calls.push(DeviceCall::UpdateDescriptorSet {
            set,
            writes: writes.to_vec(),
        });
    }

    fn create_pipeline_layout(
        &mut self,
        _set_layouts: &[DescriptorSetLayoutHandle],
    ) -> BackendResult<PipelineLayoutHandle> {
        let layout = PipelineLayoutHandle(self.create(ResourceKind::PipelineLayout));
        self.calls.push(DeviceCall::CreatePipelineLayout(layout));
        Ok(layout)
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        self.check(FailPoint::CreatePipeline)?;
        log::trace!(
            "DummyDevice: creating pipeline {:?} ({}x{})",
            desc.label,
            desc.viewport.width,
            desc.viewport.height
        );
        let pipeline = PipelineHandle(self.create(ResourceKind::Pipeline));
        self.pipelines.insert(pipeline.raw(), desc.clone());
        self.calls.push(DeviceCall::CreateGraphicsPipeline(pipeline));
        Ok(pipeline)
    }

    fn create_fence(&mut self) -> BackendResult<FenceHandle> {
        let fence = FenceHandle(self.create(ResourceKind::Fence));
        self.calls.push(DeviceCall::CreateFence(fence));
        Ok(fence)
    }

    fn wait_for_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        self.check(FailPoint::WaitForFence)?;
        self.calls.push(DeviceCall::WaitForFence(fence));
        Ok(())
    }

    fn begin_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        self.check(FailPoint::BeginCommandBuffer)?;
        if !self.recording.insert(cmd.raw()) {
            return Err(BackendError::CommandRecordingFailed(format!(
                "command buffer {} is already recording",
                cmd.raw()
            )));
        }
        self.calls.push(DeviceCall::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        if !self.recording.remove(&cmd.raw()) {
            return Err(BackendError::CommandRecordingFailed(format!(
                "command buffer {} is not recording",
                cmd.raw()
            )));
        }
        self.calls.push(DeviceCall::EndCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_image_barrier(&mut self, cmd: CommandBufferHandle, barrier: &ImageBarrier) {
        self.record(cmd, DeviceCall::ImageBarrier(*barrier));
    }

    fn cmd_clear_color_image(&mut self, cmd: CommandBufferHandle, image: ImageHandle, color: [f32; 4]) {
        self.record(cmd, DeviceCall::ClearColorImage { image, color });
    }

    fn cmd_begin_render_pass(&mut self, cmd: CommandBufferHandle, begin: &RenderPassBegin) {
        self.record(cmd, DeviceCall::BeginRenderPass(begin.clone()));
    }

    fn cmd_end_render_pass(&mut self, cmd: CommandBufferHandle) {
        self.record(cmd, DeviceCall::EndRenderPass);
    }

    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.record(cmd, DeviceCall::BindPipeline(pipeline));
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: CommandBufferHandle, binding: u32, buffer: BufferHandle) {
        self.record(cmd, DeviceCall::BindVertexBuffer { binding, buffer });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        format: IndexFormat,
    ) {
        self.record(cmd, DeviceCall::BindIndexBuffer { buffer, format });
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        self.record(cmd, DeviceCall::BindDescriptorSet { layout, set });
    }

    fn cmd_draw(
        &mut self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(
            cmd,
            DeviceCall::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(
            cmd,
            DeviceCall::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        image: ImageHandle,
        region: &BufferImageCopy,
    ) {
        self.record(
            cmd,
            DeviceCall::CopyBufferToImage {
                buffer,
                image,
                region: *region,
            },
        );
    }

    fn queue_submit(&mut self, _queue: QueueHandle, submit: &SubmitInfo) -> BackendResult<()> {
        self.check(FailPoint::QueueSubmit)?;
        if self.recording.contains(&submit.command_buffer.raw()) {
            return Err(BackendError::SubmitFailed(format!(
                "command buffer {} is still recording",
                submit.command_buffer.raw()
            )));
        }
        self.calls.push(DeviceCall::QueueSubmit(*submit));
        Ok(())
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.destroy(ResourceKind::Pipeline, pipeline.raw());
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        self.destroy(ResourceKind::PipelineLayout, layout.raw());
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        self.destroy(ResourceKind::DescriptorSetLayout, layout.raw());
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.destroy(ResourceKind::DescriptorPool, pool.raw());
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.destroy(ResourceKind::ShaderModule, module.raw());
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.destroy(ResourceKind::Sampler, sampler.raw());
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        self.destroy(ResourceKind::ImageView, view.raw());
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.destroy(ResourceKind::Buffer, buffer.raw());
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.destroy(ResourceKind::Image, image.raw());
    }

    fn free_memory(&mut self, memory: MemoryHandle) {
        self.mapped.remove(&memory.raw());
        self.memory.remove(&memory.raw());
        self.destroy(ResourceKind::Memory, memory.raw());
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.destroy(ResourceKind::Fence, fence.raw());
    }

    fn free_command_buffers(&mut self, _pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        self.calls.push(DeviceCall::FreeCommandBuffers(buffers.to_vec()));
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        self.destroy(ResourceKind::CommandPool, pool.raw());
    }
}

/// In-memory [`HostSurface`] with a fixed ring of images
#[derive(Debug)]
pub struct DummySurface {
    extent: Extent2d,
    depth: bool,
    needs_transition: bool,
    images: Vec<ImageHandle>,
    framebuffers: Vec<FramebufferHandle>,
    render_pass: RenderPassHandle,
    next_index: usize,
    current: Option<usize>,
    generation: u64,
    acquired: u32,
    presented: u32,
    fail_acquire: bool,
    fail_present: bool,
}

const DUMMY_SURFACE_BASE: u64 = 0x5000_0000;
const DUMMY_IMAGE_COUNT: usize = 3;

impl DummySurface {
    pub fn new(extent: Extent2d, depth: bool) -> Self {
        let mut surface = Self {
            extent,
            depth,
            needs_transition: false,
            images: Vec::new(),
            framebuffers: Vec::new(),
            render_pass: RenderPassHandle(DUMMY_SURFACE_BASE),
            next_index: 0,
            current: None,
            generation: 0,
            acquired: 0,
            presented: 0,
            fail_acquire: false,
            fail_present: false,
        };
        surface.rebuild();
        surface
    }

    /// Report that acquired images need an explicit layout transition
    pub fn with_layout_transition(mut self, needs_transition: bool) -> Self {
        self.needs_transition = needs_transition;
        self
    }

    /// Simulate a swapchain rebuild at a new size
    pub fn resize(&mut self, extent: Extent2d) {
        self.extent = extent;
        self.rebuild();
    }

    pub fn set_fail_acquire(&mut self, fail: bool) {
        self.fail_acquire = fail;
    }

    pub fn set_fail_present(&mut self, fail: bool) {
        self.fail_present = fail;
    }

    pub fn acquired_count(&self) -> u32 {
        self.acquired
    }

    pub fn presented_count(&self) -> u32 {
        self.presented
    }

    /// Semaphore the presentation engine signals for acquired images
    pub fn image_available(&self) -> SemaphoreHandle {
        SemaphoreHandle(DUMMY_SURFACE_BASE + 1)
    }

    /// Semaphore presentation waits on
    pub fn render_finished(&self) -> SemaphoreHandle {
        SemaphoreHandle(DUMMY_SURFACE_BASE + 2)
    }

    fn rebuild(&mut self) {
        self.generation += 1;
        let base = DUMMY_SURFACE_BASE + self.generation * 0x100;
        self.images = (0..DUMMY_IMAGE_COUNT as u64)
            .map(|i| ImageHandle(base + i))
            .collect();
        self.framebuffers = (0..DUMMY_IMAGE_COUNT as u64)
            .map(|i| FramebufferHandle(base + 0x10 + i))
            .collect();
        self.next_index = 0;
        self.current = None;
    }
}

impl HostSurface for DummySurface {
    fn acquire_next_image(&mut self) -> BackendResult<AcquiredImage> {
        if self.fail_acquire {
            return Err(BackendError::AcquireImageFailed("injected".into()));
        }
        let index = self.next_index;
        self.next_index = (index + 1) % self.images.len();
        self.current = Some(index);
        self.acquired += 1;
        Ok(AcquiredImage {
            image: self.images[index],
            wait_semaphore: Some(self.image_available()),
            signal_semaphore: Some(self.render_finished()),
            needs_transition: self.needs_transition,
        })
    }

    fn acquire_next_framebuffer(&mut self) -> BackendResult<FramebufferHandle> {
        self.current
            .map(|index| self.framebuffers[index])
            .ok_or_else(|| BackendError::AcquireImageFailed("no image acquired".into()))
    }

    fn current_extent(&self) -> Extent2d {
        self.extent
    }

    fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    fn has_depth_attachment(&self) -> bool {
        self.depth
    }

    fn swap_buffers(&mut self) -> BackendResult<()> {
        if self.fail_present {
            return Err(BackendError::PresentFailed("injected".into()));
        }
        self.current
            .take()
            .ok_or_else(|| BackendError::PresentFailed("no image acquired".into()))?;
        self.presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let mut device = DummyDevice::new();
        let (buffer, memory) = device
            .create_buffer(&BufferDescriptor::host_visible("b", 16, BufferUsage::VERTEX))
            .unwrap();
        let fence = device.create_fence().unwrap();
        assert_ne!(buffer.raw(), memory.raw());
        assert_ne!(memory.raw(), fence.raw());
    }

    #[test]
    fn test_write_requires_mapping() {
        let mut device = DummyDevice::new();
        let (_, memory) = device
            .create_buffer(&BufferDescriptor::host_visible("b", 8, BufferUsage::UNIFORM))
            .unwrap();

        assert!(device.write_mapped(memory, 0, &[1, 2, 3, 4]).is_err());

        device.map_memory(memory).unwrap();
        device.write_mapped(memory, 4, &[1, 2, 3, 4]).unwrap();
        assert!(device.write_mapped(memory, 6, &[0; 4]).is_err());
        device.unmap_memory(memory);

        assert_eq!(
            device.memory_contents(memory).unwrap(),
            &[0, 0, 0, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_submit_rejects_open_command_buffer() {
        let mut device = DummyDevice::new();
        let pool = device.create_command_pool(0).unwrap();
        let cmd = device.allocate_command_buffers(pool, 1).unwrap()[0];
        device.begin_command_buffer(cmd).unwrap();

        let submit = SubmitInfo {
            command_buffer: cmd,
            wait_semaphore: None,
            signal_semaphore: None,
            fence: None,
        };
        assert!(device.queue_submit(device.graphics_queue(), &submit).is_err());

        device.end_command_buffer(cmd).unwrap();
        assert!(device.queue_submit(device.graphics_queue(), &submit).is_ok());
    }

    #[test]
    fn test_destroy_counts() {
        let mut device = DummyDevice::new();
        let fence = device.create_fence().unwrap();
        assert_eq!(device.live_count(ResourceKind::Fence), 1);

        device.destroy_fence(fence);
        device.destroy_fence(fence);

        assert_eq!(device.destroy_count(ResourceKind::Fence, fence.raw()), 2);
        assert!(device.live().is_empty());
    }

    #[test]
    fn test_surface_cycles_images() {
        let mut surface = DummySurface::new(Extent2d::new(64, 32), false);
        let first = surface.acquire_next_image().unwrap();
        surface.swap_buffers().unwrap();
        let second = surface.acquire_next_image().unwrap();
        assert_ne!(first.image, second.image);
        assert!(surface.acquire_next_framebuffer().is_ok());
        surface.swap_buffers().unwrap();
        assert!(surface.swap_buffers().is_err());
        assert_eq!(surface.presented_count(), 2);
    }
}
