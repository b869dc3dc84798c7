//! Ownership ledger for every GPU object a renderer creates.
//!
//! Objects are appended during setup and released in one pass at shutdown.
//! [`ResourceRegistry::destroy_all`] consumes the registry, so a second
//! teardown or a registration after teardown does not compile.

use bytemuck::Pod;

use crate::backend::*;

/// Handle kinds the registry can own.
pub trait Tracked: Copy {
    #[doc(hidden)]
    fn push_into(self, registry: &mut ResourceRegistry);
}

/// Handle kinds that own a memory allocation.
pub trait Backed: Tracked {}

macro_rules! impl_tracked {
    ($handle:ty => $field:ident) => {
        impl Tracked for $handle {
            fn push_into(self, registry: &mut ResourceRegistry) {
                registry.$field.push(self);
            }
        }
    };
}

impl_tracked!(PipelineHandle => pipelines);
impl_tracked!(ShaderModuleHandle => shader_modules);
impl_tracked!(PipelineLayoutHandle => pipeline_layouts);
impl_tracked!(DescriptorSetLayoutHandle => descriptor_set_layouts);
impl_tracked!(DescriptorPoolHandle => descriptor_pools);
impl_tracked!(SamplerHandle => samplers);
impl_tracked!(ImageViewHandle => image_views);
impl_tracked!(BufferHandle => buffers);
impl_tracked!(ImageHandle => images);
impl_tracked!(CommandPoolHandle => command_pools);

impl Backed for BufferHandle {}
impl Backed for ImageHandle {}

/// Append-only collection of owned GPU objects
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    pipelines: Vec<PipelineHandle>,
    shader_modules: Vec<ShaderModuleHandle>,
    pipeline_layouts: Vec<PipelineLayoutHandle>,
    descriptor_set_layouts: Vec<DescriptorSetLayoutHandle>,
    descriptor_pools: Vec<DescriptorPoolHandle>,
    samplers: Vec<SamplerHandle>,
    image_views: Vec<ImageViewHandle>,
    buffers: Vec<BufferHandle>,
    images: Vec<ImageHandle>,
    memories: Vec<MemoryHandle>,
    command_pools: Vec<CommandPoolHandle>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a buffer or image and the allocation bound to it
    pub fn register<H: Backed>(&mut self, handle: H, memory: MemoryHandle) {
        handle.push_into(self);
        self.memories.push(memory);
    }

    /// Take ownership of an object without backing memory
    pub fn track<H: Tracked>(&mut self, handle: H) {
        handle.push_into(self);
    }

    /// Number of handles (including allocations) awaiting teardown
    pub fn len(&self) -> usize {
        self.pipelines.len()
            + self.shader_modules.len()
            + self.pipeline_layouts.len()
            + self.descriptor_set_layouts.len()
            + self.descriptor_pools.len()
            + self.samplers.len()
            + self.image_views.len()
            + self.buffers.len()
            + self.images.len()
            + self.memories.len()
            + self.command_pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create_buffer<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        desc: &BufferDescriptor,
    ) -> BackendResult<(BufferHandle, MemoryHandle)> {
        let (buffer, memory) = device.create_buffer(desc)?;
        self.register(buffer, memory);
        Ok((buffer, memory))
    }

    /// Create a host-visible buffer sized for `data` and fill it
    pub fn create_buffer_init<D: Device + ?Sized, T: Pod>(
        &mut self,
        device: &mut D,
        label: &str,
        usage: BufferUsage,
        data: &[T],
    ) -> BackendResult<(BufferHandle, MemoryHandle)> {
        let size = std::mem::size_of_val(data) as u64;
        let desc = BufferDescriptor::host_visible(label, size, usage);
        let (buffer, memory) = self.create_buffer(device, &desc)?;
        upload_slice(device, memory, data)?;
        Ok((buffer, memory))
    }

    pub fn create_image<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        desc: &TextureDescriptor,
    ) -> BackendResult<(ImageHandle, MemoryHandle)> {
        let (image, memory) = device.create_image(desc)?;
        self.register(image, memory);
        Ok((image, memory))
    }

    pub fn create_image_view<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        image: ImageHandle,
        format: TextureFormat,
    ) -> BackendResult<ImageViewHandle> {
        let view = device.create_image_view(image, format)?;
        self.track(view);
        Ok(view)
    }

    pub fn create_sampler<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        desc: &SamplerDescriptor,
    ) -> BackendResult<SamplerHandle> {
        let sampler = device.create_sampler(desc)?;
        self.track(sampler);
        Ok(sampler)
    }

    pub fn create_descriptor_pool<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        sizes: &[DescriptorPoolSize],
        max_sets: u32,
    ) -> BackendResult<DescriptorPoolHandle> {
        let pool = device.create_descriptor_pool(sizes, max_sets)?;
        self.track(pool);
        Ok(pool)
    }

    pub fn create_descriptor_set_layout<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        entries: &[DescriptorLayoutEntry],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let layout = device.create_descriptor_set_layout(entries)?;
        self.track(layout);
        Ok(layout)
    }

    pub fn create_pipeline_layout<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> BackendResult<PipelineLayoutHandle> {
        let layout = device.create_pipeline_layout(set_layouts)?;
        self.track(layout);
        Ok(layout)
    }

    pub fn create_shader_module<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        code: &[u32],
    ) -> BackendResult<ShaderModuleHandle> {
        let module = device.create_shader_module(code)?;
        self.track(module);
        Ok(module)
    }

    pub fn create_command_pool<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        queue_family: u32,
    ) -> BackendResult<CommandPoolHandle> {
        let pool = device.create_command_pool(queue_family)?;
        self.track(pool);
        Ok(pool)
    }

    /// Destroy everything, dependents first.
    ///
    /// Order: pipelines, shader modules, pipeline layouts, descriptor set
    /// layouts, descriptor pools, samplers, image views, buffers, images,
    /// memory, command pools. Returns how many handles were released.
    pub fn destroy_all<D: Device + ?Sized>(mut self, device: &mut D) -> usize {
        let count = self.len();

        for pipeline in std::mem::take(&mut self.pipelines) {
            device.destroy_pipeline(pipeline);
        }
        for module in std::mem::take(&mut self.shader_modules) {
            device.destroy_shader_module(module);
        }
        for layout in std::mem::take(&mut self.pipeline_layouts) {
            device.destroy_pipeline_layout(layout);
        }
        for layout in std::mem::take(&mut self.descriptor_set_layouts) {
            device.destroy_descriptor_set_layout(layout);
        }
        for pool in std::mem::take(&mut self.descriptor_pools) {
            device.destroy_descriptor_pool(pool);
        }
        for sampler in std::mem::take(&mut self.samplers) {
            device.destroy_sampler(sampler);
        }
        for view in std::mem::take(&mut self.image_views) {
            device.destroy_image_view(view);
        }
        for buffer in std::mem::take(&mut self.buffers) {
            device.destroy_buffer(buffer);
        }
        for image in std::mem::take(&mut self.images) {
            device.destroy_image(image);
        }
        for memory in std::mem::take(&mut self.memories) {
            device.free_memory(memory);
        }
        for pool in std::mem::take(&mut self.command_pools) {
            device.destroy_command_pool(pool);
        }

        log::info!("Released {} GPU resources", count);
        count
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::warn!(
                "ResourceRegistry dropped with {} live handles; they are leaked",
                self.len()
            );
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DeviceCall, DummyDevice, ResourceKind};

    fn kind_of(call: &DeviceCall) -> Option<ResourceKind> {
        match call {
            DeviceCall::Destroy(kind, _) => Some(*kind),
            _ => None,
        }
    }

    #[test]
    fn test_destroy_order() {
        let mut device = DummyDevice::new();
        let mut registry = ResourceRegistry::new();

        // Created in an order unrelated to the teardown order
        registry.create_command_pool(&mut device, 0).unwrap();
        registry
            .create_buffer_init(&mut device, "vb", BufferUsage::VERTEX, &[0u32; 4])
            .unwrap();
        let (image, _) = registry
            .create_image(&mut device, &TextureDescriptor::default())
            .unwrap();
        registry
            .create_image_view(&mut device, image, TextureFormat::Bgra8Unorm)
            .unwrap();
        registry
            .create_sampler(&mut device, &SamplerDescriptor::default())
            .unwrap();
        registry.create_descriptor_pool(&mut device, &[], 1).unwrap();
        let set_layout = registry.create_descriptor_set_layout(&mut device, &[]).unwrap();
        registry
            .create_pipeline_layout(&mut device, &[set_layout])
            .unwrap();
        registry.create_shader_module(&mut device, &[0x0723_0203]).unwrap();
        registry.track(PipelineHandle::from_raw(9999));

        device.clear_calls();
        let released = registry.destroy_all(&mut device);
        assert_eq!(released, 12);

        let order: Vec<ResourceKind> = device.calls().iter().filter_map(kind_of).collect();
        assert_eq!(
            order,
            vec![
                ResourceKind::Pipeline,
                ResourceKind::ShaderModule,
                ResourceKind::PipelineLayout,
                ResourceKind::DescriptorSetLayout,
                ResourceKind::DescriptorPool,
                ResourceKind::Sampler,
                ResourceKind::ImageView,
                ResourceKind::Buffer,
                ResourceKind::Image,
                ResourceKind::Memory,
                ResourceKind::Memory,
                ResourceKind::CommandPool,
            ]
        );
    }

    #[test]
    fn test_create_buffer_init_unmaps() {
        let mut device = DummyDevice::new();
        let mut registry = ResourceRegistry::new();

        let (_, memory) = registry
            .create_buffer_init(&mut device, "ib", BufferUsage::INDEX, &[1u16, 2, 3])
            .unwrap();

        assert!(!device.is_mapped(memory));
        assert_eq!(device.memory_contents(memory).unwrap(), &[1, 0, 2, 0, 3, 0]);
        registry.destroy_all(&mut device);
    }

    #[test]
    fn test_empty_registry() {
        let mut device = DummyDevice::new();
        let registry = ResourceRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.destroy_all(&mut device), 0);
        assert!(device.calls().is_empty());
    }
}
