//! Vulkan backend implementation using ash
//!
//! Opaque handles carry the raw Vulkan handle value. Memory handles index the
//! `gpu-allocator` allocations owned by [`VulkanDevice`]; host-visible ones are
//! persistently mapped by the allocator, so mapping only gates CPU writes.

mod context;
mod conversion;
mod swapchain;

pub use context::VulkanContext;
pub use swapchain::VulkanSurface;

use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::sync::Arc;

use ash::vk::{self, Handle};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

use crate::backend::traits::*;
use crate::backend::types::*;
use conversion::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObjectKind {
    Buffer,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorPool,
    PipelineLayout,
    Pipeline,
    Fence,
    CommandPool,
}

/// [`Device`] implementation over a logical Vulkan device
pub struct VulkanDevice {
    context: Arc<VulkanContext>,
    objects: HashSet<(ObjectKind, u64)>,
    memories: HashMap<u64, Allocation>,
    mapped: HashSet<u64>,
    next_memory_id: u64,
}

impl VulkanDevice {
    pub fn new(context: Arc<VulkanContext>) -> Self {
        Self {
            context,
            objects: HashSet::new(),
            memories: HashMap::new(),
            mapped: HashSet::new(),
            next_memory_id: 1,
        }
    }

    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.context
    }

    pub fn graphics_queue(&self) -> QueueHandle {
        QueueHandle(self.context.graphics_queue().as_raw())
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.context.graphics_queue_family()
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> BackendResult<()> {
        self.context.wait_idle()
    }

    fn device(&self) -> &ash::Device {
        self.context.device()
    }

    fn track(&mut self, kind: ObjectKind, raw: u64) {
        self.objects.insert((kind, raw));
    }

    /// Stop tracking an object; false when the handle is not live
    fn release(&mut self, kind: ObjectKind, raw: u64) -> bool {
        let known = self.objects.remove(&(kind, raw));
        if !known {
            log::warn!("Ignoring destroy of unknown {:?} {:#x}", kind, raw);
        }
        known
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<(u64, vk::DeviceMemory, u64), String> {
        let location = match location {
            MemoryLocation::HostVisible => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryLocation::DeviceLocal => gpu_allocator::MemoryLocation::GpuOnly,
        };

        let allocation = self
            .context
            .allocator()
            .map_err(|e| e.to_string())?
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| e.to_string())?;

        let memory = unsafe { allocation.memory() };
        let offset = allocation.offset();
        let id = self.next_memory_id;
        self.next_memory_id += 1;
        self.memories.insert(id, allocation);
        Ok((id, memory, offset))
    }

    fn free_allocation(&mut self, id: u64) {
        self.mapped.remove(&id);
        let Some(allocation) = self.memories.remove(&id) else {
            log::warn!("Ignoring free of unknown memory {}", id);
            return;
        };
        match self.context.allocator() {
            Ok(allocator) => {
                if let Err(e) = allocator.lock().free(allocation) {
                    log::warn!("Failed to free memory {}: {}", id, e);
                }
            }
            Err(e) => log::warn!("Failed to free memory {}: {}", id, e),
        }
    }

    unsafe fn destroy_object(&self, kind: ObjectKind, raw: u64) {
        let device = self.device();
        match kind {
            ObjectKind::Buffer => device.destroy_buffer(vk::Buffer::from_raw(raw), None),
            ObjectKind::Image => device.destroy_image(vk::Image::from_raw(raw), None),
            ObjectKind::ImageView => device.destroy_image_view(vk::ImageView::from_raw(raw), None),
            ObjectKind::Sampler => device.destroy_sampler(vk::Sampler::from_raw(raw), None),
            ObjectKind::ShaderModule => {
                device.destroy_shader_module(vk::ShaderModule::from_raw(raw), None)
            }
            ObjectKind::DescriptorSetLayout => device
                .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(raw), None),
            ObjectKind::DescriptorPool => {
                device.destroy_descriptor_pool(vk::DescriptorPool::from_raw(raw), None)
            }
            ObjectKind::PipelineLayout => {
                device.destroy_pipeline_layout(vk::PipelineLayout::from_raw(raw), None)
            }
            ObjectKind::Pipeline => device.destroy_pipeline(vk::Pipeline::from_raw(raw), None),
            ObjectKind::Fence => device.destroy_fence(vk::Fence::from_raw(raw), None),
            ObjectKind::CommandPool => {
                device.destroy_command_pool(vk::CommandPool::from_raw(raw), None)
            }
        }
    }

    fn destroy(&mut self, kind: ObjectKind, raw: u64) {
        if self.release(kind, raw) {
            unsafe { self.destroy_object(kind, raw) };
        }
    }
}

fn command_buffer(cmd: CommandBufferHandle) -> vk::CommandBuffer {
    vk::CommandBuffer::from_raw(cmd.raw())
}

impl Device for VulkanDevice {
    fn create_command_pool(&mut self, queue_family: u32) -> BackendResult<CommandPoolHandle> {
        let pool_info = vk::CommandPoolCreateInfo {
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };

        let pool = unsafe { self.device().create_command_pool(&pool_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        self.track(ObjectKind::CommandPool, pool.as_raw());
        Ok(CommandPoolHandle(pool.as_raw()))
    }

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: vk::CommandPool::from_raw(pool.raw()),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };

        let buffers = unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        Ok(buffers
            .into_iter()
            .map(|cb| CommandBufferHandle(cb.as_raw()))
            .collect())
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
    ) -> BackendResult<(BufferHandle, MemoryHandle)> {
        let buffer_info = vk::BufferCreateInfo {
            size: desc.size,
            usage: convert_buffer_usage(desc.usage),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };

        let buffer = unsafe { self.device().create_buffer(&buffer_info, None) }
            .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;

        let requirements = unsafe { self.device().get_buffer_memory_requirements(buffer) };
        let name = desc.label.as_deref().unwrap_or("buffer");

        let (memory_id, memory, offset) =
            match self.allocate(name, requirements, desc.location, true) {
                Ok(allocated) => allocated,
                Err(e) => {
                    unsafe { self.device().destroy_buffer(buffer, None) };
                    return Err(BackendError::BufferCreationFailed(e));
                }
            };

        if let Err(e) = unsafe { self.device().bind_buffer_memory(buffer, memory, offset) } {
            unsafe { self.device().destroy_buffer(buffer, None) };
            self.free_allocation(memory_id);
            return Err(BackendError::BufferCreationFailed(e.to_string()));
        }

        self.track(ObjectKind::Buffer, buffer.as_raw());
        Ok((BufferHandle(buffer.as_raw()), MemoryHandle(memory_id)))
    }

    fn create_image(
        &mut self,
        desc: &TextureDescriptor,
    ) -> BackendResult<(ImageHandle, MemoryHandle)> {
        let image_info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            format: convert_texture_format(desc.format),
            tiling: vk::ImageTiling::OPTIMAL,
            initial_layout: vk::ImageLayout::UNDEFINED,
            usage: convert_texture_usage(desc.usage, desc.format.is_depth()),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        let image = unsafe { self.device().create_image(&image_info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;

        let requirements = unsafe { self.device().get_image_memory_requirements(image) };
        let name = desc.label.as_deref().unwrap_or("texture");

        let (memory_id, memory, offset) =
            match self.allocate(name, requirements, MemoryLocation::DeviceLocal, false) {
                Ok(allocated) => allocated,
                Err(e) => {
                    unsafe { self.device().destroy_image(image, None) };
                    return Err(BackendError::TextureCreationFailed(e));
                }
            };

        if let Err(e) = unsafe { self.device().bind_image_memory(image, memory, offset) } {
            unsafe { self.device().destroy_image(image, None) };
            self.free_allocation(memory_id);
            return Err(BackendError::TextureCreationFailed(e.to_string()));
        }

        self.track(ObjectKind::Image, image.as_raw());
        Ok((ImageHandle(image.as_raw()), MemoryHandle(memory_id)))
    }

    fn create_image_view(
        &mut self,
        image: ImageHandle,
        format: TextureFormat,
    ) -> BackendResult<ImageViewHandle> {
        let view_info = vk::ImageViewCreateInfo {
            image: vk::Image::from_raw(image.raw()),
            view_type: vk::ImageViewType::TYPE_2D,
            format: convert_texture_format(format),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };

        let view = unsafe { self.device().create_image_view(&view_info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;

        self.track(ObjectKind::ImageView, view.as_raw());
        Ok(ImageViewHandle(view.as_raw()))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler_info = vk::SamplerCreateInfo {
            mag_filter: convert_filter(desc.mag_filter),
            min_filter: convert_filter(desc.min_filter),
            mipmap_mode: convert_mipmap_mode(desc.mipmap_filter),
            address_mode_u: convert_address_mode(desc.address_mode_u),
            address_mode_v: convert_address_mode(desc.address_mode_v),
            address_mode_w: convert_address_mode(desc.address_mode_w),
            compare_op: vk::CompareOp::NEVER,
            min_lod: 0.0,
            max_lod: 0.0,
            border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
            ..Default::default()
        };

        let sampler = unsafe { self.device().create_sampler(&sampler_info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;

        self.track(ObjectKind::Sampler, sampler.as_raw());
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn create_shader_module(&mut self, code: &[u32]) -> BackendResult<ShaderModuleHandle> {
        let module_info = vk::ShaderModuleCreateInfo::default().code(code);

        let module = unsafe { self.device().create_shader_module(&module_info, None) }
            .map_err(|e| BackendError::ShaderCreationFailed(e.to_string()))?;

        self.track(ObjectKind::ShaderModule, module.as_raw());
        Ok(ShaderModuleHandle(module.as_raw()))
    }

    fn map_memory(&mut self, memory: MemoryHandle) -> BackendResult<()> {
        let allocation = self.memories.get(&memory.raw()).ok_or_else(|| {
            BackendError::InvalidHandle(format!("memory {}", memory.raw()))
        })?;
        if allocation.mapped_ptr().is_none() {
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
        let mapped = self
            .memories
            .get_mut(&memory.raw())
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| BackendError::InvalidHandle(format!("memory {}", memory.raw())))?;

        let start = offset as usize;
        let end = start + data.len();
        if end > mapped.len() {
            return Err(BackendError::MemoryMapFailed(format!(
                "write of {} bytes at {} exceeds allocation of {} bytes",
                data.len(),
                offset,
                mapped.len()
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn unmap_memory(&mut self, memory: MemoryHandle) {
        if !self.mapped.remove(&memory.raw()) {
            log::warn!("Unmapping memory {} that is not mapped", memory.raw());
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        entries: &[DescriptorLayoutEntry],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|e| vk::DescriptorSetLayoutBinding {
                binding: e.binding,
                descriptor_type: convert_descriptor_type(e.ty),
                descriptor_count: 1,
                stage_flags: convert_shader_stage_flags(e.visibility),
                ..Default::default()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe { self.device().create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| BackendError::DescriptorCreationFailed(e.to_string()))?;

        self.track(ObjectKind::DescriptorSetLayout, layout.as_raw());
        Ok(DescriptorSetLayoutHandle(layout.as_raw()))
    }

    fn create_descriptor_pool(
        &mut self,
        sizes: &[DescriptorPoolSize],
        max_sets: u32,
    ) -> BackendResult<DescriptorPoolHandle> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
            .iter()
            .map(|s| vk::DescriptorPoolSize {
                ty: convert_descriptor_type(s.ty),
                descriptor_count: s.count,
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { self.device().create_descriptor_pool(&pool_info, None) }
            .map_err(|e| BackendError::DescriptorCreationFailed(e.to_string()))?;

        self.track(ObjectKind::DescriptorPool, pool.as_raw());
        Ok(DescriptorPoolHandle(pool.as_raw()))
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let layouts = [vk::DescriptorSetLayout::from_raw(layout.raw())];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk::DescriptorPool::from_raw(pool.raw()))
            .set_layouts(&layouts);

        let sets = unsafe { self.device().allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| BackendError::DescriptorCreationFailed(e.to_string()))?;

        sets.first()
            .map(|set| DescriptorSetHandle(set.as_raw()))
            .ok_or_else(|| BackendError::DescriptorCreationFailed("no set allocated".into()))
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let dst_set = vk::DescriptorSet::from_raw(set.raw());

        // Info arrays must outlive the write structs that point into them
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
            .iter()
            .map(|w| match w.resource {
                DescriptorResource::UniformBuffer {
                    buffer,
                    offset,
                    range,
                } => [vk::DescriptorBufferInfo {
                    buffer: vk::Buffer::from_raw(buffer.raw()),
                    offset,
                    range,
                }],
                _ => [vk::DescriptorBufferInfo::default()],
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
            .iter()
            .map(|w| match w.resource {
                DescriptorResource::CombinedImageSampler { view, sampler } => {
                    [vk::DescriptorImageInfo {
                        sampler: vk::Sampler::from_raw(sampler.raw()),
                        image_view: vk::ImageView::from_raw(view.raw()),
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }]
                }
                _ => [vk::DescriptorImageInfo::default()],
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(dst_set)
                    .dst_binding(w.binding)
                    .descriptor_type(convert_descriptor_type(w.resource.binding_type()));
                match w.resource {
                    DescriptorResource::UniformBuffer { .. } => {
                        write.buffer_info(&buffer_infos[i])
                    }
                    DescriptorResource::CombinedImageSampler { .. } => {
                        write.image_info(&image_infos[i])
                    }
                }
            })
            .collect();

        unsafe { self.device().update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> BackendResult<PipelineLayoutHandle> {
        let layouts: Vec<vk::DescriptorSetLayout> = set_layouts
            .iter()
            .map(|h| vk::DescriptorSetLayout::from_raw(h.raw()))
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&layouts);

        let layout = unsafe { self.device().create_pipeline_layout(&layout_info, None) }
            .map_err(|e| BackendError::PipelineCreationFailed(e.to_string()))?;

        self.track(ObjectKind::PipelineLayout, layout.as_raw());
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let entry_names = desc
            .stages
            .iter()
            .map(|stage| CString::new(stage.entry_point.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BackendError::PipelineCreationFailed(e.to_string()))?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .zip(&entry_names)
            .map(|(stage, name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(convert_shader_stage(stage.stage))
                    .module(vk::ShaderModule::from_raw(stage.module.raw()))
                    .name(name)
            })
            .collect();

        let layout = &desc.vertex_layout;
        let bindings = [vk::VertexInputBindingDescription {
            binding: layout.binding,
            stride: layout.array_stride as u32,
            input_rate: convert_step_mode(layout.step_mode),
        }];
        let attributes: Vec<vk::VertexInputAttributeDescription> = layout
            .attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: attr.binding,
                format: convert_vertex_format(attr.format),
                offset: attr.offset as u32,
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_topology(desc.topology));

        let viewports = [vk::Viewport {
            x: desc.viewport.x,
            y: desc.viewport.y,
            width: desc.viewport.width,
            height: desc.viewport.height,
            min_depth: desc.viewport.min_depth,
            max_depth: desc.viewport.max_depth,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D {
                x: desc.scissor.x,
                y: desc.scissor.y,
            },
            extent: vk::Extent2D {
                width: desc.scissor.extent.width,
                height: desc.scissor.extent.height,
            },
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert_cull_mode(desc.rasterization.cull_mode))
            .front_face(convert_front_face(desc.rasterization.front_face))
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::from_raw(desc.sample_count.max(1)));

        let depth_stencil = match desc.depth {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(depth.write_enabled)
                .depth_compare_op(convert_compare_op(depth.compare))
                .min_depth_bounds(0.0)
                .max_depth_bounds(1.0),
            None => vk::PipelineDepthStencilStateCreateInfo::default(),
        };

        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        };
        let blend_attachments = [blend_attachment];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .layout(vk::PipelineLayout::from_raw(desc.layout.raw()))
            .render_pass(vk::RenderPass::from_raw(desc.render_pass.raw()))
            .subpass(0);

        let pipelines = unsafe {
            self.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| BackendError::PipelineCreationFailed(e.to_string()))?;

        let pipeline = pipelines.first().copied().ok_or_else(|| {
            BackendError::PipelineCreationFailed("no pipeline returned".into())
        })?;

        self.track(ObjectKind::Pipeline, pipeline.as_raw());
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn create_fence(&mut self) -> BackendResult<FenceHandle> {
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device().create_fence(&fence_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        self.track(ObjectKind::Fence, fence.as_raw());
        Ok(FenceHandle(fence.as_raw()))
    }

    fn wait_for_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let fences = [vk::Fence::from_raw(fence.raw())];
        unsafe { self.device().wait_for_fences(&fences, true, u64::MAX) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            _ => BackendError::FenceWaitFailed(e.to_string()),
        })
    }

    fn begin_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let cb = command_buffer(cmd);
        unsafe {
            self.device()
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| BackendError::CommandRecordingFailed(e.to_string()))?;

            let begin_info = vk::CommandBufferBeginInfo::default();
            self.device()
                .begin_command_buffer(cb, &begin_info)
                .map_err(|e| BackendError::CommandRecordingFailed(e.to_string()))
        }
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        unsafe { self.device().end_command_buffer(command_buffer(cmd)) }
            .map_err(|e| BackendError::CommandRecordingFailed(e.to_string()))
    }

    fn cmd_image_barrier(&mut self, cmd: CommandBufferHandle, barrier: &ImageBarrier) {
        let aspect_mask = if barrier.depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(convert_image_layout(barrier.old_layout))
            .new_layout(convert_image_layout(barrier.new_layout))
            .src_access_mask(convert_access_flags(barrier.src_access))
            .dst_access_mask(convert_access_flags(barrier.dst_access))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk::Image::from_raw(barrier.image.raw()))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device().cmd_pipeline_barrier(
                command_buffer(cmd),
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    fn cmd_clear_color_image(&mut self, cmd: CommandBufferHandle, image: ImageHandle, color: [f32; 4]) {
        let clear_color = vk::ClearColorValue { float32: color };
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device().cmd_clear_color_image(
                command_buffer(cmd),
                vk::Image::from_raw(image.raw()),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_color,
                &[range],
            );
        }
    }

    fn cmd_begin_render_pass(&mut self, cmd: CommandBufferHandle, begin: &RenderPassBegin) {
        let clear_values: Vec<vk::ClearValue> =
            begin.clear_values.iter().map(convert_clear_value).collect();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk::RenderPass::from_raw(begin.render_pass.raw()))
            .framebuffer(vk::Framebuffer::from_raw(begin.framebuffer.raw()))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: begin.extent.width,
                    height: begin.extent.height,
                },
            })
            .clear_values(&clear_values);

        unsafe {
            self.device().cmd_begin_render_pass(
                command_buffer(cmd),
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn cmd_end_render_pass(&mut self, cmd: CommandBufferHandle) {
        unsafe { self.device().cmd_end_render_pass(command_buffer(cmd)) };
    }

    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device().cmd_bind_pipeline(
                command_buffer(cmd),
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(pipeline.raw()),
            );
        }
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: CommandBufferHandle, binding: u32, buffer: BufferHandle) {
        unsafe {
            self.device().cmd_bind_vertex_buffers(
                command_buffer(cmd),
                binding,
                &[vk::Buffer::from_raw(buffer.raw())],
                &[0],
            );
        }
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        format: IndexFormat,
    ) {
        unsafe {
            self.device().cmd_bind_index_buffer(
                command_buffer(cmd),
                vk::Buffer::from_raw(buffer.raw()),
                0,
                convert_index_type(format),
            );
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                command_buffer(cmd),
                vk::PipelineBindPoint::GRAPHICS,
                vk::PipelineLayout::from_raw(layout.raw()),
                0,
                &[vk::DescriptorSet::from_raw(set.raw())],
                &[],
            );
        }
    }

    fn cmd_draw(
        &mut self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw(
                command_buffer(cmd),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
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
        unsafe {
            self.device().cmd_draw_indexed(
                command_buffer(cmd),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        image: ImageHandle,
        region: &BufferImageCopy,
    ) {
        let copy = vk::BufferImageCopy {
            buffer_offset: region.buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: region.width,
                height: region.height,
                depth: 1,
            },
        };
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                command_buffer(cmd),
                vk::Buffer::from_raw(buffer.raw()),
                vk::Image::from_raw(image.raw()),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
    }

    fn queue_submit(&mut self, queue: QueueHandle, submit: &SubmitInfo) -> BackendResult<()> {
        let command_buffers = [command_buffer(submit.command_buffer)];
        let wait_semaphores: Vec<vk::Semaphore> = submit
            .wait_semaphore
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.raw()))
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
            .iter()
            .map(|_| vk::PipelineStageFlags::ALL_COMMANDS)
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = submit
            .signal_semaphore
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.raw()))
            .collect();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = submit
            .fence
            .map(|f| vk::Fence::from_raw(f.raw()))
            .unwrap_or_else(vk::Fence::null);

        unsafe {
            self.device()
                .queue_submit(vk::Queue::from_raw(queue.raw()), &[submit_info], fence)
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                BackendError::OutOfMemory
            }
            _ => BackendError::SubmitFailed(e.to_string()),
        })
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.destroy(ObjectKind::Pipeline, pipeline.raw());
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        self.destroy(ObjectKind::PipelineLayout, layout.raw());
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        self.destroy(ObjectKind::DescriptorSetLayout, layout.raw());
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.destroy(ObjectKind::DescriptorPool, pool.raw());
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.destroy(ObjectKind::ShaderModule, module.raw());
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.destroy(ObjectKind::Sampler, sampler.raw());
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        self.destroy(ObjectKind::ImageView, view.raw());
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.destroy(ObjectKind::Buffer, buffer.raw());
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.destroy(ObjectKind::Image, image.raw());
    }

    fn free_memory(&mut self, memory: MemoryHandle) {
        self.free_allocation(memory.raw());
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.destroy(ObjectKind::Fence, fence.raw());
    }

    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        if !self.objects.contains(&(ObjectKind::CommandPool, pool.raw())) {
            log::warn!("Ignoring free of command buffers from unknown pool {:#x}", pool.raw());
            return;
        }
        let buffers: Vec<vk::CommandBuffer> = buffers.iter().copied().map(command_buffer).collect();
        unsafe {
            self.device()
                .free_command_buffers(vk::CommandPool::from_raw(pool.raw()), &buffers);
        }
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        self.destroy(ObjectKind::CommandPool, pool.raw());
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if self.objects.is_empty() && self.memories.is_empty() {
            return;
        }

        log::warn!(
            "VulkanDevice dropped with {} live objects and {} allocations",
            self.objects.len(),
            self.memories.len()
        );

        let _ = self.context.wait_idle();

        const ORDER: [ObjectKind; 11] = [
            ObjectKind::Pipeline,
            ObjectKind::ShaderModule,
            ObjectKind::PipelineLayout,
            ObjectKind::DescriptorSetLayout,
            ObjectKind::DescriptorPool,
            ObjectKind::Sampler,
            ObjectKind::ImageView,
            ObjectKind::Buffer,
            ObjectKind::Image,
            ObjectKind::Fence,
            ObjectKind::CommandPool,
        ];
        for kind in ORDER {
            let live: Vec<u64> = self
                .objects
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, raw)| *raw)
                .collect();
            for raw in live {
                self.destroy(kind, raw);
            }
        }

        let memories: Vec<u64> = self.memories.keys().copied().collect();
        for id in memories {
            self.free_allocation(id);
        }
    }
}
