//! Swapchain, render pass and framebuffers presented to a window surface.

use std::sync::Arc;

use ash::vk::{self, Handle};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::context::VulkanContext;
use crate::backend::traits::*;
use crate::backend::types::Extent2d;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

struct DepthTarget {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Allocation,
}

/// [`HostSurface`] backed by a `VK_KHR_swapchain` swapchain.
///
/// Swapchain images are handed out in `PRESENT_SRC_KHR`; the render pass
/// clears them and returns them to that layout itself.
pub struct VulkanSurface {
    context: Arc<VulkanContext>,
    vsync: bool,
    depth: bool,

    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    render_pass: vk::RenderPass,
    depth_target: Option<DepthTarget>,
    framebuffers: Vec<vk::Framebuffer>,

    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    current_image: Option<u32>,
}

impl VulkanSurface {
    pub fn new(
        context: Arc<VulkanContext>,
        extent: Extent2d,
        vsync: bool,
        depth: bool,
    ) -> BackendResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let (image_available, render_finished) = unsafe {
            let device = context.device();
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(BackendError::SwapchainCreationFailed(e.to_string()));
                }
            };
            (image_available, render_finished)
        };

        let mut surface = Self {
            context,
            vsync,
            depth,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            render_pass: vk::RenderPass::null(),
            depth_target: None,
            framebuffers: Vec::new(),
            image_available,
            render_finished,
            current_image: None,
        };

        // Drop cleans up whatever was created if this fails part way
        surface.recreate(extent)?;
        Ok(surface)
    }

    /// Rebuild the swapchain and everything sized after it
    pub fn recreate(&mut self, extent: Extent2d) -> BackendResult<()> {
        self.context.wait_idle()?;
        self.destroy_size_dependent();
        self.current_image = None;

        let old_swapchain = self.swapchain;
        let result = self.create_swapchain(extent, old_swapchain);
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.context
                    .swapchain_fn()
                    .destroy_swapchain(old_swapchain, None)
            };
            if self.swapchain == old_swapchain {
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        result?;

        self.create_render_pass_if_needed()?;
        if self.depth {
            self.create_depth_target()?;
        }
        self.create_framebuffers()?;
        self.transition_images_to_present()?;

        log::info!(
            "Swapchain ready: {}x{}, {} images, format {:?}",
            self.extent.width,
            self.extent.height,
            self.images.len(),
            self.format
        );
        Ok(())
    }

    fn create_swapchain(
        &mut self,
        requested: Extent2d,
        old_swapchain: vk::SwapchainKHR,
    ) -> BackendResult<()> {
        let surface_fn = self.context.surface_fn();
        let physical_device = self.context.physical_device();
        let surface = self.context.surface();

        unsafe {
            let capabilities = surface_fn
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;

            let formats = surface_fn
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;

            let present_modes = surface_fn
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;

            // Prefer UNORM BGRA, matching the texture format the samples upload
            let format = formats
                .iter()
                .find(|f| {
                    f.format == vk::Format::B8G8R8A8_UNORM
                        && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                })
                .or_else(|| formats.first())
                .copied()
                .ok_or_else(|| {
                    BackendError::SwapchainCreationFailed("surface reports no formats".into())
                })?;

            let present_mode = if self.vsync {
                vk::PresentModeKHR::FIFO
            } else {
                present_modes
                    .iter()
                    .copied()
                    .find(|&m| m == vk::PresentModeKHR::MAILBOX)
                    .unwrap_or(vk::PresentModeKHR::FIFO)
            };

            let extent = if capabilities.current_extent.width != u32::MAX {
                capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: requested.width.clamp(
                        capabilities.min_image_extent.width,
                        capabilities.max_image_extent.width,
                    ),
                    height: requested.height.clamp(
                        capabilities.min_image_extent.height,
                        capabilities.max_image_extent.height,
                    ),
                }
            };

            let image_count = (capabilities.min_image_count + 1).min(
                if capabilities.max_image_count > 0 {
                    capabilities.max_image_count
                } else {
                    u32::MAX
                },
            );

            let swapchain_info = vk::SwapchainCreateInfoKHR {
                surface,
                min_image_count: image_count,
                image_format: format.format,
                image_color_space: format.color_space,
                image_extent: extent,
                image_array_layers: 1,
                // Clear-only frames write the image with a transfer clear
                image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST,
                image_sharing_mode: vk::SharingMode::EXCLUSIVE,
                pre_transform: capabilities.current_transform,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                present_mode,
                clipped: vk::TRUE,
                old_swapchain,
                ..Default::default()
            };

            let swapchain_fn = self.context.swapchain_fn();
            let swapchain = swapchain_fn
                .create_swapchain(&swapchain_info, None)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
            self.swapchain = swapchain;

            self.images = swapchain_fn
                .get_swapchain_images(swapchain)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;

            self.format = format.format;
            self.extent = extent;

            for &image in &self.images {
                let view_info = vk::ImageViewCreateInfo {
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: format.format,
                    components: vk::ComponentMapping::default(),
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                let view = self
                    .context
                    .device()
                    .create_image_view(&view_info, None)
                    .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
                self.image_views.push(view);
            }
        }
        Ok(())
    }

    fn create_render_pass_if_needed(&mut self) -> BackendResult<()> {
        if self.render_pass != vk::RenderPass::null() {
            return Ok(());
        }

        let mut attachments = vec![vk::AttachmentDescription {
            format: self.format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];
        if self.depth {
            attachments.push(vk::AttachmentDescription {
                format: DEPTH_FORMAT,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::CLEAR,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
        }

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if self.depth {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass];

        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        }];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        self.render_pass = unsafe {
            self.context
                .device()
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?
        };
        Ok(())
    }

    fn create_depth_target(&mut self) -> BackendResult<()> {
        let device = self.context.device();
        let image_info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            format: DEPTH_FORMAT,
            tiling: vk::ImageTiling::OPTIMAL,
            initial_layout: vk::ImageLayout::UNDEFINED,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        unsafe {
            let image = device
                .create_image(&image_info, None)
                .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
            let requirements = device.get_image_memory_requirements(image);

            let allocation = self
                .context
                .allocator()
                .and_then(|allocator| {
                    allocator
                        .lock()
                        .allocate(&AllocationCreateDesc {
                            name: "depth",
                            requirements,
                            location: MemoryLocation::GpuOnly,
                            linear: false,
                            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                        })
                        .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))
                });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    device.destroy_image(image, None);
                    return Err(e);
                }
            };

            // From here on Drop releases the image and its allocation
            let bind_result =
                device.bind_image_memory(image, allocation.memory(), allocation.offset());
            self.depth_target = Some(DepthTarget {
                image,
                view: vk::ImageView::null(),
                allocation,
            });
            bind_result.map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;

            let view_info = vk::ImageViewCreateInfo {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: DEPTH_FORMAT,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::DEPTH,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = device
                .create_image_view(&view_info, None)
                .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
            if let Some(target) = self.depth_target.as_mut() {
                target.view = view;
            }
        }
        Ok(())
    }

    fn create_framebuffers(&mut self) -> BackendResult<()> {
        let depth_view = self.depth_target.as_ref().map(|t| t.view);
        for &color_view in &self.image_views {
            let mut attachments = vec![color_view];
            attachments.extend(depth_view);

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe {
                self.context
                    .device()
                    .create_framebuffer(&framebuffer_info, None)
                    .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?
            };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Move fresh swapchain images from UNDEFINED to PRESENT_SRC_KHR so every
    /// acquired image starts in the presentable layout.
    fn transition_images_to_present(&self) -> BackendResult<()> {
        let device = self.context.device();
        let queue = self.context.graphics_queue();

        unsafe {
            let pool_info = vk::CommandPoolCreateInfo {
                queue_family_index: self.context.graphics_queue_family(),
                flags: vk::CommandPoolCreateFlags::TRANSIENT,
                ..Default::default()
            };
            let pool = device
                .create_command_pool(&pool_info, None)
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;

            let result = (|| -> Result<(), vk::Result> {
                let alloc_info = vk::CommandBufferAllocateInfo {
                    command_pool: pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: 1,
                    ..Default::default()
                };
                let cmd = device
                    .allocate_command_buffers(&alloc_info)?
                    .first()
                    .copied()
                    .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;

                let begin_info = vk::CommandBufferBeginInfo {
                    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                    ..Default::default()
                };
                device.begin_command_buffer(cmd, &begin_info)?;

                let barriers: Vec<vk::ImageMemoryBarrier> = self
                    .images
                    .iter()
                    .map(|&image| {
                        vk::ImageMemoryBarrier::default()
                            .old_layout(vk::ImageLayout::UNDEFINED)
                            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                            .src_access_mask(vk::AccessFlags::empty())
                            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(image)
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                base_mip_level: 0,
                                level_count: 1,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                    })
                    .collect();

                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &barriers,
                );
                device.end_command_buffer(cmd)?;

                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
                device.queue_wait_idle(queue)
            })();

            device.destroy_command_pool(pool, None);
            result.map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))
        }
    }

    fn destroy_size_dependent(&mut self) {
        let device = self.context.device();
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if let Some(target) = self.depth_target.take() {
                if target.view != vk::ImageView::null() {
                    device.destroy_image_view(target.view, None);
                }
                device.destroy_image(target.image, None);
                match self.context.allocator() {
                    Ok(allocator) => {
                        if let Err(e) = allocator.lock().free(target.allocation) {
                            log::warn!("Failed to free depth allocation: {}", e);
                        }
                    }
                    Err(e) => log::warn!("Failed to free depth allocation: {}", e),
                }
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
        }
        self.images.clear();
    }
}

impl HostSurface for VulkanSurface {
    fn acquire_next_image(&mut self) -> BackendResult<AcquiredImage> {
        let (index, _suboptimal) = unsafe {
            self.context.swapchain_fn().acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.image_available,
                vk::Fence::null(),
            )
        }
        .map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::SurfaceLost,
            vk::Result::ERROR_SURFACE_LOST_KHR => BackendError::SurfaceLost,
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            _ => BackendError::AcquireImageFailed(e.to_string()),
        })?;

        let image = self.images.get(index as usize).copied().ok_or_else(|| {
            BackendError::AcquireImageFailed(format!("image index {} out of range", index))
        })?;
        self.current_image = Some(index);

        Ok(AcquiredImage {
            image: ImageHandle(image.as_raw()),
            wait_semaphore: Some(SemaphoreHandle(self.image_available.as_raw())),
            signal_semaphore: Some(SemaphoreHandle(self.render_finished.as_raw())),
            needs_transition: false,
        })
    }

    fn acquire_next_framebuffer(&mut self) -> BackendResult<FramebufferHandle> {
        self.current_image
            .and_then(|index| self.framebuffers.get(index as usize))
            .map(|fb| FramebufferHandle(fb.as_raw()))
            .ok_or_else(|| BackendError::AcquireImageFailed("no image acquired".into()))
    }

    fn current_extent(&self) -> Extent2d {
        Extent2d::new(self.extent.width, self.extent.height)
    }

    fn render_pass(&self) -> RenderPassHandle {
        RenderPassHandle(self.render_pass.as_raw())
    }

    fn has_depth_attachment(&self) -> bool {
        self.depth
    }

    fn swap_buffers(&mut self) -> BackendResult<()> {
        let index = self
            .current_image
            .take()
            .ok_or_else(|| BackendError::PresentFailed("no image acquired".into()))?;

        let wait_semaphores = [self.render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.context.graphics_queue();
        unsafe { self.context.swapchain_fn().queue_present(queue, &present_info) }.map_err(
            |e| match e {
                vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::SurfaceLost,
                vk::Result::ERROR_SURFACE_LOST_KHR => BackendError::SurfaceLost,
                vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
                _ => BackendError::PresentFailed(e.to_string()),
            },
        )?;

        // The frame command buffer is re-recorded next frame
        unsafe { self.context.device().queue_wait_idle(queue) }
            .map_err(|e| BackendError::PresentFailed(e.to_string()))
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        let _ = self.context.wait_idle();
        self.destroy_size_dependent();
        unsafe {
            let device = self.context.device();
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.context
                    .swapchain_fn()
                    .destroy_swapchain(self.swapchain, None);
            }
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
    }
}
