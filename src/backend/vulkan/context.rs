//! Vulkan instance, device and allocator shared by the device and the surface.

use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::khr::{surface, swapchain};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::backend::traits::{BackendError, BackendResult};

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything that lives for the whole window lifetime: instance, window
/// surface, logical device, graphics queue and the memory allocator.
pub struct VulkanContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_fn: surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_fn: swapchain::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    allocator: Option<Arc<Mutex<Allocator>>>,
}

impl VulkanContext {
    pub fn new(window: &Window, validation: bool) -> BackendResult<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let validation_available = validation && check_validation_layer_support(&entry);
            if validation && !validation_available {
                log::warn!("Validation layers requested but not available");
            }

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"vk-samples")
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(c"vk-lifecycle")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_1);

            let display_handle = window
                .display_handle()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
            let window_handle = window
                .window_handle()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let mut extensions: Vec<*const c_char> =
                ash_window::enumerate_required_extensions(display_handle.as_raw())
                    .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
                    .to_vec();
            if validation_available {
                extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names: Vec<*const c_char> = if validation_available {
                vec![VALIDATION_LAYER_NAME.as_ptr()]
            } else {
                vec![]
            };

            let instance_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_extension_names(&extensions)
                .enabled_layer_names(&layer_names);

            let instance = entry
                .create_instance(&instance_info, None)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let debug_utils = if validation_available {
                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let messenger = create_debug_messenger(&loader)?;
                Some((loader, messenger))
            } else {
                None
            };

            let surface_fn = surface::Instance::new(&entry, &instance);
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let (physical_device, graphics_queue_family) = physical_devices
                .into_iter()
                .find_map(|pd| {
                    find_queue_family(&instance, pd, &surface_fn, surface).map(|family| (pd, family))
                })
                .ok_or_else(|| {
                    BackendError::InitializationFailed("No suitable physical device".into())
                })?;

            let properties = instance.get_physical_device_properties(physical_device);
            log::info!(
                "Using GPU: {}",
                CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy()
            );

            let queue_priorities = [1.0f32];
            let queue_info = vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_queue_family)
                .queue_priorities(&queue_priorities);
            let queue_infos = [queue_info];

            let device_extensions = [swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures::default();

            let device_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_infos)
                .enabled_extension_names(&device_extensions)
                .enabled_features(&device_features);

            let device = instance
                .create_device(physical_device, &device_info, None)
                .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

            let graphics_queue = device.get_device_queue(graphics_queue_family, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let swapchain_fn = swapchain::Device::new(&instance, &device);

            Ok(Self {
                _entry: entry,
                instance,
                debug_utils,
                surface_fn,
                surface,
                physical_device,
                device,
                swapchain_fn,
                graphics_queue,
                graphics_queue_family,
                allocator: Some(Arc::new(Mutex::new(allocator))),
            })
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn surface_fn(&self) -> &surface::Instance {
        &self.surface_fn
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn swapchain_fn(&self) -> &swapchain::Device {
        &self.swapchain_fn
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    pub fn allocator(&self) -> BackendResult<&Arc<Mutex<Allocator>>> {
        self.allocator
            .as_ref()
            .ok_or_else(|| BackendError::InitializationFailed("Allocator already dropped".into()))
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            _ => BackendError::SubmitFailed(e.to_string()),
        })
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // The allocator frees its device memory blocks on drop
            if let Some(allocator) = self.allocator.take() {
                if Arc::strong_count(&allocator) > 1 {
                    log::warn!("Allocator still shared while the device is destroyed");
                }
                drop(allocator);
            }

            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Vulkan context destroyed");
    }
}

fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families.iter().enumerate().find_map(|(index, family)| {
        let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let supports_surface = unsafe {
            surface_fn
                .get_physical_device_surface_support(physical_device, index as u32, surface)
                .unwrap_or(false)
        };
        (supports_graphics && supports_surface).then_some(index as u32)
    })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}

fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> BackendResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
    })
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the driver passes either null or a valid callback data pointer
    let message = match unsafe { callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => unsafe { CStr::from_ptr(data.p_message) }
            .to_string_lossy()
            .into_owned(),
        _ => String::from("(no message)"),
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[Vulkan] {}", message),
        _ => log::trace!("[Vulkan] {}", message),
    }

    vk::FALSE
}
