//! Vulkan context: instance, physical device selection, logical device
//!
//! Everything that used to be global state in hand-rolled Vulkan apps lives
//! in one [`VulkanContext`] constructed at startup and passed by reference
//! to every other component. Device errors surface as [`VulkanError`]
//! results; the application decides what is fatal.

use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{
    AccelerationStructure, DeferredHostOperations, RayTracingPipeline, Surface as SurfaceLoader,
    Swapchain as SwapchainLoader,
};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::surface::Surface;
use crate::render::backends::vulkan::resources::allocator::GpuAllocator;

/// Errors raised by the Vulkan backend
#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Device or host memory exhausted
    #[error("Out of GPU memory")]
    OutOfMemory,

    /// The device was lost; recovery would require full context recreation
    #[error("Device lost")]
    DeviceLost,

    /// A required feature or extension is not supported by any GPU
    #[error("Feature unsupported: {feature}")]
    FeatureUnsupported {
        /// Name of the missing feature or extension
        feature: &'static str,
    },

    /// Swapchain no longer matches the surface; recreate and retry
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// Resource with the given name is not in the registry
    #[error("Resource not found: {name}")]
    ResourceNotFound {
        /// Registry key that failed to resolve
        name: String,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

impl VulkanError {
    /// Classify a raw Vulkan result code into the error taxonomy
    pub fn from_vk(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            other => Self::Api(other),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (debug builds)
    #[cfg(debug_assertions)]
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a new Vulkan 1.2 instance, optionally with validation layers
    pub fn new(
        display_handle: RawDisplayHandle,
        app_name: &str,
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e))
        })?;

        let app_name_cstr = CString::new(app_name).unwrap();
        let engine_name_cstr = CString::new("RayEngine").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        // Surface extensions for the collaborator-supplied window handle
        let required_extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(VulkanError::from_vk)?;

        #[allow(unused_mut)] // Mutable in debug builds for adding debug extensions
        let mut extensions: Vec<*const i8> = required_extensions.to_vec();

        #[cfg(debug_assertions)]
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if cfg!(debug_assertions) && enable_validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            vec![]
        };

        let layer_names_ptrs: Vec<*const i8> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::from_vk)?
        };

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let debug_messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(debug_messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
            #[cfg(debug_assertions)]
            debug_messenger,
        })
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::from_vk)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let (Some(debug_utils), Some(debug_messenger)) =
                (&self.debug_utils, &self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(*debug_messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
///
/// Validation messages are soft warnings: logged, never escalated.
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Ray tracing pipeline limits needed for shader binding table layout
#[derive(Debug, Clone, Copy)]
pub struct RayTracingProperties {
    /// Size of one shader group handle, in bytes
    pub shader_group_handle_size: u32,
    /// Required alignment of handles within a group
    pub shader_group_handle_alignment: u32,
    /// Required alignment of each SBT region base address
    pub shader_group_base_alignment: u32,
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Ray tracing pipeline limits
    pub ray_tracing: RayTracingProperties,
}

/// Device extensions the backend cannot run without
fn required_device_extensions() -> [&'static CStr; 4] {
    [
        SwapchainLoader::name(),
        AccelerationStructure::name(),
        RayTracingPipeline::name(),
        DeferredHostOperations::name(),
    ]
}

impl PhysicalDeviceInfo {
    /// Select a GPU with graphics/present queues and ray tracing support
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &SurfaceLoader,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::from_vk)?
        };

        for device in devices {
            if let Ok(device_info) = Self::evaluate_device(instance, device, surface, surface_loader)
            {
                log::info!("Selected GPU: {}", unsafe {
                    CStr::from_ptr(device_info.properties.device_name.as_ptr()).to_string_lossy()
                });
                return Ok(device_info);
            }
        }

        Err(VulkanError::FeatureUnsupported {
            feature: "ray tracing capable GPU",
        })
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &SurfaceLoader,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;

        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }

            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::from_vk)?
            };

            if present_support && present_family.is_none() {
                present_family = Some(index);
            }

            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family.ok_or(VulkanError::FeatureUnsupported {
            feature: "graphics queue family",
        })?;
        let present_family = present_family.ok_or(VulkanError::FeatureUnsupported {
            feature: "present queue family",
        })?;

        // All four device extensions must be present
        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::from_vk)?
        };

        for required in required_device_extensions() {
            let found = extensions.iter().any(|available| {
                let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
                extension_name == required
            });
            if !found {
                return Err(VulkanError::FeatureUnsupported {
                    feature: "ray tracing device extensions",
                });
            }
        }

        // Pull the shader-group limits needed to lay out the SBT
        let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut properties2 =
            vk::PhysicalDeviceProperties2::builder().push_next(&mut rt_properties);
        unsafe {
            instance.get_physical_device_properties2(device, &mut properties2);
        }

        if rt_properties.shader_group_handle_size == 0 {
            return Err(VulkanError::FeatureUnsupported {
                feature: "ray tracing pipeline properties",
            });
        }

        Ok(Self {
            device,
            properties,
            graphics_family,
            present_family,
            ray_tracing: RayTracingProperties {
                shader_group_handle_size: rt_properties.shader_group_handle_size,
                shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
                shader_group_base_alignment: rt_properties.shader_group_base_alignment,
            },
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl LogicalDevice {
    /// Create the logical device with ray tracing feature chain enabled
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let queue_priorities = [1.0_f32];
        let mut unique_families = vec![physical.graphics_family];
        if physical.present_family != physical.graphics_family {
            unique_families.push(physical.present_family);
        }

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extension_names: Vec<*const i8> = required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        // Vulkan 1.2 core: buffer device addresses for AS builds, descriptor
        // indexing for the update-after-bind texture array.
        let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(true)
            .runtime_descriptor_array(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_sampled_image_update_after_bind(true);

        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
            .acceleration_structure(true);

        let mut rt_pipeline_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut vulkan12_features)
            .push_next(&mut accel_features)
            .push_next(&mut rt_pipeline_features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::from_vk)?
        };

        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
        })
    }

    /// Get the raw device handle
    pub fn raw(&self) -> &Device {
        &self.device
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Shared Vulkan context passed by reference to every backend component
///
/// Field order matters: the allocator must be torn down before the logical
/// device, and both before the surface and instance. Components holding an
/// `Arc` to the allocator must themselves be dropped before the context.
pub struct VulkanContext {
    allocator: Arc<GpuAllocator>,
    accel_loader: AccelerationStructure,
    rt_pipeline_loader: RayTracingPipeline,
    swapchain_loader: SwapchainLoader,
    device: LogicalDevice,
    physical: PhysicalDeviceInfo,
    surface: Surface,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create instance, surface, device, allocator and extension loaders
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        app_name: &str,
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        log::debug!("Creating Vulkan context...");

        let instance = VulkanInstance::new(display_handle, app_name, enable_validation)?;
        let surface = Surface::new(&instance, display_handle, window_handle)?;
        let physical = PhysicalDeviceInfo::select_suitable_device(
            &instance.instance,
            surface.handle(),
            surface.loader(),
        )?;
        let device = LogicalDevice::new(&instance.instance, &physical)?;

        let allocator = Arc::new(GpuAllocator::new(
            &instance.instance,
            device.raw(),
            physical.device,
        )?);

        let swapchain_loader = SwapchainLoader::new(&instance.instance, device.raw());
        let accel_loader = AccelerationStructure::new(&instance.instance, device.raw());
        let rt_pipeline_loader = RayTracingPipeline::new(&instance.instance, device.raw());

        log::debug!("Vulkan context created");
        Ok(Self {
            allocator,
            accel_loader,
            rt_pipeline_loader,
            swapchain_loader,
            device,
            physical,
            surface,
            instance,
        })
    }

    /// Borrow the raw logical device
    pub fn device(&self) -> &Device {
        self.device.raw()
    }

    /// Clone the raw logical device handle for RAII wrappers
    pub fn raw_device(&self) -> Device {
        self.device.raw().clone()
    }

    /// Borrow the instance handle
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Physical device info and limits
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// The GPU memory allocator shared by all resources
    pub fn allocator(&self) -> &Arc<GpuAllocator> {
        &self.allocator
    }

    /// Graphics queue used for all submissions, including uploads
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue()
    }

    /// Present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue()
    }

    /// Surface wrapper
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Acceleration structure extension loader
    pub fn accel_loader(&self) -> &AccelerationStructure {
        &self.accel_loader
    }

    /// Ray tracing pipeline extension loader
    pub fn rt_pipeline_loader(&self) -> &RayTracingPipeline {
        &self.rt_pipeline_loader
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .raw()
                .device_wait_idle()
                .map_err(VulkanError::from_vk)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            VulkanError::from_vk(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            VulkanError::OutOfMemory
        ));
        assert!(matches!(
            VulkanError::from_vk(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            VulkanError::OutOfMemory
        ));
        assert!(matches!(
            VulkanError::from_vk(vk::Result::ERROR_DEVICE_LOST),
            VulkanError::DeviceLost
        ));
        assert!(matches!(
            VulkanError::from_vk(vk::Result::ERROR_OUT_OF_DATE_KHR),
            VulkanError::SwapchainOutOfDate
        ));
        assert!(matches!(
            VulkanError::from_vk(vk::Result::TIMEOUT),
            VulkanError::Api(vk::Result::TIMEOUT)
        ));
    }

    #[test]
    fn test_required_extensions_include_ray_tracing() {
        let names = required_device_extensions();
        let as_name = AccelerationStructure::name();
        assert!(names.contains(&as_name));
        assert_eq!(names.len(), 4);
    }
}
