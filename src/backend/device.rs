// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (prefer discrete GPU, require present support)
// - Logical device + queue creation

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::error::RenderError;

/// Vulkan device wrapper with automatic cleanup.
///
/// Owns the whole instance -> surface -> device chain; everything else in
/// the renderer is created from it and must be destroyed before it drops.
pub struct VulkanDevice {
    // Vulkan handles (order matters for drop!)
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
}

/// Queue families required by the renderer. A device qualifies only when
/// both are present; they may resolve to the same family.
#[derive(Debug, Default, Clone, Copy)]
struct QueueFamilyIndices {
    graphics: Option<u32>,
    present: Option<u32>,
}

impl QueueFamilyIndices {
    fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }
}

/// Deterministic suitability score for an adapter type. Mandatory
/// capabilities are checked separately; this only orders qualifying devices.
fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

impl VulkanDevice {
    /// Create the Vulkan device chain for a window surface.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `display` / `window` - Raw handles of the presentation target
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Arc<Self>, RenderError> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }.map_err(|e| {
            RenderError::Init(format!("failed to load Vulkan library ({e}); is Vulkan installed?"))
        })?;

        let enable_validation = enable_validation && Self::validation_layer_available(&entry);

        let instance = Self::create_instance(&entry, app_name, enable_validation, display)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let surface = unsafe { ash_window::create_surface(&entry, &instance, display, window, None) }
            .map_err(|e| RenderError::Init(format!("failed to create window surface: {e}")))?;

        let (physical_device, families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let graphics_queue_family = families.graphics.unwrap_or_default();
        let present_queue_family = families.present.unwrap_or_default();

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let (device, graphics_queue, present_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            present_queue_family,
        )?;

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            graphics_queue_family,
            present_queue_family,
            debug_utils,
            properties,
        }))
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(_) => return false,
        };
        let found = layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
                == c"VK_LAYER_KHRONOS_validation"
        });
        if !found {
            log::warn!("Validation layers requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display: RawDisplayHandle,
    ) -> Result<ash::Instance, RenderError> {
        let app_name_cstr = CString::new(app_name)
            .map_err(|e| RenderError::Init(format!("invalid application name: {e}")))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name_cstr)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for this display, plus debug utils when validating
        let mut extensions = ash_window::enumerate_required_extensions(display)
            .map_err(|e| RenderError::Init(format!("no surface extensions for this display: {e}")))?
            .to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| RenderError::Init(format!("failed to create Vulkan instance: {e}")))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT), RenderError> {
        let debug_utils = DebugUtils::new(entry, instance);

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

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices), RenderError> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            return Err(RenderError::NoSuitableDevice(
                "no Vulkan-capable GPU present".to_string(),
            ));
        }

        let mut best: Option<(vk::PhysicalDevice, QueueFamilyIndices)> = None;
        let mut best_score = 0;

        for device in devices {
            let families = Self::find_queue_families(instance, surface_loader, surface, device);
            if !families.is_complete() {
                continue;
            }
            if !Self::supports_swapchain_extension(instance, device) {
                continue;
            }

            let props = unsafe { instance.get_physical_device_properties(device) };
            let score = device_type_score(props.device_type);
            if score > best_score {
                best_score = score;
                best = Some((device, families));
            }
        }

        best.ok_or_else(|| {
            RenderError::NoSuitableDevice(
                "no GPU supports graphics + present for this surface".to_string(),
            )
        })
    }

    fn find_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> QueueFamilyIndices {
        let mut indices = QueueFamilyIndices::default();

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        for (i, family) in queue_families.iter().enumerate() {
            let i = i as u32;
            if indices.graphics.is_none()
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(i);
            }
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            };
            if indices.present.is_none() && present_support {
                indices.present = Some(i);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    fn supports_swapchain_extension(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
    ) -> bool {
        let available = match unsafe { instance.enumerate_device_extension_properties(device) } {
            Ok(exts) => exts,
            Err(_) => return false,
        };
        available.iter().any(|ext| {
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
                == ash::extensions::khr::Swapchain::name()
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        present_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue), RenderError> {
        // One create-info per unique family: graphics and present may coincide
        let mut unique_families = vec![graphics_queue_family];
        if present_queue_family != graphics_queue_family {
            unique_families.push(present_queue_family);
        }

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device =
            unsafe { instance.create_device(physical_device, &create_info, None) }
                .map_err(RenderError::DeviceCreation)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Wait for the device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order of creation; the surface belongs to the
        // instance and must go before it
        unsafe {
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers. Logs only, never alters control flow.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_outranks_integrated() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn selection_picks_highest_score() {
        // Adapter list with one integrated and one discrete GPU, both
        // qualifying: the discrete one must win regardless of order.
        let adapters = [
            ("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            ("discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
            ("software", vk::PhysicalDeviceType::CPU),
        ];
        let best = adapters
            .iter()
            .max_by_key(|(_, ty)| device_type_score(*ty))
            .unwrap();
        assert_eq!(best.0, "discrete");
    }

    #[test]
    fn incomplete_families_disqualify() {
        let both = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(1),
        };
        let graphics_only = QueueFamilyIndices {
            graphics: Some(0),
            present: None,
        };
        assert!(both.is_complete());
        assert!(!graphics_only.is_complete());
        assert!(!QueueFamilyIndices::default().is_complete());
    }
}
