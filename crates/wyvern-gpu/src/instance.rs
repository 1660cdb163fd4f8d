//! Vulkan instance creation, debug messaging and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::context::QueueFamilyIndices;
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_void, CStr, CString};

/// Validation layers to enable when requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance able to present to `display`.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Wyvern")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extension_names = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::ExtensionNotSupported(format!("surface extensions: {e}")))?
        .to_vec();

    // Collect layer names, dropping the ones the loader does not know about
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let mut layers = Vec::new();
    if enable_validation {
        for layer in validation_layers() {
            let found = available_layers
                .iter()
                .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == layer);
            if found {
                layers.push(layer);
            } else {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
        }
        if !layers.is_empty() {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }
    }

    #[cfg(target_os = "macos")]
    {
        extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
    }

    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Validation-layer messenger forwarding messages to `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the messenger.
    ///
    /// # Safety
    /// The instance must have been created with the debug utils extension.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        let messenger = loader.create_debug_utils_messenger(&info, None)?;
        Ok(Self { loader, messenger })
    }

    /// Remove the messenger.
    ///
    /// # Safety
    /// Must be called before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || unsafe { (*data).p_message.is_null() } {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(?message_type, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(?message_type, "{message}");
    } else {
        tracing::debug!(?message_type, "{message}");
    }

    vk::FALSE
}

/// Select the best physical device able to render and present to `surface`.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilyIndices)> = None;

    for device in devices {
        let capabilities = GpuCapabilities::query(instance, device);
        if !capabilities.meets_requirements() {
            tracing::debug!("Skipping {}: missing requirements", capabilities.device_name);
            continue;
        }

        let families = instance.get_physical_device_queue_family_properties(device);
        let Some(queues) = QueueFamilyIndices::resolve(&families, |index| {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        }) else {
            tracing::debug!("Skipping {}: no graphics/present queues", capabilities.device_name);
            continue;
        };

        let score = score_device(capabilities.device_type, capabilities.device_local_memory_mb);
        tracing::debug!("Candidate {} scored {score}", capabilities.device_name);
        if best.as_ref().map_or(true, |(best_score, _, _)| score > *best_score) {
            best = Some((score, device, queues));
        }
    }

    best.map(|(_, device, queues)| (device, queues))
        .ok_or(GpuError::NoSuitableDevice)
}

/// Score a physical device for selection: device type dominates, then +1 per GB of
/// device-local memory.
pub fn score_device(device_type: vk::PhysicalDeviceType, device_local_memory_mb: u64) -> u32 {
    let type_score: u32 = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };
    let memory_score = u32::try_from(device_local_memory_mb / 1024).unwrap_or(u32::MAX);
    type_score.saturating_add(memory_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_beats_integrated() {
        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        let integrated = score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        assert!(discrete > integrated);
        assert_eq!(discrete, 1004);
    }

    #[test]
    fn memory_breaks_ties() {
        let small = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 2048);
        let large = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        assert!(large > small);
    }

    #[test]
    fn cpu_device_scores_memory_only() {
        assert_eq!(score_device(vk::PhysicalDeviceType::CPU, 1024), 1);
    }
}
