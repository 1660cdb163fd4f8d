//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device, DebugMessenger};
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug_messenger: Option<DebugMessenger>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,

    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) compute_queue: Option<vk::Queue>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the resolved queue families.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue (may equal the graphics queue).
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the dedicated compute queue, if the device has one.
    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Wyvern".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context together with a presentation surface for `window`.
    ///
    /// Device selection only considers devices that can present to that surface.
    pub fn build_for_window<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let instance =
            unsafe { create_instance(&entry, &self.app_name, display, self.enable_validation) }?;

        let debug_messenger = if self.enable_validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display, window_handle, None)
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()));
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        // Tear the instance back down if anything before the context exists fails
        let partial = |error: GpuError, surface: Option<vk::SurfaceKHR>| unsafe {
            if let Some(surface) = surface {
                surface_loader.destroy_surface(surface, None);
            }
            if let Some(messenger) = &debug_messenger {
                messenger.destroy();
            }
            instance.destroy_instance(None);
            error
        };

        let surface = match surface {
            Ok(surface) => surface,
            Err(e) => return Err(partial(e, None)),
        };

        let (physical_device, queue_families) =
            match unsafe { select_physical_device(&instance, &surface_loader, surface) } {
                Ok(selected) => selected,
                Err(e) => return Err(partial(e, Some(surface))),
            };

        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let (device, graphics_queue, present_queue, compute_queue) =
            match unsafe { create_device(&instance, physical_device, &queue_families) } {
                Ok(created) => created,
                Err(e) => return Err(partial(e, Some(surface))),
            };
        let device = Arc::new(device);

        let allocator =
            match unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) } {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    return Err(partial(e, Some(surface)));
                }
            };

        let surface_context =
            SurfaceContext::new(&instance, &device, surface_loader, surface, physical_device);

        let context = GpuContext {
            entry,
            instance,
            debug_messenger,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            queue_families,
            graphics_queue,
            present_queue,
            compute_queue,
        };

        Ok((context, surface_context))
    }
}

/// Queue family indices used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    /// Dedicated compute family (no graphics), if any.
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    /// Resolve families from the device's queue family list.
    ///
    /// A family that supports both graphics and present is preferred over two
    /// separate ones. Returns `None` when either capability is missing.
    pub fn resolve(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;
        let mut compute = None;

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count == 0 {
                continue;
            }

            let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let has_present = supports_present(i);

            if has_graphics && has_present {
                graphics = Some(i);
                present = Some(i);
            } else {
                if has_graphics && graphics.is_none() {
                    graphics = Some(i);
                }
                if has_present && present.is_none() {
                    present = Some(i);
                }
            }

            if family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                && !has_graphics
                && compute.is_none()
            {
                compute = Some(i);
            }

            if has_graphics && has_present {
                break;
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
            compute,
        })
    }

    fn unique(&self) -> BTreeSet<u32> {
        [Some(self.graphics), Some(self.present), self.compute]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Create the logical device and retrieve queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue, Option<vk::Queue>)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(queue_families.graphics, 0);
    let present_queue = device.get_device_queue(queue_families.present, 0);
    let compute_queue = queue_families
        .compute
        .map(|family| device.get_device_queue(family, 0));

    Ok((device, graphics_queue, present_queue, compute_queue))
}
