//! Presentation surface.

use crate::device::SurfaceSupport;
use crate::error::{GpuError, Result};
use ash::vk;

/// Surface context for windowed rendering.
///
/// Owns the Vulkan surface and the swapchain loader bound to it.
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    pub swapchain_loader: ash::khr::swapchain::Device,
    physical_device: vk::PhysicalDevice,
}

impl SurfaceContext {
    pub(crate) fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Self {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device);
        Self {
            surface,
            surface_loader,
            swapchain_loader,
            physical_device,
        }
    }

    /// Query surface capabilities, formats and present modes.
    pub fn support(&self) -> Result<SurfaceSupport> {
        let lost = |e: vk::Result| match e {
            vk::Result::ERROR_SURFACE_LOST_KHR => GpuError::SurfaceLost,
            e => GpuError::Vulkan(e),
        };

        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(lost)?;

            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(lost)?;

            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(lost)?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain created from the surface may still exist.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}
