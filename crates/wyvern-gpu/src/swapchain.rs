//! Swapchain policies and raw swapchain calls.

use crate::device::{AcquireStatus, PresentStatus, SwapchainDesc};
use crate::error::{GpuError, Result};
use ash::vk;

/// Create a swapchain for `surface`.
///
/// Images are shared concurrently when the graphics and present families differ.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn create_swapchain(
    swapchain_loader: &ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    desc: &SwapchainDesc,
    graphics_queue_family: u32,
    present_queue_family: u32,
) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
    let queue_families = [graphics_queue_family, present_queue_family];
    let (sharing_mode, families): (_, &[u32]) = if graphics_queue_family == present_queue_family
    {
        (vk::SharingMode::EXCLUSIVE, &[])
    } else {
        (vk::SharingMode::CONCURRENT, &queue_families)
    };

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(desc.image_count)
        .image_format(desc.surface_format.format)
        .image_color_space(desc.surface_format.color_space)
        .image_extent(desc.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(families)
        .pre_transform(desc.pre_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(desc.present_mode)
        .clipped(true)
        .old_swapchain(vk::SwapchainKHR::null());

    let swapchain = swapchain_loader
        .create_swapchain(&create_info, None)
        .map_err(|e| match e {
            vk::Result::ERROR_SURFACE_LOST_KHR => GpuError::SurfaceLost,
            e => GpuError::SwapchainCreation(e.to_string()),
        })?;

    match swapchain_loader.get_swapchain_images(swapchain) {
        Ok(images) => Ok((swapchain, images)),
        Err(e) => {
            swapchain_loader.destroy_swapchain(swapchain, None);
            Err(GpuError::from(e))
        }
    }
}

/// Acquire the next image.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub unsafe fn acquire_next_image(
    swapchain_loader: &ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    semaphore: vk::Semaphore,
    timeout_ns: u64,
) -> Result<AcquireStatus> {
    match swapchain_loader.acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
    {
        Ok((index, suboptimal)) => Ok(AcquireStatus::Acquired { index, suboptimal }),
        // No image was acquired; the semaphore is untouched.
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
        Err(e) => Err(GpuError::from_wait(e)),
    }
}

/// Present an image.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub unsafe fn queue_present(
    swapchain_loader: &ash::khr::swapchain::Device,
    queue: vk::Queue,
    swapchain: vk::SwapchainKHR,
    image_index: u32,
    wait_semaphore: vk::Semaphore,
) -> Result<PresentStatus> {
    let swapchains = [swapchain];
    let image_indices = [image_index];
    let wait_semaphores = [wait_semaphore];

    let present_info = vk::PresentInfoKHR::default()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);

    match swapchain_loader.queue_present(queue, &present_info) {
        Ok(false) => Ok(PresentStatus::Presented),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(GpuError::from_wait(e)),
    }
}

/// Select the surface format: 8-bit BGRA sRGB with a non-linear sRGB color space,
/// else the first one offered.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let preferred = available.iter().find(|format| {
        format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    match (preferred, available.first()) {
        (Some(format), _) => Ok(*format),
        (None, Some(first)) => {
            tracing::warn!(
                format = ?first.format,
                color_space = ?first.color_space,
                "Preferred sRGB surface format unavailable, using first reported format"
            );
            Ok(*first)
        }
        (None, None) => Err(GpuError::SwapchainCreation(
            "surface reports no formats".to_string(),
        )),
    }
}

/// Select the present mode: FIFO when `vsync` is requested, otherwise mailbox when
/// offered, otherwise FIFO (always supported).
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Minimum image count plus one, clamped to the maximum (0 means unbounded).
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Calculate swapchain extent.
///
/// The surface's current extent wins unless it is the `u32::MAX` sentinel, in which
/// case the drawable size is clamped to the supported range.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: drawable.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: drawable.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = select_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = select_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn no_formats_is_an_error() {
        assert!(matches!(
            select_surface_format(&[]),
            Err(GpuError::SwapchainCreation(_))
        ));
    }

    #[test]
    fn present_mode_policy() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo_only = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(select_present_mode(&both, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&both, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&fifo_only, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_clamped() {
        assert_eq!(select_image_count(&caps(2, 8)), 3);
        assert_eq!(select_image_count(&caps(3, 3)), 3);
        assert_eq!(select_image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn extent_uses_current_unless_sentinel() {
        let mut fixed = caps(2, 3);
        fixed.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let drawable = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(calculate_extent(&fixed, drawable), fixed.current_extent);

        let clamped = calculate_extent(
            &caps(2, 3),
            vk::Extent2D {
                width: 8000,
                height: 600,
            },
        );
        assert_eq!(clamped.width, 4096);
        assert_eq!(clamped.height, 600);
    }
}
