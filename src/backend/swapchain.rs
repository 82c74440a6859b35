// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Out-of-date surfaces are reported, never recreated: this renderer runs
// against a fixed-size window and treats a lost surface as fatal.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RenderError;
use crate::frame::AcquireOutcome;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

/// Choose the surface format: prefer 8-bit sRGB, else the first reported.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RenderError> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or_else(|| RenderError::SwapchainCreation("surface reports no formats".to_string()))
}

/// Choose the present mode: the preferred one when supported, else MAILBOX
/// (low-latency triple buffering), else FIFO which is guaranteed available.
fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Choose the extent: the surface's current extent when it is defined,
/// otherwise the desired size clamped to the reported capability range.
fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Minimum-plus-one image count, clamped when the surface bounds it
/// (max_image_count of 0 means unbounded).
fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, RenderError> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface = device.surface;

        let surface_caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, surface)
        }
        .map_err(|e| RenderError::SwapchainCreation(format!("capability query failed: {e}")))?;

        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, surface)
        }
        .map_err(|e| RenderError::SwapchainCreation(format!("format query failed: {e}")))?;

        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, surface)
        }
        .map_err(|e| RenderError::SwapchainCreation(format!("present mode query failed: {e}")))?;

        if present_modes.is_empty() {
            return Err(RenderError::SwapchainCreation(
                "surface reports no present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(&surface_caps);

        log::info!("Present mode: {:?}", present_mode);

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let queue_family_indices = [device.graphics_queue_family, device.present_queue_family];
        let concurrent = device.graphics_queue_family != device.present_queue_family;

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        create_info = if concurrent {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| RenderError::SwapchainCreation(e.to_string()))?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(|e| RenderError::SwapchainCreation(e.to_string()))?;

        log::info!("Created swapchain with {} images", images.len());

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { device.device.create_image_view(&view_info, None) }
                .map_err(|e| RenderError::SwapchainCreation(e.to_string()))?;
            image_views.push(view);
        }

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire the next image for rendering.
    ///
    /// `semaphore` is armed by the GPU once the image is actually ready for
    /// writing; acquisition returning does not mean the image is writable.
    /// A timeout is an expected skip, out-of-date is surfaced as `Stale`.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome, RenderError> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            // A suboptimal image at acquire time is still writable
            Ok((index, _suboptimal)) => Ok(AcquireOutcome::Ready { image_index: index }),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(AcquireOutcome::NotReady),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(e.into()),
        }
    }

    /// Present a rendered image to the screen, waiting on `wait_semaphores`.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<(), RenderError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(()),
            // A stale or suboptimal surface at present time ends the run
            Ok(true) => Err(RenderError::SurfaceLost),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
                Err(RenderError::SurfaceLost)
            }
            Err(e) => Err(RenderError::Present(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Views before the swapchain; the surface outlives both (owned by
        // the device context, which this struct keeps alive)
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(
        min_count: u32,
        max_count: u32,
        min_extent: (u32, u32),
        max_extent: (u32, u32),
        current: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            min_image_extent: vk::Extent2D {
                width: min_extent.0,
                height: min_extent.1,
            },
            max_image_extent: vk::Extent2D {
                width: max_extent.0,
                height: max_extent.1,
            },
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_uses_desired_size_when_surface_leaves_it_open() {
        // current_extent of u32::MAX means the surface takes our size
        let caps = caps(2, 8, (1, 1), (4096, 4096), (u32::MAX, u32::MAX));
        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_is_clamped_to_capability_range() {
        let caps = caps(2, 8, (32, 32), (4096, 4096), (u32::MAX, u32::MAX));
        let extent = choose_extent(&caps, 10_000, 1);
        assert_eq!((extent.width, extent.height), (4096, 32));
        assert!(extent.width >= caps.min_image_extent.width);
        assert!(extent.width <= caps.max_image_extent.width);
        assert!(extent.height >= caps.min_image_extent.height);
        assert!(extent.height <= caps.max_image_extent.height);
    }

    #[test]
    fn extent_follows_defined_current_extent() {
        let caps = caps(2, 8, (1, 1), (4096, 4096), (1280, 720));
        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn image_count_is_min_plus_one_within_range() {
        let caps = caps(2, 8, (1, 1), (4096, 4096), (u32::MAX, u32::MAX));
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn image_count_clamps_to_max() {
        let caps = caps(3, 3, (1, 1), (4096, 4096), (u32::MAX, u32::MAX));
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn image_count_unbounded_when_max_is_zero() {
        let caps = caps(4, 0, (1, 1), (4096, 4096), (u32::MAX, u32::MAX));
        assert_eq!(choose_image_count(&caps), 5);
    }

    #[test]
    fn format_prefers_bgra_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn format_falls_back_to_first_reported() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::SwapchainCreation(_))
        ));
    }

    #[test]
    fn present_mode_preference_chain() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(
            choose_present_mode(&all, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );

        let no_immediate = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&no_immediate, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::MAILBOX
        );

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }
}
