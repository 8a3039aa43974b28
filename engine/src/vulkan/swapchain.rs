use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::{
    vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSurfaceExtension, KhrSwapchainExtension},
    window as vk_window,
};
use winit::window::Window;

use super::device::VulkanDevice;
use super::{context::VulkanContext, instance::VulkanInstance};

/// Surface capabilities, formats and present modes for one
/// device/surface pair. Queried per candidate during device selection
/// and re-queried right before swapchain creation; never cached.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .vk_instance
                .get_physical_device_surface_capabilities_khr(physical_device, context.surface)?,
            formats: instance
                .vk_instance
                .get_physical_device_surface_formats_khr(physical_device, context.surface)?,
            present_modes: instance
                .vk_instance
                .get_physical_device_surface_present_modes_khr(physical_device, context.surface)?,
        })
    }

    /// A surface can stop reporting formats or present modes between
    /// device selection and swapchain creation.
    pub fn is_presentable(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Debug)]
pub struct VulkanSwapchain;

impl VulkanSwapchain {
    /// The surface must exist before device selection: present support is
    /// queried against it per queue family.
    pub unsafe fn create_surface(
        window: &Window,
        instance: &VulkanInstance,
        context: &mut VulkanContext,
    ) -> Result<()> {
        context.surface = vk_window::create_surface(&instance.vk_instance, window, window)?;
        Ok(())
    }

    pub unsafe fn create(
        window: &Window,
        instance: &VulkanInstance,
        device: &VulkanDevice,
        context: &mut VulkanContext,
    ) -> Result<()> {
        // Capabilities can change between selection and creation (window
        // resize), so query fresh details here.
        let support = SwapchainSupport::get(instance, context, context.physical_device)?;
        if !support.is_presentable() {
            return Err(anyhow!(
                "Surface no longer reports any formats or present modes."
            ));
        }

        let surface_format = get_swapchain_surface_format(&support.formats);
        let present_mode = get_swapchain_present_mode(&support.present_modes);
        let size = window.inner_size();
        let extent = get_swapchain_extent(size.width, size.height, &support.capabilities);
        let image_count = get_swapchain_image_count(&support.capabilities);

        // Swapchain images are never shared across distinct queue
        // families, so exclusive mode applies unconditionally.
        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        context.swapchain = device.vk_device.create_swapchain_khr(&info, None)?;
        context.swapchain_images = device.vk_device.get_swapchain_images_khr(context.swapchain)?;
        context.swapchain_format = surface_format.format;
        context.swapchain_extent = extent;

        info!(
            "Created swapchain with {} images ({:?}, {:?}, {}x{}).",
            context.swapchain_images.len(),
            surface_format.format,
            present_mode,
            extent.width,
            extent.height
        );

        Ok(())
    }

    /// Wraps every swapchain image in a 2D color view, index-aligned with
    /// the image list. A partial view set is not a valid state: on any
    /// failure the views created so far are released and the error
    /// propagates.
    pub unsafe fn create_image_views(
        device: &VulkanDevice,
        context: &mut VulkanContext,
    ) -> Result<()> {
        let mut views = Vec::with_capacity(context.swapchain_images.len());
        for image in &context.swapchain_images {
            let components = vk::ComponentMapping::builder()
                .r(vk::ComponentSwizzle::IDENTITY)
                .g(vk::ComponentSwizzle::IDENTITY)
                .b(vk::ComponentSwizzle::IDENTITY)
                .a(vk::ComponentSwizzle::IDENTITY);

            let subresource_range = vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1);

            let info = vk::ImageViewCreateInfo::builder()
                .image(*image)
                .view_type(vk::ImageViewType::_2D)
                .format(context.swapchain_format)
                .components(components)
                .subresource_range(subresource_range);

            match device.vk_device.create_image_view(&info, None) {
                Ok(view) => views.push(view),
                Err(error) => {
                    for view in views {
                        device.vk_device.destroy_image_view(view, None);
                    }
                    return Err(anyhow!(error));
                }
            }
        }

        context.swapchain_image_views = views;
        Ok(())
    }

    pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
        context
            .swapchain_image_views
            .iter()
            .for_each(|v| device.vk_device.destroy_image_view(*v, None));
        device
            .vk_device
            .destroy_swapchain_khr(context.swapchain, None);
    }
}

fn get_swapchain_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .cloned()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| {
            warn!(
                "Preferred surface format unavailable, falling back to {:?}.",
                formats[0]
            );
            formats[0]
        })
}

fn get_swapchain_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    // FIFO support is guaranteed by Vulkan, so the fallback needs no
    // warning.
    present_modes
        .iter()
        .cloned()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn get_swapchain_extent(
    width: u32,
    height: u32,
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::Extent2D {
    // A current extent of u32::MAX means the surface defers to the
    // framebuffer size, clamped into the supported range.
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D::builder()
            .width(width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ))
            .height(height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ))
            .build()
    }
}

fn get_swapchain_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    // One above the minimum avoids driver stalls; a max of zero means
    // unbounded.
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
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

    #[test]
    fn surface_format_prefers_bgra_srgb_regardless_of_position() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = get_swapchain_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn surface_format_falls_back_to_first_entry() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = get_swapchain_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            get_swapchain_present_mode(&modes),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(get_swapchain_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_clamps_framebuffer_size_when_surface_defers() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 4000,
                height: 4000,
            },
            ..Default::default()
        };
        let extent = get_swapchain_extent(50, 6000, &capabilities);
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 4000);
    }

    #[test]
    fn extent_uses_current_extent_when_reported() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 4000,
                height: 4000,
            },
            ..Default::default()
        };
        let extent = get_swapchain_extent(50, 6000, &capabilities);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn support_without_formats_is_not_presentable() {
        let support = SwapchainSupport {
            capabilities: Default::default(),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!support.is_presentable());
    }

    #[test]
    fn support_without_present_modes_is_not_presentable() {
        let support = SwapchainSupport {
            capabilities: Default::default(),
            formats: vec![format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![],
        };
        assert!(!support.is_presentable());
    }

    #[test]
    fn support_with_formats_and_modes_is_presentable() {
        let support = SwapchainSupport {
            capabilities: Default::default(),
            formats: vec![format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(support.is_presentable());
    }

    #[test]
    fn image_count_is_min_plus_one_when_unbounded() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(get_swapchain_image_count(&capabilities), 3);
    }

    #[test]
    fn image_count_is_clamped_to_maximum() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(get_swapchain_image_count(&capabilities), 3);
    }
}
