use anyhow::{anyhow, Result};
use context::VulkanContext;
use device::VulkanDevice;
use instance::VulkanInstance;
use swapchain::VulkanSwapchain;
use vulkanalia::{
    loader::{LibloadingLoader, LIBRARY},
    Entry,
};
use winit::window::Window;

pub(crate) mod constants;
mod context;
mod device;
mod instance;
mod swapchain;

/// Owner of the whole Vulkan bootstrap: instance, surface, device
/// selection, logical device, swapchain and image views, created in that
/// order and torn down in exact reverse.
#[derive(Debug)]
pub struct VulkanRenderer {
    pub instance: VulkanInstance,
    pub device: VulkanDevice,
    context: VulkanContext,
}

impl VulkanRenderer {
    pub unsafe fn new(window: &Window) -> Result<VulkanRenderer> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let mut context = VulkanContext::default();
        let mut instance = VulkanInstance::new(window, &entry, &mut context)?;

        // From here on a failed stage releases everything built so far,
        // in teardown order, before reporting.
        if let Err(error) = VulkanSwapchain::create_surface(window, &instance, &mut context) {
            instance.destroy(&mut context);
            return Err(error);
        }

        let mut device = match VulkanDevice::new(&entry, &instance, &mut context) {
            Ok(device) => device,
            Err(error) => {
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let presentation = VulkanSwapchain::create(window, &instance, &device, &mut context)
            .and_then(|()| VulkanSwapchain::create_image_views(&device, &mut context));
        if let Err(error) = presentation {
            VulkanSwapchain::destroy(&device, &mut context);
            device.destroy();
            instance.destroy(&mut context);
            return Err(error);
        }

        Ok(VulkanRenderer {
            instance,
            device,
            context,
        })
    }

    pub unsafe fn destroy(&mut self) {
        VulkanSwapchain::destroy(&self.device, &mut self.context);
        self.device.destroy();
        self.instance.destroy(&mut self.context);
    }
}
