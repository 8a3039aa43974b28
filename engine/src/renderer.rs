use anyhow::Result;
use winit::window::Window;

use crate::vulkan::VulkanRenderer;

#[derive(Debug)]
pub struct Renderer {
    vk_renderer: Option<VulkanRenderer>,
}

impl Renderer {
    /// Brings up the full Vulkan context for the given window.
    pub unsafe fn create(window: &Window) -> Result<Self> {
        let vk_renderer = VulkanRenderer::new(window)?;

        Ok(Self {
            vk_renderer: Some(vk_renderer),
        })
    }

    /// Releases every Vulkan resource in reverse creation order. The
    /// renderer is drained on the first call, so repeated calls are
    /// no-ops rather than double destruction.
    pub unsafe fn destroy(&mut self) {
        if let Some(mut vk_renderer) = self.vk_renderer.take() {
            vk_renderer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_after_teardown_is_a_no_op() {
        let mut renderer = Renderer { vk_renderer: None };
        unsafe {
            renderer.destroy();
            renderer.destroy();
        }
        assert!(renderer.vk_renderer.is_none());
    }
}
