use vulkanalia::{vk, Version};

pub const WINDOW_TITLE: &str = "Yukon Engine";
pub const WINDOW_WIDTH: u32 = 1024;
pub const WINDOW_HEIGHT: u32 = 768;

pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);
pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const VALIDATION_LAYERS: &[vk::ExtensionName] =
    &[vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation")];
pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];
