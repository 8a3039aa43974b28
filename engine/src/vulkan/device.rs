use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use thiserror::Error;
use vulkanalia::{
    vk::{self, DeviceV1_0, HasBuilder, InstanceV1_0, KhrSurfaceExtension},
    Device, Entry,
};

use super::swapchain::SwapchainSupport;
use super::{constants, context::VulkanContext, instance::VulkanInstance};

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

/// Snapshot of one enumerated device's probed capabilities. Probe
/// failures surface as empty results here, not as fatal errors: a device
/// that cannot answer a query is unsuitable, nothing more.
#[derive(Copy, Clone, Debug)]
struct DeviceCandidate {
    queue_families_complete: bool,
    extensions_supported: bool,
    format_count: usize,
    present_mode_count: usize,
}

impl DeviceCandidate {
    fn rejection(&self) -> Option<SuitabilityError> {
        if !self.queue_families_complete {
            Some(SuitabilityError("required queue families"))
        } else if !self.extensions_supported {
            Some(SuitabilityError("required device extensions"))
        } else if self.format_count == 0 || self.present_mode_count == 0 {
            Some(SuitabilityError("required swapchain support"))
        } else {
            None
        }
    }

    fn is_suitable(&self) -> bool {
        self.rejection().is_none()
    }
}

/// First-match policy: the earliest suitable device in enumeration order
/// wins, regardless of how later devices compare.
fn first_suitable(candidates: &[DeviceCandidate]) -> Option<usize> {
    candidates.iter().position(|c| c.is_suitable())
}

#[derive(Debug)]
pub struct VulkanDevice {
    pub vk_device: Device,
}

impl VulkanDevice {
    unsafe fn probe_physical_device(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> DeviceCandidate {
        let (graphics, present) = QueueFamilyIndices::find(instance, context, physical_device)
            .unwrap_or((None, None));

        let extensions = instance
            .vk_instance
            .enumerate_device_extension_properties(physical_device, None)
            .map(|extensions| {
                extensions
                    .iter()
                    .map(|e| e.extension_name)
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();

        let (format_count, present_mode_count) =
            match SwapchainSupport::get(instance, context, physical_device) {
                Ok(support) => (support.formats.len(), support.present_modes.len()),
                Err(_) => (0, 0),
            };

        DeviceCandidate {
            queue_families_complete: matches!((graphics, present), (Some(_), Some(_))),
            extensions_supported: supports_required_extensions(&extensions),
            format_count,
            present_mode_count,
        }
    }

    unsafe fn pick_physical_device(
        instance: &VulkanInstance,
        context: &mut VulkanContext,
    ) -> Result<()> {
        let physical_devices = instance.vk_instance.enumerate_physical_devices()?;

        let mut candidates = Vec::with_capacity(physical_devices.len());
        for physical_device in &physical_devices {
            let properties = instance
                .vk_instance
                .get_physical_device_properties(*physical_device);

            let candidate =
                VulkanDevice::probe_physical_device(instance, context, *physical_device);
            if let Some(reason) = candidate.rejection() {
                warn!(
                    "Skipping physical device (`{}`): {}",
                    properties.device_name, reason
                );
            }
            candidates.push(candidate);
        }

        let index = first_suitable(&candidates)
            .ok_or_else(|| anyhow!("Failed to find suitable physical device."))?;

        let physical_device = physical_devices[index];
        let properties = instance
            .vk_instance
            .get_physical_device_properties(physical_device);
        info!("Selected physical device (`{}`).", properties.device_name);
        context.physical_device = physical_device;

        Ok(())
    }

    pub unsafe fn new(
        entry: &Entry,
        instance: &VulkanInstance,
        context: &mut VulkanContext,
    ) -> Result<VulkanDevice> {
        VulkanDevice::pick_physical_device(instance, context)?;

        let indices = QueueFamilyIndices::get(instance, context, context.physical_device)?;

        // One descriptor per unique family. Graphics and present may share
        // a family, in which case the set collapses to a single entry.
        let queue_priorities = &[1.0];
        let queue_infos = indices
            .unique()
            .iter()
            .map(|i| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*i)
                    .queue_priorities(queue_priorities)
            })
            .collect::<Vec<_>>();

        let layers = if constants::VALIDATION_ENABLED {
            constants::VALIDATION_LAYERS
                .iter()
                .map(|l| l.as_ptr())
                .collect::<Vec<_>>()
        } else {
            vec![]
        };

        let mut extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos") && entry.version()? >= constants::PORTABILITY_MACOS_VERSION {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder();

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(context.physical_device, &info, None)?;

        context.graphics_queue = device.get_device_queue(indices.graphics, 0);
        context.present_queue = device.get_device_queue(indices.present, 0);

        Ok(VulkanDevice { vk_device: device })
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_device.destroy_device(None);
    }
}

fn supports_required_extensions(available: &HashSet<vk::ExtensionName>) -> bool {
    constants::DEVICE_EXTENSIONS
        .iter()
        .all(|e| available.contains(e))
}

/// A complete graphics/present queue family pair for one physical device.
/// Only constructed once both families are known to exist; the two indices
/// may coincide.
#[derive(Copy, Clone, Debug)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Raw scan result: each side independently present or absent.
    unsafe fn find(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<(Option<u32>, Option<u32>)> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);

        // Present support is a per-family surface query, not a capability bit.
        let mut present_support = Vec::with_capacity(properties.len());
        for index in 0..properties.len() as u32 {
            present_support.push(instance.vk_instance.get_physical_device_surface_support_khr(
                physical_device,
                index,
                context.surface,
            )?);
        }

        Ok(scan_queue_families(&properties, &present_support))
    }

    pub unsafe fn get(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        match QueueFamilyIndices::find(instance, context, physical_device)? {
            (Some(graphics), Some(present)) => Ok(Self { graphics, present }),
            _ => Err(anyhow!(SuitabilityError("required queue families"))),
        }
    }

    /// The deduplicated family set to request queues from.
    pub fn unique(&self) -> HashSet<u32> {
        let mut indices = HashSet::new();
        indices.insert(self.graphics);
        indices.insert(self.present);
        indices
    }
}

/// Scans the queue family table in index order and returns the first
/// graphics-capable and first present-capable family, independently.
fn scan_queue_families(
    properties: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> (Option<u32>, Option<u32>) {
    let graphics = properties
        .iter()
        .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let present = present_support
        .iter()
        .position(|s| *s)
        .map(|i| i as u32);

    (graphics, present)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn qualifying() -> DeviceCandidate {
        DeviceCandidate {
            queue_families_complete: true,
            extensions_supported: true,
            format_count: 1,
            present_mode_count: 1,
        }
    }

    #[test]
    fn scan_finds_both_families() {
        let properties = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let (graphics, present) = scan_queue_families(&properties, &[true, false]);
        assert_eq!(graphics, Some(1));
        assert_eq!(present, Some(0));
    }

    #[test]
    fn scan_returns_first_matching_index() {
        let properties = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let (graphics, present) = scan_queue_families(&properties, &[true, true]);
        assert_eq!(graphics, Some(0));
        assert_eq!(present, Some(0));
    }

    #[test]
    fn scan_without_present_support_is_incomplete() {
        let properties = [family(vk::QueueFlags::GRAPHICS)];
        let (graphics, present) = scan_queue_families(&properties, &[false]);
        assert_eq!(graphics, Some(0));
        assert_eq!(present, None);
    }

    #[test]
    fn scan_without_graphics_is_incomplete() {
        let properties = [family(vk::QueueFlags::COMPUTE)];
        let (graphics, present) = scan_queue_families(&properties, &[true]);
        assert_eq!(graphics, None);
        assert_eq!(present, Some(0));
    }

    #[test]
    fn suitability_requires_every_condition() {
        assert!(qualifying().is_suitable());
        assert!(!DeviceCandidate {
            queue_families_complete: false,
            ..qualifying()
        }
        .is_suitable());
        assert!(!DeviceCandidate {
            extensions_supported: false,
            ..qualifying()
        }
        .is_suitable());
        assert!(!DeviceCandidate {
            format_count: 0,
            ..qualifying()
        }
        .is_suitable());
        assert!(!DeviceCandidate {
            present_mode_count: 0,
            ..qualifying()
        }
        .is_suitable());
    }

    #[test]
    fn selection_takes_first_qualifying_device() {
        // The second device looks richer on every axis; enumeration order
        // still decides.
        let richer = DeviceCandidate {
            format_count: 8,
            present_mode_count: 4,
            ..qualifying()
        };
        assert_eq!(first_suitable(&[qualifying(), richer]), Some(0));
    }

    #[test]
    fn selection_skips_unsuitable_devices() {
        let incomplete = DeviceCandidate {
            queue_families_complete: false,
            ..qualifying()
        };
        assert_eq!(first_suitable(&[incomplete, qualifying()]), Some(1));
    }

    #[test]
    fn selection_fails_when_nothing_qualifies() {
        let unsupported = DeviceCandidate {
            extensions_supported: false,
            ..qualifying()
        };
        assert_eq!(first_suitable(&[unsupported]), None);
        assert_eq!(first_suitable(&[]), None);
    }

    #[test]
    fn shared_family_is_requested_once() {
        let indices = QueueFamilyIndices {
            graphics: 0,
            present: 0,
        };
        assert_eq!(indices.unique().len(), 1);
    }

    #[test]
    fn distinct_families_are_both_requested() {
        let indices = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        let unique = indices.unique();
        assert_eq!(unique.len(), 2);
        assert!(unique.contains(&0));
        assert!(unique.contains(&2));
    }

    #[test]
    fn swapchain_extension_is_required() {
        let mut available = HashSet::new();
        assert!(!supports_required_extensions(&available));

        available.insert(vk::KHR_SWAPCHAIN_EXTENSION.name);
        assert!(supports_required_extensions(&available));
    }
}
