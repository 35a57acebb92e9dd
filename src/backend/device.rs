// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU)
// - Logical device + queue creation from a host-side description
// - Feature chaining for dynamic rendering, synchronization2 and timeline semaphores
// - Device-wide waits

use super::error::{Result, ValidationError, VkResultExt, VulkanError};
use super::handle::DeviceObject;
use super::instance::{Instance, PhysicalDeviceInfo};
use super::marshal::{self, CStringArray, MAX_ENABLED_EXTENSIONS};
use super::version::ApiVersion;
use ash::vk;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Queues requested from one queue family
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceQueueDesc {
    pub family_index: u32,
    /// One entry per queue, each within `[0.0, 1.0]`
    pub priorities: Vec<f32>,
}

impl DeviceQueueDesc {
    pub fn single(family_index: u32) -> Self {
        Self {
            family_index,
            priorities: vec![1.0],
        }
    }
}

/// Host-side description of `VkDeviceCreateInfo`
#[derive(Debug, Clone, Default)]
pub struct DeviceDesc {
    pub queues: Vec<DeviceQueueDesc>,
    pub extensions: Vec<String>,
    pub features: vk::PhysicalDeviceFeatures,
    /// Vulkan 1.3 `dynamicRendering`
    pub dynamic_rendering: bool,
    /// Vulkan 1.3 `synchronization2`
    pub synchronization2: bool,
    /// Vulkan 1.2 `timelineSemaphore`
    pub timeline_semaphore: bool,
}

impl DeviceDesc {
    /// Name of the first requested Vulkan 1.3 feature, for error messages
    fn first_vulkan13_feature(&self) -> Option<&'static str> {
        if self.dynamic_rendering {
            Some("dynamic_rendering")
        } else if self.synchronization2 {
            Some("synchronization2")
        } else {
            None
        }
    }

    pub fn validate(&self, physical: vk::PhysicalDevice) -> Result<()> {
        marshal::require_handle("physical_device", physical)?;
        marshal::require_non_empty("queue_create_infos", &self.queues)?;

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if !seen.insert(queue.family_index) {
                return Err(ValidationError::new(
                    "queue_create_infos",
                    format!("queue family {} requested twice", queue.family_index),
                )
                .into());
            }
            marshal::require_non_empty("queue_priorities", &queue.priorities)?;
            if let Some(p) = queue
                .priorities
                .iter()
                .find(|p| !(0.0..=1.0).contains(*p))
            {
                return Err(ValidationError::new(
                    "queue_priorities",
                    format!("{} is outside [0, 1]", p),
                )
                .into());
            }
        }

        if self.extensions.len() > MAX_ENABLED_EXTENSIONS {
            return Err(ValidationError::new(
                "enabled_extensions",
                format!(
                    "{} entries exceeds the limit of {}",
                    self.extensions.len(),
                    MAX_ENABLED_EXTENSIONS
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// A queue retrieved from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    pub raw: vk::Queue,
    pub family_index: u32,
    pub index: u32,
}

/// Vulkan logical device with automatic cleanup
pub struct Device {
    raw: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    enabled_extensions: Vec<String>,
    // (family index, queue count) as requested at creation
    queue_families: Vec<(u32, u32)>,
    // Declared last so the instance outlives the device
    instance: Arc<Instance>,
}

impl Device {
    pub fn new(
        instance: &Arc<Instance>,
        physical_device: vk::PhysicalDevice,
        desc: &DeviceDesc,
    ) -> Result<Arc<Self>> {
        desc.validate(physical_device)?;

        let info = instance.physical_device_info(physical_device)?;
        log::info!("Creating logical device on {}", info.name);

        // Fail with a readable message instead of a bare VK_ERROR_EXTENSION_NOT_PRESENT
        let available: HashSet<String> = instance
            .device_extension_properties(physical_device)?
            .into_iter()
            .map(|e| e.name)
            .collect();
        let missing: Vec<&str> = desc
            .extensions
            .iter()
            .filter(|e| !available.contains(e.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(VulkanError::new(vk::Result::ERROR_EXTENSION_NOT_PRESENT, "vkCreateDevice")
                .with_detail(format!("unsupported extensions: {}", missing.join(", ")))
                .into());
        }

        let extensions = CStringArray::new("enabled_extensions", &desc.extensions, MAX_ENABLED_EXTENSIONS)?;

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = desc
            .queues
            .iter()
            .map(|q| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(q.family_index)
                    .queue_priorities(&q.priorities)
            })
            .collect();

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(desc.timeline_semaphore);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(desc.dynamic_rendering)
            .synchronization2(desc.synchronization2);

        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(extensions.as_ptrs())
            .enabled_features(&desc.features);

        if desc.timeline_semaphore {
            require_device_version(&info, ApiVersion::V1_2, "timeline_semaphore")?;
            create_info = create_info.push_next(&mut features12);
        }
        if let Some(feature) = desc.first_vulkan13_feature() {
            require_device_version(&info, ApiVersion::V1_3, feature)?;
            create_info = create_info.push_next(&mut features13);
        }

        let raw = unsafe { instance.raw().create_device(physical_device, &create_info, None) }
            .with_op("vkCreateDevice")?;

        let properties = instance.physical_device_properties(physical_device)?;
        let memory_properties = instance.memory_properties(physical_device)?;

        log::info!(
            "Device ready: {} queue families, {} extensions",
            desc.queues.len(),
            desc.extensions.len()
        );

        Ok(Arc::new(Self {
            raw,
            physical_device,
            properties,
            memory_properties,
            enabled_extensions: desc.extensions.clone(),
            queue_families: desc
                .queues
                .iter()
                .map(|q| (q.family_index, q.priorities.len() as u32))
                .collect(),
            instance: instance.clone(),
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn handle(&self) -> vk::Device {
        self.raw.handle()
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.enabled_extensions.iter().any(|e| e == name)
    }

    /// Queue `index` of a family that was requested at creation
    pub fn queue(&self, family_index: u32, index: u32) -> Result<Queue> {
        check_queue_request(&self.queue_families, family_index, index)?;
        let raw = unsafe { self.raw.get_device_queue(family_index, index) };
        Ok(Queue {
            raw,
            family_index,
            index,
        })
    }

    /// Block until all queues are idle
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw.device_wait_idle() }.with_op("vkDeviceWaitIdle")
    }

    pub fn queue_wait_idle(&self, queue: &Queue) -> Result<()> {
        marshal::require_handle("queue", queue.raw)?;
        unsafe { self.raw.queue_wait_idle(queue.raw) }.with_op("vkQueueWaitIdle")
    }

    /// Destroy a handle previously released with `Owned::into_raw`. Null is a no-op.
    ///
    /// # Safety
    /// The handle must belong to this device and must not be in use.
    pub unsafe fn destroy_raw<H: DeviceObject>(&self, handle: H) {
        if handle.as_raw() != 0 {
            handle.destroy(&self.raw);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        unsafe { self.raw.destroy_device(None) };
    }
}

fn check_queue_request(requested: &[(u32, u32)], family_index: u32, index: u32) -> Result<()> {
    let Some(&(_, count)) = requested.iter().find(|(family, _)| *family == family_index) else {
        return Err(ValidationError::new(
            "queue_family_index",
            format!("family {} was not requested at device creation", family_index),
        )
        .into());
    };
    if index >= count {
        return Err(ValidationError::new(
            "queue_index",
            format!("{} is not below the {} queues requested from family {}", index, count, family_index),
        )
        .into());
    }
    Ok(())
}

fn require_device_version(info: &PhysicalDeviceInfo, required: ApiVersion, feature: &'static str) -> Result<()> {
    if info.api_version.supports(required) {
        return Ok(());
    }
    Err(VulkanError::new(vk::Result::ERROR_FEATURE_NOT_PRESENT, "vkCreateDevice")
        .with_detail(format!(
            "{} needs Vulkan {}, {} reports {}",
            feature, required, info.name, info.api_version
        ))
        .into())
}

/// Which class of GPU to favour during selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    #[default]
    Discrete,
    Integrated,
    Any,
}

/// Score a device for selection (higher wins, 0 means never pick)
pub fn device_score(device_type: vk::PhysicalDeviceType, preference: DevicePreference) -> u32 {
    let (discrete, integrated) = match preference {
        DevicePreference::Discrete => (1000, 100),
        DevicePreference::Integrated => (100, 1000),
        DevicePreference::Any => (10, 10),
    };
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 5,
        _ => 1,
    }
}

/// First queue family whose flags contain `required`
pub fn find_queue_family(families: &[vk::QueueFamilyProperties], required: vk::QueueFlags) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(required))
        .map(|i| i as u32)
}

/// Pick the best physical device that exposes a queue family with `required` flags.
///
/// Returns the device and that family's index.
pub fn select_physical_device(
    instance: &Instance,
    preference: DevicePreference,
    required: vk::QueueFlags,
) -> Result<(PhysicalDeviceInfo, u32)> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(VulkanError::new(vk::Result::ERROR_INITIALIZATION_FAILED, "vkEnumeratePhysicalDevices")
            .with_detail("no Vulkan-capable GPU found")
            .into());
    }

    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;
    let mut best_score = 0;

    for device in devices {
        let info = instance.physical_device_info(device)?;
        let families = instance.queue_family_properties(device)?;

        let Some(family) = find_queue_family(&families, required) else {
            log::debug!("Skipping {}: no queue family with {:?}", info.name, required);
            continue;
        };

        let score = device_score(info.device_type, preference);
        log::debug!("Candidate {} ({:?}) scored {}", info.name, info.device_type, score);
        if score > best_score {
            best_score = score;
            best = Some((info, family));
        }
    }

    best.ok_or_else(|| {
        VulkanError::new(vk::Result::ERROR_FEATURE_NOT_PRESENT, "vkGetPhysicalDeviceQueueFamilyProperties")
            .with_detail(format!("no GPU exposes a queue family with {:?}", required))
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fake_physical() -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(0x1000)
    }

    #[test]
    fn rejects_null_physical_device() {
        let desc = DeviceDesc {
            queues: vec![DeviceQueueDesc::single(0)],
            ..Default::default()
        };
        let err = desc.validate(vk::PhysicalDevice::null()).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "physical_device");
    }

    #[test]
    fn rejects_out_of_range_priority() {
        for bad in [1.5, -0.1, f32::NAN] {
            let desc = DeviceDesc {
                queues: vec![DeviceQueueDesc {
                    family_index: 0,
                    priorities: vec![0.5, bad],
                }],
                ..Default::default()
            };
            let err = desc.validate(fake_physical()).unwrap_err();
            assert_eq!(err.validation().unwrap().parameter, "queue_priorities");
        }
    }

    #[test]
    fn accepts_priority_bounds() {
        let desc = DeviceDesc {
            queues: vec![DeviceQueueDesc {
                family_index: 2,
                priorities: vec![0.0, 1.0],
            }],
            ..Default::default()
        };
        assert!(desc.validate(fake_physical()).is_ok());
    }

    #[test]
    fn rejects_missing_and_duplicate_queues() {
        let empty = DeviceDesc::default();
        assert_eq!(
            empty.validate(fake_physical()).unwrap_err().validation().unwrap().parameter,
            "queue_create_infos"
        );

        let dup = DeviceDesc {
            queues: vec![DeviceQueueDesc::single(1), DeviceQueueDesc::single(1)],
            ..Default::default()
        };
        assert!(dup.validate(fake_physical()).is_err());

        let no_priorities = DeviceDesc {
            queues: vec![DeviceQueueDesc {
                family_index: 0,
                priorities: vec![],
            }],
            ..Default::default()
        };
        assert_eq!(
            no_priorities.validate(fake_physical()).unwrap_err().validation().unwrap().parameter,
            "queue_priorities"
        );
    }

    #[test]
    fn scores_follow_preference() {
        use vk::PhysicalDeviceType as T;
        assert!(device_score(T::DISCRETE_GPU, DevicePreference::Discrete) > device_score(T::INTEGRATED_GPU, DevicePreference::Discrete));
        assert!(device_score(T::INTEGRATED_GPU, DevicePreference::Integrated) > device_score(T::DISCRETE_GPU, DevicePreference::Integrated));
        assert!(device_score(T::CPU, DevicePreference::Any) > 0);
    }

    #[test]
    fn finds_first_matching_family() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::VIDEO_DECODE_KHR | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::VIDEO_ENCODE_KHR,
                queue_count: 0,
                ..Default::default()
            },
        ];
        assert_eq!(find_queue_family(&families, vk::QueueFlags::TRANSFER), Some(0));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::VIDEO_DECODE_KHR), Some(1));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::VIDEO_ENCODE_KHR), None);
    }

    #[test]
    fn queue_requests_stay_within_creation() {
        let requested = [(0, 1), (2, 3)];
        check_queue_request(&requested, 0, 0).unwrap();
        check_queue_request(&requested, 2, 2).unwrap();

        let err = check_queue_request(&requested, 0, 5).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "queue_index");
        let err = check_queue_request(&requested, 2, 3).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "queue_index");
        let err = check_queue_request(&requested, 1, 0).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "queue_family_index");
    }

    #[test]
    fn vulkan13_feature_label() {
        let mut desc = DeviceDesc::default();
        assert_eq!(desc.first_vulkan13_feature(), None);
        desc.synchronization2 = true;
        assert_eq!(desc.first_vulkan13_feature(), Some("synchronization2"));
        desc.dynamic_rendering = true;
        assert_eq!(desc.first_vulkan13_feature(), Some("dynamic_rendering"));
    }
}
