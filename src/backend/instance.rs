// Vulkan Entry and Instance
//
// Responsibilities:
// - Loading the Vulkan library and the global queries (version, layers, extensions)
// - Instance creation from a host-side description
// - Physical device queries
// - Optional debug-utils messenger forwarding validation output into `log`

use super::error::{Result, VkResultExt};
use super::marshal::{self, CStringArray, MAX_ENABLED_EXTENSIONS, MAX_ENABLED_LAYERS};
use super::version::ApiVersion;
use ash::vk;
use std::ffi::{c_void, CStr};
use std::sync::Arc;

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Loaded Vulkan library and its global entry points
#[derive(Clone)]
pub struct Entry {
    raw: ash::Entry,
}

/// Properties of an instance layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub spec_version: ApiVersion,
    pub implementation_version: u32,
    pub description: String,
}

/// Properties of an instance or device extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: String,
    pub spec_version: u32,
}

impl From<&vk::ExtensionProperties> for ExtensionInfo {
    fn from(props: &vk::ExtensionProperties) -> Self {
        Self {
            name: marshal::name_from_chars(&props.extension_name),
            spec_version: props.spec_version,
        }
    }
}

impl Entry {
    /// Load the system Vulkan loader (`libvulkan.so.1`, `vulkan-1.dll`, ...)
    pub fn load() -> Result<Self> {
        let raw = unsafe { ash::Entry::load() }?;
        log::debug!("Vulkan library loaded");
        Ok(Self { raw })
    }

    pub fn from_raw(raw: ash::Entry) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &ash::Entry {
        &self.raw
    }

    /// Highest instance version the loader supports. Vulkan 1.0 loaders lack
    /// the query entirely and report 1.0.
    pub fn instance_version(&self) -> Result<ApiVersion> {
        let version = unsafe { self.raw.try_enumerate_instance_version() }
            .with_op("vkEnumerateInstanceVersion")?;
        Ok(version.map_or(ApiVersion::V1_0, ApiVersion::from_raw))
    }

    pub fn layer_properties(&self) -> Result<Vec<LayerInfo>> {
        let layers = unsafe { self.raw.enumerate_instance_layer_properties() }
            .with_op("vkEnumerateInstanceLayerProperties")?;

        Ok(layers
            .iter()
            .map(|l| LayerInfo {
                name: marshal::name_from_chars(&l.layer_name),
                spec_version: ApiVersion::from_raw(l.spec_version),
                implementation_version: l.implementation_version,
                description: marshal::name_from_chars(&l.description),
            })
            .collect())
    }

    /// Instance extensions, either of the implementation or of a single layer
    pub fn extension_properties(&self, layer: Option<&str>) -> Result<Vec<ExtensionInfo>> {
        let layer = layer.map(|l| marshal::c_string("layer", l)).transpose()?;
        let extensions = unsafe {
            self.raw
                .enumerate_instance_extension_properties(layer.as_deref())
        }
        .with_op("vkEnumerateInstanceExtensionProperties")?;

        Ok(extensions.iter().map(ExtensionInfo::from).collect())
    }
}

/// Host-side description of `VkInstanceCreateInfo` and its application info
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub application_name: String,
    pub application_version: ApiVersion,
    pub engine_name: String,
    pub engine_version: ApiVersion,
    pub api_version: ApiVersion,
    pub enabled_layers: Vec<String>,
    pub enabled_extensions: Vec<String>,
    pub flags: vk::InstanceCreateFlags,
    /// Install a debug-utils messenger that forwards driver messages into `log`
    pub debug_messenger: bool,
}

impl Default for InstanceDesc {
    fn default() -> Self {
        Self {
            application_name: "vkbind".to_string(),
            application_version: ApiVersion::new(0, 1, 0),
            engine_name: "vkbind".to_string(),
            engine_version: ApiVersion::new(0, 1, 0),
            api_version: ApiVersion::V1_3,
            enabled_layers: Vec::new(),
            enabled_extensions: Vec::new(),
            flags: vk::InstanceCreateFlags::empty(),
            debug_messenger: false,
        }
    }
}

impl InstanceDesc {
    /// Enable the Khronos validation layer together with the debug messenger.
    pub fn with_validation(mut self) -> Self {
        if !self.enabled_layers.iter().any(|l| l == VALIDATION_LAYER) {
            self.enabled_layers.push(VALIDATION_LAYER.to_string());
        }
        self.debug_messenger = true;
        self
    }

    /// Extension list as it will be passed to the driver
    fn effective_extensions(&self) -> Vec<String> {
        let mut extensions = self.enabled_extensions.clone();
        if self.debug_messenger {
            let debug_utils = ash::ext::debug_utils::NAME.to_string_lossy();
            if !extensions.iter().any(|e| *e == debug_utils) {
                extensions.push(debug_utils.into_owned());
            }
        }
        extensions
    }

    fn marshal(&self) -> Result<MarshalledInstance> {
        Ok(MarshalledInstance {
            application_name: marshal::c_string("application_name", &self.application_name)?,
            engine_name: marshal::c_string("engine_name", &self.engine_name)?,
            layers: CStringArray::new("enabled_layers", &self.enabled_layers, MAX_ENABLED_LAYERS)?,
            extensions: CStringArray::new(
                "enabled_extensions",
                &self.effective_extensions(),
                MAX_ENABLED_EXTENSIONS,
            )?,
        })
    }
}

/// Owned storage referenced by the native create info during the call
struct MarshalledInstance {
    application_name: std::ffi::CString,
    engine_name: std::ffi::CString,
    layers: CStringArray,
    extensions: CStringArray,
}

/// Summary of a physical device's identity
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: ApiVersion,
    pub driver_version: u32,
    pub vendor_id: u32,
    pub device_id: u32,
}

/// Vulkan instance with automatic cleanup
pub struct Instance {
    raw: ash::Instance,
    entry: ash::Entry,
    api_version: ApiVersion,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    pub fn new(entry: &Entry, desc: &InstanceDesc) -> Result<Arc<Self>> {
        let m = desc.marshal()?;

        log::info!(
            "Creating Vulkan instance: {} (API {})",
            desc.application_name,
            desc.api_version
        );
        log::debug!("Instance layers: {:?}", desc.enabled_layers);
        log::debug!("Instance extensions: {:?}", m.extensions.iter().collect::<Vec<_>>());

        let app_info = vk::ApplicationInfo::default()
            .application_name(&m.application_name)
            .application_version(desc.application_version.raw())
            .engine_name(&m.engine_name)
            .engine_version(desc.engine_version.raw())
            .api_version(desc.api_version.raw());

        let create_info = vk::InstanceCreateInfo::default()
            .flags(desc.flags)
            .application_info(&app_info)
            .enabled_layer_names(m.layers.as_ptrs())
            .enabled_extension_names(m.extensions.as_ptrs());

        let raw = unsafe { entry.raw.create_instance(&create_info, None) }
            .with_op("vkCreateInstance")?;

        let debug_utils = if desc.debug_messenger {
            match Self::setup_debug_messenger(&entry.raw, &raw) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    unsafe { raw.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            raw,
            entry: entry.raw.clone(),
            api_version: desc.api_version,
            debug_utils,
        }))
    }

    fn setup_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .with_op("vkCreateDebugUtilsMessengerEXT")?;

        Ok((debug_utils, messenger))
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn handle(&self) -> vk::Instance {
        self.raw.handle()
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// API version requested at creation
    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
        unsafe { self.raw.enumerate_physical_devices() }.with_op("vkEnumeratePhysicalDevices")
    }

    pub fn physical_device_properties(&self, physical: vk::PhysicalDevice) -> Result<vk::PhysicalDeviceProperties> {
        marshal::require_handle("physical_device", physical)?;
        Ok(unsafe { self.raw.get_physical_device_properties(physical) })
    }

    pub fn physical_device_features(&self, physical: vk::PhysicalDevice) -> Result<vk::PhysicalDeviceFeatures> {
        marshal::require_handle("physical_device", physical)?;
        Ok(unsafe { self.raw.get_physical_device_features(physical) })
    }

    pub fn queue_family_properties(
        &self,
        physical: vk::PhysicalDevice,
    ) -> Result<Vec<vk::QueueFamilyProperties>> {
        marshal::require_handle("physical_device", physical)?;
        Ok(unsafe { self.raw.get_physical_device_queue_family_properties(physical) })
    }

    pub fn memory_properties(
        &self,
        physical: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceMemoryProperties> {
        marshal::require_handle("physical_device", physical)?;
        Ok(unsafe { self.raw.get_physical_device_memory_properties(physical) })
    }

    pub fn device_extension_properties(&self, physical: vk::PhysicalDevice) -> Result<Vec<ExtensionInfo>> {
        marshal::require_handle("physical_device", physical)?;
        let extensions = unsafe { self.raw.enumerate_device_extension_properties(physical) }
            .with_op("vkEnumerateDeviceExtensionProperties")?;
        Ok(extensions.iter().map(ExtensionInfo::from).collect())
    }

    pub fn physical_device_info(&self, physical: vk::PhysicalDevice) -> Result<PhysicalDeviceInfo> {
        let props = self.physical_device_properties(physical)?;
        Ok(PhysicalDeviceInfo {
            handle: physical,
            name: marshal::name_from_chars(&props.device_name),
            device_type: props.device_type,
            api_version: ApiVersion::from_raw(props.api_version),
            driver_version: props.driver_version,
            vendor_id: props.vendor_id,
            device_id: props.device_id,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
