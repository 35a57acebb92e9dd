// =============================================================================
// CONFIGURATION - Load probe settings from vkprobe.toml
// =============================================================================
//
// Every section is optional; missing fields take the defaults below, and a
// missing file means an all-default configuration.

use crate::backend::device::{DeviceDesc, DevicePreference, DeviceQueueDesc};
use crate::backend::instance::InstanceDesc;
use crate::backend::version::ApiVersion;
use crate::backend::video::VideoCodec;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "vkprobe.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub application: ApplicationConfig,
    pub instance: InstanceConfig,
    pub device: DeviceConfig,
    pub video: VideoConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub version: ApiVersion,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "vkprobe".to_string(),
            version: ApiVersion::new(0, 1, 0),
        }
    }
}

/// Instance creation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub api_version: ApiVersion,
    /// Enable VK_LAYER_KHRONOS_validation and the debug messenger
    pub validation: bool,
    pub debug_messenger: bool,
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            api_version: ApiVersion::V1_3,
            validation: false,
            debug_messenger: false,
            layers: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

/// Physical device selection and logical device features
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub preferred_type: DevicePreference,
    pub extensions: Vec<String>,
    pub dynamic_rendering: bool,
    pub synchronization2: bool,
    pub timeline_semaphore: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            preferred_type: DevicePreference::Discrete,
            extensions: Vec::new(),
            dynamic_rendering: false,
            synchronization2: false,
            timeline_semaphore: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    pub codecs: Vec<VideoCodec>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            codecs: vec![VideoCodec::DecodeH264, VideoCodec::DecodeH265],
        }
    }
}

/// Transfer smoke test settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub fence_timeout_ms: u64,
    pub smoke_test_bytes: u64,
    pub fill_pattern: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: 1000,
            smoke_test_bytes: 64 * 1024,
            fill_pattern: 0xDEAD_BEEF,
        }
    }
}

impl ProbeConfig {
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_FILE, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn instance_desc(&self) -> InstanceDesc {
        let desc = InstanceDesc {
            application_name: self.application.name.clone(),
            application_version: self.application.version,
            api_version: self.instance.api_version,
            enabled_layers: self.instance.layers.clone(),
            enabled_extensions: self.instance.extensions.clone(),
            debug_messenger: self.instance.debug_messenger,
            ..Default::default()
        };
        if self.instance.validation {
            desc.with_validation()
        } else {
            desc
        }
    }

    /// Device description for the given queue families, with the video
    /// extensions of the configured codecs appended when `video_codecs` is set
    pub fn device_desc(&self, queue_families: &[u32], video_codecs: &[VideoCodec]) -> DeviceDesc {
        let mut extensions = self.device.extensions.clone();
        for codec in video_codecs {
            for name in codec.extensions() {
                if !extensions.iter().any(|e| e == name) {
                    extensions.push(name.to_string());
                }
            }
        }

        let mut families = queue_families.to_vec();
        families.sort_unstable();
        families.dedup();

        DeviceDesc {
            queues: families.into_iter().map(DeviceQueueDesc::single).collect(),
            extensions,
            dynamic_rendering: self.device.dynamic_rendering,
            synchronization2: self.device.synchronization2,
            timeline_semaphore: self.device.timeline_semaphore,
            ..Default::default()
        }
    }
}
