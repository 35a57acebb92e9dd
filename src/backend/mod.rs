// Backend module - checked Vulkan bindings
//
// Thin wrappers around ash: host-side descriptions are validated before any
// driver call, failures come back as `Error`, and objects own their handles.

pub mod allocator;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod handle;
pub mod image;
pub mod instance;
pub mod marshal;
pub mod memory;
pub mod pipeline;
pub mod rendering;
pub mod shader;
pub mod sync;
pub mod version;
pub mod video;

pub use ash::vk;
pub use command::Recording;
pub use device::{Device, DeviceDesc, Queue};
pub use error::{Error, Result, ValidationError, VulkanError};
pub use handle::Owned;
pub use instance::{Entry, Instance, InstanceDesc};
pub use marshal::{from_bool32, to_bool32, WHOLE_SIZE};
pub use version::ApiVersion;
pub use video::{VideoInstanceFns, VideoQueue};
