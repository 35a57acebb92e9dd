// Error types for every wrapper in the backend
//
// Two shallow kinds: a native result code tagged with the operation that
// produced it, and a parameter check that failed before reaching the driver.

use ash::vk;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("GPU allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
}

impl Error {
    /// Native result code, if this error came from the driver.
    pub fn result(&self) -> Option<vk::Result> {
        match self {
            Error::Vulkan(e) => Some(e.result),
            _ => None,
        }
    }

    pub fn is_extension_not_present(&self) -> bool {
        self.result() == Some(vk::Result::ERROR_EXTENSION_NOT_PRESENT)
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

/// A non-success code returned by a native entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulkanError {
    pub result: vk::Result,
    /// Native entry point name, e.g. `vkCreateBuffer`
    pub operation: &'static str,
    pub detail: Option<String>,
}

impl VulkanError {
    pub fn new(result: vk::Result, operation: &'static str) -> Self {
        Self {
            result,
            operation,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        self.detail = if detail.is_empty() { None } else { Some(detail) };
        self
    }

    /// The fixed error returned by an extension call whose entry point was never resolved.
    pub fn extension_not_present(operation: &'static str) -> Self {
        Self::new(vk::Result::ERROR_EXTENSION_NOT_PRESENT, operation)
            .with_detail("extension function not loaded")
    }
}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({}): {}", self.operation, detail, self.result),
            None => write!(f, "{}: {}", self.operation, self.result),
        }
    }
}

impl std::error::Error for VulkanError {}

/// A parameter rejected before the native call was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {parameter}: {message}")]
pub struct ValidationError {
    pub parameter: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(parameter: &'static str, message: impl Into<String>) -> Self {
        Self {
            parameter,
            message: message.into(),
        }
    }
}

/// Attach an operation label to ash's `VkResult`.
pub trait VkResultExt<T> {
    fn with_op(self, operation: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[inline]
    fn with_op(self, operation: &'static str) -> Result<T> {
        self.map_err(|result| VulkanError::new(result, operation).into())
    }
}

/// Convert a raw result from a directly-called function pointer.
#[inline]
pub fn check(result: vk::Result, operation: &'static str) -> Result<()> {
    match result {
        vk::Result::SUCCESS => Ok(()),
        other => Err(VulkanError::new(other, operation).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_operation_and_detail() {
        let err = VulkanError::new(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "vkAllocateMemory")
            .with_detail("4096 bytes from type 2");
        let text = err.to_string();
        assert!(text.contains("vkAllocateMemory"));
        assert!(text.contains("4096 bytes from type 2"));
    }

    #[test]
    fn display_without_detail_has_no_empty_parentheses() {
        let err = VulkanError::new(vk::Result::ERROR_DEVICE_LOST, "vkQueueSubmit");
        let text = err.to_string();
        assert!(text.starts_with("vkQueueSubmit: "));
        assert!(!text.contains("()"));

        let blank = VulkanError::new(vk::Result::ERROR_DEVICE_LOST, "vkQueueSubmit").with_detail("");
        assert_eq!(blank.detail, None);
        assert!(!blank.to_string().contains("()"));
    }

    #[test]
    fn extension_not_present_is_fixed_code() {
        let err: Error = VulkanError::extension_not_present("vkCmdDecodeVideoKHR").into();
        assert!(err.is_extension_not_present());
        assert_eq!(err.result(), Some(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
    }

    #[test]
    fn validation_error_names_parameter() {
        let err: Error = ValidationError::new("queue_priorities", "1.5 is outside [0, 1]").into();
        assert_eq!(err.validation().map(|v| v.parameter), Some("queue_priorities"));
        assert_eq!(err.result(), None);
        assert_eq!(err.to_string(), "invalid queue_priorities: 1.5 is outside [0, 1]");
    }

    #[test]
    fn check_maps_non_success() {
        assert!(check(vk::Result::SUCCESS, "vkBindVideoSessionMemoryKHR").is_ok());
        let err = check(vk::Result::ERROR_INITIALIZATION_FAILED, "vkBindVideoSessionMemoryKHR")
            .unwrap_err();
        assert_eq!(err.result(), Some(vk::Result::ERROR_INITIALIZATION_FAILED));
    }

    #[test]
    fn with_op_labels_ash_results() {
        let raw: ash::prelude::VkResult<u32> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        match raw.with_op("vkCreateFence") {
            Err(Error::Vulkan(e)) => assert_eq!(e.operation, "vkCreateFence"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
