// Buffer utilities for vertex, index, uniform, storage and bitstream buffers
//
// Provides helpers for creating GPU-accessible memory buffers

use super::device::Device;
use super::error::{Result, ValidationError, VkResultExt};
use super::handle::{Buffer, Owned};
use super::memory::DeviceMemory;
use super::memory;
use ash::vk;
use std::sync::Arc;

/// Host-side description of `VkBufferCreateInfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub flags: vk::BufferCreateFlags,
    pub sharing_mode: vk::SharingMode,
    /// Only read for `SharingMode::CONCURRENT`
    pub queue_family_indices: Vec<u32>,
}

impl BufferDesc {
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            flags: vk::BufferCreateFlags::empty(),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_indices: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(ValidationError::new("size", "must be greater than zero").into());
        }
        if self.usage.is_empty() {
            return Err(ValidationError::new("usage", "at least one usage flag is required").into());
        }
        if self.sharing_mode == vk::SharingMode::CONCURRENT && self.queue_family_indices.len() < 2 {
            return Err(ValidationError::new(
                "queue_family_indices",
                "concurrent sharing needs at least two queue families",
            )
            .into());
        }
        Ok(())
    }

    pub(crate) fn to_vk(&self) -> vk::BufferCreateInfo<'_> {
        let info = vk::BufferCreateInfo::default()
            .flags(self.flags)
            .size(self.size)
            .usage(self.usage)
            .sharing_mode(self.sharing_mode);
        if self.sharing_mode == vk::SharingMode::CONCURRENT {
            info.queue_family_indices(&self.queue_family_indices)
        } else {
            info
        }
    }
}

pub fn create_buffer(device: &Arc<Device>, desc: &BufferDesc) -> Result<Buffer> {
    desc.validate()?;

    let buffer = unsafe { device.raw().create_buffer(&desc.to_vk(), None) }.with_op("vkCreateBuffer")?;

    Ok(unsafe { Owned::from_raw(device.clone(), buffer) })
}

/// Create a host-visible buffer and fill it with data
pub fn create_buffer_with_data<T: bytemuck::Pod>(
    device: &Arc<Device>,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<(Buffer, DeviceMemory)> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;

    let buffer = create_buffer(device, &BufferDesc::new(size, usage))?;
    let memory = memory::allocate_for_buffer(
        &buffer,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    // Copy data to buffer
    memory::map_memory(&memory, 0, size)?.write(data)?;

    Ok((buffer, memory))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_size() {
        let err = BufferDesc::new(0, vk::BufferUsageFlags::TRANSFER_DST).validate().unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "size");
    }

    #[test]
    fn rejects_missing_usage() {
        let err = BufferDesc::new(64, vk::BufferUsageFlags::empty()).validate().unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "usage");
    }

    #[test]
    fn concurrent_sharing_needs_two_families() {
        let mut desc = BufferDesc::new(1024, vk::BufferUsageFlags::VIDEO_DECODE_SRC_KHR);
        desc.sharing_mode = vk::SharingMode::CONCURRENT;
        desc.queue_family_indices = vec![0];
        assert!(desc.validate().is_err());

        desc.queue_family_indices.push(3);
        desc.validate().unwrap();
        let info = desc.to_vk();
        assert_eq!(info.queue_family_index_count, 2);
        assert_eq!(info.sharing_mode, vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn exclusive_sharing_ignores_family_list() {
        let mut desc = BufferDesc::new(256, vk::BufferUsageFlags::STORAGE_BUFFER);
        desc.queue_family_indices = vec![0, 1];
        let info = desc.to_vk();
        assert_eq!(info.queue_family_index_count, 0);
        assert!(info.p_queue_family_indices.is_null());
    }
}
