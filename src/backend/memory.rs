// Device memory: allocation, binding and host mapping

use super::device::Device;
use super::error::{Result, ValidationError, VkResultExt, VulkanError};
use super::handle::{Buffer, Image, Owned};
use super::marshal::{self, WHOLE_SIZE};
use ash::vk;
use std::ffi::c_void;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAllocateDesc {
    pub size: vk::DeviceSize,
    pub memory_type_index: u32,
}

/// Find a suitable memory type index
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);
        has_type && has_properties
    })
}

/// Like `find_memory_type`, but reported as a native error when nothing matches
pub fn require_memory_type(
    device: &Device,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    find_memory_type(device.memory_properties(), type_filter, properties).ok_or_else(|| {
        VulkanError::new(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "vkAllocateMemory")
            .with_detail(format!(
                "no memory type in mask {:#b} with {:?}",
                type_filter, properties
            ))
            .into()
    })
}

/// Device memory that remembers its allocation size, freed on drop
#[derive(Debug)]
pub struct DeviceMemory {
    owned: Owned<vk::DeviceMemory>,
    size: vk::DeviceSize,
}

impl DeviceMemory {
    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.owned.handle()
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        self.owned.device()
    }

    /// `allocationSize` passed to `vkAllocateMemory`
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Release ownership without freeing; see `Device::destroy_raw`.
    pub fn into_raw(self) -> vk::DeviceMemory {
        self.owned.into_raw()
    }

    pub fn destroy(self) {
        drop(self)
    }
}

pub fn allocate_memory(device: &Arc<Device>, desc: &MemoryAllocateDesc) -> Result<DeviceMemory> {
    if desc.size == 0 {
        return Err(ValidationError::new("allocation_size", "must be greater than zero").into());
    }
    let type_count = device.memory_properties().memory_type_count;
    if desc.memory_type_index >= type_count {
        return Err(ValidationError::new(
            "memory_type_index",
            format!("{} is not below the device's {} memory types", desc.memory_type_index, type_count),
        )
        .into());
    }

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(desc.size)
        .memory_type_index(desc.memory_type_index);

    let memory = unsafe { device.raw().allocate_memory(&alloc_info, None) }.map_err(|result| {
        VulkanError::new(result, "vkAllocateMemory").with_detail(format!(
            "{} bytes from type {}",
            desc.size, desc.memory_type_index
        ))
    })?;

    Ok(DeviceMemory {
        owned: unsafe { Owned::from_raw(device.clone(), memory) },
        size: desc.size,
    })
}

pub fn buffer_memory_requirements(buffer: &Buffer) -> vk::MemoryRequirements {
    unsafe { buffer.device().raw().get_buffer_memory_requirements(buffer.handle()) }
}

pub fn image_memory_requirements(image: &Image) -> vk::MemoryRequirements {
    unsafe { image.device().raw().get_image_memory_requirements(image.handle()) }
}

pub fn bind_buffer_memory(buffer: &Buffer, memory: &DeviceMemory, offset: vk::DeviceSize) -> Result<()> {
    unsafe {
        buffer
            .device()
            .raw()
            .bind_buffer_memory(buffer.handle(), memory.handle(), offset)
    }
    .with_op("vkBindBufferMemory")
}

pub fn bind_image_memory(image: &Image, memory: &DeviceMemory, offset: vk::DeviceSize) -> Result<()> {
    unsafe {
        image
            .device()
            .raw()
            .bind_image_memory(image.handle(), memory.handle(), offset)
    }
    .with_op("vkBindImageMemory")
}

/// Allocate memory matching a buffer's requirements and bind it at offset 0
pub fn allocate_for_buffer(buffer: &Buffer, properties: vk::MemoryPropertyFlags) -> Result<DeviceMemory> {
    let device = buffer.device();
    let requirements = buffer_memory_requirements(buffer);
    let memory_type_index = require_memory_type(device, requirements.memory_type_bits, properties)?;
    let memory = allocate_memory(
        device,
        &MemoryAllocateDesc {
            size: requirements.size,
            memory_type_index,
        },
    )?;
    bind_buffer_memory(buffer, &memory, 0)?;
    Ok(memory)
}

/// Allocate memory matching an image's requirements and bind it at offset 0
pub fn allocate_for_image(image: &Image, properties: vk::MemoryPropertyFlags) -> Result<DeviceMemory> {
    let device = image.device();
    let requirements = image_memory_requirements(image);
    let memory_type_index = require_memory_type(device, requirements.memory_type_bits, properties)?;
    let memory = allocate_memory(
        device,
        &MemoryAllocateDesc {
            size: requirements.size,
            memory_type_index,
        },
    )?;
    bind_image_memory(image, &memory, 0)?;
    Ok(memory)
}

/// A mapped range of host-visible memory, unmapped on drop
pub struct MappedMemory<'a> {
    memory: &'a DeviceMemory,
    ptr: *mut c_void,
    offset: vk::DeviceSize,
    /// As passed to `vkMapMemory`, possibly `WHOLE_SIZE`
    size: vk::DeviceSize,
    len: usize,
}

/// Byte length of a `size` mapping at `offset` into an allocation of `allocation_size`
fn mapped_len(allocation_size: vk::DeviceSize, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<usize> {
    if offset >= allocation_size {
        return Err(ValidationError::new(
            "offset",
            format!("{} is not below the allocation size {}", offset, allocation_size),
        )
        .into());
    }
    let available = allocation_size - offset;
    let len = if size == WHOLE_SIZE { available } else { size };
    if len == 0 {
        return Err(ValidationError::new("size", "must be greater than zero or WHOLE_SIZE").into());
    }
    if len > available {
        return Err(ValidationError::new(
            "size",
            format!("{} bytes at offset {} exceed the allocation size {}", len, offset, allocation_size),
        )
        .into());
    }
    usize::try_from(len).map_err(|_| ValidationError::new("size", "mapping does not fit the host address space").into())
}

/// Map `size` bytes at `offset`; `WHOLE_SIZE` maps to the end of the allocation.
pub fn map_memory(memory: &DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<MappedMemory<'_>> {
    let len = mapped_len(memory.size(), offset, size)?;
    let ptr = unsafe {
        memory
            .device()
            .raw()
            .map_memory(memory.handle(), offset, size, vk::MemoryMapFlags::empty())
    }
    .with_op("vkMapMemory")?;

    Ok(MappedMemory {
        memory,
        ptr,
        offset,
        size,
        len,
    })
}

impl MappedMemory<'_> {
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    /// Mapped length in bytes, with `WHOLE_SIZE` resolved
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.len) }
    }

    /// Copy `data` to the start of the mapping
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() > self.len {
            return Err(ValidationError::new(
                "data",
                format!("{} bytes do not fit in a {} byte mapping", bytes.len(), self.len),
            )
            .into());
        }
        self.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn range(&self) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default()
            .memory(self.memory.handle())
            .offset(self.offset)
            .size(self.size)
    }

    /// Make host writes visible to the device (non-coherent memory)
    pub fn flush(&self) -> Result<()> {
        unsafe {
            self.memory
                .device()
                .raw()
                .flush_mapped_memory_ranges(&[self.range()])
        }
        .with_op("vkFlushMappedMemoryRanges")
    }

    /// Make device writes visible to the host (non-coherent memory)
    pub fn invalidate(&self) -> Result<()> {
        unsafe {
            self.memory
                .device()
                .raw()
                .invalidate_mapped_memory_ranges(&[self.range()])
        }
        .with_op("vkInvalidateMappedMemoryRanges")
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        unsafe { self.memory.device().raw().unmap_memory(self.memory.handle()) };
    }
}

/// Check a raw memory handle before handing it to a call that takes one by value
pub fn require_memory(parameter: &'static str, memory: vk::DeviceMemory) -> Result<()> {
    marshal::require_handle(parameter, memory)
}
