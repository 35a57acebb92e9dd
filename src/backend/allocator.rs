// Sub-allocated buffer memory through gpu-allocator
//
// An alternative to one `vkAllocateMemory` per buffer: large blocks are
// allocated once and carved up. The allocator needs `&mut` access, so it sits
// behind a mutex and can be shared between threads. Every `AllocatedBuffer`
// holds a reference to the allocator state, so the memory blocks outlive all
// buffers carved from them.

use super::buffer::{create_buffer, BufferDesc};
use super::device::Device;
use super::error::{Result, VkResultExt};
use super::handle::Buffer;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::sync::Arc;

struct Shared {
    // Declared first so the memory blocks are released before the device
    allocator: Mutex<Allocator>,
    device: Arc<Device>,
}

#[derive(Clone)]
pub struct GpuAllocator {
    shared: Arc<Shared>,
}

/// A buffer bound to a sub-allocation; the buffer is destroyed and the
/// allocation returned on drop
pub struct AllocatedBuffer {
    buffer: ManuallyDrop<Buffer>,
    allocation: Allocation,
    shared: Arc<Shared>,
}

impl AllocatedBuffer {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Host pointer for `CpuToGpu` / `GpuToCpu` locations
    pub fn mapped_slice(&self) -> Option<&[u8]> {
        self.allocation.mapped_slice()
    }

    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.mapped_slice_mut()
    }

    pub fn size(&self) -> u64 {
        self.allocation.size()
    }

    /// Same as dropping the buffer, but reports a failed free
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    /// Destroy the buffer, then hand the allocation back; later calls are no-ops
    fn release(&mut self) -> Result<()> {
        let Some(allocation) = take_allocation(&mut self.allocation) else {
            return Ok(());
        };
        // SAFETY: the allocation slot is now null, so this runs once
        unsafe { ManuallyDrop::drop(&mut self.buffer) };
        self.shared.allocator.lock().free(allocation)?;
        Ok(())
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Failed to free buffer allocation: {}", e);
        }
    }
}

/// Move a live allocation out of `slot`, leaving a null one behind
fn take_allocation(slot: &mut Allocation) -> Option<Allocation> {
    if slot.is_null() {
        None
    } else {
        Some(std::mem::take(slot))
    }
}

impl GpuAllocator {
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: device.instance().raw().clone(),
            device: device.raw().clone(),
            physical_device: device.physical_device(),
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        log::debug!("GPU allocator ready");

        Ok(Self {
            shared: Arc::new(Shared {
                allocator: Mutex::new(allocator),
                device: device.clone(),
            }),
        })
    }

    pub fn allocate_buffer(&self, desc: &BufferDesc, location: MemoryLocation, name: &str) -> Result<AllocatedBuffer> {
        let device = &self.shared.device;
        let buffer = create_buffer(device, desc)?;
        let requirements = super::memory::buffer_memory_requirements(&buffer);

        let allocation = self.shared.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let bound = unsafe {
            device
                .raw()
                .bind_buffer_memory(buffer.handle(), allocation.memory(), allocation.offset())
        }
        .with_op("vkBindBufferMemory");

        if let Err(e) = bound {
            let _ = self.shared.allocator.lock().free(allocation);
            return Err(e);
        }

        log::trace!("Allocated '{}' ({} bytes, {:?})", name, allocation.size(), location);

        Ok(AllocatedBuffer {
            buffer: ManuallyDrop::new(buffer),
            allocation,
            shared: self.shared.clone(),
        })
    }
}
