// Owning guards for device-level objects
//
// Every object created through the backend comes back as `Owned<H>`, which
// keeps its device alive and destroys the handle exactly once when dropped.

use super::device::Device;
use ash::vk::{self, Handle};
use std::fmt;
use std::sync::Arc;

/// A device child that can be destroyed with the device's dispatch table.
pub trait DeviceObject: Handle + Copy {
    const NAME: &'static str;

    /// # Safety
    /// The handle must belong to `device` and must not be in use by the GPU.
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_object {
    ($($ty:ty => $name:literal, |$h:ident, $d:ident| $destroy:expr;)*) => {
        $(
            impl DeviceObject for $ty {
                const NAME: &'static str = $name;

                #[inline]
                unsafe fn destroy(self, device: &ash::Device) {
                    let ($h, $d) = (self, device);
                    $destroy
                }
            }
        )*
    };
}

device_object! {
    vk::Buffer => "buffer", |h, d| d.destroy_buffer(h, None);
    vk::Image => "image", |h, d| d.destroy_image(h, None);
    vk::ImageView => "image view", |h, d| d.destroy_image_view(h, None);
    vk::Sampler => "sampler", |h, d| d.destroy_sampler(h, None);
    vk::DeviceMemory => "device memory", |h, d| d.free_memory(h, None);
    vk::CommandPool => "command pool", |h, d| d.destroy_command_pool(h, None);
    vk::Fence => "fence", |h, d| d.destroy_fence(h, None);
    vk::Semaphore => "semaphore", |h, d| d.destroy_semaphore(h, None);
    vk::ShaderModule => "shader module", |h, d| d.destroy_shader_module(h, None);
    vk::PipelineLayout => "pipeline layout", |h, d| d.destroy_pipeline_layout(h, None);
    vk::Pipeline => "pipeline", |h, d| d.destroy_pipeline(h, None);
    vk::DescriptorSetLayout => "descriptor set layout", |h, d| d.destroy_descriptor_set_layout(h, None);
    vk::DescriptorPool => "descriptor pool", |h, d| d.destroy_descriptor_pool(h, None);
}

pub type Buffer = Owned<vk::Buffer>;
pub type Image = Owned<vk::Image>;
pub type ImageView = Owned<vk::ImageView>;
pub type Sampler = Owned<vk::Sampler>;
pub type CommandPool = Owned<vk::CommandPool>;
pub type Fence = Owned<vk::Fence>;
pub type Semaphore = Owned<vk::Semaphore>;
pub type ShaderModule = Owned<vk::ShaderModule>;
pub type PipelineLayout = Owned<vk::PipelineLayout>;
pub type Pipeline = Owned<vk::Pipeline>;
pub type DescriptorSetLayout = Owned<vk::DescriptorSetLayout>;
pub type DescriptorPool = Owned<vk::DescriptorPool>;

/// Handle plus the device that created it
pub struct Owned<H: DeviceObject> {
    device: Arc<Device>,
    handle: H,
}

impl<H: DeviceObject> Owned<H> {
    /// Take ownership of a handle created on `device`.
    ///
    /// # Safety
    /// `handle` must have been created from `device` and must not be owned elsewhere.
    pub unsafe fn from_raw(device: Arc<Device>, handle: H) -> Self {
        log::trace!("Created {} {:#x}", H::NAME, handle.as_raw());
        Self { device, handle }
    }

    #[inline]
    pub fn handle(&self) -> H {
        self.handle
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Release ownership without destroying; see `Device::destroy_raw`.
    pub fn into_raw(self) -> H {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the Arc is moved out exactly once.
        let _device = unsafe { std::ptr::read(&this.device) };
        this.handle
    }

    /// Destroy now instead of at end of scope.
    pub fn destroy(self) {
        drop(self)
    }
}

impl<H: DeviceObject> Drop for Owned<H> {
    fn drop(&mut self) {
        if self.handle.as_raw() == 0 {
            return;
        }
        log::trace!("Destroying {} {:#x}", H::NAME, self.handle.as_raw());
        unsafe { self.handle.destroy(self.device.raw()) };
    }
}

impl<H: DeviceObject + fmt::Debug> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}
