// Synchronization primitives
//
// Fences, semaphores (binary and timeline) and queue submission.
// Waits are the only calls here that block, bounded by the caller's timeout.

use super::device::{Device, Queue};
use super::error::{Result, ValidationError, VkResultExt, VulkanError};
use super::handle::{Fence, Owned, Semaphore};
use super::marshal;
use ash::vk;
use std::sync::Arc;

pub fn create_fence(device: &Arc<Device>, signaled: bool) -> Result<Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::default().flags(flags);

    let fence = unsafe { device.raw().create_fence(&fence_info, None) }.with_op("vkCreateFence")?;
    Ok(unsafe { Owned::from_raw(device.clone(), fence) })
}

/// Binary semaphore
pub fn create_semaphore(device: &Arc<Device>) -> Result<Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();
    let semaphore =
        unsafe { device.raw().create_semaphore(&semaphore_info, None) }.with_op("vkCreateSemaphore")?;
    Ok(unsafe { Owned::from_raw(device.clone(), semaphore) })
}

/// Timeline semaphore (needs `timelineSemaphore` enabled on the device)
pub fn create_timeline_semaphore(device: &Arc<Device>, initial_value: u64) -> Result<Semaphore> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

    let semaphore =
        unsafe { device.raw().create_semaphore(&semaphore_info, None) }.with_op("vkCreateSemaphore")?;
    Ok(unsafe { Owned::from_raw(device.clone(), semaphore) })
}

/// Wait on fences for at most `timeout_ns`.
///
/// Returns `false` when the timeout expired before the condition was met.
pub fn wait_for_fences(device: &Device, fences: &[vk::Fence], wait_all: bool, timeout_ns: u64) -> Result<bool> {
    marshal::require_non_empty("fences", fences)?;
    for &fence in fences {
        marshal::require_handle("fences", fence)?;
    }

    match unsafe { device.raw().wait_for_fences(fences, wait_all, timeout_ns) } {
        Ok(()) => Ok(true),
        Err(vk::Result::TIMEOUT) => Ok(false),
        Err(result) => Err(VulkanError::new(result, "vkWaitForFences").into()),
    }
}

pub fn reset_fences(device: &Device, fences: &[vk::Fence]) -> Result<()> {
    marshal::require_non_empty("fences", fences)?;
    unsafe { device.raw().reset_fences(fences) }.with_op("vkResetFences")
}

/// `true` if signaled
pub fn fence_status(fence: &Fence) -> Result<bool> {
    unsafe { fence.device().raw().get_fence_status(fence.handle()) }.with_op("vkGetFenceStatus")
}

pub fn semaphore_counter_value(semaphore: &Semaphore) -> Result<u64> {
    unsafe {
        semaphore
            .device()
            .raw()
            .get_semaphore_counter_value(semaphore.handle())
    }
    .with_op("vkGetSemaphoreCounterValue")
}

/// Signal a timeline semaphore from the host
pub fn signal_semaphore(semaphore: &Semaphore, value: u64) -> Result<()> {
    let signal_info = vk::SemaphoreSignalInfo::default()
        .semaphore(semaphore.handle())
        .value(value);
    unsafe { semaphore.device().raw().signal_semaphore(&signal_info) }.with_op("vkSignalSemaphore")
}

/// Wait until every timeline semaphore reaches its value; `false` on timeout
pub fn wait_semaphores(device: &Device, waits: &[(vk::Semaphore, u64)], timeout_ns: u64) -> Result<bool> {
    marshal::require_non_empty("semaphores", waits)?;
    let (semaphores, values): (Vec<vk::Semaphore>, Vec<u64>) = waits.iter().copied().unzip();
    let wait_info = vk::SemaphoreWaitInfo::default()
        .semaphores(&semaphores)
        .values(&values);

    match unsafe { device.raw().wait_semaphores(&wait_info, timeout_ns) } {
        Ok(()) => Ok(true),
        Err(vk::Result::TIMEOUT) => Ok(false),
        Err(result) => Err(VulkanError::new(result, "vkWaitSemaphores").into()),
    }
}

/// Host-side description of one `VkSubmitInfo`
#[derive(Debug, Clone, Default)]
pub struct SubmitDesc {
    pub wait_semaphores: Vec<vk::Semaphore>,
    /// One stage mask per wait semaphore
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

impl SubmitDesc {
    pub fn command_buffer(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffers: vec![command_buffer],
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.wait_semaphores.len() != self.wait_stages.len() {
            return Err(ValidationError::new(
                "wait_stages",
                format!(
                    "{} stage masks for {} wait semaphores",
                    self.wait_stages.len(),
                    self.wait_semaphores.len()
                ),
            )
            .into());
        }
        for &cb in &self.command_buffers {
            marshal::require_handle("command_buffers", cb)?;
        }
        for &s in self.wait_semaphores.iter().chain(&self.signal_semaphores) {
            marshal::require_handle("semaphores", s)?;
        }
        Ok(())
    }

    fn to_vk(&self) -> vk::SubmitInfo<'_> {
        vk::SubmitInfo::default()
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&self.command_buffers)
            .signal_semaphores(&self.signal_semaphores)
    }
}

pub fn queue_submit(device: &Device, queue: &Queue, submits: &[SubmitDesc], fence: Option<&Fence>) -> Result<()> {
    marshal::require_handle("queue", queue.raw)?;
    for submit in submits {
        submit.validate()?;
    }

    let infos: Vec<vk::SubmitInfo> = submits.iter().map(SubmitDesc::to_vk).collect();
    let fence = fence.map_or(vk::Fence::null(), |f| f.handle());

    unsafe { device.raw().queue_submit(queue.raw, &infos, fence) }.with_op("vkQueueSubmit")
}

/// A semaphore wait or signal operation for synchronization2 submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreSubmit {
    pub semaphore: vk::Semaphore,
    /// Ignored for binary semaphores
    pub value: u64,
    pub stage_mask: vk::PipelineStageFlags2,
}

impl SemaphoreSubmit {
    pub fn binary(semaphore: vk::Semaphore, stage_mask: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            value: 0,
            stage_mask,
        }
    }

    fn to_vk(self) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore)
            .value(self.value)
            .stage_mask(self.stage_mask)
    }
}

/// Host-side description of one `VkSubmitInfo2`
#[derive(Debug, Clone, Default)]
pub struct SubmitDesc2 {
    pub wait: Vec<SemaphoreSubmit>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal: Vec<SemaphoreSubmit>,
}

impl SubmitDesc2 {
    pub fn validate(&self) -> Result<()> {
        for &cb in &self.command_buffers {
            marshal::require_handle("command_buffers", cb)?;
        }
        for s in self.wait.iter().chain(&self.signal) {
            marshal::require_handle("semaphores", s.semaphore)?;
        }
        Ok(())
    }
}

/// Arrays referenced by a `VkSubmitInfo2` for the duration of the call
struct MarshalledSubmit2 {
    wait: Vec<vk::SemaphoreSubmitInfo<'static>>,
    command_buffers: Vec<vk::CommandBufferSubmitInfo<'static>>,
    signal: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl From<&SubmitDesc2> for MarshalledSubmit2 {
    fn from(desc: &SubmitDesc2) -> Self {
        Self {
            wait: desc.wait.iter().map(|s| s.to_vk()).collect(),
            command_buffers: desc
                .command_buffers
                .iter()
                .map(|&cb| vk::CommandBufferSubmitInfo::default().command_buffer(cb))
                .collect(),
            signal: desc.signal.iter().map(|s| s.to_vk()).collect(),
        }
    }
}

/// Submit with synchronization2 (needs `synchronization2` enabled on the device)
pub fn queue_submit2(device: &Device, queue: &Queue, submits: &[SubmitDesc2], fence: Option<&Fence>) -> Result<()> {
    marshal::require_handle("queue", queue.raw)?;
    for submit in submits {
        submit.validate()?;
    }

    let marshalled: Vec<MarshalledSubmit2> = submits.iter().map(MarshalledSubmit2::from).collect();
    let infos: Vec<vk::SubmitInfo2> = marshalled
        .iter()
        .map(|m| {
            vk::SubmitInfo2::default()
                .wait_semaphore_infos(&m.wait)
                .command_buffer_infos(&m.command_buffers)
                .signal_semaphore_infos(&m.signal)
        })
        .collect();
    let fence = fence.map_or(vk::Fence::null(), |f| f.handle());

    unsafe { device.raw().queue_submit2(queue.raw, &infos, fence) }.with_op("vkQueueSubmit2")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn submit_requires_matching_wait_stages() {
        let desc = SubmitDesc {
            wait_semaphores: vec![vk::Semaphore::from_raw(1), vk::Semaphore::from_raw(2)],
            wait_stages: vec![vk::PipelineStageFlags::TRANSFER],
            command_buffers: vec![vk::CommandBuffer::from_raw(3)],
            ..Default::default()
        };
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "wait_stages");
    }

    #[test]
    fn submit_rejects_null_command_buffer() {
        let desc = SubmitDesc::command_buffer(vk::CommandBuffer::null());
        assert_eq!(
            desc.validate().unwrap_err().validation().unwrap().parameter,
            "command_buffers"
        );
    }

    #[test]
    fn submit_marshals_counts() {
        let desc = SubmitDesc {
            wait_semaphores: vec![vk::Semaphore::from_raw(1)],
            wait_stages: vec![vk::PipelineStageFlags::COMPUTE_SHADER],
            command_buffers: vec![vk::CommandBuffer::from_raw(2), vk::CommandBuffer::from_raw(3)],
            signal_semaphores: vec![vk::Semaphore::from_raw(4)],
        };
        desc.validate().unwrap();
        let info = desc.to_vk();
        assert_eq!(info.wait_semaphore_count, 1);
        assert_eq!(info.command_buffer_count, 2);
        assert_eq!(info.signal_semaphore_count, 1);
    }

    #[test]
    fn submit2_keeps_64_bit_stage_masks() {
        let desc = SubmitDesc2 {
            wait: vec![SemaphoreSubmit {
                semaphore: vk::Semaphore::from_raw(9),
                value: 42,
                stage_mask: vk::PipelineStageFlags2::COPY,
            }],
            command_buffers: vec![vk::CommandBuffer::from_raw(5)],
            signal: vec![SemaphoreSubmit::binary(
                vk::Semaphore::from_raw(10),
                vk::PipelineStageFlags2::ALL_COMMANDS,
            )],
        };
        desc.validate().unwrap();
        let m = MarshalledSubmit2::from(&desc);
        assert_eq!(m.wait[0].value, 42);
        assert_eq!(m.wait[0].stage_mask.as_raw(), 1 << 32);
        assert_eq!(m.command_buffers.len(), 1);
        assert_eq!(m.signal[0].value, 0);
    }

    #[test]
    fn submit2_rejects_null_semaphore() {
        let desc = SubmitDesc2 {
            signal: vec![SemaphoreSubmit::binary(vk::Semaphore::null(), vk::PipelineStageFlags2::NONE)],
            ..Default::default()
        };
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "semaphores");
    }
}
