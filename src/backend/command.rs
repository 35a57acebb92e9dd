// Command pools, command buffers and recording
//
// Recording is fire-and-forget: `cmd_*` calls write into the command buffer
// and return nothing. Errors show up at `finish()` or at submission.

use super::device::Device;
use super::error::{Result, ValidationError, VkResultExt};
use super::handle::{CommandPool, Owned};
use super::marshal;
use ash::vk;
use std::sync::Arc;

pub fn create_command_pool(
    device: &Arc<Device>,
    queue_family_index: u32,
    flags: vk::CommandPoolCreateFlags,
) -> Result<CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(flags);

    let pool = unsafe { device.raw().create_command_pool(&pool_info, None) }.with_op("vkCreateCommandPool")?;
    Ok(unsafe { Owned::from_raw(device.clone(), pool) })
}

/// Command buffers are freed together with their pool; `free_command_buffers` releases them early.
pub fn allocate_command_buffers(
    pool: &CommandPool,
    level: vk::CommandBufferLevel,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    if count == 0 {
        return Err(ValidationError::new("command_buffer_count", "must be greater than zero").into());
    }

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool.handle())
        .level(level)
        .command_buffer_count(count);

    unsafe { pool.device().raw().allocate_command_buffers(&alloc_info) }.with_op("vkAllocateCommandBuffers")
}

pub fn free_command_buffers(pool: &CommandPool, command_buffers: &[vk::CommandBuffer]) {
    if command_buffers.is_empty() {
        return;
    }
    unsafe {
        pool.device()
            .raw()
            .free_command_buffers(pool.handle(), command_buffers)
    };
}

pub fn reset_command_pool(pool: &CommandPool, flags: vk::CommandPoolResetFlags) -> Result<()> {
    unsafe { pool.device().raw().reset_command_pool(pool.handle(), flags) }.with_op("vkResetCommandPool")
}

pub fn reset_command_buffer(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    flags: vk::CommandBufferResetFlags,
) -> Result<()> {
    marshal::require_handle("command_buffer", command_buffer)?;
    unsafe { device.raw().reset_command_buffer(command_buffer, flags) }.with_op("vkResetCommandBuffer")
}

/// A command buffer between `vkBeginCommandBuffer` and `vkEndCommandBuffer`
pub struct Recording<'a> {
    pub(crate) device: &'a ash::Device,
    pub(crate) raw: vk::CommandBuffer,
    finished: bool,
}

impl<'a> Recording<'a> {
    pub fn begin(
        device: &'a Device,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> Result<Self> {
        marshal::require_handle("command_buffer", command_buffer)?;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(usage);
        unsafe { device.raw().begin_command_buffer(command_buffer, &begin_info) }
            .with_op("vkBeginCommandBuffer")?;

        Ok(Self {
            device: device.raw(),
            raw: command_buffer,
            finished: false,
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// End recording; the buffer is then ready for submission
    pub fn finish(mut self) -> Result<vk::CommandBuffer> {
        self.finished = true;
        unsafe { self.device.end_command_buffer(self.raw) }.with_op("vkEndCommandBuffer")?;
        Ok(self.raw)
    }

    pub fn cmd_fill_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        unsafe { self.device.cmd_fill_buffer(self.raw, buffer, offset, size, data) };
    }

    /// `data` must be a multiple of 4 bytes and at most 65536 bytes
    pub fn cmd_update_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        debug_assert!(data.len() % 4 == 0 && data.len() <= 65536);
        unsafe { self.device.cmd_update_buffer(self.raw, buffer, offset, data) };
    }

    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(self.raw, src, dst, regions) };
    }

    pub fn cmd_copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(self.raw, src, dst, dst_layout, regions)
        };
    }

    pub fn cmd_copy_image_to_buffer(
        &self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(self.raw, src, src_layout, dst, regions)
        };
    }

    /// Legacy (pre-synchronization2) barrier
    pub fn cmd_pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.raw,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                memory_barriers,
                buffer_barriers,
                image_barriers,
            )
        };
    }

    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(self.raw, bind_point, pipeline) };
    }

    pub fn cmd_bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.raw,
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            )
        };
    }

    pub fn cmd_push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        values: &[T],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(self.raw, layout, stages, offset, marshal::bytes_of(values))
        };
    }

    pub fn cmd_dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(self.raw, x, y, z) };
    }

    pub fn cmd_draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(self.raw, vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    pub fn cmd_draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    pub fn cmd_bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        debug_assert_eq!(buffers.len(), offsets.len());
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.raw, first_binding, buffers, offsets)
        };
    }

    pub fn cmd_bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.raw, buffer, offset, index_type)
        };
    }

    pub fn cmd_set_viewport(&self, first: u32, viewports: &[vk::Viewport]) {
        unsafe { self.device.cmd_set_viewport(self.raw, first, viewports) };
    }

    pub fn cmd_set_scissor(&self, first: u32, scissors: &[vk::Rect2D]) {
        unsafe { self.device.cmd_set_scissor(self.raw, first, scissors) };
    }
}

impl Drop for Recording<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(
                "Command buffer {:?} dropped while still recording",
                self.raw
            );
        }
    }
}
