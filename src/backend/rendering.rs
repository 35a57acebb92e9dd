// Dynamic rendering and synchronization2 helpers
//
// Rendering without render pass or framebuffer objects: attachments are
// named directly when recording begins. Barriers use the 64-bit stage and
// access masks of synchronization2.

use super::command::Recording;
use super::error::{Result, ValidationError};
use super::marshal;
use ash::vk;

/// One attachment of a dynamic rendering pass
#[derive(Clone, Copy)]
pub struct RenderingAttachment {
    pub image_view: vk::ImageView,
    pub image_layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: vk::ClearValue,
}

impl RenderingAttachment {
    /// Cleared to `color` on load, stored at the end
    pub fn color(image_view: vk::ImageView, color: [f32; 4]) -> Self {
        Self {
            image_view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        }
    }

    /// Cleared to `depth`, contents discarded afterwards
    pub fn depth(image_view: vk::ImageView, depth: f32) -> Self {
        Self {
            image_view,
            image_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        }
    }

    fn to_vk(self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.image_layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(self.clear_value)
    }
}

/// Host-side description of `VkRenderingInfo`
#[derive(Clone, Default)]
pub struct RenderingDesc {
    pub render_area: vk::Rect2D,
    pub layer_count: u32,
    pub color_attachments: Vec<RenderingAttachment>,
    pub depth_attachment: Option<RenderingAttachment>,
    pub stencil_attachment: Option<RenderingAttachment>,
}

impl RenderingDesc {
    /// Full-extent, single-layer pass over the given color attachments
    pub fn new(extent: vk::Extent2D, color_attachments: Vec<RenderingAttachment>) -> Self {
        Self {
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            layer_count: 1,
            color_attachments,
            depth_attachment: None,
            stencil_attachment: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let extent = self.render_area.extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(ValidationError::new(
                "render_area",
                format!("{}x{} has a zero dimension", extent.width, extent.height),
            )
            .into());
        }
        if self.layer_count == 0 {
            return Err(ValidationError::new("layer_count", "must be at least 1").into());
        }
        if self.color_attachments.is_empty()
            && self.depth_attachment.is_none()
            && self.stencil_attachment.is_none()
        {
            return Err(ValidationError::new("attachments", "at least one attachment is required").into());
        }
        for attachment in self
            .color_attachments
            .iter()
            .chain(self.depth_attachment.iter())
            .chain(self.stencil_attachment.iter())
        {
            marshal::require_handle("image_view", attachment.image_view)?;
        }
        Ok(())
    }
}

/// Global memory dependency
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBarrier {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl MemoryBarrier {
    fn to_vk(self) -> vk::MemoryBarrier2<'static> {
        vk::MemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl BufferBarrier {
    /// Whole-buffer barrier without an ownership transfer
    pub fn whole(
        buffer: vk::Buffer,
        src: (vk::PipelineStageFlags2, vk::AccessFlags2),
        dst: (vk::PipelineStageFlags2, vk::AccessFlags2),
    ) -> Self {
        Self {
            buffer,
            offset: 0,
            size: marshal::WHOLE_SIZE,
            src_stage: src.0,
            src_access: src.1,
            dst_stage: dst.0,
            dst_access: dst.1,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    pub fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(self.src_queue_family)
            .dst_queue_family_index(self.dst_queue_family)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl ImageBarrier {
    /// Layout transition over the first color mip and layer.
    ///
    /// Stages and access masks are derived from the two layouts.
    pub fn transition(image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        let (src_stage, src_access) = layout_scope(old_layout);
        let (dst_stage, dst_access) = layout_scope(new_layout);
        Self {
            image,
            old_layout,
            new_layout,
            src_stage,
            src_access,
            dst_stage,
            dst_access,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
            subresource_range: color_subresource_range(),
        }
    }

    pub fn with_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.subresource_range = range;
        self
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .image(self.image)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(self.src_queue_family)
            .dst_queue_family_index(self.dst_queue_family)
            .subresource_range(self.subresource_range)
    }
}

/// Stage and access scope in which an image is used in `layout`
fn layout_scope(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    use vk::{AccessFlags2 as A, ImageLayout as L, PipelineStageFlags2 as S};
    match layout {
        L::UNDEFINED => (S::TOP_OF_PIPE, A::NONE),
        L::COLOR_ATTACHMENT_OPTIMAL => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        L::DEPTH_ATTACHMENT_OPTIMAL | L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        L::TRANSFER_SRC_OPTIMAL => (S::ALL_TRANSFER, A::TRANSFER_READ),
        L::TRANSFER_DST_OPTIMAL => (S::ALL_TRANSFER, A::TRANSFER_WRITE),
        L::SHADER_READ_ONLY_OPTIMAL => (S::FRAGMENT_SHADER | S::COMPUTE_SHADER, A::SHADER_SAMPLED_READ),
        L::VIDEO_DECODE_DST_KHR => (S::VIDEO_DECODE_KHR, A::VIDEO_DECODE_WRITE_KHR),
        L::VIDEO_DECODE_DPB_KHR => (
            S::VIDEO_DECODE_KHR,
            A::VIDEO_DECODE_READ_KHR | A::VIDEO_DECODE_WRITE_KHR,
        ),
        L::VIDEO_ENCODE_SRC_KHR => (S::VIDEO_ENCODE_KHR, A::VIDEO_ENCODE_READ_KHR),
        L::PRESENT_SRC_KHR => (S::BOTTOM_OF_PIPE, A::NONE),
        _ => (S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
    }
}

/// First mip level and array layer of a color image
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Host-side description of `VkDependencyInfo`
#[derive(Debug, Clone, Default)]
pub struct DependencyDesc {
    pub flags: vk::DependencyFlags,
    pub memory_barriers: Vec<MemoryBarrier>,
    pub buffer_barriers: Vec<BufferBarrier>,
    pub image_barriers: Vec<ImageBarrier>,
}

impl DependencyDesc {
    pub fn image(barrier: ImageBarrier) -> Self {
        Self {
            image_barriers: vec![barrier],
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for b in &self.buffer_barriers {
            marshal::require_handle("buffer", b.buffer)?;
            if b.size == 0 {
                return Err(ValidationError::new("size", "buffer barrier size must be non-zero").into());
            }
        }
        for b in &self.image_barriers {
            marshal::require_handle("image", b.image)?;
            if b.new_layout == vk::ImageLayout::UNDEFINED {
                return Err(ValidationError::new("new_layout", "cannot transition to UNDEFINED").into());
            }
        }
        Ok(())
    }
}

impl Recording<'_> {
    /// Begin a dynamic rendering pass; the description is checked before recording
    pub fn cmd_begin_rendering(&self, desc: &RenderingDesc) -> Result<()> {
        desc.validate()?;

        let colors: Vec<vk::RenderingAttachmentInfo> =
            desc.color_attachments.iter().map(|a| a.to_vk()).collect();
        let depth = desc.depth_attachment.map(RenderingAttachment::to_vk);
        let stencil = desc.stencil_attachment.map(RenderingAttachment::to_vk);

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(desc.render_area)
            .layer_count(desc.layer_count)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        if let Some(stencil) = stencil.as_ref() {
            rendering_info = rendering_info.stencil_attachment(stencil);
        }

        unsafe { self.device.cmd_begin_rendering(self.raw, &rendering_info) };
        Ok(())
    }

    pub fn cmd_end_rendering(&self) {
        unsafe { self.device.cmd_end_rendering(self.raw) };
    }

    pub fn cmd_pipeline_barrier2(&self, desc: &DependencyDesc) -> Result<()> {
        desc.validate()?;

        let memory: Vec<vk::MemoryBarrier2> = desc.memory_barriers.iter().map(|b| b.to_vk()).collect();
        let buffers: Vec<vk::BufferMemoryBarrier2> = desc.buffer_barriers.iter().map(BufferBarrier::to_vk).collect();
        let images: Vec<vk::ImageMemoryBarrier2> = desc.image_barriers.iter().map(ImageBarrier::to_vk).collect();

        let dependency_info = vk::DependencyInfo::default()
            .dependency_flags(desc.flags)
            .memory_barriers(&memory)
            .buffer_memory_barriers(&buffers)
            .image_memory_barriers(&images);

        unsafe { self.device.cmd_pipeline_barrier2(self.raw, &dependency_info) };
        Ok(())
    }
}
