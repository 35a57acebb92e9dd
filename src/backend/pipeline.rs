// Pipeline layouts, compute pipelines and graphics pipelines
//
// Graphics pipelines target dynamic rendering: attachment formats are given
// through `VkPipelineRenderingCreateInfo` instead of a render pass.
// Viewport and scissor are dynamic state by default.

use super::device::Device;
use super::error::{Result, ValidationError, VkResultExt, VulkanError};
use super::handle::{Owned, Pipeline, PipelineLayout};
use super::marshal;
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

/// Host-side description of `VkPipelineLayoutCreateInfo`
#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutDesc {
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutDesc {
    /// Check against the device's `maxPushConstantsSize`
    pub fn validate(&self, max_push_constants_size: u32) -> Result<()> {
        for &layout in &self.set_layouts {
            marshal::require_handle("set_layouts", layout)?;
        }
        for range in &self.push_constant_ranges {
            if range.size == 0 || range.size % 4 != 0 || range.offset % 4 != 0 {
                return Err(ValidationError::new(
                    "push_constant_ranges",
                    format!(
                        "offset {} and size {} must be multiples of 4 and size non-zero",
                        range.offset, range.size
                    ),
                )
                .into());
            }
            let end = range.offset.saturating_add(range.size);
            if end > max_push_constants_size {
                return Err(ValidationError::new(
                    "push_constant_ranges",
                    format!(
                        "range ends at {} bytes, device limit is {}",
                        end,
                        max_push_constants_size
                    ),
                )
                .into());
            }
            if range.stage_flags.is_empty() {
                return Err(ValidationError::new("push_constant_ranges", "stage_flags must not be empty").into());
            }
        }
        Ok(())
    }
}

pub fn create_pipeline_layout(device: &Arc<Device>, desc: &PipelineLayoutDesc) -> Result<PipelineLayout> {
    desc.validate(device.properties().limits.max_push_constants_size)?;

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&desc.set_layouts)
        .push_constant_ranges(&desc.push_constant_ranges);

    let layout =
        unsafe { device.raw().create_pipeline_layout(&layout_info, None) }.with_op("vkCreatePipelineLayout")?;
    Ok(unsafe { Owned::from_raw(device.clone(), layout) })
}

/// One programmable stage
#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

impl ShaderStage {
    pub fn new(stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> Self {
        Self {
            stage,
            module,
            entry_point: "main".to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        marshal::require_handle("module", self.module)?;
        if self.stage.as_raw().count_ones() != 1 {
            return Err(ValidationError::new(
                "stage",
                format!("{:?} must name exactly one stage", self.stage),
            )
            .into());
        }
        Ok(())
    }
}

/// Entry point names kept alive until the create call returns
fn entry_points(stages: &[ShaderStage]) -> Result<Vec<CString>> {
    stages
        .iter()
        .map(|s| marshal::c_string("entry_point", &s.entry_point))
        .collect()
}

fn stage_infos<'a>(stages: &[ShaderStage], names: &'a [CString]) -> Vec<vk::PipelineShaderStageCreateInfo<'a>> {
    stages
        .iter()
        .zip(names)
        .map(|(s, name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(s.stage)
                .module(s.module)
                .name(name)
        })
        .collect()
}

/// Host-side description of `VkComputePipelineCreateInfo`
#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub layout: vk::PipelineLayout,
    pub stage: ShaderStage,
}

impl ComputePipelineDesc {
    pub fn validate(&self) -> Result<()> {
        marshal::require_handle("layout", self.layout)?;
        self.stage.validate()?;
        if self.stage.stage != vk::ShaderStageFlags::COMPUTE {
            return Err(ValidationError::new("stage", "compute pipelines need a COMPUTE stage").into());
        }
        Ok(())
    }
}

pub fn create_compute_pipeline(device: &Arc<Device>, desc: &ComputePipelineDesc) -> Result<Pipeline> {
    desc.validate()?;

    let names = entry_points(std::slice::from_ref(&desc.stage))?;
    let stages = stage_infos(std::slice::from_ref(&desc.stage), &names);
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stages[0])
        .layout(desc.layout);

    let pipelines = unsafe {
        device
            .raw()
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };
    take_single(device, pipelines, "vkCreateComputePipelines")
}

/// Host-side description of a graphics pipeline for dynamic rendering
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub layout: vk::PipelineLayout,
    pub stages: Vec<ShaderStage>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    /// `None` disables depth testing
    pub depth_compare_op: Option<vk::CompareOp>,
    pub depth_write: bool,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: vk::Format,
    /// Standard alpha blending on every color attachment
    pub alpha_blend: bool,
    pub dynamic_states: Vec<vk::DynamicState>,
}

impl GraphicsPipelineDesc {
    pub fn new(layout: vk::PipelineLayout, stages: Vec<ShaderStage>, color_formats: Vec<vk::Format>) -> Self {
        Self {
            layout,
            stages,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_compare_op: None,
            depth_write: false,
            color_formats,
            depth_format: vk::Format::UNDEFINED,
            alpha_blend: false,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }

    /// Closer fragments win; depth is written
    pub fn with_depth(mut self, format: vk::Format) -> Self {
        self.depth_format = format;
        self.depth_compare_op = Some(vk::CompareOp::LESS);
        self.depth_write = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        marshal::require_handle("layout", self.layout)?;
        marshal::require_non_empty("stages", &self.stages)?;
        for stage in &self.stages {
            stage.validate()?;
        }
        if !self.stages.iter().any(|s| s.stage == vk::ShaderStageFlags::VERTEX) {
            return Err(ValidationError::new("stages", "a VERTEX stage is required").into());
        }
        for attribute in &self.vertex_attributes {
            if !self.vertex_bindings.iter().any(|b| b.binding == attribute.binding) {
                return Err(ValidationError::new(
                    "vertex_attributes",
                    format!(
                        "location {} refers to missing binding {}",
                        attribute.location, attribute.binding
                    ),
                )
                .into());
            }
        }
        if self.color_formats.contains(&vk::Format::UNDEFINED) {
            return Err(ValidationError::new("color_formats", "must not contain UNDEFINED").into());
        }
        if self.depth_compare_op.is_some() && self.depth_format == vk::Format::UNDEFINED {
            return Err(ValidationError::new("depth_format", "depth testing needs a depth format").into());
        }
        // The viewport state carries counts only
        for state in [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR] {
            if !self.dynamic_states.contains(&state) {
                return Err(ValidationError::new("dynamic_states", format!("{:?} must be dynamic", state)).into());
            }
        }
        Ok(())
    }

    fn blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
        if !self.alpha_blend {
            return state.blend_enable(false);
        }
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }
}

pub fn create_graphics_pipeline(device: &Arc<Device>, desc: &GraphicsPipelineDesc) -> Result<Pipeline> {
    desc.validate()?;

    let names = entry_points(&desc.stages)?;
    let shader_stages = stage_infos(&desc.stages, &names);

    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&desc.vertex_bindings)
        .vertex_attribute_descriptions(&desc.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(desc.topology)
        .primitive_restart_enable(false);

    // Counts only; the values are set while recording
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(desc.polygon_mode)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        .front_face(desc.front_face)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(desc.samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth_compare_op.is_some())
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(desc.depth_compare_op.unwrap_or(vk::CompareOp::ALWAYS))
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = vec![desc.blend_attachment(); desc.color_formats.len()];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&desc.dynamic_states);

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&desc.color_formats)
        .depth_attachment_format(desc.depth_format);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device
            .raw()
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };
    take_single(device, pipelines, "vkCreateGraphicsPipelines")
}

/// Wrap the one pipeline of a batch create, destroying anything created before a failure
fn take_single(
    device: &Arc<Device>,
    created: std::result::Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
    operation: &'static str,
) -> Result<Pipeline> {
    let pipelines = match created {
        Ok(pipelines) => pipelines,
        Err((partial, result)) => {
            for pipeline in partial {
                // Null handles are skipped on drop
                drop(unsafe { Owned::from_raw(device.clone(), pipeline) });
            }
            return Err(VulkanError::new(result, operation).into());
        }
    };

    pipelines
        .into_iter()
        .next()
        .map(|pipeline| unsafe { Owned::from_raw(device.clone(), pipeline) })
        .ok_or_else(|| {
            VulkanError::new(vk::Result::ERROR_UNKNOWN, operation)
                .with_detail("driver returned no pipeline")
                .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn module() -> vk::ShaderModule {
        vk::ShaderModule::from_raw(0x10)
    }

    fn layout() -> vk::PipelineLayout {
        vk::PipelineLayout::from_raw(0x20)
    }

    #[test]
    fn push_constants_respect_limit() {
        let desc = PipelineLayoutDesc {
            set_layouts: Vec::new(),
            push_constant_ranges: vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: 128,
            }],
        };
        assert!(desc.validate(128).is_ok());
        let err = desc.validate(64).unwrap_err();
        assert!(err.to_string().contains("device limit is 64"));
    }

    #[test]
    fn push_constants_must_be_aligned() {
        let desc = PipelineLayoutDesc {
            set_layouts: Vec::new(),
            push_constant_ranges: vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 2,
                size: 6,
            }],
        };
        assert_eq!(
            desc.validate(256).unwrap_err().validation().unwrap().parameter,
            "push_constant_ranges"
        );
    }

    #[test]
    fn compute_needs_compute_stage() {
        let desc = ComputePipelineDesc {
            layout: layout(),
            stage: ShaderStage::new(vk::ShaderStageFlags::FRAGMENT, module()),
        };
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "stage");

        let desc = ComputePipelineDesc {
            layout: layout(),
            stage: ShaderStage::new(vk::ShaderStageFlags::COMPUTE, module()),
        };
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn compute_rejects_null_layout() {
        let desc = ComputePipelineDesc {
            layout: vk::PipelineLayout::null(),
            stage: ShaderStage::new(vk::ShaderStageFlags::COMPUTE, module()),
        };
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "layout");
    }

    #[test]
    fn graphics_needs_vertex_stage_and_bound_attributes() {
        let fragment_only = GraphicsPipelineDesc::new(
            layout(),
            vec![ShaderStage::new(vk::ShaderStageFlags::FRAGMENT, module())],
            vec![vk::Format::B8G8R8A8_SRGB],
        );
        assert_eq!(fragment_only.validate().unwrap_err().validation().unwrap().parameter, "stages");

        let mut desc = GraphicsPipelineDesc::new(
            layout(),
            vec![
                ShaderStage::new(vk::ShaderStageFlags::VERTEX, module()),
                ShaderStage::new(vk::ShaderStageFlags::FRAGMENT, module()),
            ],
            vec![vk::Format::B8G8R8A8_SRGB],
        );
        desc.vertex_attributes.push(vk::VertexInputAttributeDescription {
            location: 0,
            binding: 1,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        });
        assert_eq!(
            desc.validate().unwrap_err().validation().unwrap().parameter,
            "vertex_attributes"
        );

        desc.vertex_bindings.push(vk::VertexInputBindingDescription {
            binding: 1,
            stride: 12,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn depth_test_needs_format() {
        let mut desc = GraphicsPipelineDesc::new(
            layout(),
            vec![ShaderStage::new(vk::ShaderStageFlags::VERTEX, module())],
            Vec::new(),
        )
        .with_depth(vk::Format::D32_SFLOAT);
        assert!(desc.validate().is_ok());
        desc.depth_format = vk::Format::UNDEFINED;
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "depth_format");
    }

    #[test]
    fn viewport_and_scissor_stay_dynamic() {
        let mut desc = GraphicsPipelineDesc::new(
            layout(),
            vec![ShaderStage::new(vk::ShaderStageFlags::VERTEX, module())],
            vec![vk::Format::B8G8R8A8_SRGB],
        );
        desc.dynamic_states.push(vk::DynamicState::LINE_WIDTH);
        assert!(desc.validate().is_ok());

        desc.dynamic_states.retain(|&s| s != vk::DynamicState::SCISSOR);
        let err = desc.validate().unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "dynamic_states");

        desc.dynamic_states.clear();
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "dynamic_states");
    }

    #[test]
    fn stage_must_be_single_bit() {
        let stage = ShaderStage::new(
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            module(),
        );
        assert!(stage.validate().is_err());
    }

    #[test]
    fn entry_point_names_marshal() {
        let mut stage = ShaderStage::new(vk::ShaderStageFlags::COMPUTE, module());
        stage.entry_point = "cs_main".to_string();
        let names = entry_points(std::slice::from_ref(&stage)).unwrap();
        let infos = stage_infos(std::slice::from_ref(&stage), &names);
        let name = unsafe { std::ffi::CStr::from_ptr(infos[0].p_name) };
        assert_eq!(name.to_str().unwrap(), "cs_main");

        stage.entry_point = "bad\0name".to_string();
        assert!(entry_points(&[stage]).is_err());
    }
}
