// Descriptor set layouts, pools, sets and writes

use super::device::Device;
use super::error::{Result, ValidationError, VkResultExt};
use super::handle::{DescriptorPool, DescriptorSetLayout, Owned};
use super::marshal;
use ash::vk;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            stages,
        }
    }
}

/// Host-side description of `VkDescriptorSetLayoutCreateInfo`
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutDesc {
    pub flags: vk::DescriptorSetLayoutCreateFlags,
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDesc {
    pub fn validate(&self) -> Result<()> {
        for (i, b) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|other| other.binding == b.binding) {
                return Err(ValidationError::new("bindings", format!("binding {} is declared twice", b.binding)).into());
            }
            if b.count > 0 && b.stages.is_empty() {
                return Err(ValidationError::new(
                    "stages",
                    format!("binding {} is not visible to any stage", b.binding),
                )
                .into());
            }
        }
        Ok(())
    }
}

pub fn create_descriptor_set_layout(
    device: &Arc<Device>,
    desc: &DescriptorSetLayoutDesc,
) -> Result<DescriptorSetLayout> {
    desc.validate()?;

    let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
        .bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(b.descriptor_type)
                .descriptor_count(b.count)
                .stage_flags(b.stages)
        })
        .collect();
    let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(desc.flags)
        .bindings(&bindings);

    let layout = unsafe { device.raw().create_descriptor_set_layout(&layout_info, None) }
        .with_op("vkCreateDescriptorSetLayout")?;
    Ok(unsafe { Owned::from_raw(device.clone(), layout) })
}

/// Host-side description of `VkDescriptorPoolCreateInfo`
#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolDesc {
    pub flags: vk::DescriptorPoolCreateFlags,
    pub max_sets: u32,
    pub pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl DescriptorPoolDesc {
    /// `FREE_DESCRIPTOR_SET` is required for `free_descriptor_sets`
    pub fn freeable(mut self) -> Self {
        self.flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sets == 0 {
            return Err(ValidationError::new("max_sets", "must be greater than zero").into());
        }
        marshal::require_non_empty("pool_sizes", &self.pool_sizes)?;
        if let Some(size) = self.pool_sizes.iter().find(|s| s.descriptor_count == 0) {
            return Err(ValidationError::new(
                "pool_sizes",
                format!("{:?} has a zero descriptor count", size.ty),
            )
            .into());
        }
        Ok(())
    }
}

pub fn create_descriptor_pool(device: &Arc<Device>, desc: &DescriptorPoolDesc) -> Result<DescriptorPool> {
    desc.validate()?;

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(desc.flags)
        .max_sets(desc.max_sets)
        .pool_sizes(&desc.pool_sizes);

    let pool =
        unsafe { device.raw().create_descriptor_pool(&pool_info, None) }.with_op("vkCreateDescriptorPool")?;
    Ok(unsafe { Owned::from_raw(device.clone(), pool) })
}

/// One set per layout; sets are released with the pool
pub fn allocate_descriptor_sets(
    pool: &DescriptorPool,
    layouts: &[vk::DescriptorSetLayout],
) -> Result<Vec<vk::DescriptorSet>> {
    marshal::require_non_empty("layouts", layouts)?;
    for &layout in layouts {
        marshal::require_handle("layouts", layout)?;
    }

    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool.handle())
        .set_layouts(layouts);

    unsafe { pool.device().raw().allocate_descriptor_sets(&alloc_info) }.with_op("vkAllocateDescriptorSets")
}

pub fn free_descriptor_sets(pool: &DescriptorPool, sets: &[vk::DescriptorSet]) -> Result<()> {
    if sets.is_empty() {
        return Ok(());
    }
    unsafe { pool.device().raw().free_descriptor_sets(pool.handle(), sets) }.with_op("vkFreeDescriptorSets")
}

pub fn reset_descriptor_pool(pool: &DescriptorPool) -> Result<()> {
    unsafe {
        pool.device()
            .raw()
            .reset_descriptor_pool(pool.handle(), vk::DescriptorPoolResetFlags::empty())
    }
    .with_op("vkResetDescriptorPool")
}

/// Resources written into one binding
#[derive(Debug, Clone)]
pub enum DescriptorResources {
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Images(Vec<vk::DescriptorImageInfo>),
}

impl DescriptorResources {
    fn len(&self) -> usize {
        match self {
            Self::Buffers(infos) => infos.len(),
            Self::Images(infos) => infos.len(),
        }
    }
}

/// Host-side description of one `VkWriteDescriptorSet`
#[derive(Debug, Clone)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resources: DescriptorResources,
}

impl DescriptorWrite {
    /// Whole-buffer uniform or storage buffer write
    pub fn buffer(set: vk::DescriptorSet, binding: u32, descriptor_type: vk::DescriptorType, buffer: vk::Buffer) -> Self {
        Self {
            set,
            binding,
            array_element: 0,
            descriptor_type,
            resources: DescriptorResources::Buffers(vec![vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range: marshal::WHOLE_SIZE,
            }]),
        }
    }

    pub fn image(
        set: vk::DescriptorSet,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        image_view: vk::ImageView,
        image_layout: vk::ImageLayout,
        sampler: vk::Sampler,
    ) -> Self {
        Self {
            set,
            binding,
            array_element: 0,
            descriptor_type,
            resources: DescriptorResources::Images(vec![vk::DescriptorImageInfo {
                sampler,
                image_view,
                image_layout,
            }]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        marshal::require_handle("set", self.set)?;
        if self.resources.len() == 0 {
            return Err(ValidationError::new("resources", "at least one descriptor is required").into());
        }

        use vk::DescriptorType as T;
        let buffer_type = matches!(
            self.descriptor_type,
            T::UNIFORM_BUFFER | T::STORAGE_BUFFER | T::UNIFORM_BUFFER_DYNAMIC | T::STORAGE_BUFFER_DYNAMIC
        );
        let image_type = matches!(
            self.descriptor_type,
            T::SAMPLER | T::COMBINED_IMAGE_SAMPLER | T::SAMPLED_IMAGE | T::STORAGE_IMAGE | T::INPUT_ATTACHMENT
        );
        match &self.resources {
            DescriptorResources::Buffers(infos) => {
                if !buffer_type {
                    return Err(self.type_mismatch("buffer"));
                }
                for info in infos {
                    marshal::require_handle("buffer", info.buffer)?;
                }
            }
            DescriptorResources::Images(infos) => {
                if !image_type {
                    return Err(self.type_mismatch("image"));
                }
                for info in infos {
                    if self.descriptor_type != T::SAMPLER {
                        marshal::require_handle("image_view", info.image_view)?;
                    }
                    if matches!(self.descriptor_type, T::SAMPLER | T::COMBINED_IMAGE_SAMPLER) {
                        marshal::require_handle("sampler", info.sampler)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn type_mismatch(&self, kind: &str) -> super::error::Error {
        ValidationError::new(
            "descriptor_type",
            format!("{:?} cannot be written with {} descriptors", self.descriptor_type, kind),
        )
        .into()
    }

    fn to_vk(&self) -> vk::WriteDescriptorSet<'_> {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(self.binding)
            .dst_array_element(self.array_element)
            .descriptor_type(self.descriptor_type);
        match &self.resources {
            DescriptorResources::Buffers(infos) => write.buffer_info(infos),
            DescriptorResources::Images(infos) => write.image_info(infos),
        }
    }
}

pub fn update_descriptor_sets(device: &Device, writes: &[DescriptorWrite], copies: &[vk::CopyDescriptorSet<'_>]) -> Result<()> {
    for write in writes {
        write.validate()?;
    }
    let raw: Vec<vk::WriteDescriptorSet> = writes.iter().map(DescriptorWrite::to_vk).collect();
    unsafe { device.raw().update_descriptor_sets(&raw, copies) };
    Ok(())
}
