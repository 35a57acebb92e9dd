// Images, image views and samplers

use super::device::Device;
use super::error::{Result, ValidationError, VkResultExt};
use super::handle::{Image, ImageView, Owned, Sampler};
use super::marshal;
use ash::vk;
use std::sync::Arc;

/// Host-side description of `VkImageCreateInfo`
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
    pub initial_layout: vk::ImageLayout,
}

impl ImageDesc {
    /// Single-sample, single-mip 2D image in optimal tiling
    pub fn new_2d(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            flags: vk::ImageCreateFlags::empty(),
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let e = self.extent;
        if e.width == 0 || e.height == 0 || e.depth == 0 {
            return Err(ValidationError::new(
                "extent",
                format!("{}x{}x{} has a zero dimension", e.width, e.height, e.depth),
            )
            .into());
        }
        if self.mip_levels == 0 {
            return Err(ValidationError::new("mip_levels", "must be at least 1").into());
        }
        if self.array_layers == 0 {
            return Err(ValidationError::new("array_layers", "must be at least 1").into());
        }
        if self.format == vk::Format::UNDEFINED {
            return Err(ValidationError::new("format", "must not be UNDEFINED").into());
        }
        if self.usage.is_empty() {
            return Err(ValidationError::new("usage", "at least one usage flag is required").into());
        }
        if !matches!(
            self.initial_layout,
            vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED
        ) {
            return Err(ValidationError::new(
                "initial_layout",
                "must be UNDEFINED or PREINITIALIZED",
            )
            .into());
        }
        Ok(())
    }
}

pub fn create_image(device: &Arc<Device>, desc: &ImageDesc) -> Result<Image> {
    desc.validate()?;

    let image_info = vk::ImageCreateInfo::default()
        .flags(desc.flags)
        .image_type(desc.image_type)
        .format(desc.format)
        .extent(desc.extent)
        .mip_levels(desc.mip_levels)
        .array_layers(desc.array_layers)
        .samples(desc.samples)
        .tiling(desc.tiling)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(desc.initial_layout);

    let image = unsafe { device.raw().create_image(&image_info, None) }.with_op("vkCreateImage")?;
    Ok(unsafe { Owned::from_raw(device.clone(), image) })
}

/// Host-side description of `VkImageViewCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    /// May be an image owned elsewhere (e.g. a swapchain image), hence a raw handle
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub components: vk::ComponentMapping,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl ImageViewDesc {
    pub fn new_2d(image: vk::Image, format: vk::Format, aspect_mask: vk::ImageAspectFlags) -> Self {
        Self {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        marshal::require_handle("image", self.image)?;
        if self.subresource_range.aspect_mask.is_empty() {
            return Err(ValidationError::new("aspect_mask", "must not be empty").into());
        }
        if self.subresource_range.level_count == 0 || self.subresource_range.layer_count == 0 {
            return Err(ValidationError::new(
                "subresource_range",
                "level and layer counts must be non-zero",
            )
            .into());
        }
        Ok(())
    }
}

pub fn create_image_view(device: &Arc<Device>, desc: &ImageViewDesc) -> Result<ImageView> {
    desc.validate()?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(desc.image)
        .view_type(desc.view_type)
        .format(desc.format)
        .components(desc.components)
        .subresource_range(desc.subresource_range);

    let view = unsafe { device.raw().create_image_view(&view_info, None) }.with_op("vkCreateImageView")?;
    Ok(unsafe { Owned::from_raw(device.clone(), view) })
}

/// Host-side description of `VkSamplerCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    /// `None` disables anisotropic filtering
    pub max_anisotropy: Option<f32>,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_anisotropy: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

pub fn create_sampler(device: &Arc<Device>, desc: &SamplerDesc) -> Result<Sampler> {
    if desc.min_lod > desc.max_lod {
        return Err(ValidationError::new("min_lod", "must not exceed max_lod").into());
    }
    if let Some(limit) = desc.max_anisotropy {
        let device_limit = device.properties().limits.max_sampler_anisotropy;
        if !(1.0..=device_limit).contains(&limit) {
            return Err(ValidationError::new(
                "max_anisotropy",
                format!("{} is outside [1, {}]", limit, device_limit),
            )
            .into());
        }
    }

    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(desc.mag_filter)
        .min_filter(desc.min_filter)
        .mipmap_mode(desc.mipmap_mode)
        .address_mode_u(desc.address_mode)
        .address_mode_v(desc.address_mode)
        .address_mode_w(desc.address_mode)
        .anisotropy_enable(desc.max_anisotropy.is_some())
        .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
        .min_lod(desc.min_lod)
        .max_lod(desc.max_lod);

    let sampler = unsafe { device.raw().create_sampler(&sampler_info, None) }.with_op("vkCreateSampler")?;
    Ok(unsafe { Owned::from_raw(device.clone(), sampler) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn image_view_requires_image() {
        let desc = ImageViewDesc::new_2d(vk::Image::null(), vk::Format::R8G8B8A8_UNORM, vk::ImageAspectFlags::COLOR);
        let err = desc.validate().unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "image");
    }

    #[test]
    fn image_view_accepts_valid_desc() {
        let desc = ImageViewDesc::new_2d(
            vk::Image::from_raw(0xdead),
            vk::Format::G8_B8R8_2PLANE_420_UNORM,
            vk::ImageAspectFlags::PLANE_0,
        );
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn image_rejects_zero_extent_and_bad_layout() {
        let extent = vk::Extent2D { width: 0, height: 720 };
        let desc = ImageDesc::new_2d(vk::Format::R8_UNORM, extent, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "extent");

        let mut desc = ImageDesc::new_2d(
            vk::Format::R8_UNORM,
            vk::Extent2D { width: 1280, height: 720 },
            vk::ImageUsageFlags::SAMPLED,
        );
        desc.validate().unwrap();
        desc.initial_layout = vk::ImageLayout::GENERAL;
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "initial_layout");
    }
}
