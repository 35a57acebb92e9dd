// Video coding extensions (VK_KHR_video_queue, decode and encode queues)
//
// These entry points are never linked; they are looked up at runtime through
// vkGetInstanceProcAddr / vkGetDeviceProcAddr and kept in per-object tables:
// - `VideoInstanceFns`: capability queries, each slot loaded on its own
// - `VideoQueue`: session, memory, parameters and coding commands, loaded all
//   or nothing
// A call whose entry point is missing returns VK_ERROR_EXTENSION_NOT_PRESENT
// without reaching the driver. Tables are immutable once loaded and can be
// shared between threads.

use super::device::Device;
use super::error::{check, Result, ValidationError, VulkanError};
use super::instance::Instance;
use super::marshal;
use ash::vk;
use serde::Deserialize;
use std::ffi::CStr;
use std::ptr;
use std::sync::Arc;

pub const DECODE_H264: vk::VideoCodecOperationFlagsKHR = vk::VideoCodecOperationFlagsKHR::from_raw(0x0000_0001);
pub const DECODE_H265: vk::VideoCodecOperationFlagsKHR = vk::VideoCodecOperationFlagsKHR::from_raw(0x0000_0002);
pub const DECODE_AV1: vk::VideoCodecOperationFlagsKHR = vk::VideoCodecOperationFlagsKHR::from_raw(0x0000_0004);
pub const ENCODE_H264: vk::VideoCodecOperationFlagsKHR = vk::VideoCodecOperationFlagsKHR::from_raw(0x0001_0000);
pub const ENCODE_H265: vk::VideoCodecOperationFlagsKHR = vk::VideoCodecOperationFlagsKHR::from_raw(0x0002_0000);

pub const VIDEO_QUEUE_EXTENSION: &str = "VK_KHR_video_queue";
pub const VIDEO_DECODE_QUEUE_EXTENSION: &str = "VK_KHR_video_decode_queue";
pub const VIDEO_ENCODE_QUEUE_EXTENSION: &str = "VK_KHR_video_encode_queue";

// StdVideoH264ProfileIdc / StdVideoH265ProfileIdc values
const H264_PROFILE_IDC_HIGH: u32 = 100;
const H265_PROFILE_IDC_MAIN: u32 = 1;

/// Codecs with a profile structure this module knows how to chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    DecodeH264,
    DecodeH265,
    EncodeH264,
    EncodeH265,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 4] = [
        VideoCodec::DecodeH264,
        VideoCodec::DecodeH265,
        VideoCodec::EncodeH264,
        VideoCodec::EncodeH265,
    ];

    pub fn operation(self) -> vk::VideoCodecOperationFlagsKHR {
        match self {
            Self::DecodeH264 => DECODE_H264,
            Self::DecodeH265 => DECODE_H265,
            Self::EncodeH264 => ENCODE_H264,
            Self::EncodeH265 => ENCODE_H265,
        }
    }

    pub fn is_encode(self) -> bool {
        matches!(self, Self::EncodeH264 | Self::EncodeH265)
    }

    /// Queue capability needed to run this codec
    pub fn queue_flags(self) -> vk::QueueFlags {
        if self.is_encode() {
            vk::QueueFlags::VIDEO_ENCODE_KHR
        } else {
            vk::QueueFlags::VIDEO_DECODE_KHR
        }
    }

    /// Device extensions to enable for this codec
    pub fn extensions(self) -> [&'static str; 3] {
        let (queue, codec) = match self {
            Self::DecodeH264 => (VIDEO_DECODE_QUEUE_EXTENSION, "VK_KHR_video_decode_h264"),
            Self::DecodeH265 => (VIDEO_DECODE_QUEUE_EXTENSION, "VK_KHR_video_decode_h265"),
            Self::EncodeH264 => (VIDEO_ENCODE_QUEUE_EXTENSION, "VK_KHR_video_encode_h264"),
            Self::EncodeH265 => (VIDEO_ENCODE_QUEUE_EXTENSION, "VK_KHR_video_encode_h265"),
        };
        [VIDEO_QUEUE_EXTENSION, queue, codec]
    }

    /// Name and version of the codec's Video Std header
    pub fn std_header(self) -> (&'static str, u32) {
        let name = match self {
            Self::DecodeH264 => "VK_STD_vulkan_video_codec_h264_decode",
            Self::DecodeH265 => "VK_STD_vulkan_video_codec_h265_decode",
            Self::EncodeH264 => "VK_STD_vulkan_video_codec_h264_encode",
            Self::EncodeH265 => "VK_STD_vulkan_video_codec_h265_encode",
        };
        (name, vk::make_api_version(0, 1, 0, 0))
    }

    fn std_header_properties(self) -> Result<vk::ExtensionProperties> {
        let (name, spec_version) = self.std_header();
        let mut properties = vk::ExtensionProperties {
            spec_version,
            ..Default::default()
        };
        marshal::name_to_chars("std_header_version", name, &mut properties.extension_name)?;
        Ok(properties)
    }
}

/// Host-side description of `VkVideoProfileInfoKHR` and its codec profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProfile {
    pub codec: VideoCodec,
    pub chroma_subsampling: vk::VideoChromaSubsamplingFlagsKHR,
    pub luma_bit_depth: vk::VideoComponentBitDepthFlagsKHR,
    pub chroma_bit_depth: vk::VideoComponentBitDepthFlagsKHR,
    /// `StdVideoH264ProfileIdc` or `StdVideoH265ProfileIdc`
    pub std_profile_idc: u32,
}

impl VideoProfile {
    /// 8-bit 4:2:0 in H.264 High or H.265 Main
    pub fn main_8bit(codec: VideoCodec) -> Self {
        let std_profile_idc = match codec {
            VideoCodec::DecodeH264 | VideoCodec::EncodeH264 => H264_PROFILE_IDC_HIGH,
            VideoCodec::DecodeH265 | VideoCodec::EncodeH265 => H265_PROFILE_IDC_MAIN,
        };
        Self {
            codec,
            chroma_subsampling: vk::VideoChromaSubsamplingFlagsKHR::TYPE_420,
            luma_bit_depth: vk::VideoComponentBitDepthFlagsKHR::TYPE_8,
            chroma_bit_depth: vk::VideoComponentBitDepthFlagsKHR::TYPE_8,
            std_profile_idc,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chroma_subsampling.as_raw().count_ones() != 1 {
            return Err(ValidationError::new("chroma_subsampling", "exactly one subsampling bit is required").into());
        }
        if self.luma_bit_depth.as_raw().count_ones() != 1 {
            return Err(ValidationError::new("luma_bit_depth", "exactly one bit depth is required").into());
        }
        let monochrome = self.chroma_subsampling == vk::VideoChromaSubsamplingFlagsKHR::MONOCHROME;
        if !monochrome && self.chroma_bit_depth.as_raw().count_ones() != 1 {
            return Err(ValidationError::new("chroma_bit_depth", "exactly one bit depth is required").into());
        }
        Ok(())
    }

    pub(crate) fn codec_info(&self) -> CodecProfileInfo {
        let idc = self.std_profile_idc;
        match self.codec {
            VideoCodec::DecodeH264 => {
                let mut info = vk::VideoDecodeH264ProfileInfoKHR::default();
                info.std_profile_idc = idc;
                CodecProfileInfo::DecodeH264(info)
            }
            VideoCodec::DecodeH265 => {
                let mut info = vk::VideoDecodeH265ProfileInfoKHR::default();
                info.std_profile_idc = idc;
                CodecProfileInfo::DecodeH265(info)
            }
            VideoCodec::EncodeH264 => {
                let mut info = vk::VideoEncodeH264ProfileInfoKHR::default();
                info.std_profile_idc = idc;
                CodecProfileInfo::EncodeH264(info)
            }
            VideoCodec::EncodeH265 => {
                let mut info = vk::VideoEncodeH265ProfileInfoKHR::default();
                info.std_profile_idc = idc;
                CodecProfileInfo::EncodeH265(info)
            }
        }
    }

    /// The profile info chained to `codec`, which must come from `codec_info`
    pub(crate) fn to_vk<'a>(&self, codec: &'a mut CodecProfileInfo) -> vk::VideoProfileInfoKHR<'a> {
        let info = vk::VideoProfileInfoKHR::default()
            .video_codec_operation(self.codec.operation())
            .chroma_subsampling(self.chroma_subsampling)
            .luma_bit_depth(self.luma_bit_depth)
            .chroma_bit_depth(self.chroma_bit_depth);
        match codec {
            CodecProfileInfo::DecodeH264(next) => info.push_next(next),
            CodecProfileInfo::DecodeH265(next) => info.push_next(next),
            CodecProfileInfo::EncodeH264(next) => info.push_next(next),
            CodecProfileInfo::EncodeH265(next) => info.push_next(next),
        }
    }
}

/// Codec-specific structure chained behind `VkVideoProfileInfoKHR`
pub(crate) enum CodecProfileInfo {
    DecodeH264(vk::VideoDecodeH264ProfileInfoKHR<'static>),
    DecodeH265(vk::VideoDecodeH265ProfileInfoKHR<'static>),
    EncodeH264(vk::VideoEncodeH264ProfileInfoKHR<'static>),
    EncodeH265(vk::VideoEncodeH265ProfileInfoKHR<'static>),
}

/// Host copy of `VkVideoCapabilitiesKHR` plus the decode/encode capability flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCapabilities {
    pub flags: vk::VideoCapabilityFlagsKHR,
    pub min_bitstream_buffer_offset_alignment: vk::DeviceSize,
    pub min_bitstream_buffer_size_alignment: vk::DeviceSize,
    pub picture_access_granularity: vk::Extent2D,
    pub min_coded_extent: vk::Extent2D,
    pub max_coded_extent: vk::Extent2D,
    pub max_dpb_slots: u32,
    pub max_active_reference_pictures: u32,
    pub std_header_name: String,
    pub std_header_version: u32,
    pub decode_flags: vk::VideoDecodeCapabilityFlagsKHR,
    pub encode_flags: vk::VideoEncodeCapabilityFlagsKHR,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub format: vk::Format,
    pub image_type: vk::ImageType,
    pub image_tiling: vk::ImageTiling,
    pub image_usage: vk::ImageUsageFlags,
    pub image_create_flags: vk::ImageCreateFlags,
}

type FnGetPhysicalDeviceVideoCapabilities = unsafe extern "system" fn(
    vk::PhysicalDevice,
    *const vk::VideoProfileInfoKHR<'_>,
    *mut vk::VideoCapabilitiesKHR<'_>,
) -> vk::Result;
type FnGetPhysicalDeviceVideoFormatProperties = unsafe extern "system" fn(
    vk::PhysicalDevice,
    *const vk::PhysicalDeviceVideoFormatInfoKHR<'_>,
    *mut u32,
    *mut vk::VideoFormatPropertiesKHR<'_>,
) -> vk::Result;
type FnCreateVideoSession = unsafe extern "system" fn(
    vk::Device,
    *const vk::VideoSessionCreateInfoKHR<'_>,
    *const vk::AllocationCallbacks<'_>,
    *mut vk::VideoSessionKHR,
) -> vk::Result;
type FnDestroyVideoSession =
    unsafe extern "system" fn(vk::Device, vk::VideoSessionKHR, *const vk::AllocationCallbacks<'_>);
type FnGetVideoSessionMemoryRequirements = unsafe extern "system" fn(
    vk::Device,
    vk::VideoSessionKHR,
    *mut u32,
    *mut vk::VideoSessionMemoryRequirementsKHR<'_>,
) -> vk::Result;
type FnBindVideoSessionMemory = unsafe extern "system" fn(
    vk::Device,
    vk::VideoSessionKHR,
    u32,
    *const vk::BindVideoSessionMemoryInfoKHR<'_>,
) -> vk::Result;
type FnCreateVideoSessionParameters = unsafe extern "system" fn(
    vk::Device,
    *const vk::VideoSessionParametersCreateInfoKHR<'_>,
    *const vk::AllocationCallbacks<'_>,
    *mut vk::VideoSessionParametersKHR,
) -> vk::Result;
type FnUpdateVideoSessionParameters = unsafe extern "system" fn(
    vk::Device,
    vk::VideoSessionParametersKHR,
    *const vk::VideoSessionParametersUpdateInfoKHR<'_>,
) -> vk::Result;
type FnDestroyVideoSessionParameters =
    unsafe extern "system" fn(vk::Device, vk::VideoSessionParametersKHR, *const vk::AllocationCallbacks<'_>);
type FnCmdBeginVideoCoding = unsafe extern "system" fn(vk::CommandBuffer, *const vk::VideoBeginCodingInfoKHR<'_>);
type FnCmdEndVideoCoding = unsafe extern "system" fn(vk::CommandBuffer, *const vk::VideoEndCodingInfoKHR<'_>);
type FnCmdControlVideoCoding =
    unsafe extern "system" fn(vk::CommandBuffer, *const vk::VideoCodingControlInfoKHR<'_>);
type FnCmdDecodeVideo = unsafe extern "system" fn(vk::CommandBuffer, *const vk::VideoDecodeInfoKHR<'_>);
type FnCmdEncodeVideo = unsafe extern "system" fn(vk::CommandBuffer, *const vk::VideoEncodeInfoKHR<'_>);

/// Look up `$name` and reinterpret it as `$ty`
macro_rules! cast_fn {
    ($f:expr, $ty:ty) => {
        // SAFETY: `$ty` is the signature of the command the pointer was resolved for
        $f.map(|f| unsafe { std::mem::transmute::<unsafe extern "system" fn(), $ty>(f) })
    };
}

/// Instance-level video queries
#[derive(Clone, Copy, Default)]
pub struct VideoInstanceFns {
    get_physical_device_video_capabilities: Option<FnGetPhysicalDeviceVideoCapabilities>,
    get_physical_device_video_format_properties: Option<FnGetPhysicalDeviceVideoFormatProperties>,
}

impl VideoInstanceFns {
    const CAPABILITIES: &'static CStr = c"vkGetPhysicalDeviceVideoCapabilitiesKHR";
    const FORMAT_PROPERTIES: &'static CStr = c"vkGetPhysicalDeviceVideoFormatPropertiesKHR";

    pub fn load(instance: &Instance) -> Self {
        let get_instance_proc_addr = instance.entry().static_fn().get_instance_proc_addr;
        let handle = instance.handle();
        Self::load_with(|name| unsafe { get_instance_proc_addr(handle, name.as_ptr()) })
    }

    /// Resolve each entry point independently; a missing one only disables its own query
    pub fn load_with(mut resolve: impl FnMut(&CStr) -> vk::PFN_vkVoidFunction) -> Self {
        let fns = Self {
            get_physical_device_video_capabilities: cast_fn!(resolve(Self::CAPABILITIES), FnGetPhysicalDeviceVideoCapabilities),
            get_physical_device_video_format_properties: cast_fn!(
                resolve(Self::FORMAT_PROPERTIES),
                FnGetPhysicalDeviceVideoFormatProperties
            ),
        };
        log::debug!(
            "Video instance functions: capabilities={}, format properties={}",
            fns.has_video_capabilities(),
            fns.has_video_format_properties()
        );
        fns
    }

    pub fn has_video_capabilities(&self) -> bool {
        self.get_physical_device_video_capabilities.is_some()
    }

    pub fn has_video_format_properties(&self) -> bool {
        self.get_physical_device_video_format_properties.is_some()
    }

    pub fn physical_device_video_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        profile: &VideoProfile,
    ) -> Result<VideoCapabilities> {
        const OP: &str = "vkGetPhysicalDeviceVideoCapabilitiesKHR";
        let get = self
            .get_physical_device_video_capabilities
            .ok_or_else(|| VulkanError::extension_not_present(OP))?;
        marshal::require_handle("physical_device", physical_device)?;
        profile.validate()?;

        let mut codec = profile.codec_info();
        let profile_info = profile.to_vk(&mut codec);

        let mut decode = vk::VideoDecodeCapabilitiesKHR::default();
        let mut encode = vk::VideoEncodeCapabilitiesKHR::default();
        let mut decode_h264 = vk::VideoDecodeH264CapabilitiesKHR::default();
        let mut decode_h265 = vk::VideoDecodeH265CapabilitiesKHR::default();
        let mut encode_h264 = vk::VideoEncodeH264CapabilitiesKHR::default();
        let mut encode_h265 = vk::VideoEncodeH265CapabilitiesKHR::default();

        let caps = vk::VideoCapabilitiesKHR::default();
        let mut caps = match profile.codec {
            VideoCodec::DecodeH264 => caps.push_next(&mut decode).push_next(&mut decode_h264),
            VideoCodec::DecodeH265 => caps.push_next(&mut decode).push_next(&mut decode_h265),
            VideoCodec::EncodeH264 => caps.push_next(&mut encode).push_next(&mut encode_h264),
            VideoCodec::EncodeH265 => caps.push_next(&mut encode).push_next(&mut encode_h265),
        };

        check(unsafe { get(physical_device, &profile_info, &mut caps) }, OP)?;

        let mut capabilities = VideoCapabilities {
            flags: caps.flags,
            min_bitstream_buffer_offset_alignment: caps.min_bitstream_buffer_offset_alignment,
            min_bitstream_buffer_size_alignment: caps.min_bitstream_buffer_size_alignment,
            picture_access_granularity: caps.picture_access_granularity,
            min_coded_extent: caps.min_coded_extent,
            max_coded_extent: caps.max_coded_extent,
            max_dpb_slots: caps.max_dpb_slots,
            max_active_reference_pictures: caps.max_active_reference_pictures,
            std_header_name: marshal::name_from_chars(&caps.std_header_version.extension_name),
            std_header_version: caps.std_header_version.spec_version,
            decode_flags: vk::VideoDecodeCapabilityFlagsKHR::empty(),
            encode_flags: vk::VideoEncodeCapabilityFlagsKHR::empty(),
        };
        if profile.codec.is_encode() {
            capabilities.encode_flags = encode.flags;
        } else {
            capabilities.decode_flags = decode.flags;
        }
        Ok(capabilities)
    }

    /// Formats usable for `image_usage` with the given profile
    pub fn physical_device_video_format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        profile: &VideoProfile,
        image_usage: vk::ImageUsageFlags,
    ) -> Result<Vec<VideoFormat>> {
        const OP: &str = "vkGetPhysicalDeviceVideoFormatPropertiesKHR";
        let get = self
            .get_physical_device_video_format_properties
            .ok_or_else(|| VulkanError::extension_not_present(OP))?;
        marshal::require_handle("physical_device", physical_device)?;
        profile.validate()?;
        if image_usage.is_empty() {
            return Err(ValidationError::new("image_usage", "at least one usage flag is required").into());
        }

        let mut codec = profile.codec_info();
        let profiles = [profile.to_vk(&mut codec)];
        let mut profile_list = vk::VideoProfileListInfoKHR::default().profiles(&profiles);
        let format_info = vk::PhysicalDeviceVideoFormatInfoKHR::default()
            .image_usage(image_usage)
            .push_next(&mut profile_list);

        let properties = read_into_vec(OP, |count, data| unsafe {
            get(physical_device, &format_info, count, data)
        })?;

        Ok(properties
            .iter()
            .map(|p: &vk::VideoFormatPropertiesKHR| VideoFormat {
                format: p.format,
                image_type: p.image_type,
                image_tiling: p.image_tiling,
                image_usage: p.image_usage_flags,
                image_create_flags: p.image_create_flags,
            })
            .collect())
    }
}

/// The count-then-fill enumeration pattern, retried while the driver reports `INCOMPLETE`
fn read_into_vec<T: Default + Clone>(
    operation: &'static str,
    mut call: impl FnMut(&mut u32, *mut T) -> vk::Result,
) -> Result<Vec<T>> {
    loop {
        let mut count = 0;
        check(call(&mut count, ptr::null_mut()), operation)?;
        let mut items = vec![T::default(); count as usize];
        match call(&mut count, items.as_mut_ptr()) {
            vk::Result::SUCCESS => {
                items.truncate(count as usize);
                return Ok(items);
            }
            vk::Result::INCOMPLETE => continue,
            result => return Err(VulkanError::new(result, operation).into()),
        }
    }
}

/// Device-level video entry points, all resolved
pub struct VideoDeviceFns {
    device: vk::Device,
    // Keeps the device alive when loaded through `VideoQueue::load`
    _owner: Option<Arc<Device>>,
    create_video_session: FnCreateVideoSession,
    destroy_video_session: FnDestroyVideoSession,
    get_video_session_memory_requirements: FnGetVideoSessionMemoryRequirements,
    bind_video_session_memory: FnBindVideoSessionMemory,
    create_video_session_parameters: FnCreateVideoSessionParameters,
    update_video_session_parameters: FnUpdateVideoSessionParameters,
    destroy_video_session_parameters: FnDestroyVideoSessionParameters,
    cmd_begin_video_coding: FnCmdBeginVideoCoding,
    cmd_end_video_coding: FnCmdEndVideoCoding,
    cmd_control_video_coding: FnCmdControlVideoCoding,
    cmd_decode_video: FnCmdDecodeVideo,
    cmd_encode_video: FnCmdEncodeVideo,
}

/// Every command `VideoQueue` needs before it reports itself loaded
pub const VIDEO_DEVICE_COMMANDS: [&CStr; 12] = [
    c"vkCreateVideoSessionKHR",
    c"vkDestroyVideoSessionKHR",
    c"vkGetVideoSessionMemoryRequirementsKHR",
    c"vkBindVideoSessionMemoryKHR",
    c"vkCreateVideoSessionParametersKHR",
    c"vkUpdateVideoSessionParametersKHR",
    c"vkDestroyVideoSessionParametersKHR",
    c"vkCmdBeginVideoCodingKHR",
    c"vkCmdEndVideoCodingKHR",
    c"vkCmdControlVideoCodingKHR",
    c"vkCmdDecodeVideoKHR",
    c"vkCmdEncodeVideoKHR",
];

impl VideoDeviceFns {
    /// Build the table from one pointer per `VIDEO_DEVICE_COMMANDS` entry, in order
    fn from_resolved(device: vk::Device, resolved: [vk::PFN_vkVoidFunction; 12]) -> Option<Self> {
        let [create, destroy, requirements, bind, create_params, update_params, destroy_params, begin, end, control, decode, encode] =
            resolved;
        Some(Self {
            device,
            _owner: None,
            create_video_session: cast_fn!(create, FnCreateVideoSession)?,
            destroy_video_session: cast_fn!(destroy, FnDestroyVideoSession)?,
            get_video_session_memory_requirements: cast_fn!(requirements, FnGetVideoSessionMemoryRequirements)?,
            bind_video_session_memory: cast_fn!(bind, FnBindVideoSessionMemory)?,
            create_video_session_parameters: cast_fn!(create_params, FnCreateVideoSessionParameters)?,
            update_video_session_parameters: cast_fn!(update_params, FnUpdateVideoSessionParameters)?,
            destroy_video_session_parameters: cast_fn!(destroy_params, FnDestroyVideoSessionParameters)?,
            cmd_begin_video_coding: cast_fn!(begin, FnCmdBeginVideoCoding)?,
            cmd_end_video_coding: cast_fn!(end, FnCmdEndVideoCoding)?,
            cmd_control_video_coding: cast_fn!(control, FnCmdControlVideoCoding)?,
            cmd_decode_video: cast_fn!(decode, FnCmdDecodeVideo)?,
            cmd_encode_video: cast_fn!(encode, FnCmdEncodeVideo)?,
        })
    }
}

/// Host-side description of `VkVideoSessionCreateInfoKHR`
#[derive(Debug, Clone, Copy)]
pub struct VideoSessionDesc {
    pub queue_family_index: u32,
    pub flags: vk::VideoSessionCreateFlagsKHR,
    pub profile: VideoProfile,
    pub picture_format: vk::Format,
    pub max_coded_extent: vk::Extent2D,
    pub reference_picture_format: vk::Format,
    pub max_dpb_slots: u32,
    pub max_active_reference_pictures: u32,
}

impl VideoSessionDesc {
    /// Session whose reference pictures share the output format
    pub fn new(
        queue_family_index: u32,
        profile: VideoProfile,
        picture_format: vk::Format,
        max_coded_extent: vk::Extent2D,
        max_dpb_slots: u32,
    ) -> Self {
        Self {
            queue_family_index,
            flags: vk::VideoSessionCreateFlagsKHR::empty(),
            profile,
            picture_format,
            max_coded_extent,
            reference_picture_format: picture_format,
            max_dpb_slots,
            max_active_reference_pictures: max_dpb_slots.saturating_sub(1),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.profile.validate()?;
        let extent = self.max_coded_extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(ValidationError::new(
                "max_coded_extent",
                format!("{}x{} has a zero dimension", extent.width, extent.height),
            )
            .into());
        }
        if self.picture_format == vk::Format::UNDEFINED {
            return Err(ValidationError::new("picture_format", "must not be UNDEFINED").into());
        }
        if self.max_active_reference_pictures > self.max_dpb_slots {
            return Err(ValidationError::new(
                "max_active_reference_pictures",
                format!(
                    "{} exceeds max_dpb_slots ({})",
                    self.max_active_reference_pictures, self.max_dpb_slots
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Check the session limits against reported capabilities
    pub fn fits(&self, capabilities: &VideoCapabilities) -> Result<()> {
        let (extent, min, max) = (
            self.max_coded_extent,
            capabilities.min_coded_extent,
            capabilities.max_coded_extent,
        );
        if extent.width < min.width || extent.height < min.height || extent.width > max.width || extent.height > max.height {
            return Err(ValidationError::new(
                "max_coded_extent",
                format!(
                    "{}x{} is outside {}x{} .. {}x{}",
                    extent.width, extent.height, min.width, min.height, max.width, max.height
                ),
            )
            .into());
        }
        if self.max_dpb_slots > capabilities.max_dpb_slots {
            return Err(ValidationError::new(
                "max_dpb_slots",
                format!("{} exceeds the supported {}", self.max_dpb_slots, capabilities.max_dpb_slots),
            )
            .into());
        }
        if self.max_active_reference_pictures > capabilities.max_active_reference_pictures {
            return Err(ValidationError::new(
                "max_active_reference_pictures",
                format!(
                    "{} exceeds the supported {}",
                    self.max_active_reference_pictures, capabilities.max_active_reference_pictures
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// One memory binding requirement of a video session
#[derive(Debug, Clone, Copy)]
pub struct VideoSessionMemoryRequirement {
    pub bind_index: u32,
    pub requirements: vk::MemoryRequirements,
}

/// Memory bound to one bind index of a video session
#[derive(Debug, Clone, Copy)]
pub struct VideoSessionMemoryBind {
    pub bind_index: u32,
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// Device-level video entry points, or none at all
pub enum VideoQueue {
    Unloaded,
    Loaded(VideoDeviceFns),
}

impl VideoQueue {
    pub fn load(device: &Arc<Device>) -> Self {
        let get_device_proc_addr = device.instance().raw().fp_v1_0().get_device_proc_addr;
        let handle = device.handle();
        let mut queue = Self::load_with(handle, |name| unsafe { get_device_proc_addr(handle, name.as_ptr()) });
        if let Self::Loaded(fns) = &mut queue {
            fns._owner = Some(device.clone());
            log::info!("Video device functions loaded");
        }
        queue
    }

    /// Resolve every device-level entry point; one missing entry leaves the table `Unloaded`
    pub fn load_with(device: vk::Device, mut resolve: impl FnMut(&CStr) -> vk::PFN_vkVoidFunction) -> Self {
        let resolved = VIDEO_DEVICE_COMMANDS.map(|name| resolve(name));
        let missing: Vec<&CStr> = VIDEO_DEVICE_COMMANDS
            .iter()
            .zip(&resolved)
            .filter(|(_, f)| f.is_none())
            .map(|(&name, _)| name)
            .collect();
        if !missing.is_empty() {
            log::warn!("Video device functions unavailable, missing {:?}", missing);
            return Self::Unloaded;
        }

        match VideoDeviceFns::from_resolved(device, resolved) {
            Some(fns) => Self::Loaded(fns),
            None => Self::Unloaded,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    fn fns(&self, operation: &'static str) -> Result<&VideoDeviceFns> {
        match self {
            Self::Loaded(fns) => Ok(fns),
            Self::Unloaded => Err(VulkanError::extension_not_present(operation).into()),
        }
    }

    /// The table `owner` was created through, provided it is this one
    fn owned_fns<'q>(
        &self,
        operation: &'static str,
        parameter: &'static str,
        owner: &'q VideoDeviceFns,
    ) -> Result<&'q VideoDeviceFns> {
        let fns = self.fns(operation)?;
        if !ptr::eq(fns, owner) {
            return Err(ValidationError::new(parameter, "was created through another video table").into());
        }
        Ok(owner)
    }

    pub fn create_video_session(&self, desc: &VideoSessionDesc) -> Result<VideoSession<'_>> {
        const OP: &str = "vkCreateVideoSessionKHR";
        let fns = self.fns(OP)?;
        desc.validate()?;

        let mut codec = desc.profile.codec_info();
        let profile = desc.profile.to_vk(&mut codec);
        let std_header = desc.profile.codec.std_header_properties()?;

        let create_info = vk::VideoSessionCreateInfoKHR::default()
            .queue_family_index(desc.queue_family_index)
            .flags(desc.flags)
            .video_profile(&profile)
            .picture_format(desc.picture_format)
            .max_coded_extent(desc.max_coded_extent)
            .reference_picture_format(desc.reference_picture_format)
            .max_dpb_slots(desc.max_dpb_slots)
            .max_active_reference_pictures(desc.max_active_reference_pictures)
            .std_header_version(&std_header);

        let mut raw = vk::VideoSessionKHR::null();
        check(
            unsafe { (fns.create_video_session)(fns.device, &create_info, ptr::null(), &mut raw) },
            OP,
        )?;
        log::trace!("Created video session {:?} for {:?}", raw, desc.profile.codec);

        Ok(VideoSession { fns, raw })
    }

    /// Same as dropping the session
    pub fn destroy_video_session(&self, session: VideoSession<'_>) {
        drop(session)
    }

    pub fn video_session_memory_requirements(
        &self,
        session: &VideoSession<'_>,
    ) -> Result<Vec<VideoSessionMemoryRequirement>> {
        const OP: &str = "vkGetVideoSessionMemoryRequirementsKHR";
        let fns = self.owned_fns(OP, "session", session.fns)?;

        let requirements = read_into_vec(OP, |count, data| unsafe {
            (fns.get_video_session_memory_requirements)(fns.device, session.raw, count, data)
        })?;

        Ok(requirements
            .iter()
            .map(|r: &vk::VideoSessionMemoryRequirementsKHR| VideoSessionMemoryRequirement {
                bind_index: r.memory_bind_index,
                requirements: r.memory_requirements,
            })
            .collect())
    }

    pub fn bind_video_session_memory(&self, session: &VideoSession<'_>, binds: &[VideoSessionMemoryBind]) -> Result<()> {
        const OP: &str = "vkBindVideoSessionMemoryKHR";
        let fns = self.owned_fns(OP, "session", session.fns)?;
        marshal::require_non_empty("binds", binds)?;
        for bind in binds {
            super::memory::require_memory("memory", bind.memory)?;
            if bind.size == 0 {
                return Err(ValidationError::new(
                    "size",
                    format!("bind index {} has a zero size", bind.bind_index),
                )
                .into());
            }
        }

        let infos: Vec<vk::BindVideoSessionMemoryInfoKHR> = binds
            .iter()
            .map(|b| {
                vk::BindVideoSessionMemoryInfoKHR::default()
                    .memory_bind_index(b.bind_index)
                    .memory(b.memory)
                    .memory_offset(b.offset)
                    .memory_size(b.size)
            })
            .collect();
        let count = marshal::count_u32("binds", infos.len())?;

        check(
            unsafe { (fns.bind_video_session_memory)(fns.device, session.raw, count, infos.as_ptr()) },
            OP,
        )
    }

    /// `create_info` carries the codec parameter sets in its `p_next` chain
    pub fn create_video_session_parameters(
        &self,
        create_info: &vk::VideoSessionParametersCreateInfoKHR<'_>,
    ) -> Result<VideoSessionParameters<'_>> {
        const OP: &str = "vkCreateVideoSessionParametersKHR";
        let fns = self.fns(OP)?;
        marshal::require_handle("video_session", create_info.video_session)?;

        let mut raw = vk::VideoSessionParametersKHR::null();
        check(
            unsafe { (fns.create_video_session_parameters)(fns.device, create_info, ptr::null(), &mut raw) },
            OP,
        )?;
        Ok(VideoSessionParameters { fns, raw })
    }

    pub fn update_video_session_parameters(
        &self,
        parameters: &VideoSessionParameters<'_>,
        update_info: &vk::VideoSessionParametersUpdateInfoKHR<'_>,
    ) -> Result<()> {
        const OP: &str = "vkUpdateVideoSessionParametersKHR";
        let fns = self.owned_fns(OP, "parameters", parameters.fns)?;
        if update_info.update_sequence_count == 0 {
            return Err(ValidationError::new("update_sequence_count", "must be greater than zero").into());
        }
        check(
            unsafe { (fns.update_video_session_parameters)(fns.device, parameters.raw, update_info) },
            OP,
        )
    }

    /// Same as dropping the parameters object
    pub fn destroy_video_session_parameters(&self, parameters: VideoSessionParameters<'_>) {
        drop(parameters)
    }

    pub fn cmd_begin_video_coding(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::VideoBeginCodingInfoKHR<'_>,
    ) -> Result<()> {
        let fns = self.fns("vkCmdBeginVideoCodingKHR")?;
        marshal::require_handle("command_buffer", command_buffer)?;
        marshal::require_handle("video_session", begin_info.video_session)?;
        unsafe { (fns.cmd_begin_video_coding)(command_buffer, begin_info) };
        Ok(())
    }

    pub fn cmd_end_video_coding(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let fns = self.fns("vkCmdEndVideoCodingKHR")?;
        marshal::require_handle("command_buffer", command_buffer)?;
        let end_info = vk::VideoEndCodingInfoKHR::default();
        unsafe { (fns.cmd_end_video_coding)(command_buffer, &end_info) };
        Ok(())
    }

    pub fn cmd_control_video_coding(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::VideoCodingControlFlagsKHR,
    ) -> Result<()> {
        let fns = self.fns("vkCmdControlVideoCodingKHR")?;
        marshal::require_handle("command_buffer", command_buffer)?;
        if flags.is_empty() {
            return Err(ValidationError::new("flags", "at least one control flag is required").into());
        }
        let control_info = vk::VideoCodingControlInfoKHR::default().flags(flags);
        unsafe { (fns.cmd_control_video_coding)(command_buffer, &control_info) };
        Ok(())
    }

    pub fn cmd_decode_video(&self, command_buffer: vk::CommandBuffer, decode_info: &vk::VideoDecodeInfoKHR<'_>) -> Result<()> {
        let fns = self.fns("vkCmdDecodeVideoKHR")?;
        marshal::require_handle("command_buffer", command_buffer)?;
        marshal::require_handle("src_buffer", decode_info.src_buffer)?;
        marshal::require_handle("dst_picture_resource", decode_info.dst_picture_resource.image_view_binding)?;
        unsafe { (fns.cmd_decode_video)(command_buffer, decode_info) };
        Ok(())
    }

    pub fn cmd_encode_video(&self, command_buffer: vk::CommandBuffer, encode_info: &vk::VideoEncodeInfoKHR<'_>) -> Result<()> {
        let fns = self.fns("vkCmdEncodeVideoKHR")?;
        marshal::require_handle("command_buffer", command_buffer)?;
        marshal::require_handle("dst_buffer", encode_info.dst_buffer)?;
        marshal::require_handle("src_picture_resource", encode_info.src_picture_resource.image_view_binding)?;
        unsafe { (fns.cmd_encode_video)(command_buffer, encode_info) };
        Ok(())
    }
}

/// A video session, destroyed on drop
pub struct VideoSession<'q> {
    fns: &'q VideoDeviceFns,
    raw: vk::VideoSessionKHR,
}

impl VideoSession<'_> {
    pub fn handle(&self) -> vk::VideoSessionKHR {
        self.raw
    }
}

impl Drop for VideoSession<'_> {
    fn drop(&mut self) {
        log::trace!("Destroying video session {:?}", self.raw);
        unsafe { (self.fns.destroy_video_session)(self.fns.device, self.raw, ptr::null()) };
    }
}

/// Video session parameters, destroyed on drop
pub struct VideoSessionParameters<'q> {
    fns: &'q VideoDeviceFns,
    raw: vk::VideoSessionParametersKHR,
}

impl VideoSessionParameters<'_> {
    pub fn handle(&self) -> vk::VideoSessionParametersKHR {
        self.raw
    }
}

impl Drop for VideoSessionParameters<'_> {
    fn drop(&mut self) {
        unsafe { (self.fns.destroy_video_session_parameters)(self.fns.device, self.raw, ptr::null()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::sync::atomic::{AtomicU64, Ordering};

    type VoidFn = unsafe extern "system" fn();

    unsafe extern "system" fn noop() {}

    fn fake_device() -> vk::Device {
        vk::Device::from_raw(0xd0)
    }

    fn all_present(_: &CStr) -> vk::PFN_vkVoidFunction {
        Some(noop as VoidFn)
    }

    #[test]
    fn codec_flags_do_not_overlap() {
        assert_eq!((DECODE_H264 | DECODE_H265).as_raw(), 0x3);
        assert_eq!(
            (DECODE_H264 | DECODE_H265).as_raw(),
            DECODE_H264.as_raw() + DECODE_H265.as_raw()
        );
        assert!((DECODE_H264 & DECODE_H265).is_empty());
        assert_eq!(DECODE_H264, vk::VideoCodecOperationFlagsKHR::DECODE_H264);
        assert_eq!(DECODE_H265, vk::VideoCodecOperationFlagsKHR::DECODE_H265);
    }

    #[test]
    fn unloaded_reports_extension_not_present() {
        let queue = VideoQueue::Unloaded;
        let cb = vk::CommandBuffer::from_raw(1);
        let desc = VideoSessionDesc::new(
            0,
            VideoProfile::main_8bit(VideoCodec::DecodeH264),
            vk::Format::G8_B8R8_2PLANE_420_UNORM,
            vk::Extent2D { width: 1920, height: 1088 },
            17,
        );

        // Repeated calls fail the same way
        for _ in 0..2 {
            let errors = [
                queue.create_video_session(&desc).err(),
                queue
                    .create_video_session_parameters(&vk::VideoSessionParametersCreateInfoKHR::default())
                    .err(),
                queue
                    .cmd_begin_video_coding(cb, &vk::VideoBeginCodingInfoKHR::default())
                    .err(),
                queue.cmd_end_video_coding(cb).err(),
                queue
                    .cmd_control_video_coding(cb, vk::VideoCodingControlFlagsKHR::RESET)
                    .err(),
                queue.cmd_decode_video(cb, &vk::VideoDecodeInfoKHR::default()).err(),
                queue.cmd_encode_video(cb, &vk::VideoEncodeInfoKHR::default()).err(),
            ];
            for err in errors {
                let err = err.expect("unloaded call must fail");
                assert!(err.is_extension_not_present(), "{}", err);
                assert_eq!(err.result(), Some(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
            }
        }
        assert!(!queue.is_loaded());
    }

    #[test]
    fn unloaded_checks_before_validation() {
        // Null handles would be a validation error on a loaded table
        let err = VideoQueue::Unloaded
            .cmd_decode_video(vk::CommandBuffer::null(), &vk::VideoDecodeInfoKHR::default())
            .unwrap_err();
        assert!(err.is_extension_not_present());
    }

    #[test]
    fn device_load_is_all_or_nothing() {
        for skipped in VIDEO_DEVICE_COMMANDS {
            let queue = VideoQueue::load_with(fake_device(), |name| {
                if name == skipped {
                    None
                } else {
                    Some(noop as VoidFn)
                }
            });
            assert!(!queue.is_loaded(), "loaded without {:?}", skipped);
        }

        assert!(VideoQueue::load_with(fake_device(), all_present).is_loaded());
    }

    #[test]
    fn loaded_queue_still_validates() {
        let queue = VideoQueue::load_with(fake_device(), all_present);
        let err = queue
            .cmd_decode_video(vk::CommandBuffer::from_raw(1), &vk::VideoDecodeInfoKHR::default())
            .unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "src_buffer");

        let err = queue
            .cmd_control_video_coding(vk::CommandBuffer::null(), vk::VideoCodingControlFlagsKHR::RESET)
            .unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "command_buffer");
    }

    #[test]
    fn instance_load_is_per_slot() {
        let fns = VideoInstanceFns::load_with(|name| {
            (name == VideoInstanceFns::CAPABILITIES).then_some(noop as VoidFn)
        });
        assert!(fns.has_video_capabilities());
        assert!(!fns.has_video_format_properties());

        let err = fns
            .physical_device_video_format_properties(
                vk::PhysicalDevice::from_raw(1),
                &VideoProfile::main_8bit(VideoCodec::DecodeH264),
                vk::ImageUsageFlags::VIDEO_DECODE_DST_KHR,
            )
            .unwrap_err();
        assert!(err.is_extension_not_present());
        assert!(err.to_string().starts_with("vkGetPhysicalDeviceVideoFormatPropertiesKHR"));

        let none = VideoInstanceFns::default();
        assert!(!none.has_video_capabilities());
    }

    unsafe extern "system" fn fake_capabilities(
        _physical: vk::PhysicalDevice,
        profile: *const vk::VideoProfileInfoKHR<'_>,
        caps: *mut vk::VideoCapabilitiesKHR<'_>,
    ) -> vk::Result {
        let profile = &*profile;
        if profile.video_codec_operation != DECODE_H264 {
            return vk::Result::ERROR_VIDEO_PROFILE_CODEC_NOT_SUPPORTED_KHR;
        }
        // The codec profile must be chained
        if profile.p_next.is_null() {
            return vk::Result::ERROR_VIDEO_PROFILE_OPERATION_NOT_SUPPORTED_KHR;
        }

        let caps = &mut *caps;
        caps.max_dpb_slots = 17;
        caps.max_active_reference_pictures = 16;
        caps.min_coded_extent = vk::Extent2D { width: 64, height: 64 };
        caps.max_coded_extent = vk::Extent2D { width: 4096, height: 4096 };
        caps.std_header_version.spec_version = vk::make_api_version(0, 1, 0, 0);
        let name = b"VK_STD_vulkan_video_codec_h264_decode";
        for (dst, &src) in caps.std_header_version.extension_name.iter_mut().zip(name.iter()) {
            *dst = src as std::ffi::c_char;
        }

        let mut next = caps.p_next as *mut vk::BaseOutStructure<'_>;
        while !next.is_null() {
            if (*next).s_type == vk::StructureType::VIDEO_DECODE_CAPABILITIES_KHR {
                (*(next as *mut vk::VideoDecodeCapabilitiesKHR<'_>)).flags =
                    vk::VideoDecodeCapabilityFlagsKHR::DPB_AND_OUTPUT_COINCIDE;
            }
            next = (*next).p_next;
        }
        vk::Result::SUCCESS
    }

    fn capabilities_resolver(name: &CStr) -> vk::PFN_vkVoidFunction {
        (name == VideoInstanceFns::CAPABILITIES).then(|| unsafe {
            std::mem::transmute::<FnGetPhysicalDeviceVideoCapabilities, VoidFn>(fake_capabilities)
        })
    }

    #[test]
    fn capabilities_call_through() {
        let fns = VideoInstanceFns::load_with(capabilities_resolver);
        let profile = VideoProfile::main_8bit(VideoCodec::DecodeH264);
        let caps = fns
            .physical_device_video_capabilities(vk::PhysicalDevice::from_raw(1), &profile)
            .unwrap();

        assert_eq!(caps.max_dpb_slots, 17);
        assert_eq!(caps.max_coded_extent.width, 4096);
        assert_eq!(caps.std_header_name, "VK_STD_vulkan_video_codec_h264_decode");
        assert_eq!(caps.std_header_version, VideoCodec::DecodeH264.std_header().1);
        assert_eq!(caps.decode_flags, vk::VideoDecodeCapabilityFlagsKHR::DPB_AND_OUTPUT_COINCIDE);
        assert!(caps.encode_flags.is_empty());

        let desc = VideoSessionDesc::new(
            0,
            profile,
            vk::Format::G8_B8R8_2PLANE_420_UNORM,
            vk::Extent2D { width: 1920, height: 1088 },
            17,
        );
        desc.fits(&caps).unwrap();
        let too_big = VideoSessionDesc {
            max_coded_extent: vk::Extent2D { width: 8192, height: 4320 },
            ..desc
        };
        assert_eq!(too_big.fits(&caps).unwrap_err().validation().unwrap().parameter, "max_coded_extent");
    }

    #[test]
    fn capabilities_error_keeps_native_code() {
        let fns = VideoInstanceFns::load_with(capabilities_resolver);
        let err = fns
            .physical_device_video_capabilities(
                vk::PhysicalDevice::from_raw(1),
                &VideoProfile::main_8bit(VideoCodec::DecodeH265),
            )
            .unwrap_err();
        assert_eq!(err.result(), Some(vk::Result::ERROR_VIDEO_PROFILE_CODEC_NOT_SUPPORTED_KHR));
        assert!(err.to_string().contains("vkGetPhysicalDeviceVideoCapabilitiesKHR"));
    }

    #[test]
    fn capabilities_reject_null_physical_device() {
        let fns = VideoInstanceFns::load_with(capabilities_resolver);
        let err = fns
            .physical_device_video_capabilities(
                vk::PhysicalDevice::null(),
                &VideoProfile::main_8bit(VideoCodec::DecodeH264),
            )
            .unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "physical_device");
    }

    unsafe extern "system" fn fake_format_properties(
        _physical: vk::PhysicalDevice,
        _info: *const vk::PhysicalDeviceVideoFormatInfoKHR<'_>,
        count: *mut u32,
        properties: *mut vk::VideoFormatPropertiesKHR<'_>,
    ) -> vk::Result {
        let formats = [vk::Format::G8_B8R8_2PLANE_420_UNORM, vk::Format::G10X6_B10X6R10X6_2PLANE_420_UNORM_3PACK16];
        if properties.is_null() {
            *count = formats.len() as u32;
            return vk::Result::SUCCESS;
        }
        for (i, format) in formats.iter().enumerate().take(*count as usize) {
            let p = &mut *properties.add(i);
            p.format = *format;
            p.image_type = vk::ImageType::TYPE_2D;
            p.image_usage_flags = vk::ImageUsageFlags::VIDEO_DECODE_DST_KHR;
        }
        vk::Result::SUCCESS
    }

    #[test]
    fn format_properties_two_call() {
        let fns = VideoInstanceFns::load_with(|name| {
            (name == VideoInstanceFns::FORMAT_PROPERTIES).then(|| unsafe {
                std::mem::transmute::<FnGetPhysicalDeviceVideoFormatProperties, VoidFn>(fake_format_properties)
            })
        });
        let formats = fns
            .physical_device_video_format_properties(
                vk::PhysicalDevice::from_raw(1),
                &VideoProfile::main_8bit(VideoCodec::DecodeH264),
                vk::ImageUsageFlags::VIDEO_DECODE_DST_KHR,
            )
            .unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].format, vk::Format::G8_B8R8_2PLANE_420_UNORM);
        assert_eq!(formats[1].image_type, vk::ImageType::TYPE_2D);
    }

    static DESTROYED_SESSION: AtomicU64 = AtomicU64::new(0);

    unsafe extern "system" fn fake_create_session(
        _device: vk::Device,
        info: *const vk::VideoSessionCreateInfoKHR<'_>,
        _allocator: *const vk::AllocationCallbacks<'_>,
        session: *mut vk::VideoSessionKHR,
    ) -> vk::Result {
        let info = &*info;
        let header = &*info.p_std_header_version;
        if marshal::name_from_chars(&header.extension_name) != "VK_STD_vulkan_video_codec_h264_decode" {
            return vk::Result::ERROR_VIDEO_STD_VERSION_NOT_SUPPORTED_KHR;
        }
        *session = vk::VideoSessionKHR::from_raw(0x5e55);
        vk::Result::SUCCESS
    }

    unsafe extern "system" fn fake_destroy_session(
        _device: vk::Device,
        session: vk::VideoSessionKHR,
        _allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        DESTROYED_SESSION.store(session.as_raw(), Ordering::SeqCst);
    }

    unsafe extern "system" fn fake_memory_requirements(
        _device: vk::Device,
        _session: vk::VideoSessionKHR,
        count: *mut u32,
        requirements: *mut vk::VideoSessionMemoryRequirementsKHR<'_>,
    ) -> vk::Result {
        if requirements.is_null() {
            *count = 2;
            return vk::Result::SUCCESS;
        }
        for i in 0..(*count).min(2) {
            let r = &mut *requirements.add(i as usize);
            r.memory_bind_index = i;
            r.memory_requirements.size = 4096 * u64::from(i + 1);
        }
        vk::Result::SUCCESS
    }

    fn session_resolver(name: &CStr) -> vk::PFN_vkVoidFunction {
        let f: VoidFn = unsafe {
            match name.to_bytes() {
                b"vkCreateVideoSessionKHR" => {
                    std::mem::transmute::<FnCreateVideoSession, VoidFn>(fake_create_session)
                }
                b"vkDestroyVideoSessionKHR" => {
                    std::mem::transmute::<FnDestroyVideoSession, VoidFn>(fake_destroy_session)
                }
                b"vkGetVideoSessionMemoryRequirementsKHR" => {
                    std::mem::transmute::<FnGetVideoSessionMemoryRequirements, VoidFn>(fake_memory_requirements)
                }
                _ => noop,
            }
        };
        Some(f)
    }

    #[test]
    fn session_lifecycle_through_loaded_table() {
        let queue = VideoQueue::load_with(fake_device(), session_resolver);
        assert!(queue.is_loaded());

        let desc = VideoSessionDesc::new(
            0,
            VideoProfile::main_8bit(VideoCodec::DecodeH264),
            vk::Format::G8_B8R8_2PLANE_420_UNORM,
            vk::Extent2D { width: 1920, height: 1088 },
            17,
        );
        let session = queue.create_video_session(&desc).unwrap();
        assert_eq!(session.handle().as_raw(), 0x5e55);

        let requirements = queue.video_session_memory_requirements(&session).unwrap();
        assert_eq!(requirements.len(), 2);
        assert_eq!(requirements[1].bind_index, 1);
        assert_eq!(requirements[1].requirements.size, 8192);

        let err = queue
            .bind_video_session_memory(
                &session,
                &[VideoSessionMemoryBind {
                    bind_index: 0,
                    memory: vk::DeviceMemory::null(),
                    offset: 0,
                    size: 4096,
                }],
            )
            .unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "memory");

        queue.destroy_video_session(session);
        assert_eq!(DESTROYED_SESSION.load(Ordering::SeqCst), 0x5e55);
    }

    static REQUIREMENTS_DEVICE: AtomicU64 = AtomicU64::new(0);

    unsafe extern "system" fn recording_memory_requirements(
        device: vk::Device,
        _session: vk::VideoSessionKHR,
        count: *mut u32,
        _requirements: *mut vk::VideoSessionMemoryRequirementsKHR<'_>,
    ) -> vk::Result {
        REQUIREMENTS_DEVICE.store(device.as_raw(), Ordering::SeqCst);
        *count = 0;
        vk::Result::SUCCESS
    }

    unsafe extern "system" fn fake_create_parameters(
        _device: vk::Device,
        _info: *const vk::VideoSessionParametersCreateInfoKHR<'_>,
        _allocator: *const vk::AllocationCallbacks<'_>,
        parameters: *mut vk::VideoSessionParametersKHR,
    ) -> vk::Result {
        *parameters = vk::VideoSessionParametersKHR::from_raw(0x9a4a);
        vk::Result::SUCCESS
    }

    unsafe extern "system" fn fake_destroy_parameters(
        _device: vk::Device,
        _parameters: vk::VideoSessionParametersKHR,
        _allocator: *const vk::AllocationCallbacks<'_>,
    ) {
    }

    fn dispatch_resolver(name: &CStr) -> vk::PFN_vkVoidFunction {
        let f: VoidFn = unsafe {
            match name.to_bytes() {
                b"vkGetVideoSessionMemoryRequirementsKHR" => std::mem::transmute::<
                    FnGetVideoSessionMemoryRequirements,
                    VoidFn,
                >(recording_memory_requirements),
                b"vkCreateVideoSessionParametersKHR" => {
                    std::mem::transmute::<FnCreateVideoSessionParameters, VoidFn>(fake_create_parameters)
                }
                b"vkDestroyVideoSessionParametersKHR" => {
                    std::mem::transmute::<FnDestroyVideoSessionParameters, VoidFn>(fake_destroy_parameters)
                }
                _ => return session_resolver(name),
            }
        };
        Some(f)
    }

    fn h264_session_desc() -> VideoSessionDesc {
        VideoSessionDesc::new(
            0,
            VideoProfile::main_8bit(VideoCodec::DecodeH264),
            vk::Format::G8_B8R8_2PLANE_420_UNORM,
            vk::Extent2D { width: 1920, height: 1088 },
            17,
        )
    }

    #[test]
    fn session_calls_stay_on_their_table() {
        let first = VideoQueue::load_with(vk::Device::from_raw(0xa), dispatch_resolver);
        let second = VideoQueue::load_with(vk::Device::from_raw(0xb), dispatch_resolver);

        let session = first.create_video_session(&h264_session_desc()).unwrap();
        assert!(first.video_session_memory_requirements(&session).unwrap().is_empty());
        assert_eq!(REQUIREMENTS_DEVICE.load(Ordering::SeqCst), 0xa);

        let err = second.video_session_memory_requirements(&session).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "session");
        let bind = VideoSessionMemoryBind {
            bind_index: 0,
            memory: vk::DeviceMemory::from_raw(1),
            offset: 0,
            size: 4096,
        };
        let err = second.bind_video_session_memory(&session, &[bind]).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "session");

        let create_info = vk::VideoSessionParametersCreateInfoKHR::default().video_session(session.handle());
        let parameters = first.create_video_session_parameters(&create_info).unwrap();
        assert_eq!(parameters.handle().as_raw(), 0x9a4a);
        let update = vk::VideoSessionParametersUpdateInfoKHR::default().update_sequence_count(1);
        let err = second.update_video_session_parameters(&parameters, &update).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "parameters");

        // The owning table still validates its own arguments
        let stale = vk::VideoSessionParametersUpdateInfoKHR::default();
        let err = first.update_video_session_parameters(&parameters, &stale).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "update_sequence_count");
    }

    #[test]
    fn unloaded_rejects_session_calls() {
        let loaded = VideoQueue::load_with(fake_device(), dispatch_resolver);
        let session = loaded.create_video_session(&h264_session_desc()).unwrap();
        let create_info = vk::VideoSessionParametersCreateInfoKHR::default().video_session(session.handle());
        let parameters = loaded.create_video_session_parameters(&create_info).unwrap();

        let unloaded = VideoQueue::Unloaded;
        let errors = [
            unloaded.video_session_memory_requirements(&session).err(),
            // Empty binds would be a validation error on a loaded table
            unloaded.bind_video_session_memory(&session, &[]).err(),
            unloaded
                .update_video_session_parameters(&parameters, &vk::VideoSessionParametersUpdateInfoKHR::default())
                .err(),
        ];
        for err in errors {
            let err = err.expect("unloaded call must fail");
            assert!(err.is_extension_not_present(), "{}", err);
        }

        let none = VideoInstanceFns::default();
        let err = none
            .physical_device_video_capabilities(
                vk::PhysicalDevice::null(),
                &VideoProfile::main_8bit(VideoCodec::DecodeH264),
            )
            .unwrap_err();
        assert!(err.is_extension_not_present());
        assert_eq!(err.result(), Some(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
    }

    #[test]
    fn device_load_resolves_each_command_once() {
        let mut calls = Vec::new();
        let queue = VideoQueue::load_with(fake_device(), |name| {
            calls.push(name.to_owned());
            Some(noop as VoidFn)
        });
        assert!(queue.is_loaded());
        assert_eq!(calls.len(), VIDEO_DEVICE_COMMANDS.len());
        assert!(VIDEO_DEVICE_COMMANDS.iter().zip(&calls).all(|(&a, b)| a == b.as_c_str()));
    }

    #[test]
    fn session_desc_validation() {
        let profile = VideoProfile::main_8bit(VideoCodec::EncodeH265);
        let mut desc = VideoSessionDesc::new(
            0,
            profile,
            vk::Format::G8_B8R8_2PLANE_420_UNORM,
            vk::Extent2D { width: 1280, height: 720 },
            4,
        );
        assert_eq!(desc.max_active_reference_pictures, 3);
        desc.validate().unwrap();

        desc.max_active_reference_pictures = 5;
        assert_eq!(
            desc.validate().unwrap_err().validation().unwrap().parameter,
            "max_active_reference_pictures"
        );

        desc.max_active_reference_pictures = 1;
        desc.profile.luma_bit_depth = vk::VideoComponentBitDepthFlagsKHR::TYPE_8 | vk::VideoComponentBitDepthFlagsKHR::TYPE_10;
        assert_eq!(desc.validate().unwrap_err().validation().unwrap().parameter, "luma_bit_depth");
    }

    #[test]
    fn codec_metadata() {
        assert_eq!(
            VideoCodec::DecodeH265.extensions(),
            ["VK_KHR_video_queue", "VK_KHR_video_decode_queue", "VK_KHR_video_decode_h265"]
        );
        assert_eq!(VideoCodec::EncodeH264.queue_flags(), vk::QueueFlags::VIDEO_ENCODE_KHR);
        assert_eq!(VideoCodec::DecodeH264.std_header().1, vk::make_api_version(0, 1, 0, 0));
        let all = VideoCodec::ALL.iter().fold(vk::VideoCodecOperationFlagsKHR::empty(), |acc, c| acc | c.operation());
        assert_eq!(all, DECODE_H264 | DECODE_H265 | ENCODE_H264 | ENCODE_H265);
        assert!(!all.contains(DECODE_AV1));
    }

    #[test]
    fn tables_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VideoInstanceFns>();
    }
}
