// =============================================================================
// VKPROBE - Vulkan driver probe built on vkbind
// =============================================================================
//
// PROBE FLOW:
// 1. Load the Vulkan library and report the loader version and layers
// 2. Create an instance and list physical devices
// 3. Pick a device, plus a queue family per configured video codec
// 4. Create the device and load the video extension tables
// 5. Query video capabilities and formats, open and close a session
// 6. Transfer smoke test: fill a buffer on the GPU, wait, verify on the host
//
// =============================================================================

use anyhow::{bail, ensure, Context, Result};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use std::time::Instant;
use vkbind::backend::allocator::GpuAllocator;
use vkbind::backend::buffer::BufferDesc;
use vkbind::backend::command::{allocate_command_buffers, create_command_pool, Recording};
use vkbind::backend::device::{find_queue_family, select_physical_device, Device};
use vkbind::backend::instance::{Entry, Instance};
use vkbind::backend::sync::{create_fence, queue_submit, wait_for_fences, SubmitDesc};
use vkbind::backend::video::{VideoCodec, VideoInstanceFns, VideoProfile, VideoQueue, VideoSessionDesc};
use vkbind::backend::{vk, WHOLE_SIZE};
use vkbind::config::{Config, ProbeConfig};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting vkprobe");

    let entry = Entry::load().context("Failed to load the Vulkan library")?;
    log::info!("Loader supports Vulkan {}", entry.instance_version()?);
    for layer in entry.layer_properties()? {
        log::info!("  layer {} ({}): {}", layer.name, layer.spec_version, layer.description);
    }

    let instance = Instance::new(&entry, &config.instance_desc()).context("Failed to create instance")?;

    for physical in instance.enumerate_physical_devices()? {
        let info = instance.physical_device_info(physical)?;
        log::info!(
            "  GPU {} ({:?}, Vulkan {}, {:04x}:{:04x})",
            info.name,
            info.device_type,
            info.api_version,
            info.vendor_id,
            info.device_id
        );
    }

    // Graphics and compute families implicitly support transfer
    let (info, family) = select_physical_device(&instance, config.device.preferred_type, vk::QueueFlags::COMPUTE)?;
    log::info!("Selected {} (queue family {})", info.name, family);

    let video_families = video_queue_families(&instance, info.handle, &config)?;
    let codecs: Vec<VideoCodec> = video_families.iter().map(|&(codec, _)| codec).collect();
    let mut families = vec![family];
    families.extend(video_families.iter().map(|&(_, f)| f));

    let device = Device::new(&instance, info.handle, &config.device_desc(&families, &codecs))
        .context("Failed to create device")?;

    if config.video.enabled {
        // Video support is reported, never required
        if let Err(e) = probe_video(&instance, &device, &video_families) {
            log::warn!("Video probe failed: {:#}", e);
        }
    }

    let start = Instant::now();
    transfer_smoke_test(&device, family, &config.probe)?;
    log::info!("Transfer smoke test passed in {:?}", start.elapsed());

    device.wait_idle()?;
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// VIDEO
// =============================================================================

/// Configured codecs the device can run, each with a queue family that supports it
fn video_queue_families(
    instance: &Instance,
    physical: vk::PhysicalDevice,
    config: &Config,
) -> Result<Vec<(VideoCodec, u32)>> {
    if !config.video.enabled {
        return Ok(Vec::new());
    }

    let families = instance.queue_family_properties(physical)?;
    let extensions = instance.device_extension_properties(physical)?;

    let mut supported = Vec::new();
    for &codec in &config.video.codecs {
        let missing: Vec<&str> = codec
            .extensions()
            .into_iter()
            .filter(|name| !extensions.iter().any(|e| e.name == *name))
            .collect();
        if !missing.is_empty() {
            log::info!("{:?} unavailable, missing {:?}", codec, missing);
            continue;
        }
        match find_queue_family(&families, codec.queue_flags()) {
            Some(family) => supported.push((codec, family)),
            None => log::info!("{:?} unavailable, no {:?} queue family", codec, codec.queue_flags()),
        }
    }
    Ok(supported)
}

fn probe_video(instance: &Instance, device: &Arc<Device>, codecs: &[(VideoCodec, u32)]) -> Result<()> {
    let instance_fns = VideoInstanceFns::load(instance);
    if !instance_fns.has_video_capabilities() {
        log::info!("vkGetPhysicalDeviceVideoCapabilitiesKHR not available");
        return Ok(());
    }

    let queue = VideoQueue::load(device);
    log::info!("Video device functions loaded: {}", queue.is_loaded());

    for &(codec, family) in codecs {
        let profile = VideoProfile::main_8bit(codec);
        let caps = instance_fns.physical_device_video_capabilities(device.physical_device(), &profile)?;
        log::info!(
            "{:?}: coded extent {}x{} .. {}x{}, {} DPB slots, {} active references, {} v{}",
            codec,
            caps.min_coded_extent.width,
            caps.min_coded_extent.height,
            caps.max_coded_extent.width,
            caps.max_coded_extent.height,
            caps.max_dpb_slots,
            caps.max_active_reference_pictures,
            caps.std_header_name,
            caps.std_header_version
        );

        if !instance_fns.has_video_format_properties() {
            continue;
        }
        let usage = if codec.is_encode() {
            vk::ImageUsageFlags::VIDEO_ENCODE_SRC_KHR
        } else {
            vk::ImageUsageFlags::VIDEO_DECODE_DST_KHR
        };
        let formats =
            instance_fns.physical_device_video_format_properties(device.physical_device(), &profile, usage)?;
        for format in &formats {
            log::info!("  {:?} {:?}", format.format, format.image_tiling);
        }

        let (Some(format), true) = (formats.first(), queue.is_loaded()) else {
            continue;
        };
        let extent = vk::Extent2D {
            width: caps.max_coded_extent.width.min(1920),
            height: caps.max_coded_extent.height.min(1088),
        };
        let desc = VideoSessionDesc::new(family, profile, format.format, extent, caps.max_dpb_slots.min(17));
        desc.fits(&caps)?;

        let session = queue.create_video_session(&desc)?;
        let requirements = queue.video_session_memory_requirements(&session)?;
        log::info!("  session {:?} needs {} memory bindings", session.handle(), requirements.len());
        queue.destroy_video_session(session);
    }
    Ok(())
}

// =============================================================================
// TRANSFER SMOKE TEST
// =============================================================================

fn transfer_smoke_test(device: &Arc<Device>, family: u32, probe: &ProbeConfig) -> Result<()> {
    // vkCmdFillBuffer writes whole words
    let size = probe.smoke_test_bytes & !3;
    ensure!(size > 0, "smoke_test_bytes must be at least 4");

    let allocator = GpuAllocator::new(device)?;
    let target = allocator.allocate_buffer(
        &BufferDesc::new(size, vk::BufferUsageFlags::TRANSFER_DST),
        MemoryLocation::GpuToCpu,
        "smoke-test",
    )?;

    let pool = create_command_pool(device, family, vk::CommandPoolCreateFlags::TRANSIENT)?;
    let command_buffer = allocate_command_buffers(&pool, vk::CommandBufferLevel::PRIMARY, 1)?
        .into_iter()
        .next()
        .context("No command buffer allocated")?;

    let recording = Recording::begin(device, command_buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    recording.cmd_fill_buffer(target.buffer().handle(), 0, WHOLE_SIZE, probe.fill_pattern);
    let host_read = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ);
    recording.cmd_pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::HOST,
        &[host_read],
        &[],
        &[],
    );
    let command_buffer = recording.finish()?;

    let fence = create_fence(device, false)?;
    let queue = device.queue(family, 0)?;
    queue_submit(device, &queue, &[SubmitDesc::command_buffer(command_buffer)], Some(&fence))?;

    if !wait_for_fences(device, &[fence.handle()], true, probe.fence_timeout_ns())? {
        bail!("Fence not signaled within {} ms", probe.fence_timeout_ms);
    }

    let data = target.mapped_slice().context("Smoke test buffer is not host visible")?;
    let expected = probe.fill_pattern.to_ne_bytes();
    if let Some(offset) = data[..size as usize].chunks_exact(4).position(|word| word != expected) {
        bail!("Word {} does not hold the fill pattern {:#010x}", offset, probe.fill_pattern);
    }
    log::info!("Verified {} bytes of {:#010x}", size, probe.fill_pattern);

    // The buffer keeps the allocator state alive, so it may be returned last
    drop(allocator);
    target.free()?;
    Ok(())
}
