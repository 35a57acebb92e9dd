// Shader module loading
//
// Vulkan consumes SPIR-V as 32-bit words. `ash::util::read_spv` copies the
// bytes into an aligned word buffer and checks the magic number, so any byte
// slice (e.g. from `include_bytes!`) can be passed in.

use super::device::Device;
use super::error::{Result, ValidationError, VkResultExt};
use super::handle::{Owned, ShaderModule};
use ash::vk;
use std::io::Cursor;
use std::sync::Arc;

/// Decode SPIR-V bytes into words, rejecting truncated or non-SPIR-V input
pub fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    if code.is_empty() {
        return Err(ValidationError::new("code", "SPIR-V code is empty").into());
    }
    let words = ash::util::read_spv(&mut Cursor::new(code))
        .map_err(|e| ValidationError::new("code", e.to_string()))?;
    Ok(words)
}

pub fn create_shader_module(device: &Arc<Device>, code: &[u8]) -> Result<ShaderModule> {
    let words = spirv_words(code)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    let module =
        unsafe { device.raw().create_shader_module(&create_info, None) }.with_op("vkCreateShaderModule")?;
    Ok(unsafe { Owned::from_raw(device.clone(), module) })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    #[test]
    fn decodes_words() {
        let mut bytes = Vec::new();
        for word in [MAGIC, 0x0001_0300, 0, 8, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], MAGIC);
        assert_eq!(words[1], 0x0001_0300);
    }

    #[test]
    fn rejects_unaligned_length() {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        let err = spirv_words(&bytes).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "code");
    }

    #[test]
    fn rejects_bad_magic_and_empty() {
        let err = spirv_words(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap_err();
        assert_eq!(err.validation().unwrap().parameter, "code");
        assert!(spirv_words(&[]).is_err());
    }
}
