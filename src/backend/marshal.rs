// Host <-> native value conversion
//
// Small helpers shared by every wrapper: booleans, string arrays, fixed-size
// name arrays and the fail-fast parameter checks.

use super::error::{Result, ValidationError};
use ash::vk::{self, Handle};
use std::ffi::{c_char, CString};

/// Native sentinel for "to the end of the resource".
pub const WHOLE_SIZE: vk::DeviceSize = vk::WHOLE_SIZE;

pub const MAX_ENABLED_LAYERS: usize = 64;
pub const MAX_ENABLED_EXTENSIONS: usize = 256;

#[inline]
pub const fn to_bool32(value: bool) -> vk::Bool32 {
    if value {
        vk::TRUE
    } else {
        vk::FALSE
    }
}

#[inline]
pub const fn from_bool32(value: vk::Bool32) -> bool {
    value != vk::FALSE
}

/// An owned array of NUL-terminated strings and the pointer table handed to the driver.
///
/// The pointers stay valid for as long as this value is alive; both the
/// strings and the table are released when it is dropped.
#[derive(Debug, Default)]
pub struct CStringArray {
    strings: Vec<CString>,
    pointers: Vec<*const c_char>,
}

impl CStringArray {
    pub fn new<S: AsRef<str>>(parameter: &'static str, items: &[S], max: usize) -> Result<Self> {
        if items.len() > max {
            return Err(ValidationError::new(
                parameter,
                format!("{} entries exceeds the limit of {}", items.len(), max),
            )
            .into());
        }

        let strings = items
            .iter()
            .map(|item| {
                CString::new(item.as_ref()).map_err(|_| {
                    ValidationError::new(
                        parameter,
                        format!("'{}' contains an interior NUL byte", item.as_ref().escape_debug()),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pointers = strings.iter().map(|s| s.as_ptr()).collect();

        Ok(Self { strings, pointers })
    }

    pub fn as_ptrs(&self) -> &[*const c_char] {
        &self.pointers
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &std::ffi::CStr> {
        self.strings.iter().map(|s| s.as_c_str())
    }
}

/// Convert a single string, rejecting interior NUL bytes.
pub fn c_string(parameter: &'static str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| {
        ValidationError::new(parameter, format!("'{}' contains an interior NUL byte", value.escape_debug()))
            .into()
    })
}

/// Decode a fixed-size native name field such as `deviceName` or `layerName`.
pub fn name_from_chars(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Encode into a fixed-size native name field, NUL-terminated.
pub fn name_to_chars(parameter: &'static str, name: &str, out: &mut [c_char]) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() >= out.len() {
        return Err(ValidationError::new(
            parameter,
            format!("'{}' does not fit in {} bytes", name, out.len()),
        )
        .into());
    }
    if bytes.contains(&0) {
        return Err(ValidationError::new(parameter, "contains an interior NUL byte").into());
    }
    for (dst, &src) in out.iter_mut().zip(bytes) {
        *dst = src as c_char;
    }
    out[bytes.len()..].fill(0);
    Ok(())
}

/// View plain-old-data as bytes for push constants and buffer updates
pub fn bytes_of<T: bytemuck::Pod>(values: &[T]) -> &[u8] {
    bytemuck::cast_slice(values)
}

/// Reject a null handle for a required parameter.
#[inline]
pub fn require_handle<H: Handle>(parameter: &'static str, handle: H) -> Result<()> {
    if handle.as_raw() == 0 {
        return Err(ValidationError::new(parameter, "handle must not be null").into());
    }
    Ok(())
}

#[inline]
pub fn require_non_empty<T>(parameter: &'static str, items: &[T]) -> Result<()> {
    if items.is_empty() {
        return Err(ValidationError::new(parameter, "must contain at least one entry").into());
    }
    Ok(())
}

/// Native counts are `u32`; anything larger cannot be expressed.
#[inline]
pub fn count_u32(parameter: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| ValidationError::new(parameter, format!("{} entries does not fit in u32", len)).into())
}
