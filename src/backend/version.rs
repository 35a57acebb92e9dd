// Vulkan version numbers
//
// Packed as variant[29..32] | major[22..29] | minor[12..22] | patch[0..12],
// the same layout as VK_MAKE_API_VERSION.

use ash::vk;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

pub const MAX_VARIANT: u32 = 0x7;
pub const MAX_MAJOR: u32 = 0x7F;
pub const MAX_MINOR: u32 = 0x3FF;
pub const MAX_PATCH: u32 = 0xFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ApiVersion(u32);

impl ApiVersion {
    pub const V1_0: Self = Self(vk::API_VERSION_1_0);
    pub const V1_1: Self = Self(vk::API_VERSION_1_1);
    pub const V1_2: Self = Self(vk::API_VERSION_1_2);
    pub const V1_3: Self = Self(vk::API_VERSION_1_3);

    /// Fields wider than their bit range are masked, matching the C macro.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self::with_variant(0, major, minor, patch)
    }

    pub const fn with_variant(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(
            variant & MAX_VARIANT,
            major & MAX_MAJOR,
            minor & MAX_MINOR,
            patch & MAX_PATCH,
        ))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn variant(self) -> u32 {
        vk::api_version_variant(self.0)
    }

    pub const fn major(self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub const fn minor(self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub const fn patch(self) -> u32 {
        vk::api_version_patch(self.0)
    }

    /// Same major and minor, ignoring patch level.
    pub fn supports(self, required: ApiVersion) -> bool {
        (self.major(), self.minor()) >= (required.major(), required.minor())
    }
}

impl From<ApiVersion> for u32 {
    fn from(version: ApiVersion) -> Self {
        version.0
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{input}': {reason}")]
pub struct ParseVersionError {
    input: String,
    reason: &'static str,
}

impl FromStr for ApiVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ParseVersionError {
            input: s.to_string(),
            reason,
        };

        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| fail("expected numeric fields")))
            .collect::<Result<Vec<_>, _>>()?;

        let (major, minor, patch) = match parts.as_slice() {
            [major, minor] => (*major, *minor, 0),
            [major, minor, patch] => (*major, *minor, *patch),
            _ => return Err(fail("expected major.minor or major.minor.patch")),
        };

        if major > MAX_MAJOR {
            return Err(fail("major exceeds 127"));
        }
        if minor > MAX_MINOR {
            return Err(fail("minor exceeds 1023"));
        }
        if patch > MAX_PATCH {
            return Err(fail("patch exceeds 4095"));
        }

        Ok(Self::new(major, minor, patch))
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_fields_into_native_bit_positions() {
        let v = ApiVersion::new(1, 3, 0);
        assert_eq!(v.raw(), (1 << 22) | (3 << 12));
        assert_eq!(v, ApiVersion::V1_3);

        let v = ApiVersion::new(1, 2, 189);
        assert_eq!(v.raw(), 0x0040_20BD);
    }

    #[test]
    fn round_trips_over_field_extremes() {
        for &major in &[0, 1, 2, 0x40, MAX_MAJOR] {
            for &minor in &[0, 1, 3, 0x200, MAX_MINOR] {
                for &patch in &[0, 1, 250, 0x800, MAX_PATCH] {
                    let v = ApiVersion::new(major, minor, patch);
                    assert_eq!((v.major(), v.minor(), v.patch()), (major, minor, patch));
                    assert_eq!(v.variant(), 0);
                    assert_eq!(ApiVersion::from_raw(v.raw()), v);
                }
            }
        }
    }

    #[test]
    fn variant_occupies_top_bits() {
        let v = ApiVersion::with_variant(MAX_VARIANT, MAX_MAJOR, MAX_MINOR, MAX_PATCH);
        assert_eq!(v.raw(), u32::MAX);
        assert_eq!(v.variant(), MAX_VARIANT);
    }

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!("1.3".parse::<ApiVersion>().unwrap(), ApiVersion::V1_3);
        assert_eq!("1.2.189".parse::<ApiVersion>().unwrap(), ApiVersion::new(1, 2, 189));
        assert!("1".parse::<ApiVersion>().is_err());
        assert!("1.x".parse::<ApiVersion>().is_err());
        assert!("128.0".parse::<ApiVersion>().is_err());
        assert!("1.1024".parse::<ApiVersion>().is_err());
        assert!("1.0.4096".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn displays_as_dotted_triple() {
        assert_eq!(ApiVersion::new(1, 3, 268).to_string(), "1.3.268");
    }

    #[test]
    fn supports_ignores_patch() {
        assert!(ApiVersion::new(1, 3, 0).supports(ApiVersion::new(1, 3, 200)));
        assert!(ApiVersion::V1_3.supports(ApiVersion::V1_2));
        assert!(!ApiVersion::V1_1.supports(ApiVersion::V1_2));
    }
}
