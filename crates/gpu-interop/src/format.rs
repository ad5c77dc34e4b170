//! Pixel formats, graphics API kinds and the interop allow-list.
//!
//! Format codes follow DXGI numbering so that values written into the sender
//! directory by a D3D11 producer can be read back unchanged by any consumer.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

/// Texture pixel format, tagged with its DXGI code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba32Float,
    Rgba16Float,
    Rgba16Unorm,
    Rgb10A2Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    R8Unorm,
    Bgra8Unorm,
    Bgrx8Unorm,
    Bgra8UnormSrgb,
    /// A code this build does not know. Never interop-legal.
    Other(u32),
}

impl PixelFormat {
    /// Every format this build knows how to size.
    pub const KNOWN: [PixelFormat; 10] = [
        PixelFormat::Rgba32Float,
        PixelFormat::Rgba16Float,
        PixelFormat::Rgba16Unorm,
        PixelFormat::Rgb10A2Unorm,
        PixelFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb,
        PixelFormat::R8Unorm,
        PixelFormat::Bgra8Unorm,
        PixelFormat::Bgrx8Unorm,
        PixelFormat::Bgra8UnormSrgb,
    ];

    /// The DXGI code stored in the sender directory.
    pub fn code(self) -> u32 {
        match self {
            PixelFormat::Rgba32Float => 2,
            PixelFormat::Rgba16Float => 10,
            PixelFormat::Rgba16Unorm => 11,
            PixelFormat::Rgb10A2Unorm => 24,
            PixelFormat::Rgba8Unorm => 28,
            PixelFormat::Rgba8UnormSrgb => 29,
            PixelFormat::R8Unorm => 61,
            PixelFormat::Bgra8Unorm => 87,
            PixelFormat::Bgrx8Unorm => 88,
            PixelFormat::Bgra8UnormSrgb => 91,
            PixelFormat::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|f| f.code() == code)
            .unwrap_or(PixelFormat::Other(code))
    }

    /// Size of one texel in bytes, or `None` for unknown codes.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgba32Float => Some(16),
            PixelFormat::Rgba16Float | PixelFormat::Rgba16Unorm => Some(8),
            PixelFormat::Rgb10A2Unorm
            | PixelFormat::Rgba8Unorm
            | PixelFormat::Rgba8UnormSrgb
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Bgrx8Unorm
            | PixelFormat::Bgra8UnormSrgb => Some(4),
            PixelFormat::R8Unorm => Some(1),
            PixelFormat::Other(_) => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Other(code) => write!(f, "format#{code}"),
            known => write!(f, "{known:?}"),
        }
    }
}

/// The graphics API a texture handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKind {
    Dx11,
    Dx9,
    OpenGl,
    Metal,
    /// Host-memory textures, usable on every platform.
    Host,
}

impl ApiKind {
    pub const ALL: [ApiKind; 5] = [
        ApiKind::Dx11,
        ApiKind::Dx9,
        ApiKind::OpenGl,
        ApiKind::Metal,
        ApiKind::Host,
    ];

    pub fn code(self) -> u32 {
        match self {
            ApiKind::Dx11 => 1,
            ApiKind::Dx9 => 2,
            ApiKind::OpenGl => 3,
            ApiKind::Metal => 4,
            ApiKind::Host => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|api| api.code() == code)
    }
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApiKind::Dx11 => "D3D11",
            ApiKind::Dx9 => "D3D9",
            ApiKind::OpenGl => "OpenGL",
            ApiKind::Metal => "Metal",
            ApiKind::Host => "host",
        };
        f.write_str(name)
    }
}

/// One allow-list row as it appears in configuration files.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PolicyRule {
    pub format: PixelFormat,
    pub api: ApiKind,
}

/// Which `(format, consumer API)` pairs may be bound without copying.
///
/// Anything not listed is rejected, including every `PixelFormat::Other`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<PolicyRule>")]
pub struct InteropPolicy {
    allowed: HashSet<(PixelFormat, ApiKind)>,
}

impl InteropPolicy {
    /// A policy that rejects everything.
    pub fn empty() -> Self {
        Self {
            allowed: HashSet::new(),
        }
    }

    pub fn from_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        let mut policy = Self::empty();
        for rule in rules {
            policy.allow(rule.format, rule.api);
        }
        policy
    }

    pub fn allow(&mut self, format: PixelFormat, api: ApiKind) -> &mut Self {
        if !matches!(format, PixelFormat::Other(_)) {
            self.allowed.insert((format, api));
        }
        self
    }

    pub fn deny(&mut self, format: PixelFormat, api: ApiKind) -> &mut Self {
        self.allowed.remove(&(format, api));
        self
    }

    pub fn allows(&self, format: PixelFormat, api: ApiKind) -> bool {
        self.allowed.contains(&(format, api))
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl From<Vec<PolicyRule>> for InteropPolicy {
    fn from(rules: Vec<PolicyRule>) -> Self {
        Self::from_rules(rules)
    }
}

impl Default for InteropPolicy {
    fn default() -> Self {
        use PixelFormat::*;

        // D3D9Ex consumers can only open the BGRA family of a D3D11 texture.
        const DX9: &[PixelFormat] = &[Bgra8Unorm, Bgrx8Unorm];
        const DX11: &[PixelFormat] = &[
            Bgra8Unorm,
            Bgrx8Unorm,
            Bgra8UnormSrgb,
            Rgba8Unorm,
            Rgba8UnormSrgb,
            Rgb10A2Unorm,
            Rgba16Unorm,
            Rgba16Float,
            Rgba32Float,
            R8Unorm,
        ];
        const OPENGL: &[PixelFormat] = &[
            Bgra8Unorm,
            Bgrx8Unorm,
            Bgra8UnormSrgb,
            Rgba8Unorm,
            Rgba8UnormSrgb,
            Rgba16Unorm,
            Rgba16Float,
            Rgba32Float,
        ];
        const METAL: &[PixelFormat] = &[
            Bgra8Unorm,
            Bgra8UnormSrgb,
            Rgba8Unorm,
            Rgba8UnormSrgb,
            Rgb10A2Unorm,
            Rgba16Float,
            Rgba32Float,
        ];

        let mut policy = Self::empty();
        for (api, formats) in [
            (ApiKind::Dx9, DX9),
            (ApiKind::Dx11, DX11),
            (ApiKind::OpenGl, OPENGL),
            (ApiKind::Metal, METAL),
            (ApiKind::Host, &PixelFormat::KNOWN[..]),
        ] {
            for &format in formats {
                policy.allow(format, api);
            }
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn codes_round_trip_for_known_formats() {
        for format in PixelFormat::KNOWN {
            assert_eq!(PixelFormat::from_code(format.code()), format);
            assert!(format.bytes_per_pixel().is_some());
        }
        assert_eq!(PixelFormat::from_code(9999), PixelFormat::Other(9999));
    }

    #[test]
    fn dx9_only_accepts_bgra_family() {
        let policy = InteropPolicy::default();
        assert!(policy.allows(PixelFormat::Bgra8Unorm, ApiKind::Dx9));
        assert!(!policy.allows(PixelFormat::Rgba8Unorm, ApiKind::Dx9));
        assert!(!policy.allows(PixelFormat::Rgba16Float, ApiKind::Dx9));
    }

    #[test]
    fn single_channel_does_not_cross_to_opengl() {
        let policy = InteropPolicy::default();
        assert!(policy.allows(PixelFormat::R8Unorm, ApiKind::Dx11));
        assert!(!policy.allows(PixelFormat::R8Unorm, ApiKind::OpenGl));
    }

    #[test]
    fn policy_loads_from_config_rows() {
        let json = r#"[
            { "format": "bgra8_unorm", "api": "open_gl" },
            { "format": "rgba16_float", "api": "metal" }
        ]"#;
        let policy: InteropPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.len(), 2);
        assert!(policy.allows(PixelFormat::Bgra8Unorm, ApiKind::OpenGl));
        assert!(!policy.allows(PixelFormat::Bgra8Unorm, ApiKind::Dx11));
    }

    #[test]
    fn deny_removes_a_default_pair() {
        let mut policy = InteropPolicy::default();
        policy.deny(PixelFormat::Rgba8Unorm, ApiKind::OpenGl);
        assert!(!policy.allows(PixelFormat::Rgba8Unorm, ApiKind::OpenGl));
        assert!(policy.allows(PixelFormat::Bgra8Unorm, ApiKind::OpenGl));
    }

    proptest! {
        #[test]
        fn unknown_codes_fail_closed(code in 100u32..u32::MAX, api_index in 0usize..5) {
            let mut policy = InteropPolicy::default();
            let format = PixelFormat::from_code(code);
            let api = ApiKind::ALL[api_index];
            policy.allow(format, api);
            prop_assert!(!policy.allows(format, api));
        }
    }
}
