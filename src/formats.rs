//! Pixel format table shared by the producer and the host.
//!
//! Formats travel as raw DRM fourcc codes. The host only accepts codes it
//! advertised at connection setup, and checks plane counts against what
//! the format actually needs.

use drm::buffer::DrmFourcc;
use std::collections::BTreeMap;

/// DRM format modifier meaning "no explicit modifier".
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;
/// Linear layout modifier.
pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;

/// Supported fourcc codes mapped to the modifiers the compositor accepts.
pub type BufferFormatsWithModifiers = BTreeMap<u32, Vec<u64>>;

/// Parses a four character code such as `"AR24"` into its numeric value.
pub fn fourcc_from_str(code: &str) -> Option<u32> {
    let bytes: [u8; 4] = code.as_bytes().try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Renders a fourcc code back into its four characters, for messages.
pub fn fourcc_to_string(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Number of memory planes a format is made of, `None` for formats the
/// bridge does not know how to share.
pub fn expected_plane_count(fourcc: u32) -> Option<u32> {
    let format = DrmFourcc::try_from(fourcc).ok()?;
    match format {
        DrmFourcc::Argb8888
        | DrmFourcc::Xrgb8888
        | DrmFourcc::Abgr8888
        | DrmFourcc::Xbgr8888
        | DrmFourcc::Rgba8888
        | DrmFourcc::Rgbx8888
        | DrmFourcc::Bgra8888
        | DrmFourcc::Bgrx8888
        | DrmFourcc::Argb2101010
        | DrmFourcc::Xrgb2101010
        | DrmFourcc::Abgr2101010
        | DrmFourcc::Xbgr2101010
        | DrmFourcc::Rgb565
        | DrmFourcc::Bgr565
        | DrmFourcc::R8 => Some(1),
        DrmFourcc::Nv12 | DrmFourcc::Nv21 | DrmFourcc::P010 => Some(2),
        DrmFourcc::Yuv420 | DrmFourcc::Yvu420 => Some(3),
        _ => None,
    }
}

/// The format set advertised when nothing is configured.
pub fn default_formats() -> BufferFormatsWithModifiers {
    let mut formats = BufferFormatsWithModifiers::new();
    for format in [
        DrmFourcc::Argb8888,
        DrmFourcc::Xrgb8888,
        DrmFourcc::Abgr8888,
        DrmFourcc::Xbgr8888,
        DrmFourcc::Rgb565,
        DrmFourcc::Nv12,
        DrmFourcc::Yvu420,
    ] {
        formats.insert(format as u32, vec![DRM_FORMAT_MOD_LINEAR, DRM_FORMAT_MOD_INVALID]);
    }
    formats
}
