//! Checks applied to everything the producer sends. The producer is not
//! trusted: any failure here is reported, never worked around.

use crate::connection::DmabufParams;
use crate::error::BufferError;
use crate::formats::{expected_plane_count, BufferFormatsWithModifiers};
use crate::geometry::Size;
use crate::types::{BufferFd, BufferId};

pub fn validate_buffer_id(buffer_id: BufferId) -> Result<(), BufferError> {
    if buffer_id < 1 {
        return Err(BufferError::InvalidBufferId(buffer_id));
    }
    Ok(())
}

fn validate_size(size: Size) -> Result<(), BufferError> {
    if size.is_empty() {
        return Err(BufferError::EmptySize {
            width: size.width,
            height: size.height,
        });
    }
    Ok(())
}

pub fn validate_dmabuf(
    params: &DmabufParams,
    formats: &BufferFormatsWithModifiers,
) -> Result<(), BufferError> {
    if !formats.contains_key(&params.format) {
        return Err(BufferError::UnsupportedFormat(params.format));
    }
    let expected =
        expected_plane_count(params.format).ok_or(BufferError::UnsupportedFormat(params.format))?;

    validate_size(params.size)?;

    if params.plane_count < 1 {
        return Err(BufferError::NoPlanes);
    }
    if params.plane_count != expected {
        return Err(BufferError::PlaneCountMismatch {
            format: params.format,
            expected,
            actual: params.plane_count,
        });
    }

    let planes = params.plane_count as usize;
    if params.strides.len() != planes
        || params.offsets.len() != planes
        || params.modifiers.len() != planes
    {
        return Err(BufferError::PlaneArrayMismatch {
            strides: params.strides.len(),
            offsets: params.offsets.len(),
            modifiers: params.modifiers.len(),
            planes: params.plane_count,
        });
    }

    if let Some(plane) = params.strides.iter().position(|stride| *stride == 0) {
        return Err(BufferError::InvalidStride(plane));
    }

    if !params.fd.is_valid() {
        return Err(BufferError::InvalidFd);
    }
    Ok(())
}

pub fn validate_shm(
    fd: &BufferFd,
    length: u64,
    size: Size,
    bytes_per_pixel: u32,
) -> Result<(), BufferError> {
    if !fd.is_valid() {
        return Err(BufferError::InvalidFd);
    }
    if length == 0 {
        return Err(BufferError::EmptyShmLength);
    }
    validate_size(size)?;

    let required = size
        .area()
        .and_then(|pixels| pixels.checked_mul(u64::from(bytes_per_pixel)))
        .unwrap_or(u64::MAX);
    if required > length {
        return Err(BufferError::ShmTooSmall {
            width: size.width,
            height: size.height,
            required,
            length,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::default_formats;
    use drm::buffer::DrmFourcc;

    fn shm_fd() -> BufferFd {
        BufferFd::from(tempfile::tempfile().expect("tempfile"))
    }

    fn params(format: DrmFourcc, plane_count: u32, strides: usize) -> DmabufParams {
        DmabufParams {
            fd: shm_fd(),
            size: Size::new(64, 64),
            strides: vec![256; strides],
            offsets: vec![0; plane_count as usize],
            modifiers: vec![0; plane_count as usize],
            format: format as u32,
            plane_count,
        }
    }

    #[test]
    fn accepts_well_formed_single_plane_dmabuf() {
        let formats = default_formats();
        assert_eq!(validate_dmabuf(&params(DrmFourcc::Argb8888, 1, 1), &formats), Ok(()));
    }

    #[test]
    fn rejects_plane_count_not_matching_format() {
        let formats = default_formats();
        let err = validate_dmabuf(&params(DrmFourcc::Argb8888, 2, 2), &formats).unwrap_err();
        assert!(matches!(
            err,
            BufferError::PlaneCountMismatch {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn rejects_short_stride_array() {
        let formats = default_formats();
        let err = validate_dmabuf(&params(DrmFourcc::Yvu420, 3, 2), &formats).unwrap_err();
        assert_eq!(
            err,
            BufferError::PlaneArrayMismatch {
                strides: 2,
                offsets: 3,
                modifiers: 3,
                planes: 3
            }
        );
    }

    #[test]
    fn rejects_unadvertised_format_and_bad_fd() {
        let formats = default_formats();
        let mut bad_format = params(DrmFourcc::Argb8888, 1, 1);
        bad_format.format = DrmFourcc::Yuyv as u32;
        assert!(matches!(
            validate_dmabuf(&bad_format, &formats),
            Err(BufferError::UnsupportedFormat(_))
        ));

        let mut bad_fd = params(DrmFourcc::Argb8888, 1, 1);
        bad_fd.fd = BufferFd::invalid();
        assert_eq!(validate_dmabuf(&bad_fd, &formats), Err(BufferError::InvalidFd));
    }

    #[test]
    fn shm_length_must_cover_the_pixels() {
        let size = Size::new(100, 100);
        assert_eq!(validate_shm(&shm_fd(), 40_000, size, 4), Ok(()));
        assert!(matches!(
            validate_shm(&shm_fd(), 39_999, size, 4),
            Err(BufferError::ShmTooSmall { required: 40_000, .. })
        ));
        assert_eq!(validate_shm(&shm_fd(), 0, size, 4), Err(BufferError::EmptyShmLength));
        assert_eq!(
            validate_shm(&BufferFd::invalid(), 40_000, size, 4),
            Err(BufferError::InvalidFd)
        );
    }

    #[test]
    fn zero_is_not_a_buffer_id() {
        assert_eq!(validate_buffer_id(0), Err(BufferError::InvalidBufferId(0)));
        assert_eq!(validate_buffer_id(1), Ok(()));
    }
}
