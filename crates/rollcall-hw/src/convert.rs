//! Raw V4L2 buffer → grayscale conversion and frame sanity checks.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Pixel layouts the camera may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel; luma is every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale, reduced to the high byte.
    Y16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

/// Convert one captured buffer to `width * height` grayscale bytes.
pub fn to_grayscale(
    buf: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, ConvertError> {
    let pixels = (width as usize) * (height as usize);
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(ConvertError::TooShort {
            expected,
            actual: buf.len(),
        });
    }
    let buf = &buf[..expected];

    Ok(match format {
        PixelFormat::Grey => buf.to_vec(),
        PixelFormat::Yuyv => buf.iter().step_by(2).copied().collect(),
        // Little-endian: the high byte is the second of each pair.
        PixelFormat::Y16 => buf.chunks_exact(2).map(|px| px[1]).collect(),
    })
}

/// True if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_takes_luma() {
        let yuyv = [100, 128, 200, 128];
        assert_eq!(to_grayscale(&yuyv, PixelFormat::Yuyv, 2, 1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_yuyv_ignores_trailing_bytes() {
        let yuyv: Vec<u8> = (0..20).collect();
        let gray = to_grayscale(&yuyv, PixelFormat::Yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let y16 = [0x34, 0x12, 0xff, 0x80];
        assert_eq!(to_grayscale(&y16, PixelFormat::Y16, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_grey_passthrough() {
        assert_eq!(to_grayscale(&[1, 2, 3], PixelFormat::Grey, 3, 1).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(
            to_grayscale(&[1, 2], PixelFormat::Yuyv, 2, 1),
            Err(ConvertError::TooShort {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_dark_frames() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend([128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, 0.95));

        let mut borderline = vec![10u8; 940];
        borderline.extend([128u8; 60]);
        assert!(!is_dark_frame(&borderline, 0.95));
    }
}
