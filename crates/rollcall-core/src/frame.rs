//! Grayscale frame type and the downsampling step of the pipeline.

use image::imageops::{self, FilterType};
use image::GrayImage;

/// A grayscale camera or reference-image frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence: 0,
        }
    }

    pub fn from_luma(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Copy into an `image` buffer. `None` if `data` is too short.
    pub fn to_luma(&self) -> Option<GrayImage> {
        let len = (self.width as usize) * (self.height as usize);
        if self.data.len() < len {
            return None;
        }
        GrayImage::from_raw(self.width, self.height, self.data[..len].to_vec())
    }

    /// Resize by `scale` on both axes (e.g. 0.25 for a quarter-size frame).
    ///
    /// Output dimensions are rounded and never below 1×1. A frame whose buffer
    /// is shorter than its dimensions is returned unchanged.
    pub fn downsample(&self, scale: f32) -> Frame {
        let Some(image) = self.to_luma() else {
            return self.clone();
        };
        let w = ((self.width as f32 * scale).round() as u32).max(1);
        let h = ((self.height as f32 * scale).round() as u32).max(1);
        let resized = imageops::resize(&image, w, h, FilterType::Triangle);
        Frame {
            sequence: self.sequence,
            ..Frame::from_luma(resized)
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Pull-based frame producer (camera, video file, test fixture).
///
/// `None` means end of stream. Implementations report read failures
/// themselves and then return `None` rather than panicking.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_quarter() {
        let frame = Frame::new(vec![200u8; 640 * 480], 640, 480);
        let small = frame.downsample(0.25);
        assert_eq!((small.width, small.height), (160, 120));
        assert_eq!(small.data.len(), 160 * 120);
        assert!(small.data.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_downsample_never_empty() {
        let frame = Frame::new(vec![0u8; 2], 2, 1);
        let small = frame.downsample(0.25);
        assert_eq!((small.width, small.height), (1, 1));
    }

    #[test]
    fn test_downsample_keeps_sequence() {
        let mut frame = Frame::new(vec![0u8; 16], 4, 4);
        frame.sequence = 7;
        assert_eq!(frame.downsample(0.5).sequence, 7);
    }

    #[test]
    fn test_short_buffer_is_not_resized() {
        let frame = Frame::new(vec![0u8; 3], 4, 4);
        let out = frame.downsample(0.5);
        assert_eq!((out.width, out.height), (4, 4));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame::new(vec![0, 100, 200], 3, 1);
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-6);
        assert_eq!(Frame::new(Vec::new(), 0, 0).avg_brightness(), 0.0);
    }
}
