//! V4L2 camera capture via the `v4l` crate.

use crate::convert::{self, PixelFormat};
use rollcall_core::{Frame, FrameSource};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// V4L2 camera device handle. Dropping it releases the device.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        // Ask for YUYV; accept GREY or Y16 if that is what the driver offers.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = pixel_format_for(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming. Frames are pulled through [`FrameSource::next_frame`].
    pub fn stream(&self) -> Result<CameraStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(CameraStream {
            camera: self,
            stream,
            ended: false,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = format!("/dev/video{i}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps
                    .capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

fn pixel_format_for(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"GREY" => Some(PixelFormat::Grey),
        b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
        _ => None,
    }
}

/// An active capture stream. Implements [`FrameSource`].
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
    ended: bool,
}

impl CameraStream<'_> {
    /// Dequeue and convert one frame.
    pub fn capture(&mut self) -> Result<Frame, CameraError> {
        let cam = self.camera;
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let gray = convert::to_grayscale(buf, cam.pixel_format, cam.width, cam.height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

        Ok(Frame {
            data: gray,
            width: cam.width,
            height: cam.height,
            sequence: meta.sequence,
        })
    }

    /// Discard `count` frames while exposure settles. Returns how many reads failed.
    pub fn warm_up(&mut self, count: usize) -> usize {
        if count > 0 {
            tracing::info!(count, "discarding warmup frames");
        }
        let failed = discard_frames(count, || self.capture());
        if failed > 0 {
            tracing::warn!(
                device = %self.camera.device_path,
                failed,
                count,
                "camera reads failed during warmup"
            );
        }
        failed
    }
}

fn discard_frames<F>(count: usize, mut capture: F) -> usize
where
    F: FnMut() -> Result<Frame, CameraError>,
{
    (0..count)
        .filter(|&i| match capture() {
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(frame = i, error = %e, "warmup capture failed");
                true
            }
        })
        .count()
}

impl FrameSource for CameraStream<'_> {
    /// A failed read is logged and ends the stream.
    fn next_frame(&mut self) -> Option<Frame> {
        if self.ended {
            return None;
        }
        match self.capture() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!(
                    device = %self.camera.device_path,
                    error = %e,
                    "could not read frame from camera; stopping capture"
                );
                self.ended = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_mapping() {
        assert_eq!(pixel_format_for(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(pixel_format_for(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(pixel_format_for(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(pixel_format_for(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_discard_frames_counts_failures() {
        let mut calls = 0;
        let failed = discard_frames(5, || {
            calls += 1;
            if calls % 2 == 0 {
                Err(CameraError::CaptureFailed("timeout".into()))
            } else {
                Ok(Frame::new(vec![0; 4], 2, 2))
            }
        });
        assert_eq!(calls, 5);
        assert_eq!(failed, 2);
        assert_eq!(discard_frames(0, || unreachable!()), 0);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/rollcall-no-such-camera"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
