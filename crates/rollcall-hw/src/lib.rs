//! rollcall-hw — Camera capture for the attendance pipeline.
//!
//! Opens a V4L2 device, negotiates a grayscale-convertible pixel format and
//! exposes the capture stream as a [`rollcall_core::FrameSource`].

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo};
pub use convert::{is_dark_frame, PixelFormat};
