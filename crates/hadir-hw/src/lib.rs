//! hadir-hw: Hardware abstraction for the attendance kiosk camera.
//!
//! Provides V4L2-based webcam access, RGB frame conversion and JPEG proof
//! snapshots for attendance submissions.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
