//! Video capture and encoding
//!
//! V4L2 YUYV capture, conversion to I420 and software H.264 encoding into a
//! shared WebRTC track.

pub mod capture;
pub mod convert;
pub mod device;
pub mod encoder;

pub use capture::H264CaptureTrack;
pub use convert::{Yuv420pBuffer, YuyvConverter};
pub use device::{enumerate_video_devices, VideoDevice};
pub use encoder::{H264Encoder, H264Frame};
