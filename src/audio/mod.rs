//! Audio capture and encoding
//!
//! This module provides:
//! - ALSA device enumeration
//! - ALSA capture
//! - Opus encoding into a shared WebRTC track

pub mod capture;
pub mod device;
pub mod encoder;

pub use capture::{AudioCaptureConfig, OpusCaptureTrack};
pub use device::enumerate_audio_devices;
pub use encoder::{OpusConfig, OpusEncoder, OpusFrame};
