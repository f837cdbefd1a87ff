//! avshare - share a local camera and microphone over WebRTC
//!
//! Capture devices are opened once and their encoded tracks are attached to
//! one peer connection per browser viewer. Signaling runs over a WebSocket.

pub mod audio;
pub mod config;
pub mod error;
pub mod media;
pub mod state;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
