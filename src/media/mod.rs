//! Shared media capture
//!
//! This module owns everything between a physical capture device and the
//! encoded tracks that are attached to viewer peer connections:
//!
//! ```text
//! DeviceInfo snapshot --resolve--> ResolvedConfig
//!                                       |
//!                                       v
//!                        MediaManager (retry, single owner)
//!                                       |
//!                          CaptureEngine::get_user_media
//!                                       |
//!                                       v
//!                     MediaStream [video track, audio track]
//!                                       |
//!                    shared read-only with every viewer session
//! ```

pub mod engine;
pub mod manager;
pub mod resolver;
pub mod track;
pub mod types;

pub use engine::{CaptureEngine, CaptureError, SystemCaptureEngine};
pub use manager::{MediaManager, RetryPolicy, SharedMediaSession};
pub use resolver::{display_label, resolve, resolve_config, ResolvedConfig};
pub use track::{MediaStream, MediaTrack, SampleTrack, SharedTrack};
pub use types::{
    AudioCodecParams, AudioConstraints, DeviceInfo, DeviceKind, MediaConstraints,
    VideoCodecParams, VideoConstraints,
};
