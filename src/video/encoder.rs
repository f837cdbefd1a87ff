//! Software H.264 encoder using openh264

use bytes::Bytes;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use tracing::{info, trace};

use super::convert::Yuv420pBuffer;
use crate::error::{AppError, Result};
use crate::media::VideoCodecParams;

/// Encoded access unit (Annex-B)
#[derive(Debug, Clone)]
pub struct H264Frame {
    pub data: Bytes,
    pub is_keyframe: bool,
}

pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl H264Encoder {
    pub fn new(params: &VideoCodecParams) -> Result<Self> {
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(params.bitrate))
            .max_frame_rate(FrameRate::from_hz(params.fps.max(1) as f32));

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| AppError::Capture(format!("Failed to create H.264 encoder: {}", e)))?;

        info!(
            "H.264 encoder created: {}x{} {}fps {}bps",
            params.width, params.height, params.fps, params.bitrate
        );

        Ok(Self {
            encoder,
            width: params.width,
            height: params.height,
            frame_count: 0,
        })
    }

    /// Encode one I420 frame. Empty output means the encoder skipped it.
    pub fn encode(&mut self, frame: &Yuv420pBuffer) -> Result<H264Frame> {
        let (width, height) = frame.dimensions();
        if (width, height) != (self.width, self.height) {
            return Err(AppError::Capture(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                width, height, self.width, self.height
            )));
        }

        let yuv = YUVBuffer::from_vec(
            frame.as_bytes().to_vec(),
            width as usize,
            height as usize,
        );
        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| AppError::Capture(format!("H.264 encoding failed: {}", e)))?;

        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = Bytes::from(bitstream.to_vec());
        self.frame_count += 1;

        trace!(
            "Encoded frame {} to {} bytes (keyframe: {})",
            self.frame_count,
            data.len(),
            is_keyframe
        );

        Ok(H264Frame { data, is_keyframe })
    }

    /// Make the next frame an IDR
    pub fn request_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
