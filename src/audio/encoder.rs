//! Opus audio encoder for WebRTC

use audiopus::coder::Encoder;
use audiopus::{Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use std::time::Duration;
use tracing::{info, trace};

use crate::error::{AppError, Result};
use crate::media::AudioCodecParams;

/// Largest Opus packet we expect
const MAX_PACKET_SIZE: usize = 4000;

/// Opus encoder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusConfig {
    /// Sample rate (8000, 12000, 16000, 24000 or 48000)
    pub sample_rate: u32,
    /// Channels (1 or 2)
    pub channels: u32,
    /// Target bitrate in bps
    pub bitrate: u32,
    /// Enable forward error correction
    pub fec: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self::from_params(&AudioCodecParams::default())
    }
}

impl OpusConfig {
    pub fn from_params(params: &AudioCodecParams) -> Self {
        Self {
            sample_rate: params.sample_rate,
            channels: params.channels,
            bitrate: params.bitrate,
            fec: true,
        }
    }

    /// Samples per channel in one 20ms frame
    pub fn frame_size(&self) -> usize {
        (self.sample_rate / 50) as usize
    }

    fn to_audiopus_sample_rate(&self) -> SampleRate {
        match self.sample_rate {
            8000 => SampleRate::Hz8000,
            12000 => SampleRate::Hz12000,
            16000 => SampleRate::Hz16000,
            24000 => SampleRate::Hz24000,
            _ => SampleRate::Hz48000,
        }
    }

    fn to_audiopus_channels(&self) -> Channels {
        if self.channels == 1 {
            Channels::Mono
        } else {
            Channels::Stereo
        }
    }
}

/// Encoded Opus packet
#[derive(Debug, Clone)]
pub struct OpusFrame {
    pub data: Bytes,
    pub duration: Duration,
}

pub struct OpusEncoder {
    config: OpusConfig,
    encoder: Encoder,
    output_buffer: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(config: OpusConfig) -> Result<Self> {
        let mut encoder = Encoder::new(
            config.to_audiopus_sample_rate(),
            config.to_audiopus_channels(),
            Application::Audio,
        )
        .map_err(|e| AppError::Capture(format!("Failed to create Opus encoder: {:?}", e)))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(config.bitrate as i32))
            .map_err(|e| AppError::Capture(format!("Failed to set bitrate: {:?}", e)))?;

        if config.fec {
            encoder
                .set_inband_fec(true)
                .map_err(|e| AppError::Capture(format!("Failed to enable FEC: {:?}", e)))?;
        }

        info!(
            "Opus encoder created: {}Hz {}ch {}bps",
            config.sample_rate, config.channels, config.bitrate
        );

        Ok(Self {
            config,
            encoder,
            output_buffer: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    /// Encode interleaved S16 PCM
    pub fn encode(&mut self, pcm: &[i16]) -> Result<OpusFrame> {
        let encoded_len = self
            .encoder
            .encode(pcm, &mut self.output_buffer)
            .map_err(|e| AppError::Capture(format!("Opus encode failed: {:?}", e)))?;

        let samples = pcm.len() as u64 / self.config.channels.max(1) as u64;
        let duration = Duration::from_micros(samples * 1_000_000 / self.config.sample_rate as u64);

        trace!("Encoded {} samples to {} bytes Opus", pcm.len(), encoded_len);

        Ok(OpusFrame {
            data: Bytes::copy_from_slice(&self.output_buffer[..encoded_len]),
            duration,
        })
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}
