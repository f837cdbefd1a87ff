//! ALSA capture feeding an Opus sample track

use alsa::pcm::{Access, Format, Frames, HwParams, State, IO};
use alsa::{Direction, ValueOr, PCM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::encoder::{OpusConfig, OpusEncoder};
use crate::error::{AppError, Result};
use crate::media::{AudioCodecParams, DeviceKind, MediaTrack, SampleTrack};

/// ALSA capture configuration
#[derive(Debug, Clone)]
pub struct AudioCaptureConfig {
    /// ALSA device name (e.g. "hw:0,0" or "default")
    pub device_name: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// Samples per channel per read, one Opus frame
    pub frame_size: u32,
    /// Buffer size in frames
    pub buffer_frames: u32,
    /// Period size in frames
    pub period_frames: u32,
}

impl AudioCaptureConfig {
    pub fn new(device_name: &str, opus: &OpusConfig) -> Self {
        let frame_size = opus.frame_size() as u32;
        Self {
            device_name: device_name.to_string(),
            sample_rate: opus.sample_rate,
            channels: opus.channels,
            frame_size,
            buffer_frames: 4096,
            period_frames: frame_size,
        }
    }

    /// Interleaved samples per frame
    pub fn samples_per_frame(&self) -> usize {
        (self.frame_size * self.channels) as usize
    }
}

/// Open and configure a PCM for S16 interleaved capture
fn open_pcm(config: &AudioCaptureConfig) -> Result<PCM> {
    let pcm = PCM::new(&config.device_name, Direction::Capture, false).map_err(|e| {
        AppError::Capture(format!(
            "Failed to open audio device {}: {}",
            config.device_name, e
        ))
    })?;

    {
        let hwp = HwParams::any(&pcm)
            .map_err(|e| AppError::Capture(format!("Failed to get HwParams: {}", e)))?;
        hwp.set_channels(config.channels)
            .map_err(|e| AppError::Capture(format!("Failed to set channels: {}", e)))?;
        hwp.set_rate(config.sample_rate, ValueOr::Nearest)
            .map_err(|e| AppError::Capture(format!("Failed to set sample rate: {}", e)))?;
        hwp.set_format(Format::s16())
            .map_err(|e| AppError::Capture(format!("Failed to set format: {}", e)))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| AppError::Capture(format!("Failed to set access: {}", e)))?;
        hwp.set_buffer_size_near(config.buffer_frames as Frames)
            .map_err(|e| AppError::Capture(format!("Failed to set buffer size: {}", e)))?;
        hwp.set_period_size_near(config.period_frames as Frames, ValueOr::Nearest)
            .map_err(|e| AppError::Capture(format!("Failed to set period size: {}", e)))?;
        pcm.hw_params(&hwp)
            .map_err(|e| AppError::Capture(format!("Failed to apply hw params: {}", e)))?;
    }

    let actual_rate = pcm
        .hw_params_current()
        .map(|h| h.get_rate().unwrap_or(config.sample_rate))
        .unwrap_or(config.sample_rate);
    info!(
        "Audio capture configured on {}: {}Hz {}ch (requested {}Hz)",
        config.device_name, actual_rate, config.channels, config.sample_rate
    );

    pcm.prepare()
        .map_err(|e| AppError::Capture(format!("Failed to prepare PCM: {}", e)))?;

    Ok(pcm)
}

/// Opus track captured from one ALSA device
pub struct OpusCaptureTrack {
    inner: SampleTrack,
    device_name: String,
}

impl OpusCaptureTrack {
    /// Open the device and start the capture loop.
    ///
    /// Returns once the device is configured; open failures are returned
    /// here rather than from the loop.
    pub async fn open(device_name: &str, params: &AudioCodecParams) -> Result<Arc<Self>> {
        let opus = OpusConfig::from_params(params);
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: opus.sample_rate,
            channels: opus.channels as u16,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        };

        let track = Arc::new(Self {
            inner: SampleTrack::new("audio", DeviceKind::AudioInput, capability),
            device_name: device_name.to_string(),
        });

        let config = AudioCaptureConfig::new(device_name, &opus);
        let sink = track.inner.sample_track();
        let stop_flag = track.inner.stop_flag();
        let handle = Handle::current();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            capture_loop(config, opus, sink, stop_flag, handle, ready_tx);
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Audio capture started on {}", device_name);
                Ok(track)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Capture(format!(
                "Audio capture on {} exited during startup",
                device_name
            ))),
        }
    }
}

impl MediaTrack for OpusCaptureTrack {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::AudioInput
    }

    fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.track_local()
    }

    fn close(&self) -> Result<()> {
        if !self.inner.is_closed() {
            info!("Stopping audio capture on {}", self.device_name);
        }
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

fn capture_loop(
    config: AudioCaptureConfig,
    opus: OpusConfig,
    sink: Arc<TrackLocalStaticSample>,
    stop_flag: Arc<AtomicBool>,
    handle: Handle,
    ready: oneshot::Sender<Result<()>>,
) {
    let opened = open_pcm(&config).and_then(|pcm| Ok((pcm, OpusEncoder::new(opus)?)));
    let (pcm, mut encoder) = match opened {
        Ok(v) => {
            let _ = ready.send(Ok(()));
            v
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = run_capture(&config, &pcm, &mut encoder, &sink, &stop_flag, &handle) {
        error!("Audio capture error on {}: {}", config.device_name, e);
    }
    debug!("Audio capture loop on {} exited", config.device_name);
}

fn run_capture(
    config: &AudioCaptureConfig,
    pcm: &PCM,
    encoder: &mut OpusEncoder,
    sink: &TrackLocalStaticSample,
    stop_flag: &AtomicBool,
    handle: &Handle,
) -> Result<()> {
    let samples_per_frame = config.samples_per_frame();
    let mut samples = vec![0i16; samples_per_frame];
    // Samples accumulated towards one full Opus frame
    let mut filled = 0usize;

    while !stop_flag.load(Ordering::Relaxed) {
        match pcm.state() {
            State::XRun => {
                warn!("Audio buffer overrun, recovering");
                let _ = pcm.prepare();
                continue;
            }
            State::Suspended => {
                warn!("Audio device suspended, recovering");
                let _ = pcm.resume();
                continue;
            }
            _ => {}
        }

        // io_bytes works on USB devices that lack mmap support
        let io: IO<u8> = pcm.io_bytes();
        let buffer: &mut [u8] = bytemuck::cast_slice_mut(&mut samples[filled..]);
        match io.readi(buffer) {
            Ok(0) => continue,
            Ok(frames_read) => {
                filled += frames_read * config.channels as usize;
                if filled < samples_per_frame {
                    continue;
                }
                filled = 0;

                let frame = encoder.encode(&samples)?;
                let sample = Sample {
                    data: frame.data,
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(e) = handle.block_on(sink.write_sample(&sample)) {
                    debug!("Failed to write audio sample: {}", e);
                }
            }
            Err(e) => {
                warn!("Audio read failed: {}, recovering", e);
                pcm.try_recover(e, true)
                    .map_err(|e| AppError::Capture(format!("Audio read failed: {}", e)))?;
                filled = 0;
            }
        }
    }

    Ok(())
}
