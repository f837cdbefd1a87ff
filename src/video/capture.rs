//! V4L2 capture feeding an H.264 sample track

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::convert::YuyvConverter;
use super::device::VideoDevice;
use super::encoder::H264Encoder;
use crate::error::{AppError, Result};
use crate::media::{DeviceKind, MediaTrack, SampleTrack, VideoCodecParams};

/// Mmap buffers requested from the driver
const BUFFER_COUNT: u32 = 4;

/// Longest wait for a frame before the stop flag is checked again
const CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

/// Constrained baseline, packetization mode 1
const H264_FMTP: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// H.264 track captured from one V4L2 device
pub struct H264CaptureTrack {
    inner: SampleTrack,
    device_path: String,
}

impl H264CaptureTrack {
    /// Open the device and start the capture loop.
    ///
    /// Returns once the device and encoder are configured; open failures
    /// are returned here rather than from the loop.
    pub async fn open(device_path: &str, params: &VideoCodecParams) -> Result<Arc<Self>> {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: H264_FMTP.to_string(),
            rtcp_feedback: vec![],
        };

        let track = Arc::new(Self {
            inner: SampleTrack::new("video", DeviceKind::VideoInput, capability),
            device_path: device_path.to_string(),
        });

        let path = device_path.to_string();
        let params = params.clone();
        let sink = track.inner.sample_track();
        let stop_flag = track.inner.stop_flag();
        let handle = Handle::current();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            capture_loop(path, params, sink, stop_flag, handle, ready_tx);
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Video capture started on {}", device_path);
                Ok(track)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Capture(format!(
                "Video capture on {} exited during startup",
                device_path
            ))),
        }
    }
}

impl MediaTrack for H264CaptureTrack {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::VideoInput
    }

    fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.track_local()
    }

    fn close(&self) -> Result<()> {
        if !self.inner.is_closed() {
            info!("Stopping video capture on {}", self.device_path);
        }
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Device, converter and encoder ready for streaming
struct Pipeline {
    device: VideoDevice,
    converter: YuyvConverter,
    encoder: H264Encoder,
    frame_duration: Duration,
}

fn open_pipeline(path: &str, params: &VideoCodecParams) -> Result<Pipeline> {
    let device = VideoDevice::open(path)?;
    if !device.supports_yuyv() {
        return Err(AppError::Capture(format!(
            "Device {} does not offer YUYV capture",
            path
        )));
    }

    let (width, height) = device.set_yuyv_format(params.width, params.height)?;
    device.set_fps(params.fps);

    let negotiated = VideoCodecParams {
        width,
        height,
        ..params.clone()
    };
    let converter = YuyvConverter::new(width, height)?;
    let encoder = H264Encoder::new(&negotiated)?;

    Ok(Pipeline {
        device,
        converter,
        encoder,
        frame_duration: Duration::from_secs(1) / params.fps.max(1),
    })
}

fn capture_loop(
    path: String,
    params: VideoCodecParams,
    sink: Arc<TrackLocalStaticSample>,
    stop_flag: Arc<AtomicBool>,
    handle: Handle,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut pipeline = match open_pipeline(&path, &params) {
        Ok(p) => p,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut stream = match MmapStream::with_buffers(
        pipeline.device.inner(),
        Type::VideoCapture,
        BUFFER_COUNT,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(AppError::Capture(format!(
                "Failed to start streaming on {}: {}",
                path, e
            ))));
            return;
        }
    };
    stream.set_timeout(CAPTURE_TIMEOUT);
    let _ = ready.send(Ok(()));

    let result = run_capture(
        stream,
        &mut pipeline.converter,
        &mut pipeline.encoder,
        pipeline.frame_duration,
        &sink,
        &stop_flag,
        &handle,
    );
    if let Err(e) = result {
        error!("Video capture error on {}: {}", path, e);
    }
    debug!("Video capture loop on {} exited", path);
}

fn run_capture(
    mut stream: MmapStream<'_>,
    converter: &mut YuyvConverter,
    encoder: &mut H264Encoder,
    frame_duration: Duration,
    sink: &TrackLocalStaticSample,
    stop_flag: &AtomicBool,
    handle: &Handle,
) -> Result<()> {
    while !stop_flag.load(Ordering::Relaxed) {
        let (buf, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(e) if is_timeout(&e) => {
                debug!("No frame within {:?}", CAPTURE_TIMEOUT);
                continue;
            }
            Err(e) if is_device_lost(&e) => {
                return Err(AppError::Capture(format!("Video device lost: {}", e)));
            }
            Err(e) => {
                warn!("Capture error: {}", e);
                continue;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let frame = match converter.convert(&buf[..used]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping frame: {}", e);
                continue;
            }
        };

        let encoded = encoder.encode(frame)?;
        if encoded.data.is_empty() {
            continue;
        }

        let sample = Sample {
            data: encoded.data,
            duration: frame_duration,
            ..Default::default()
        };
        if let Err(e) = handle.block_on(sink.write_sample(&sample)) {
            debug!("Failed to write video sample: {}", e);
        }
    }

    Ok(())
}

/// No frame arrived before the stream timeout
fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Errors that mean the device is gone rather than a dropped frame
fn is_device_lost(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        // ENXIO, ENODEV, EIO, EPIPE, ESHUTDOWN
        Some(6) | Some(19) | Some(5) | Some(32) | Some(108)
    )
}
