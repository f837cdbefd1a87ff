//! Audio device enumeration using ALSA

use alsa::pcm::HwParams;
use alsa::{Direction, PCM};
use tracing::{debug, info};

use crate::error::Result;
use crate::media::{DeviceInfo, DeviceKind};

/// Devices probed per card
const MAX_DEVICES_PER_CARD: i32 = 8;

/// Enumerate available audio capture devices.
///
/// The ALSA `default` device comes first, followed by every `hw:card,dev`
/// that opens for capture and reports at least one rate and channel count.
pub fn enumerate_audio_devices() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    if let Ok(pcm) = PCM::new("default", Direction::Capture, false) {
        if supports_capture(&pcm) {
            devices.push(DeviceInfo::new(
                "default",
                "Default Audio Device",
                DeviceKind::AudioInput,
            ));
        }
    }

    for card_result in alsa::card::Iter::new() {
        let card = match card_result {
            Ok(c) => c,
            Err(e) => {
                debug!("Error iterating card: {}", e);
                continue;
            }
        };

        let card_index = card.get_index();
        let card_name = card.get_name().unwrap_or_else(|_| "Unknown".to_string());
        let card_longname = card.get_longname().unwrap_or_else(|_| card_name.clone());

        debug!("Found audio card {}: {}", card_index, card_longname);

        for device_index in 0..MAX_DEVICES_PER_CARD {
            let device_name = alsa_name(card_index, device_index);

            match PCM::new(&device_name, Direction::Capture, false) {
                Ok(pcm) if supports_capture(&pcm) => {
                    devices.push(DeviceInfo::new(
                        device_name,
                        format!("{} - Device {}", card_name, device_index),
                        DeviceKind::AudioInput,
                    ));
                }
                _ => continue,
            }
        }
    }

    info!("Found {} audio capture devices", devices.len());
    Ok(devices)
}

/// ALSA hardware device name
pub fn alsa_name(card_index: i32, device_index: i32) -> String {
    format!("hw:{},{}", card_index, device_index)
}

/// Whether the device accepts any common rate and channel count
fn supports_capture(pcm: &PCM) -> bool {
    let hwp = match HwParams::any(pcm) {
        Ok(h) => h,
        Err(_) => return false,
    };

    let common_rates = [8000, 16000, 22050, 44100, 48000, 96000];
    let has_rate = common_rates.iter().any(|r| hwp.test_rate(*r).is_ok());
    let has_channels = (1..=8).any(|ch| hwp.test_channels(ch).is_ok());

    has_rate && has_channels
}
