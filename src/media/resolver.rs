//! Device identifier resolution
//!
//! Users name devices by id, by label, or by the decoded form of a
//! hex-encoded label. Resolution works on an enumeration snapshot and never
//! touches the devices themselves.

use tracing::{debug, info};

use super::types::{DeviceInfo, DeviceKind};
use crate::error::{AppError, Result};

/// Device ids to capture from, built once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub video_device_id: Option<String>,
    pub audio_device_id: Option<String>,
}

impl ResolvedConfig {
    /// Build a config; at least one device id must be present
    pub fn new(video_device_id: Option<String>, audio_device_id: Option<String>) -> Result<Self> {
        if video_device_id.is_none() && audio_device_id.is_none() {
            return Err(AppError::Config(
                "no video or audio device selected".to_string(),
            ));
        }
        Ok(Self {
            video_device_id,
            audio_device_id,
        })
    }
}

/// Resolve `identifier` to the id of a device of the given kind.
///
/// Priority: exact id, then exact label, then hex-decoded label. The first
/// device in enumeration order wins within each pass. An empty identifier
/// means "not requested" and never matches.
pub fn resolve(identifier: &str, kind: DeviceKind, devices: &[DeviceInfo]) -> Option<String> {
    if identifier.is_empty() {
        return None;
    }

    let of_kind = || devices.iter().filter(move |d| d.kind == kind);

    if let Some(dev) = of_kind().find(|d| d.device_id == identifier) {
        info!("Found {} device by id: '{}' ({})", kind, dev.device_id, dev.label);
        return Some(dev.device_id.clone());
    }

    if let Some(dev) = of_kind().find(|d| d.label == identifier) {
        info!(
            "Found {} device by label: '{}' -> '{}'",
            kind, identifier, dev.device_id
        );
        return Some(dev.device_id.clone());
    }

    let by_hex = of_kind().find(|d| match hex::decode(&d.label) {
        Ok(bytes) => bytes == identifier.as_bytes(),
        Err(_) => false,
    });
    if let Some(dev) = by_hex {
        info!(
            "Found {} device by hex label: '{}' -> '{}'",
            kind, identifier, dev.device_id
        );
        return Some(dev.device_id.clone());
    }

    debug!("No {} device matches '{}'", kind, identifier);
    None
}

/// Validate the requested identifiers against a device snapshot.
///
/// Every non-empty identifier must resolve, and at least one must be given.
pub fn resolve_config(
    video_identifier: Option<&str>,
    audio_identifier: Option<&str>,
    devices: &[DeviceInfo],
) -> Result<ResolvedConfig> {
    let video_identifier = video_identifier.filter(|s| !s.is_empty());
    let audio_identifier = audio_identifier.filter(|s| !s.is_empty());

    if video_identifier.is_none() && audio_identifier.is_none() {
        return Err(AppError::Config(
            "specify a video and/or audio device identifier, or use --list-devices".to_string(),
        ));
    }

    let lookup = |identifier: Option<&str>, kind: DeviceKind| -> Result<Option<String>> {
        match identifier {
            None => Ok(None),
            Some(id) => resolve(id, kind, devices).map(Some).ok_or_else(|| {
                AppError::DeviceNotFound {
                    kind: kind.media_name().to_string(),
                    identifier: id.to_string(),
                }
            }),
        }
    };

    let video = lookup(video_identifier, DeviceKind::VideoInput)?;
    let audio = lookup(audio_identifier, DeviceKind::AudioInput)?;
    ResolvedConfig::new(video, audio)
}

/// Human-readable form of a device label.
///
/// Labels that hex-decode to printable ASCII are shown decoded, with the raw
/// label kept alongside.
pub fn display_label(label: &str) -> String {
    match hex::decode(label) {
        Ok(bytes) if !bytes.is_empty() && bytes.iter().all(|b| (32..=126).contains(b)) => {
            format!("{} (hex: {})", String::from_utf8_lossy(&bytes), label)
        }
        _ => label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, label: &str) -> DeviceInfo {
        DeviceInfo::new(id, label, DeviceKind::VideoInput)
    }

    fn audio(id: &str, label: &str) -> DeviceInfo {
        DeviceInfo::new(id, label, DeviceKind::AudioInput)
    }

    #[test]
    fn test_exact_id_wins_over_label_collision() {
        // The first device's label equals the second device's id
        let devices = vec![video("cam-a", "cam-b"), video("cam-b", "Other camera")];
        assert_eq!(
            resolve("cam-b", DeviceKind::VideoInput, &devices),
            Some("cam-b".to_string())
        );
    }

    #[test]
    fn test_label_match() {
        let devices = vec![video("/dev/video0", "HD Webcam"), video("/dev/video2", "USB Capture")];
        assert_eq!(
            resolve("USB Capture", DeviceKind::VideoInput, &devices),
            Some("/dev/video2".to_string())
        );
    }

    #[test]
    fn test_hex_label_returns_real_id() {
        // "Mic" hex-encoded
        let devices = vec![audio("hw:1,0", "4d6963")];
        assert_eq!(
            resolve("Mic", DeviceKind::AudioInput, &devices),
            Some("hw:1,0".to_string())
        );
    }

    #[test]
    fn test_invalid_hex_labels_are_skipped() {
        let devices = vec![audio("hw:0,0", "not hex!"), audio("hw:1,0", "4d6963")];
        assert_eq!(
            resolve("Mic", DeviceKind::AudioInput, &devices),
            Some("hw:1,0".to_string())
        );
    }

    #[test]
    fn test_kind_filter() {
        let devices = vec![audio("shared-id", "Mic"), video("cam", "Camera")];
        assert_eq!(resolve("shared-id", DeviceKind::VideoInput, &devices), None);
        assert_eq!(
            resolve("shared-id", DeviceKind::AudioInput, &devices),
            Some("shared-id".to_string())
        );
    }

    #[test]
    fn test_first_match_in_enumeration_order() {
        let devices = vec![video("/dev/video0", "Camera"), video("/dev/video1", "Camera")];
        assert_eq!(
            resolve("Camera", DeviceKind::VideoInput, &devices),
            Some("/dev/video0".to_string())
        );
    }

    #[test]
    fn test_empty_identifier_never_matches() {
        // An empty label (and empty hex decode) would otherwise match
        let devices = vec![video("", ""), video("/dev/video0", "")];
        assert_eq!(resolve("", DeviceKind::VideoInput, &devices), None);
    }

    #[test]
    fn test_resolve_config() {
        let devices = vec![video("/dev/video0", "Camera"), audio("hw:1,0", "Mic")];

        let config = resolve_config(Some("Camera"), None, &devices).unwrap();
        assert_eq!(config.video_device_id.as_deref(), Some("/dev/video0"));
        assert_eq!(config.audio_device_id, None);

        let config = resolve_config(Some(""), Some("Mic"), &devices).unwrap();
        assert_eq!(config.video_device_id, None);
        assert_eq!(config.audio_device_id.as_deref(), Some("hw:1,0"));
    }

    #[test]
    fn test_resolve_config_errors() {
        let devices = vec![video("/dev/video0", "Camera")];

        assert!(matches!(
            resolve_config(None, None, &devices),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            resolve_config(Some("Camera"), Some("Mic"), &devices),
            Err(AppError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_resolved_config_requires_a_device() {
        assert!(ResolvedConfig::new(None, None).is_err());
        assert!(ResolvedConfig::new(Some("/dev/video0".into()), None).is_ok());
    }

    #[test]
    fn test_display_label() {
        assert_eq!(display_label("4d6963"), "Mic (hex: 4d6963)");
        assert_eq!(display_label("HD Webcam"), "HD Webcam");
        // Decodes, but not printable
        assert_eq!(display_label("0001"), "0001");
        assert_eq!(display_label(""), "");
    }
}
