//! Session tuning and per-direction inputs.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigErrorKind, Result, SessionError};
use crate::media::{MediaKind, PayloadDescriptor};
use crate::relay::OverflowPolicy;

/// Queue sizes and timing shared by both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capacity of each decoded-frame queue (preview and receiver output).
    pub frame_queue_capacity: usize,
    /// Capacity of each outbound RTP packet queue.
    pub outbound_queue_capacity: usize,
    /// Capacity of each inbound RTP packet queue.
    pub inbound_queue_capacity: usize,
    /// What a full frame queue does with the next frame.
    pub video_overflow: OverflowPolicy,
    /// Inbound audio packets discarded before the first one is queued.
    pub audio_warmup_skip: usize,
    pub jitter_latency: Duration,
    /// How long to wait for payloaders to report their output caps.
    pub negotiation_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: 4,
            outbound_queue_capacity: 64,
            inbound_queue_capacity: 64,
            video_overflow: OverflowPolicy::DropNewest,
            audio_warmup_skip: 0,
            jitter_latency: Duration::from_millis(400),
            negotiation_timeout: Duration::from_secs(2),
        }
    }
}

/// Producer inputs: device selectors or a file, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerConfig {
    pub audio_input: Option<String>,
    pub video_input: Option<String>,
    pub file: Option<PathBuf>,
}

impl ProducerConfig {
    pub fn devices(audio: Option<&str>, video: Option<&str>) -> Self {
        Self {
            audio_input: audio.map(str::to_string),
            video_input: video.map(str::to_string),
            file: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Self::default()
        }
    }

    /// Device selector for `kind`, ignoring empty strings.
    pub fn selector(&self, kind: MediaKind) -> Option<&str> {
        let selector = match kind {
            MediaKind::Audio => self.audio_input.as_deref(),
            MediaKind::Video => self.video_input.as_deref(),
        };
        selector.filter(|s| !s.is_empty())
    }

    pub fn file_path(&self) -> Option<&std::path::Path> {
        self.file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        let has_device = MediaKind::ALL.iter().any(|k| self.selector(*k).is_some());
        match (has_device, self.file_path().is_some()) {
            (false, false) => Err(SessionError::Configuration(
                ConfigErrorKind::MissingProducerInput,
            )),
            (true, true) => Err(SessionError::Configuration(
                ConfigErrorKind::ConflictingProducerInputs,
            )),
            _ => Ok(()),
        }
    }
}

/// Receiver inputs: an optional audio output and the remote payload
/// descriptors to accept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// `None` discards decoded audio.
    pub audio_output: Option<String>,
    pub remote_audio: Option<PayloadDescriptor>,
    pub remote_video: Option<PayloadDescriptor>,
}

impl ReceiverConfig {
    pub fn remote(&self, kind: MediaKind) -> Option<&PayloadDescriptor> {
        match kind {
            MediaKind::Audio => self.remote_audio.as_ref(),
            MediaKind::Video => self.remote_video.as_ref(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote_audio.is_none() && self.remote_video.is_none() {
            return Err(SessionError::Configuration(
                ConfigErrorKind::MissingRemotePayload,
            ));
        }
        for kind in MediaKind::ALL {
            let Some(descriptor) = self.remote(kind) else {
                continue;
            };
            if descriptor.kind != kind {
                return Err(SessionError::Configuration(
                    ConfigErrorKind::PayloadKindMismatch {
                        expected: kind,
                        found: descriptor.kind,
                    },
                ));
            }
            if !descriptor.is_negotiated() {
                return Err(SessionError::Configuration(
                    ConfigErrorKind::UnsetPayloadType(kind),
                ));
            }
        }
        Ok(())
    }
}
