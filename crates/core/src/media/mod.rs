//! Media value types and the payload negotiation codec.
//!
//! Everything in this module is a plain value: once constructed it is
//! immutable and can be moved across a [`RelayQueue`](crate::relay::RelayQueue)
//! without further synchronisation.
//!
//! | Type | Module | Purpose |
//! |------|--------|---------|
//! | [`PayloadDescriptor`] | [`payload`] | Abstract codec/payload negotiation record |
//! | [`Structure`] | [`caps`] | String-keyed capability structure (caps text form) |
//! | [`RenderFrame`] | [`frame`] | Validated 32-bit RGB frame for display |
//! | [`TransportPacket`] | [`frame`] | Opaque RTP packet plus its channel kind |
//! | [`rtp::RtpHeader`] | [`rtp`] | RFC 3550 fixed header writer/reader |

pub mod caps;
pub mod frame;
pub mod payload;
pub mod rtp;

use std::fmt;

pub use caps::{FieldValue, Structure};
pub use frame::{FrameError, RenderFrame, TransportPacket};
pub use payload::{PAYLOAD_TYPE_UNSET, PayloadDescriptor};

/// Kind of media carried by a branch, packet or descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Both kinds, audio first. Graph construction iterates in this order.
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    /// Lower-case name as used in capability structures (`media=(string)audio`)
    /// and in the top-level type of a MIME name (`audio/x-speex`).
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Parse the top-level MIME type or `media` field value.
    pub fn from_media_type(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per [`MediaKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerKind<T> {
    pub audio: T,
    pub video: T,
}

impl<T> PerKind<T> {
    pub fn from_fn(mut f: impl FnMut(MediaKind) -> T) -> Self {
        Self {
            audio: f(MediaKind::Audio),
            video: f(MediaKind::Video),
        }
    }

    pub fn get(&self, kind: MediaKind) -> &T {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub fn get_mut(&mut self, kind: MediaKind) -> &mut T {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_round_trip() {
        for kind in MediaKind::ALL {
            assert_eq!(MediaKind::from_media_type(kind.as_str()), Some(kind));
        }
        assert_eq!(MediaKind::from_media_type("application"), None);
    }

    #[test]
    fn per_kind_indexing() {
        let mut map = PerKind::from_fn(|kind| kind.as_str().len());
        assert_eq!(*map.get(MediaKind::Video), 5);
        *map.get_mut(MediaKind::Audio) = 0;
        assert_eq!(map.audio, 0);
    }
}
