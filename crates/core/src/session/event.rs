use crate::error::GraphErrorKind;
use crate::media::{MediaKind, PayloadDescriptor};

use super::Direction;

/// Asynchronous notification from a [`MediaSession`](super::MediaSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The direction's graph is running. For the producer, `payloads` holds
    /// one negotiated descriptor per active media kind; for the receiver it
    /// is empty.
    Started {
        direction: Direction,
        payloads: Vec<PayloadDescriptor>,
    },
    /// The direction's graph was torn down and is back to idle.
    Stopped { direction: Direction },
    /// Graph construction failed; the direction is back to idle.
    Error {
        direction: Direction,
        code: GraphErrorKind,
        message: String,
    },
    /// A frame queue went from empty to non-empty. At most one is pending
    /// per queue until it is taken from the session.
    FrameAvailable { direction: Direction },
    /// An outbound packet queue went from empty to non-empty. Coalesced
    /// like `FrameAvailable`.
    PacketAvailable { kind: MediaKind },
}

impl SessionEvent {
    /// Direction the event concerns; `None` for packet notifications,
    /// which only the producer emits.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            SessionEvent::Started { direction, .. }
            | SessionEvent::Stopped { direction }
            | SessionEvent::Error { direction, .. }
            | SessionEvent::FrameAvailable { direction } => Some(*direction),
            SessionEvent::PacketAvailable { .. } => None,
        }
    }

    /// Whether this is a `started`, `stopped` or `error` event.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            SessionEvent::Started { .. } | SessionEvent::Stopped { .. } | SessionEvent::Error { .. }
        )
    }
}
