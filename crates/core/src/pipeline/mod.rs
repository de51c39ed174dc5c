//! Producer and receiver graph construction.
//!
//! Both directions end in the same two core-owned sinks:
//!
//! - [`RenderSink`] validates decoded video and hands [`RenderFrame`]s to
//!   the application through a frame [`RelayQueue`].
//! - [`PacketSink`] wraps payloader output in [`TransportPacket`]s and
//!   queues them for the transport.
//!
//! Every other stage comes from the
//! [`ElementProvider`](crate::graph::provider::ElementProvider), by the
//! factory names in [`factory`].

pub mod decoders;
pub mod producer;
pub mod receiver;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::graph::{Buffer, FlowError, Sink};
use crate::media::{MediaKind, PerKind, RenderFrame, TransportPacket};
use crate::relay::{OverflowPolicy, RelayQueue};
use crate::session::{Direction, SessionConfig};

pub use decoders::{DEFAULT_DECODERS, DecoderAttacher, DecoderRule};
pub use producer::ProducerPipeline;
pub use receiver::{RECEIVER_CODECS, ReceiverPipeline, TransportSource};

/// Element factory names requested from the provider.
pub mod factory {
    pub const VIDEO_CONVERT: &str = "videoconvert";
    pub const AUDIO_CONVERT: &str = "audioconvert";
    pub const AUDIO_RESAMPLE: &str = "audioresample";
    pub const THEORA_ENC: &str = "theoraenc";
    pub const THEORA_PAY: &str = "rtptheorapay";
    pub const SPEEX_ENC: &str = "speexenc";
    pub const SPEEX_PAY: &str = "rtpspeexpay";
    pub const THEORA_DEC: &str = "theoradec";
    pub const SPEEX_DEC: &str = "speexdec";
    pub const VORBIS_DEC: &str = "vorbisdec";
    pub const THEORA_DEPAY: &str = "rtptheoradepay";
    pub const SPEEX_DEPAY: &str = "rtpspeexdepay";
    pub const VORBIS_DEPAY: &str = "rtpvorbisdepay";
    pub const JITTER_BUFFER: &str = "rtpjitterbuffer";
}

/// The queues one direction shares with the application.
///
/// | Direction | `frames` | `packets` |
/// |-----------|----------|-----------|
/// | Producer | local preview | outbound RTP |
/// | Receiver | decoded remote video | inbound RTP |
#[derive(Debug)]
pub struct Relays {
    pub direction: Direction,
    pub frames: Arc<RelayQueue<RenderFrame>>,
    pub packets: PerKind<Arc<RelayQueue<TransportPacket>>>,
    rejected_frames: Arc<AtomicU64>,
}

impl Relays {
    pub fn new(direction: Direction, config: &SessionConfig) -> Self {
        let frames = RelayQueue::new(config.frame_queue_capacity).with_policy(config.video_overflow);
        let packets = PerKind::from_fn(|kind| {
            let queue = match direction {
                Direction::Producer => RelayQueue::new(config.outbound_queue_capacity),
                Direction::Receiver => RelayQueue::new(config.inbound_queue_capacity),
            };
            let queue = match (direction, kind) {
                (Direction::Receiver, MediaKind::Audio) => {
                    queue.with_warmup_skip(config.audio_warmup_skip)
                }
                _ => queue,
            };
            Arc::new(queue.with_policy(OverflowPolicy::DropNewest))
        });
        Self {
            direction,
            frames: Arc::new(frames),
            packets,
            rejected_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn packets(&self, kind: MediaKind) -> &Arc<RelayQueue<TransportPacket>> {
        self.packets.get(kind)
    }

    /// Frames refused by this direction's render sink so far.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected_frames.load(Ordering::Relaxed)
    }

    pub fn render_sink(&self) -> RenderSink {
        RenderSink {
            direction: self.direction,
            frames: self.frames.clone(),
            rejected: self.rejected_frames.clone(),
        }
    }

    pub fn packet_sink(&self, kind: MediaKind) -> PacketSink {
        PacketSink {
            kind,
            packets: self.packets(kind).clone(),
        }
    }

    /// Drop everything queued, e.g. when the direction stops.
    pub fn clear(&self) {
        self.frames.clear();
        for kind in MediaKind::ALL {
            self.packets(kind).clear();
        }
    }
}

/// Validates decoded video and relays it to the application.
///
/// Buffers without dimensions, or whose length is not `width * height * 4`,
/// are logged and dropped. Rejection never fails the path.
pub struct RenderSink {
    direction: Direction,
    frames: Arc<RelayQueue<RenderFrame>>,
    rejected: Arc<AtomicU64>,
}

impl Sink for RenderSink {
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError> {
        let dimensions = buffer.video.map(|info| (info.width, info.height));
        match RenderFrame::from_parts(dimensions, buffer.data) {
            Ok(frame) => {
                let outcome = self.frames.push(frame);
                if !outcome.is_queued() {
                    tracing::trace!(direction = %self.direction, ?outcome, "frame queue full");
                }
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(direction = %self.direction, error = %e, "dropping frame");
            }
        }
        Ok(())
    }
}

/// Queues payloader output for the transport.
pub struct PacketSink {
    kind: MediaKind,
    packets: Arc<RelayQueue<TransportPacket>>,
}

impl Sink for PacketSink {
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError> {
        let outcome = self.packets.push(TransportPacket::new(self.kind, buffer.data));
        if !outcome.is_queued() {
            tracing::trace!(kind = %self.kind, ?outcome, "outbound packet dropped");
        }
        Ok(())
    }
}
