//! Transport → jitter buffer → depayload → decode → render graph.
//!
//! ```text
//!  inbound RelayQueue ─▶ TransportSource ─▶ rtpjitterbuffer ─▶ <depay> ─▶ <dec> ─┬▶ videoconvert ─▶ RenderSink
//!   (application push)   (streaming thread,                                      └▶ audioconvert ─▶ audioresample ─▶ audio out | discard
//!                          RTP/pt filter)
//! ```
//!
//! One branch is built per remote [`PayloadDescriptor`]. The depayloader and
//! decoder are chosen from [`RECEIVER_CODECS`] by encoding name.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{Relays, factory};
use crate::error::GraphErrorKind;
use crate::graph::provider::{ElementProvider, require_element};
use crate::graph::{Buffer, Chain, DiscardSink, Element, Sink};
use crate::media::rtp::RtpPacket;
use crate::media::{FieldValue, MediaKind, PayloadDescriptor, TransportPacket};
use crate::relay::RelayQueue;
use crate::session::{ReceiverConfig, SessionConfig};

/// How long a streaming thread waits on its inbound queue before
/// re-checking whether it should exit.
const STREAMING_POLL: Duration = Duration::from_millis(50);

/// Depayloader and decoder for one RTP encoding name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverCodec {
    pub encoding_name: &'static str,
    pub depayloader: &'static str,
    pub decoder: &'static str,
}

pub const RECEIVER_CODECS: &[ReceiverCodec] = &[
    ReceiverCodec {
        encoding_name: "SPEEX",
        depayloader: factory::SPEEX_DEPAY,
        decoder: factory::SPEEX_DEC,
    },
    ReceiverCodec {
        encoding_name: "VORBIS",
        depayloader: factory::VORBIS_DEPAY,
        decoder: factory::VORBIS_DEC,
    },
    ReceiverCodec {
        encoding_name: "THEORA",
        depayloader: factory::THEORA_DEPAY,
        decoder: factory::THEORA_DEC,
    },
];

pub fn codec_for(encoding_name: &str) -> Option<&'static ReceiverCodec> {
    RECEIVER_CODECS
        .iter()
        .find(|c| c.encoding_name.eq_ignore_ascii_case(encoding_name))
}

/// Head of a receiver branch: admits RTP v2 packets of one payload type.
pub struct TransportSource {
    kind: MediaKind,
    payload_type: u8,
    chain: Chain,
}

impl TransportSource {
    pub fn new(kind: MediaKind, payload_type: u8, chain: Chain) -> Self {
        Self {
            kind,
            payload_type,
            chain,
        }
    }

    /// Feed one inbound packet. Returns whether it passed the filter.
    pub fn handle(&mut self, packet: TransportPacket) -> bool {
        match RtpPacket::parse(&packet.data) {
            Some(rtp) if rtp.pt == self.payload_type => {}
            Some(rtp) => {
                tracing::trace!(
                    kind = %self.kind,
                    pt = rtp.pt,
                    expected = self.payload_type,
                    "dropping packet with foreign payload type"
                );
                return false;
            }
            None => {
                tracing::trace!(kind = %self.kind, len = packet.len(), "dropping non-RTP packet");
                return false;
            }
        }
        if let Err(e) = self.chain.render(Buffer::new(packet.data)) {
            tracing::debug!(kind = %self.kind, error = %e, "inbound packet not rendered");
        }
        true
    }

    fn run(mut self, inbound: Arc<RelayQueue<TransportPacket>>, running: Arc<AtomicBool>) {
        tracing::debug!(kind = %self.kind, "streaming thread started");
        while running.load(Ordering::Acquire) {
            if let Some(packet) = inbound.pop_timeout(STREAMING_POLL) {
                self.handle(packet);
            }
        }
        tracing::debug!(kind = %self.kind, "streaming thread exiting");
    }
}

struct StreamingBranch {
    kind: MediaKind,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// A running receiver graph.
pub struct ReceiverPipeline {
    branches: Vec<StreamingBranch>,
}

impl ReceiverPipeline {
    /// Build one branch per supplied descriptor and start its streaming thread.
    pub fn build(
        provider: &Arc<dyn ElementProvider>,
        config: &ReceiverConfig,
        relays: &Relays,
        settings: &SessionConfig,
    ) -> Result<Self, GraphErrorKind> {
        let mut pipeline = ReceiverPipeline {
            branches: Vec::new(),
        };

        for kind in MediaKind::ALL {
            let Some(descriptor) = config.remote(kind) else {
                continue;
            };
            let spawned = build_source(provider.as_ref(), descriptor, config, relays, settings)
                .and_then(|source| spawn(source, kind, relays));
            match spawned {
                Ok(branch) => pipeline.branches.push(branch),
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "receiver graph construction failed");
                    pipeline.stop();
                    return Err(e);
                }
            }
        }
        if pipeline.branches.is_empty() {
            return Err(GraphErrorKind::NoActiveBranch);
        }

        tracing::info!(branches = pipeline.branches.len(), "receiver graph running");
        Ok(pipeline)
    }

    pub fn kinds(&self) -> Vec<MediaKind> {
        self.branches.iter().map(|b| b.kind).collect()
    }

    /// Stop every streaming thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        for branch in &self.branches {
            branch.running.store(false, Ordering::Release);
        }
        for mut branch in self.branches.drain(..) {
            if let Some(thread) = branch.thread.take() {
                if thread.join().is_err() {
                    tracing::warn!(kind = %branch.kind, "streaming thread panicked");
                }
            }
        }
    }
}

impl Drop for ReceiverPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_source(
    provider: &dyn ElementProvider,
    descriptor: &PayloadDescriptor,
    config: &ReceiverConfig,
    relays: &Relays,
    settings: &SessionConfig,
) -> Result<TransportSource, GraphErrorKind> {
    let kind = descriptor.kind;
    let codec = codec_for(&descriptor.encoding_name)
        .ok_or_else(|| GraphErrorKind::UnsupportedEncoding(descriptor.encoding_name.clone()))?;
    let caps = descriptor
        .to_structure()
        .map_err(|e| GraphErrorKind::LinkFailed(format!("{kind} transport caps: {e}")))?;
    let payload_type = u8::try_from(descriptor.payload_type)
        .map_err(|_| GraphErrorKind::LinkFailed(format!("{kind} payload type")))?;

    let mut elements: Vec<Box<dyn Element>> = Vec::new();
    match provider.make_element(factory::JITTER_BUFFER) {
        Some(mut jitter) => {
            let latency = u32::try_from(settings.jitter_latency.as_millis()).unwrap_or(u32::MAX);
            if !jitter.set_property("latency", FieldValue::UInt(latency)) {
                tracing::debug!(kind = %kind, "jitter buffer ignores latency");
            }
            elements.push(jitter);
        }
        None => tracing::debug!(kind = %kind, "no jitter buffer available"),
    }

    let depayloader = require_element(provider, codec.depayloader)?;
    if !depayloader.accepts(&caps) {
        return Err(GraphErrorKind::LinkFailed(format!(
            "{} refuses {caps}",
            codec.depayloader
        )));
    }
    elements.push(depayloader);
    elements.push(require_element(provider, codec.decoder)?);

    let sink: Box<dyn Sink> = match kind {
        MediaKind::Video => {
            elements.push(require_element(provider, factory::VIDEO_CONVERT)?);
            Box::new(relays.render_sink())
        }
        MediaKind::Audio => {
            elements.push(require_element(provider, factory::AUDIO_CONVERT)?);
            elements.push(require_element(provider, factory::AUDIO_RESAMPLE)?);
            audio_output(provider, config.audio_output.as_deref())
        }
    };

    tracing::debug!(kind = %kind, caps = %caps, "receiver branch built");
    Ok(TransportSource::new(kind, payload_type, Chain::new(elements, sink)))
}

fn audio_output(provider: &dyn ElementProvider, selector: Option<&str>) -> Box<dyn Sink> {
    match selector.filter(|s| !s.is_empty()) {
        Some(selector) => provider
            .make_render(selector, MediaKind::Audio)
            .unwrap_or_else(|| {
                tracing::warn!(selector, "audio output unavailable, discarding decoded audio");
                Box::new(DiscardSink::default())
            }),
        None => Box::new(DiscardSink::default()),
    }
}

fn spawn(
    source: TransportSource,
    kind: MediaKind,
    relays: &Relays,
) -> Result<StreamingBranch, GraphErrorKind> {
    let running = Arc::new(AtomicBool::new(true));
    let inbound = relays.packets(kind).clone();
    let flag = running.clone();
    let thread = std::thread::Builder::new()
        .name(format!("avsession-rx-{kind}"))
        .spawn(move || source.run(inbound, flag))
        .map_err(|e| GraphErrorKind::ThreadSpawn(e.to_string()))?;
    Ok(StreamingBranch {
        kind,
        running,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FnSink;
    use crate::graph::FlowError;
    use crate::media::rtp::RtpHeader;
    use crate::session::Direction;
    use crate::testsrc::SyntheticProvider;
    use parking_lot::Mutex;

    fn rtp(pt: u8, payload: &[u8]) -> TransportPacket {
        let mut header = RtpHeader::new(pt, 1);
        let mut data = header.write(true).to_vec();
        data.extend_from_slice(payload);
        TransportPacket::new(MediaKind::Audio, data)
    }

    #[test]
    fn codec_lookup_ignores_case() {
        assert_eq!(codec_for("theora").unwrap().decoder, factory::THEORA_DEC);
        assert_eq!(codec_for("SPEEX").unwrap().depayloader, factory::SPEEX_DEPAY);
        assert!(codec_for("H264").is_none());
    }

    #[test]
    fn transport_source_filters_payload_type() {
        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();
        let sink = FnSink(move |_b: Buffer| -> Result<(), FlowError> {
            *counter.lock() += 1;
            Ok(())
        });
        let mut source = TransportSource::new(MediaKind::Audio, 110, Chain::new(Vec::new(), Box::new(sink)));

        assert!(source.handle(rtp(110, b"ok")));
        assert!(!source.handle(rtp(111, b"foreign")));
        assert!(!source.handle(TransportPacket::new(MediaKind::Audio, &b"junk"[..])));
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn unsupported_encoding_fails() {
        let provider: Arc<dyn ElementProvider> = Arc::new(SyntheticProvider::new());
        let config = ReceiverConfig {
            remote_video: Some(PayloadDescriptor::new(MediaKind::Video, 96, "H264")),
            ..ReceiverConfig::default()
        };
        let relays = Relays::new(Direction::Receiver, &SessionConfig::default());
        let err = ReceiverPipeline::build(&provider, &config, &relays, &SessionConfig::default())
            .err()
            .unwrap();
        assert_eq!(err, GraphErrorKind::UnsupportedEncoding("H264".to_string()));
    }

    #[test]
    fn missing_audio_output_falls_back_to_discard() {
        let provider: Arc<dyn ElementProvider> = Arc::new(SyntheticProvider::new());
        let config = ReceiverConfig {
            audio_output: Some("no-such-speakers".to_string()),
            remote_audio: Some(
                PayloadDescriptor::new(MediaKind::Audio, 110, "SPEEX").with_clock_rate(16000),
            ),
            ..ReceiverConfig::default()
        };
        let relays = Relays::new(Direction::Receiver, &SessionConfig::default());
        let mut pipeline =
            ReceiverPipeline::build(&provider, &config, &relays, &SessionConfig::default())
                .unwrap();
        assert_eq!(pipeline.kinds(), vec![MediaKind::Audio]);
        pipeline.stop();
        pipeline.stop();
        assert!(pipeline.kinds().is_empty());
    }

    #[test]
    fn jitter_buffer_is_optional() {
        let provider: Arc<dyn ElementProvider> =
            Arc::new(SyntheticProvider::new().without_element(factory::JITTER_BUFFER));
        let config = ReceiverConfig {
            remote_video: Some(PayloadDescriptor::new(MediaKind::Video, 96, "THEORA")),
            ..ReceiverConfig::default()
        };
        let relays = Relays::new(Direction::Receiver, &SessionConfig::default());
        assert!(
            ReceiverPipeline::build(&provider, &config, &relays, &SessionConfig::default()).is_ok()
        );
    }
}
