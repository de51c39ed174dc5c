//! Capture/file → encode → payload → transport graph.
//!
//! ```text
//! video:  capture ─▶ videoconvert ─▶ tee ─┬─▶ videoconvert ─▶ RenderSink (preview)
//!                                         └─▶ theoraenc ─▶ rtptheorapay ─▶ PacketSink
//! audio:  capture ─▶ audioconvert ─▶ audioresample ─▶ speexenc ─▶ rtpspeexpay ─▶ PacketSink
//!
//! file:   demux ─┬─▶ <decoder> ─▶ (video branch above, from videoconvert)
//!                └─▶ <decoder> ─▶ (audio branch above, from audioconvert)
//! ```
//!
//! Once the graph runs, each payloader's output caps are read back and
//! converted into the [`PayloadDescriptor`]s announced with `started`.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::decoders::DecoderAttacher;
use super::{Relays, factory};
use crate::error::GraphErrorKind;
use crate::graph::provider::{CaptureSource, ElementProvider, FileSource, require_element};
use crate::graph::{Chain, Pad, Tee};
use crate::media::{FieldValue, MediaKind, PayloadDescriptor, PerKind};
use crate::session::{ProducerConfig, SessionConfig};

const CAPS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One media kind's stages, from the convert stage to the transport sink.
struct Branch {
    kind: MediaKind,
    /// Where raw (or decoded) buffers enter.
    head: Pad,
    /// The encode/payload path, kept for reading negotiated caps.
    transmit: Arc<Mutex<Chain>>,
}

/// A running producer graph.
pub struct ProducerPipeline {
    captures: Vec<Box<dyn CaptureSource>>,
    file: Option<Box<dyn FileSource>>,
    payloads: Vec<PayloadDescriptor>,
}

impl ProducerPipeline {
    /// Build and start the graph, then wait for payload negotiation.
    ///
    /// Waiting ends early with [`GraphErrorKind::Cancelled`] once `closing`
    /// is set. On failure everything already started is torn down before
    /// returning.
    pub fn build(
        provider: &Arc<dyn ElementProvider>,
        config: &ProducerConfig,
        relays: &Relays,
        settings: &SessionConfig,
        closing: &AtomicBool,
    ) -> Result<Self, GraphErrorKind> {
        let mut pipeline = ProducerPipeline {
            captures: Vec::new(),
            file: None,
            payloads: Vec::new(),
        };

        let result = match config.file_path() {
            Some(path) => pipeline.start_file(provider, path, relays, settings, closing),
            None => pipeline.start_devices(provider, config, relays, settings, closing),
        };
        if let Err(kind) = result {
            tracing::warn!(error = %kind, "producer graph construction failed");
            pipeline.stop();
            return Err(kind);
        }

        tracing::info!(payloads = pipeline.payloads.len(), "producer graph running");
        Ok(pipeline)
    }

    /// Descriptors negotiated by the payloaders, one per active kind.
    pub fn payloads(&self) -> &[PayloadDescriptor] {
        &self.payloads
    }

    /// Tear the graph down. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.captures.is_empty() && self.file.is_none() {
            return;
        }
        for mut capture in self.captures.drain(..) {
            tracing::debug!(capture = capture.name(), "stopping capture");
            capture.stop();
        }
        if let Some(mut file) = self.file.take() {
            file.stop();
        }
        self.payloads.clear();
        tracing::debug!("producer graph torn down");
    }

    fn start_devices(
        &mut self,
        provider: &Arc<dyn ElementProvider>,
        config: &ProducerConfig,
        relays: &Relays,
        settings: &SessionConfig,
        closing: &AtomicBool,
    ) -> Result<(), GraphErrorKind> {
        let mut branches = Vec::new();
        for kind in MediaKind::ALL {
            let Some(selector) = config.selector(kind) else {
                continue;
            };
            let Some(capture) = provider.make_capture(selector, kind) else {
                tracing::warn!(kind = %kind, selector, "capture device unavailable, branch skipped");
                continue;
            };
            let branch = build_branch(provider.as_ref(), kind, relays)?;
            branches.push((capture, branch));
        }
        if branches.is_empty() {
            return Err(GraphErrorKind::NoActiveBranch);
        }

        let mut running = Vec::with_capacity(branches.len());
        for (mut capture, branch) in branches {
            capture.start(branch.head.clone())?;
            tracing::debug!(kind = %branch.kind, capture = capture.name(), "capture started");
            self.captures.push(capture);
            running.push(branch);
        }

        self.payloads = negotiate(&running, settings.negotiation_timeout, closing)?;
        Ok(())
    }

    fn start_file(
        &mut self,
        provider: &Arc<dyn ElementProvider>,
        path: &Path,
        relays: &Relays,
        settings: &SessionConfig,
        closing: &AtomicBool,
    ) -> Result<(), GraphErrorKind> {
        let mut branches = Vec::new();
        for kind in MediaKind::ALL {
            branches.push(build_branch(provider.as_ref(), kind, relays)?);
        }

        let mut file = provider.make_file_source(path).ok_or_else(|| {
            GraphErrorKind::SourceFailed(format!("cannot open {}", path.display()))
        })?;

        let targets = PerKind::from_fn(|kind| {
            branches
                .iter()
                .find(|b| b.kind == kind)
                .map(|b| b.head.clone())
        });
        let attacher = Arc::new(DecoderAttacher::new(provider.clone(), targets));
        file.start(attacher.clone())?;
        self.file = Some(file);
        tracing::debug!(path = %path.display(), "file source started");

        // Streams may be announced from the demuxer's thread.
        let deadline = Instant::now() + settings.negotiation_timeout;
        while !attacher.all_attached() && !attacher.streams_complete() {
            if closing.load(Ordering::Acquire) {
                return Err(GraphErrorKind::Cancelled);
            }
            if Instant::now() >= deadline {
                tracing::warn!(path = %path.display(), "stream discovery incomplete at deadline");
                break;
            }
            std::thread::sleep(CAPS_POLL_INTERVAL);
        }
        if MediaKind::ALL.iter().all(|k| attacher.attached(*k).is_none()) {
            return Err(GraphErrorKind::NoActiveBranch);
        }

        let attached: Vec<Branch> = branches
            .into_iter()
            .filter(|b| attacher.attached(b.kind).is_some())
            .collect();
        self.payloads = negotiate(&attached, settings.negotiation_timeout, closing)?;
        Ok(())
    }
}

impl Drop for ProducerPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_branch(
    provider: &dyn ElementProvider,
    kind: MediaKind,
    relays: &Relays,
) -> Result<Branch, GraphErrorKind> {
    let packets = Box::new(relays.packet_sink(kind));
    match kind {
        MediaKind::Video => {
            let transmit = Arc::new(Mutex::new(Chain::new(
                vec![
                    require_element(provider, factory::THEORA_ENC)?,
                    require_element(provider, factory::THEORA_PAY)?,
                ],
                packets,
            )));
            let preview = Chain::new(
                vec![require_element(provider, factory::VIDEO_CONVERT)?],
                Box::new(relays.render_sink()),
            );
            let tee = Tee::new()
                .branch("preview", Box::new(preview))
                .branch("transmit", Box::new(Pad::from_shared(transmit.clone())));

            let mut convert = require_element(provider, factory::VIDEO_CONVERT)?;
            if !convert.set_property("format", FieldValue::from("RGB")) {
                tracing::debug!("videoconvert has no format property, encoder gets its default");
            }
            let head = Pad::new(Chain::new(vec![convert], Box::new(tee)));
            Ok(Branch {
                kind,
                head,
                transmit,
            })
        }
        MediaKind::Audio => {
            let transmit = Arc::new(Mutex::new(Chain::new(
                vec![
                    require_element(provider, factory::AUDIO_CONVERT)?,
                    require_element(provider, factory::AUDIO_RESAMPLE)?,
                    require_element(provider, factory::SPEEX_ENC)?,
                    require_element(provider, factory::SPEEX_PAY)?,
                ],
                packets,
            )));
            Ok(Branch {
                kind,
                head: Pad::from_shared(transmit.clone()),
                transmit,
            })
        }
    }
}

/// Poll each branch's payloader until it reports caps, then decode them.
fn negotiate(
    branches: &[Branch],
    timeout: Duration,
    closing: &AtomicBool,
) -> Result<Vec<PayloadDescriptor>, GraphErrorKind> {
    let deadline = Instant::now() + timeout;
    let mut payloads = Vec::with_capacity(branches.len());

    for branch in branches {
        let caps = loop {
            if let Some(caps) = branch.transmit.lock().negotiated_caps() {
                break caps;
            }
            if closing.load(Ordering::Acquire) {
                return Err(GraphErrorKind::Cancelled);
            }
            if Instant::now() >= deadline {
                tracing::warn!(kind = %branch.kind, ?timeout, "payloader never reported caps");
                return Err(GraphErrorKind::NegotiationFailed(branch.kind));
            }
            std::thread::sleep(CAPS_POLL_INTERVAL);
        };
        tracing::debug!(kind = %branch.kind, caps = %caps, "payloader caps negotiated");

        let descriptor = PayloadDescriptor::from_structure(&caps).map_err(|e| {
            tracing::warn!(kind = %branch.kind, error = %e, "unusable payloader caps");
            GraphErrorKind::NegotiationFailed(branch.kind)
        })?;
        payloads.push(descriptor);
    }
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Direction;
    use crate::testsrc::{SyntheticProvider, VirtualStream};

    fn open() -> AtomicBool {
        AtomicBool::new(false)
    }

    fn relays() -> Relays {
        Relays::new(Direction::Producer, &SessionConfig::default())
    }

    fn provider(p: SyntheticProvider) -> Arc<dyn ElementProvider> {
        Arc::new(p)
    }

    #[test]
    fn video_only_negotiates_theora() {
        let provider = provider(SyntheticProvider::new());
        let relays = relays();
        let config = ProducerConfig::devices(None, Some(SyntheticProvider::VIDEO_DEVICE));

        let mut pipeline = ProducerPipeline::build(
            &provider,
            &config,
            &relays,
            &SessionConfig::default(),
            &open(),
        )
        .unwrap();
        let payloads = pipeline.payloads().to_vec();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].kind, MediaKind::Video);
        assert_eq!(payloads[0].encoding_name, "THEORA");
        assert!(payloads[0].is_negotiated());
        assert!(payloads[0].parameter("configuration").is_some());

        pipeline.stop();
        pipeline.stop();
        assert!(pipeline.payloads().is_empty());
    }

    #[test]
    fn unknown_devices_leave_no_branch() {
        let provider = provider(SyntheticProvider::new());
        let config = ProducerConfig::devices(Some("nope"), Some("nope"));
        let err = ProducerPipeline::build(
            &provider,
            &config,
            &relays(),
            &SessionConfig::default(),
            &open(),
        )
        .err()
        .unwrap();
        assert_eq!(err, GraphErrorKind::NoActiveBranch);
    }

    #[test]
    fn missing_codec_fails_construction() {
        let provider = provider(SyntheticProvider::new().without_element(factory::SPEEX_ENC));
        let config = ProducerConfig::devices(Some(SyntheticProvider::AUDIO_DEVICE), None);
        let err = ProducerPipeline::build(
            &provider,
            &config,
            &relays(),
            &SessionConfig::default(),
            &open(),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            GraphErrorKind::ElementUnavailable(factory::SPEEX_ENC.to_string())
        );
    }

    #[test]
    fn unavailable_audio_device_keeps_video() {
        let provider = provider(SyntheticProvider::new());
        let config = ProducerConfig::devices(Some("missing-mic"), Some(SyntheticProvider::VIDEO_DEVICE));
        let pipeline = ProducerPipeline::build(
            &provider,
            &config,
            &relays(),
            &SessionConfig::default(),
            &open(),
        )
        .unwrap();
        let kinds: Vec<_> = pipeline.payloads().iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![MediaKind::Video]);
    }

    #[test]
    fn file_with_two_audio_streams_uses_first() {
        let synthetic = Arc::new(SyntheticProvider::new().with_file(
            "clip.ogg",
            vec![
                VirtualStream::new("audio-0", "audio/x-speex"),
                VirtualStream::new("audio-1", "audio/x-vorbis"),
            ],
        ));
        let provider: Arc<dyn ElementProvider> = synthetic.clone();
        let pipeline = ProducerPipeline::build(
            &provider,
            &ProducerConfig::file("clip.ogg"),
            &relays(),
            &SessionConfig::default(),
            &open(),
        )
        .unwrap();

        assert_eq!(pipeline.payloads().len(), 1);
        assert_eq!(pipeline.payloads()[0].encoding_name, "SPEEX");
        let created = synthetic.created_elements();
        assert!(created.contains(&factory::SPEEX_DEC.to_string()));
        assert!(!created.contains(&factory::VORBIS_DEC.to_string()));
    }

    #[test]
    fn file_stream_announced_late_is_negotiated() {
        let synthetic = Arc::new(SyntheticProvider::new().with_file(
            "late.ogg",
            vec![
                VirtualStream::new("audio-0", "audio/x-speex"),
                VirtualStream::new("video-0", "video/x-theora")
                    .announced_after(Duration::from_millis(30)),
            ],
        ));
        let provider: Arc<dyn ElementProvider> = synthetic.clone();
        let pipeline = ProducerPipeline::build(
            &provider,
            &ProducerConfig::file("late.ogg"),
            &relays(),
            &SessionConfig::default(),
            &open(),
        )
        .unwrap();

        let names: Vec<_> = pipeline
            .payloads()
            .iter()
            .map(|p| (p.kind, p.encoding_name.clone()))
            .collect();
        assert_eq!(
            names,
            vec![
                (MediaKind::Audio, "SPEEX".to_string()),
                (MediaKind::Video, "THEORA".to_string()),
            ]
        );
        assert!(pipeline.payloads().iter().all(|p| p.is_negotiated()));
    }

    #[test]
    fn closing_session_cancels_stream_discovery() {
        let provider = provider(SyntheticProvider::new().with_file(
            "slow.ogg",
            vec![VirtualStream::new("video-0", "video/x-theora")
                .announced_after(Duration::from_secs(30))],
        ));
        let settings = SessionConfig {
            negotiation_timeout: Duration::from_secs(30),
            ..SessionConfig::default()
        };

        let started = Instant::now();
        let err = ProducerPipeline::build(
            &provider,
            &ProducerConfig::file("slow.ogg"),
            &relays(),
            &settings,
            &AtomicBool::new(true),
        )
        .err()
        .unwrap();
        assert_eq!(err, GraphErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_file_fails() {
        let provider = provider(SyntheticProvider::new());
        let err = ProducerPipeline::build(
            &provider,
            &ProducerConfig::file("absent.ogg"),
            &relays(),
            &SessionConfig::default(),
            &open(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, GraphErrorKind::SourceFailed(_)));
    }
}
