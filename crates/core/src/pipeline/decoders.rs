//! Decoder attachment for demultiplexed file streams.
//!
//! When a [`FileSource`](crate::graph::provider::FileSource) discovers a
//! stream, each candidate capability structure is split into
//! `(kind, subtype)` and looked up in a fixed table:
//!
//! | Kind | Subtype | Decoder |
//! |------|---------|---------|
//! | audio | `x-speex` | `speexdec` |
//! | audio | `x-vorbis` | `vorbisdec` |
//! | video | `x-theora` | `theoradec` |
//!
//! The first stream of a kind that matches gets a decoder linked to that
//! kind's convert stage. Every later stream of the same kind is ignored,
//! and unmatched subtypes are ignored too.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::factory;
use crate::graph::provider::{ElementProvider, StreamHandler, StreamInfo};
use crate::graph::{Chain, Pad};
use crate::media::{MediaKind, PerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderRule {
    pub kind: MediaKind,
    pub subtype: &'static str,
    pub factory: &'static str,
}

pub const DEFAULT_DECODERS: &[DecoderRule] = &[
    DecoderRule {
        kind: MediaKind::Audio,
        subtype: "x-speex",
        factory: factory::SPEEX_DEC,
    },
    DecoderRule {
        kind: MediaKind::Audio,
        subtype: "x-vorbis",
        factory: factory::VORBIS_DEC,
    },
    DecoderRule {
        kind: MediaKind::Video,
        subtype: "x-theora",
        factory: factory::THEORA_DEC,
    },
];

/// Matches discovered streams against a decoder table, first match wins.
pub struct DecoderAttacher {
    provider: Arc<dyn ElementProvider>,
    rules: &'static [DecoderRule],
    /// Convert stage each kind's decoder feeds; `None` if the kind has no branch.
    targets: PerKind<Option<Pad>>,
    attached: Mutex<PerKind<Option<&'static str>>>,
    complete: AtomicBool,
}

impl DecoderAttacher {
    pub fn new(provider: Arc<dyn ElementProvider>, targets: PerKind<Option<Pad>>) -> Self {
        Self::with_rules(provider, targets, DEFAULT_DECODERS)
    }

    pub fn with_rules(
        provider: Arc<dyn ElementProvider>,
        targets: PerKind<Option<Pad>>,
        rules: &'static [DecoderRule],
    ) -> Self {
        Self {
            provider,
            rules,
            targets,
            attached: Mutex::new(PerKind::default()),
            complete: AtomicBool::new(false),
        }
    }

    /// Decoder factory attached for `kind`, if any.
    pub fn attached(&self, kind: MediaKind) -> Option<&'static str> {
        *self.attached.lock().get(kind)
    }

    /// Whether the source has announced its last stream.
    pub fn streams_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Whether every kind with a branch has a decoder.
    pub fn all_attached(&self) -> bool {
        let attached = self.attached.lock();
        MediaKind::ALL
            .iter()
            .all(|k| self.targets.get(*k).is_none() || attached.get(*k).is_some())
    }

    fn rule_for(&self, kind: MediaKind, subtype: &str) -> Option<&'static DecoderRule> {
        self.rules
            .iter()
            .find(|rule| rule.kind == kind && rule.subtype == subtype)
    }
}

impl StreamHandler for DecoderAttacher {
    fn stream_added(&self, stream: &StreamInfo) -> Option<Pad> {
        // Held across creation so concurrent announcements cannot both win.
        let mut attached = self.attached.lock();

        for caps in &stream.caps {
            let Some((media_type, subtype)) = caps.mime_parts() else {
                continue;
            };
            let Some(kind) = MediaKind::from_media_type(media_type) else {
                continue;
            };
            let Some(rule) = self.rule_for(kind, subtype) else {
                continue;
            };

            if let Some(existing) = attached.get(kind) {
                tracing::debug!(
                    stream = %stream.name,
                    kind = %kind,
                    decoder = *existing,
                    "decoder already attached, ignoring stream"
                );
                return None;
            }

            let Some(target) = self.targets.get(kind) else {
                tracing::debug!(stream = %stream.name, kind = %kind, "no branch for stream kind");
                return None;
            };

            let Some(decoder) = self.provider.make_element(rule.factory) else {
                tracing::warn!(stream = %stream.name, factory = rule.factory, "decoder unavailable");
                continue;
            };

            tracing::info!(stream = %stream.name, caps = %caps, decoder = rule.factory, "decoder attached");
            *attached.get_mut(kind) = Some(rule.factory);
            return Some(Pad::new(Chain::new(vec![decoder], Box::new(target.clone()))));
        }

        tracing::debug!(stream = %stream.name, "no decoder for stream, ignoring");
        None
    }

    fn stream_removed(&self, stream: &StreamInfo) {
        tracing::debug!(stream = %stream.name, "stream removed");
    }

    fn no_more_streams(&self) {
        tracing::debug!("all streams announced");
        self.complete.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DiscardSink;
    use crate::media::Structure;
    use crate::testsrc::SyntheticProvider;

    fn stream(name: &str, caps: &[&str]) -> StreamInfo {
        StreamInfo {
            name: name.to_string(),
            caps: caps.iter().map(|c| Structure::new(*c)).collect(),
        }
    }

    fn attacher(provider: &Arc<SyntheticProvider>) -> DecoderAttacher {
        DecoderAttacher::new(
            provider.clone(),
            PerKind::from_fn(|_| Some(Pad::new(DiscardSink::default()))),
        )
    }

    #[test]
    fn first_audio_match_wins() {
        let provider = Arc::new(SyntheticProvider::new());
        let attacher = attacher(&provider);

        assert!(attacher.stream_added(&stream("a0", &["audio/x-speex"])).is_some());
        assert!(attacher.stream_added(&stream("a1", &["audio/x-vorbis"])).is_none());

        assert_eq!(attacher.attached(MediaKind::Audio), Some(factory::SPEEX_DEC));
        let created = provider.created_elements();
        assert!(created.contains(&factory::SPEEX_DEC.to_string()));
        assert!(!created.contains(&factory::VORBIS_DEC.to_string()));
    }

    #[test]
    fn kinds_are_tracked_separately() {
        let provider = Arc::new(SyntheticProvider::new());
        let attacher = attacher(&provider);

        assert!(attacher.stream_added(&stream("a", &["audio/x-vorbis"])).is_some());
        assert!(!attacher.all_attached());
        assert!(attacher.stream_added(&stream("v", &["video/x-theora"])).is_some());
        assert_eq!(attacher.attached(MediaKind::Video), Some(factory::THEORA_DEC));
        assert!(attacher.all_attached());
    }

    #[test]
    fn completion_is_signalled_by_the_source() {
        let provider = Arc::new(SyntheticProvider::new());
        let attacher = DecoderAttacher::new(
            provider.clone(),
            PerKind {
                audio: None,
                video: Some(Pad::new(DiscardSink::default())),
            },
        );
        assert!(!attacher.all_attached());
        assert!(!attacher.streams_complete());
        attacher.no_more_streams();
        assert!(attacher.streams_complete());
        assert!(attacher.stream_added(&stream("v", &["video/x-theora"])).is_some());
        assert!(attacher.all_attached());
    }

    #[test]
    fn unmatched_subtypes_are_ignored() {
        let provider = Arc::new(SyntheticProvider::new());
        let attacher = attacher(&provider);

        assert!(attacher.stream_added(&stream("v", &["video/x-h264"])).is_none());
        assert!(attacher.stream_added(&stream("t", &["text/plain", "bogus"])).is_none());
        assert_eq!(attacher.attached(MediaKind::Video), None);

        // a later supported candidate in the same stream still matches
        assert!(attacher
            .stream_added(&stream("v2", &["video/x-h264", "video/x-theora"]))
            .is_some());
    }

    #[test]
    fn kind_without_branch_is_ignored() {
        let provider = Arc::new(SyntheticProvider::new());
        let attacher = DecoderAttacher::new(
            provider.clone(),
            PerKind {
                audio: None,
                video: Some(Pad::new(DiscardSink::default())),
            },
        );
        assert!(attacher.stream_added(&stream("a", &["audio/x-speex"])).is_none());
        assert!(provider.created_elements().is_empty());
    }
}
