use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use gst::glib;
use gst::prelude::*;
use gst::subclass::prelude::*;
use gst_base::subclass::prelude::*;
use parking_lot::Mutex;

use avsession::{MediaKind, RelayQueue, RenderFrame, TransportPacket};

static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "avrelaysink",
        gst::DebugColorFlags::empty(),
        Some("AV Relay Sink"),
    )
});

/// What the negotiated caps say the buffers are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Frames { width: u32, height: u32 },
    Packets(MediaKind),
}

#[derive(Default)]
struct Queues {
    frames: Option<Arc<RelayQueue<RenderFrame>>>,
    audio_packets: Option<Arc<RelayQueue<TransportPacket>>>,
    video_packets: Option<Arc<RelayQueue<TransportPacket>>>,
}

impl Queues {
    fn packets(&self, kind: MediaKind) -> Option<&Arc<RelayQueue<TransportPacket>>> {
        match kind {
            MediaKind::Audio => self.audio_packets.as_ref(),
            MediaKind::Video => self.video_packets.as_ref(),
        }
    }
}

#[derive(Default)]
struct Counters {
    relayed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Default)]
pub struct AvRelaySink {
    queues: Mutex<Queues>,
    mode: Mutex<Option<Mode>>,
    counters: Counters,
}

impl AvRelaySink {
    pub(crate) fn set_frame_queue(&self, queue: Arc<RelayQueue<RenderFrame>>) {
        self.queues.lock().frames = Some(queue);
    }

    pub(crate) fn set_packet_queue(&self, kind: MediaKind, queue: Arc<RelayQueue<TransportPacket>>) {
        let mut queues = self.queues.lock();
        match kind {
            MediaKind::Audio => queues.audio_packets = Some(queue),
            MediaKind::Video => queues.video_packets = Some(queue),
        }
    }

    fn relay_frame(&self, width: u32, height: u32, data: Bytes) {
        let frame = match RenderFrame::new(width, height, data) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                gst::warning!(CAT, imp = self, "dropping frame: {}", e);
                return;
            }
        };
        match self.queues.lock().frames.as_ref() {
            Some(queue) => {
                let outcome = queue.push(frame);
                if outcome.is_queued() {
                    self.counters.relayed.fetch_add(1, Ordering::Relaxed);
                } else {
                    gst::trace!(CAT, imp = self, "frame not queued: {:?}", outcome);
                }
            }
            None => gst::debug!(CAT, imp = self, "no frame queue attached"),
        }
    }

    fn relay_packet(&self, kind: MediaKind, data: Bytes) {
        match self.queues.lock().packets(kind) {
            Some(queue) => {
                let outcome = queue.push(TransportPacket::new(kind, data));
                if outcome.is_queued() {
                    self.counters.relayed.fetch_add(1, Ordering::Relaxed);
                } else {
                    gst::trace!(CAT, imp = self, "{} packet not queued: {:?}", kind, outcome);
                }
            }
            None => gst::debug!(CAT, imp = self, "no {} packet queue attached", kind),
        }
    }
}

fn mode_for(caps: &gst::CapsRef) -> Option<Mode> {
    let s = caps.structure(0)?;
    if s.has_name("video/x-raw") {
        let width = u32::try_from(s.get::<i32>("width").ok()?).ok()?;
        let height = u32::try_from(s.get::<i32>("height").ok()?).ok()?;
        Some(Mode::Frames { width, height })
    } else if s.has_name("application/x-rtp") {
        let media = s.get::<String>("media").ok()?;
        MediaKind::from_media_type(&media).map(Mode::Packets)
    } else {
        None
    }
}

#[glib::object_subclass]
impl ObjectSubclass for AvRelaySink {
    const NAME: &'static str = "GstAvRelaySink";
    type Type = super::AvRelaySink;
    type ParentType = gst_base::BaseSink;
}

impl ObjectImpl for AvRelaySink {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: std::sync::OnceLock<Vec<glib::ParamSpec>> = std::sync::OnceLock::new();
        PROPERTIES.get_or_init(|| {
            vec![
                glib::ParamSpecUInt64::builder("relayed")
                    .nick("Relayed")
                    .blurb("Frames or packets handed to the attached queue")
                    .read_only()
                    .build(),
                glib::ParamSpecUInt64::builder("rejected")
                    .nick("Rejected")
                    .blurb("Frames dropped for missing dimensions or a size mismatch")
                    .read_only()
                    .build(),
            ]
        })
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        match pspec.name() {
            "relayed" => self.counters.relayed.load(Ordering::Relaxed).to_value(),
            "rejected" => self.counters.rejected.load(Ordering::Relaxed).to_value(),
            _ => unimplemented!(),
        }
    }
}

impl GstObjectImpl for AvRelaySink {}

impl ElementImpl for AvRelaySink {
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static ELEMENT_METADATA: std::sync::OnceLock<gst::subclass::ElementMetadata> =
            std::sync::OnceLock::new();
        Some(ELEMENT_METADATA.get_or_init(|| {
            gst::subclass::ElementMetadata::new(
                "AV Relay Sink",
                "Sink/Video/Network",
                "Relays raw BGRx frames or RTP packets into application queues",
                "avsession contributors",
            )
        }))
    }

    fn pad_templates() -> &'static [gst::PadTemplate] {
        static PAD_TEMPLATES: std::sync::OnceLock<Vec<gst::PadTemplate>> =
            std::sync::OnceLock::new();
        PAD_TEMPLATES.get_or_init(|| {
            let caps = gst::Caps::builder_full()
                .structure(
                    gst::Structure::builder("video/x-raw")
                        .field("format", "BGRx")
                        .build(),
                )
                .structure(gst::Structure::new_empty("application/x-rtp"))
                .build();

            gst::PadTemplate::new(
                "sink",
                gst::PadDirection::Sink,
                gst::PadPresence::Always,
                &caps,
            )
            .into_iter()
            .collect()
        })
    }
}

impl BaseSinkImpl for AvRelaySink {
    fn set_caps(&self, caps: &gst::Caps) -> Result<(), gst::LoggableError> {
        let mode = mode_for(caps)
            .ok_or_else(|| gst::loggable_error!(CAT, "unsupported caps {}", caps))?;
        gst::info!(CAT, imp = self, "relaying {:?}", mode);
        *self.mode.lock() = Some(mode);
        Ok(())
    }

    fn stop(&self) -> Result<(), gst::ErrorMessage> {
        *self.mode.lock() = None;
        Ok(())
    }

    fn render(&self, buffer: &gst::Buffer) -> Result<gst::FlowSuccess, gst::FlowError> {
        let Some(mode) = *self.mode.lock() else {
            gst::error!(CAT, imp = self, "buffer before caps");
            return Err(gst::FlowError::NotNegotiated);
        };
        let map = buffer.map_readable().map_err(|_| {
            gst::error!(CAT, imp = self, "Failed to map buffer readable");
            gst::FlowError::Error
        })?;
        let data = Bytes::copy_from_slice(map.as_slice());

        match mode {
            Mode::Frames { width, height } => self.relay_frame(width, height, data),
            Mode::Packets(kind) => self.relay_packet(kind, data),
        }
        Ok(gst::FlowSuccess::Ok)
    }
}
