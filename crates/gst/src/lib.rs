//! GStreamer sink element that feeds avsession relay queues.
//!
//! Registers `avrelaysink`, a `BaseSink` with two modes picked from the
//! negotiated caps:
//!
//! | Caps | Buffers become | Queue |
//! |------|----------------|-------|
//! | `video/x-raw, format=BGRx` | [`RenderFrame`]s (size-checked) | [`AvRelaySink::set_frame_queue`] |
//! | `application/x-rtp, media=…` | [`TransportPacket`]s | [`AvRelaySink::set_packet_queue`] |
//!
//! Frames without a `width * height * 4` payload are dropped and counted
//! in the read-only `rejected` property; they never fail the stream.
//!
//! ## Usage
//!
//! ```text
//! videotestsrc ! videoconvert ! video/x-raw,format=BGRx ! avrelaysink
//! audiotestsrc ! speexenc ! rtpspeexpay ! avrelaysink
//! ```

mod imp;

use std::sync::Arc;

use avsession::{MediaKind, RelayQueue, RenderFrame, TransportPacket};
use gst::glib;
use gst::prelude::*;
use gst::subclass::prelude::*;

glib::wrapper! {
    pub struct AvRelaySink(ObjectSubclass<imp::AvRelaySink>)
        @extends gst_base::BaseSink, gst::Element, gst::Object;
}

impl AvRelaySink {
    /// Queue that receives validated frames in `video/x-raw` mode.
    pub fn set_frame_queue(&self, queue: Arc<RelayQueue<RenderFrame>>) {
        self.imp().set_frame_queue(queue);
    }

    /// Queue that receives `kind` packets in `application/x-rtp` mode.
    pub fn set_packet_queue(&self, kind: MediaKind, queue: Arc<RelayQueue<TransportPacket>>) {
        self.imp().set_packet_queue(kind, queue);
    }
}

/// Register the element without loading a plugin, for applications that
/// link this crate directly.
pub fn register_static() -> Result<(), glib::BoolError> {
    gst::Element::register(
        None,
        "avrelaysink",
        gst::Rank::NONE,
        AvRelaySink::static_type(),
    )
}

fn plugin_init(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    gst::Element::register(
        Some(plugin),
        "avrelaysink",
        gst::Rank::NONE,
        AvRelaySink::static_type(),
    )
}

gst::plugin_define!(
    avrelaysink,
    "Relay decoded frames and RTP packets into avsession queues",
    plugin_init,
    env!("CARGO_PKG_VERSION"),
    "MIT",
    "gst-avrelaysink",
    "avsession",
    "avsession/gst-avrelaysink",
    "2026-10-19"
);
