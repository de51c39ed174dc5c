//! Element provider: the collaborator that knows about devices, codecs and
//! container formats.
//!
//! The session core never instantiates a concrete capture device, codec or
//! demuxer itself. Everything it needs is requested by name through an
//! [`ElementProvider`]; a `None` answer means "not available here" and is
//! handled by the caller (skip a branch, fail construction, fall back to a
//! discard sink).

use std::path::Path;
use std::sync::Arc;

use super::{Element, Pad, Sink};
use crate::error::GraphErrorKind;
use crate::media::{MediaKind, Structure};

/// A live source (camera, microphone) that pushes raw buffers from its own
/// thread once started.
pub trait CaptureSource: Send {
    fn name(&self) -> &str;

    /// Start producing into `output`. Must not block.
    fn start(&mut self, output: Pad) -> Result<(), GraphErrorKind>;

    /// Stop producing and join any internal thread. Safe to call repeatedly.
    fn stop(&mut self);
}

/// One elementary stream discovered inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    /// Candidate capabilities, most specific first.
    pub caps: Vec<Structure>,
}

/// Callbacks a [`FileSource`] invokes while demultiplexing.
pub trait StreamHandler: Send + Sync {
    /// A new stream appeared. Return the pad its buffers should be pushed
    /// into, or `None` to ignore the stream.
    fn stream_added(&self, stream: &StreamInfo) -> Option<Pad>;

    fn stream_removed(&self, stream: &StreamInfo);

    /// Every stream the source will expose has been announced. Sources that
    /// never call this make the producer wait out its negotiation timeout.
    fn no_more_streams(&self) {}
}

/// A container file that demultiplexes into encoded elementary streams.
pub trait FileSource: Send {
    /// Open the file, announce its streams to `handler` and start pushing.
    fn start(&mut self, handler: Arc<dyn StreamHandler>) -> Result<(), GraphErrorKind>;

    /// Stop pushing and join any internal thread. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Factory for everything device-, codec- or format-specific.
pub trait ElementProvider: Send + Sync {
    /// Open a capture device. `None` makes the branch unavailable.
    fn make_capture(&self, selector: &str, kind: MediaKind) -> Option<Box<dyn CaptureSource>>;

    /// Open an output device (speakers). `None` makes the caller fall back
    /// to discarding.
    fn make_render(&self, selector: &str, kind: MediaKind) -> Option<Box<dyn Sink>>;

    /// Instantiate a processing element by factory name.
    fn make_element(&self, factory: &str) -> Option<Box<dyn Element>>;

    /// Open a container file for demultiplexing.
    fn make_file_source(&self, path: &Path) -> Option<Box<dyn FileSource>>;
}

/// Create an element the graph cannot do without.
pub fn require_element(
    provider: &dyn ElementProvider,
    factory: &str,
) -> Result<Box<dyn Element>, GraphErrorKind> {
    provider.make_element(factory).ok_or_else(|| {
        tracing::warn!(factory, "element unavailable");
        GraphErrorKind::ElementUnavailable(factory.to_string())
    })
}
