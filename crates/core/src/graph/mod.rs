//! In-memory media graph primitives.
//!
//! Pipelines are assembled from push-mode stages:
//!
//! ```text
//!  source thread ──push──▶ Pad ──▶ Chain [ Element → Element → … ] ──▶ Sink
//!                                                                      │
//!                                                              Tee ────┼──▶ branch A
//!                                                                      └──▶ branch B
//! ```
//!
//! An [`Element`] transforms one [`Buffer`] into zero or more buffers. A
//! [`Sink`] terminates a path. A [`Pad`] is a cloneable, thread-safe handle
//! to a sink that sources push into from their own threads.

pub mod provider;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::media::{FieldValue, Structure};

/// Raw video pixel layouts understood by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 24-bit packed `R G B`.
    Rgb24,
    /// 32-bit packed `B G R x`, the render format.
    Rgb32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgb32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl VideoInfo {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Expected size of one frame in bytes.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// A unit of media flowing through the graph.
///
/// Raw video buffers carry [`VideoInfo`]; encoded, audio and RTP buffers
/// carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub data: Bytes,
    pub video: Option<VideoInfo>,
}

impl Buffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            video: None,
        }
    }

    pub fn video(data: impl Into<Bytes>, info: VideoInfo) -> Self {
        Self {
            data: data.into(),
            video: Some(info),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Why a buffer could not make it downstream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// The buffer's format is not what the element expects.
    #[error("not negotiated: {0}")]
    NotNegotiated(String),
    /// The element failed on this buffer's content.
    #[error("{element}: {reason}")]
    Element { element: String, reason: String },
    /// The path is shutting down.
    #[error("flushing")]
    Flushing,
}

impl FlowError {
    pub fn element(element: &str, reason: impl Into<String>) -> Self {
        FlowError::Element {
            element: element.to_string(),
            reason: reason.into(),
        }
    }
}

/// A processing stage: converter, encoder, decoder, (de)payloader, jitter buffer.
pub trait Element: Send {
    /// Factory name the element was created from.
    fn name(&self) -> &str;

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError>;

    /// Negotiated output capabilities, once known.
    fn src_caps(&self) -> Option<Structure> {
        None
    }

    /// Whether the element can consume input described by `caps`.
    fn accepts(&self, _caps: &Structure) -> bool {
        true
    }

    /// Set a named property. Returns `false` if the property is unknown or
    /// the value has the wrong type.
    fn set_property(&mut self, _name: &str, _value: FieldValue) -> bool {
        false
    }
}

/// Terminal stage of a path.
pub trait Sink: Send {
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError>;
}

/// Cloneable handle to a shared sink, safe to push into from any thread.
#[derive(Clone)]
pub struct Pad(Arc<Mutex<dyn Sink>>);

impl Pad {
    pub fn new(sink: impl Sink + 'static) -> Self {
        Pad(Arc::new(Mutex::new(sink)))
    }

    /// Wrap a sink that the caller also keeps a typed handle to.
    pub fn from_shared<S: Sink + 'static>(sink: Arc<Mutex<S>>) -> Self {
        Pad(sink)
    }

    pub fn push(&self, buffer: Buffer) -> Result<(), FlowError> {
        self.0.lock().render(buffer)
    }
}

impl Sink for Pad {
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError> {
        self.push(buffer)
    }
}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pad").finish_non_exhaustive()
    }
}

/// Linear sequence of elements ending in a sink.
pub struct Chain {
    elements: Vec<Box<dyn Element>>,
    sink: Box<dyn Sink>,
}

impl Chain {
    pub fn new(elements: Vec<Box<dyn Element>>, sink: Box<dyn Sink>) -> Self {
        Self { elements, sink }
    }

    /// Output caps of the last element, typically a payloader.
    pub fn negotiated_caps(&self) -> Option<Structure> {
        self.elements.last().and_then(|e| e.src_caps())
    }

    pub fn element_names(&self) -> Vec<&str> {
        self.elements.iter().map(|e| e.name()).collect()
    }
}

impl Sink for Chain {
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError> {
        let mut buffers = vec![buffer];
        for element in &mut self.elements {
            let mut next = Vec::with_capacity(buffers.len());
            for buffer in buffers {
                next.extend(element.process(buffer)?);
            }
            if next.is_empty() {
                return Ok(());
            }
            buffers = next;
        }
        for buffer in buffers {
            self.sink.render(buffer)?;
        }
        Ok(())
    }
}

/// Fan-out to independent branches.
///
/// A failing branch is logged and does not affect its siblings.
pub struct Tee {
    branches: Vec<(String, Box<dyn Sink>)>,
}

impl Tee {
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
        }
    }

    pub fn branch(mut self, name: &str, sink: Box<dyn Sink>) -> Self {
        self.branches.push((name.to_string(), sink));
        self
    }
}

impl Default for Tee {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for Tee {
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError> {
        for (name, sink) in &mut self.branches {
            if let Err(e) = sink.render(buffer.clone()) {
                tracing::debug!(branch = %name, error = %e, "tee branch rejected buffer");
            }
        }
        Ok(())
    }
}

/// Sink that drops everything, counting what it dropped.
#[derive(Debug, Default)]
pub struct DiscardSink {
    pub buffers: u64,
}

impl Sink for DiscardSink {
    fn render(&mut self, _buffer: Buffer) -> Result<(), FlowError> {
        self.buffers += 1;
        Ok(())
    }
}

/// Adapts a closure into a [`Sink`].
pub struct FnSink<F>(pub F);

impl<F> Sink for FnSink<F>
where
    F: FnMut(Buffer) -> Result<(), FlowError> + Send,
{
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError> {
        (self.0)(buffer)
    }
}
