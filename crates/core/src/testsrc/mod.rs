//! A self-contained [`ElementProvider`] with toy devices and codecs.
//!
//! Every factory name in [`pipeline::factory`](crate::pipeline::factory)
//! resolves to an in-process element, so complete producer and receiver
//! graphs can run without any media framework installed:
//!
//! | Selector / factory | Provides |
//! |--------------------|----------|
//! | `testsrc` (video capture) | moving RGB24 test pattern |
//! | `tone` (audio capture) | 440 Hz, 16 kHz mono S16LE |
//! | `speakers` (audio render) | counting sink |
//! | `theoraenc` / `theoradec` | uncompressed "codec" with a size header |
//! | `speexenc`, `speexdec`, `vorbisdec` | PCM framing / passthrough |
//! | `rtp*pay`, `rtp*depay` | RTP fragmentation and reassembly |
//! | `rtpjitterbuffer` | sequence-ordered release |
//!
//! Files are registered up front with [`SyntheticProvider::with_file`];
//! a stream can be announced late with [`VirtualStream::announced_after`].

mod capture;
mod codec;
mod file;
mod rtp;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::graph::provider::{CaptureSource, ElementProvider, FileSource};
use crate::graph::{Buffer, Element, FlowError, Sink};
use crate::media::{MediaKind, Structure};
use crate::pipeline::factory;

pub use capture::{TestPatternSource, ToneSource, pattern_frame, tone_chunk};
pub use codec::{
    AUDIO_FRAME_SAMPLES, AUDIO_RATE, AudioFramer, Passthrough, VideoConvert, VideoDecoder,
    VideoEncoder, encode_video,
};
pub use file::VirtualFileSource;
pub use rtp::{JitterBuffer, RtpDepayloader, RtpPayloader};

/// Size and rate of generated video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSettings {
    pub width: u16,
    pub height: u16,
    pub fps: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            fps: 30,
        }
    }
}

/// One elementary stream inside a virtual file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualStream {
    pub name: String,
    pub caps: Vec<Structure>,
    /// How long after `start` the demuxer announces the stream.
    pub delay: Duration,
}

impl VirtualStream {
    pub fn new(name: &str, mime: &str) -> Self {
        Self {
            name: name.to_string(),
            caps: vec![Structure::new(mime)],
            delay: Duration::ZERO,
        }
    }

    /// Announce the stream from the demuxer thread `delay` after start.
    pub fn announced_after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add another candidate capability, less specific than the previous ones.
    pub fn with_caps(mut self, caps: Structure) -> Self {
        self.caps.push(caps);
        self
    }
}

/// In-process devices, codecs and files.
#[derive(Debug)]
pub struct SyntheticProvider {
    video: VideoSettings,
    disabled: HashSet<String>,
    files: HashMap<PathBuf, Vec<VirtualStream>>,
    created: Mutex<Vec<String>>,
    audio_rendered: Arc<AtomicU64>,
}

impl SyntheticProvider {
    /// Video capture selector.
    pub const VIDEO_DEVICE: &'static str = "testsrc";
    /// Audio capture selector.
    pub const AUDIO_DEVICE: &'static str = "tone";
    /// Audio render selector.
    pub const AUDIO_OUTPUT: &'static str = "speakers";

    pub fn new() -> Self {
        Self {
            video: VideoSettings::default(),
            disabled: HashSet::new(),
            files: HashMap::new(),
            created: Mutex::new(Vec::new()),
            audio_rendered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_video_size(mut self, width: u16, height: u16) -> Self {
        self.video.width = width;
        self.video.height = height;
        self
    }

    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.video.fps = fps.max(1);
        self
    }

    /// Pretend the named element factory is not installed.
    pub fn without_element(mut self, factory: &str) -> Self {
        self.disabled.insert(factory.to_string());
        self
    }

    /// Register a virtual file at `path`.
    pub fn with_file(mut self, path: impl Into<PathBuf>, streams: Vec<VirtualStream>) -> Self {
        self.files.insert(path.into(), streams);
        self
    }

    pub fn video_settings(&self) -> VideoSettings {
        self.video
    }

    /// Factory names of every element created so far, in creation order.
    pub fn created_elements(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    /// Buffers delivered to the `speakers` output so far.
    pub fn audio_buffers_rendered(&self) -> u64 {
        self.audio_rendered.load(Ordering::Relaxed)
    }

    fn instantiate(&self, name: &str) -> Option<Box<dyn Element>> {
        let element: Box<dyn Element> = match name {
            factory::VIDEO_CONVERT => Box::new(VideoConvert::new()),
            factory::AUDIO_CONVERT => Box::new(Passthrough::new(factory::AUDIO_CONVERT)),
            factory::AUDIO_RESAMPLE => Box::new(Passthrough::new(factory::AUDIO_RESAMPLE)),
            factory::THEORA_ENC => Box::new(VideoEncoder),
            factory::THEORA_PAY => Box::new(RtpPayloader::theora(self.video.fps)),
            factory::SPEEX_ENC => Box::new(AudioFramer::default()),
            factory::SPEEX_PAY => Box::new(RtpPayloader::speex()),
            factory::THEORA_DEC => Box::new(VideoDecoder),
            factory::SPEEX_DEC => Box::new(Passthrough::new(factory::SPEEX_DEC)),
            factory::VORBIS_DEC => Box::new(Passthrough::new(factory::VORBIS_DEC)),
            factory::THEORA_DEPAY => Box::new(RtpDepayloader::theora()),
            factory::SPEEX_DEPAY => Box::new(RtpDepayloader::speex()),
            factory::VORBIS_DEPAY => Box::new(RtpDepayloader::vorbis()),
            factory::JITTER_BUFFER => Box::new(JitterBuffer::new()),
            _ => return None,
        };
        Some(element)
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementProvider for SyntheticProvider {
    fn make_capture(&self, selector: &str, kind: MediaKind) -> Option<Box<dyn CaptureSource>> {
        match (selector, kind) {
            (Self::VIDEO_DEVICE, MediaKind::Video) => Some(Box::new(TestPatternSource::new(
                self.video.width as u32,
                self.video.height as u32,
                self.video.fps,
            ))),
            (Self::AUDIO_DEVICE, MediaKind::Audio) => Some(Box::new(ToneSource::default())),
            _ => None,
        }
    }

    fn make_render(&self, selector: &str, kind: MediaKind) -> Option<Box<dyn Sink>> {
        match (selector, kind) {
            (Self::AUDIO_OUTPUT, MediaKind::Audio) => Some(Box::new(CountingAudioSink {
                rendered: self.audio_rendered.clone(),
            })),
            _ => None,
        }
    }

    fn make_element(&self, factory: &str) -> Option<Box<dyn Element>> {
        if self.disabled.contains(factory) {
            return None;
        }
        let element = self.instantiate(factory)?;
        self.created.lock().push(factory.to_string());
        Some(element)
    }

    fn make_file_source(&self, path: &Path) -> Option<Box<dyn FileSource>> {
        let streams = self.files.get(path)?;
        Some(Box::new(VirtualFileSource::new(
            path.to_path_buf(),
            streams.clone(),
            self.video,
        )))
    }
}

/// Audio output stand-in that counts what it plays.
struct CountingAudioSink {
    rendered: Arc<AtomicU64>,
}

impl Sink for CountingAudioSink {
    fn render(&mut self, buffer: Buffer) -> Result<(), FlowError> {
        if buffer.video.is_some() {
            return Err(FlowError::NotNegotiated("audio sink got video".into()));
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
