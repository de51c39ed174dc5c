//! A container "file" whose streams are declared up front.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::capture::{Ticker, pattern_frame, tone_chunk};
use super::codec::{AUDIO_FRAME_SAMPLES, encode_video};
use super::{VideoSettings, VirtualStream};
use crate::error::GraphErrorKind;
use crate::graph::Buffer;
use crate::graph::provider::{FileSource, StreamHandler, StreamInfo};

const AUDIO_INTERVAL: Duration = Duration::from_millis(20);

type Generator = Box<dyn FnMut(u64) -> Buffer + Send>;
type Feeders = Arc<Mutex<Vec<(StreamInfo, Ticker)>>>;

/// Demultiplexer stand-in.
///
/// `start` announces every undelayed stream synchronously. Streams built
/// with [`VirtualStream::announced_after`] are announced later from a demux
/// thread, which signals `no_more_streams` once the last one is out. Each
/// accepted stream is fed from its own thread: toy-encoded pattern frames
/// for `video/x-theora`, tone PCM for speex and vorbis, junk for anything
/// else.
pub struct VirtualFileSource {
    path: PathBuf,
    streams: Vec<VirtualStream>,
    video: VideoSettings,
    handler: Option<Arc<dyn StreamHandler>>,
    feeders: Feeders,
    demux: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
}

impl VirtualFileSource {
    pub fn new(path: PathBuf, streams: Vec<VirtualStream>, video: VideoSettings) -> Self {
        Self {
            path,
            streams,
            video,
            handler: None,
            feeders: Arc::new(Mutex::new(Vec::new())),
            demux: None,
        }
    }
}

fn generator(video: VideoSettings, info: &StreamInfo) -> (Duration, Generator) {
    let mime = info.caps.first().map(|c| c.name().to_string());
    match mime.as_deref() {
        Some("video/x-theora") => {
            let VideoSettings { width, height, fps } = video;
            let generate: Generator = Box::new(move |n: u64| {
                let rgb = pattern_frame(width as u32, height as u32, n);
                Buffer::new(encode_video(width, height, &rgb))
            });
            (Duration::from_secs(1) / fps.max(1), generate)
        }
        Some("audio/x-speex") | Some("audio/x-vorbis") => {
            let generate: Generator =
                Box::new(|n: u64| Buffer::new(tone_chunk(n * AUDIO_FRAME_SAMPLES as u64)));
            (AUDIO_INTERVAL, generate)
        }
        _ => {
            let generate: Generator = Box::new(|n: u64| Buffer::new(n.to_be_bytes().to_vec()));
            (AUDIO_INTERVAL, generate)
        }
    }
}

/// Offer one stream to the handler and start feeding it if accepted.
fn announce(
    handler: &dyn StreamHandler,
    stream: &VirtualStream,
    video: VideoSettings,
    feeders: &Feeders,
) -> Result<(), GraphErrorKind> {
    let info = StreamInfo {
        name: stream.name.clone(),
        caps: stream.caps.clone(),
    };
    let Some(pad) = handler.stream_added(&info) else {
        return Ok(());
    };
    let (interval, generate) = generator(video, &info);
    let ticker = Ticker::spawn(&info.name, interval, pad, generate)?;
    feeders.lock().push((info, ticker));
    Ok(())
}

impl FileSource for VirtualFileSource {
    fn start(&mut self, handler: Arc<dyn StreamHandler>) -> Result<(), GraphErrorKind> {
        if self.handler.is_some() {
            return Ok(());
        }
        tracing::debug!(path = %self.path.display(), streams = self.streams.len(), "opening virtual file");
        self.handler = Some(handler.clone());

        let (immediate, delayed): (Vec<_>, Vec<_>) = self
            .streams
            .iter()
            .cloned()
            .partition(|s| s.delay.is_zero());
        for stream in &immediate {
            announce(handler.as_ref(), stream, self.video, &self.feeders)?;
        }
        if delayed.is_empty() {
            handler.no_more_streams();
            return Ok(());
        }

        let (cancel, cancelled) = mpsc::channel::<()>();
        let video = self.video;
        let feeders = self.feeders.clone();
        let opened = Instant::now();
        let thread = std::thread::Builder::new()
            .name("testsrc-demux".to_string())
            .spawn(move || {
                for stream in &delayed {
                    let wait = (opened + stream.delay).saturating_duration_since(Instant::now());
                    match cancelled.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                    if let Err(e) = announce(handler.as_ref(), stream, video, &feeders) {
                        tracing::warn!(stream = %stream.name, error = %e, "late stream not fed");
                    }
                }
                handler.no_more_streams();
            })
            .map_err(|e| GraphErrorKind::ThreadSpawn(e.to_string()))?;
        self.demux = Some((cancel, thread));
        Ok(())
    }

    fn stop(&mut self) {
        let Some(handler) = self.handler.take() else {
            return;
        };
        if let Some((cancel, thread)) = self.demux.take() {
            let _ = cancel.send(());
            if thread.join().is_err() {
                tracing::warn!("demux thread panicked");
            }
        }
        let feeders: Vec<_> = self.feeders.lock().drain(..).collect();
        for (info, mut ticker) in feeders {
            ticker.stop();
            handler.stream_removed(&info);
        }
        tracing::debug!(path = %self.path.display(), "virtual file closed");
    }
}

impl Drop for VirtualFileSource {
    fn drop(&mut self) {
        self.stop();
    }
}
