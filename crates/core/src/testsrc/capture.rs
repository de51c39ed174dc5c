//! Synthetic live sources: a moving test pattern and a sine tone.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::codec::{AUDIO_FRAME_SAMPLES, AUDIO_RATE};
use crate::error::GraphErrorKind;
use crate::graph::provider::CaptureSource;
use crate::graph::{Buffer, Pad, PixelFormat, VideoInfo};

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 8000.0;
const AUDIO_CHUNK: Duration = Duration::from_millis(20);

/// Packed RGB24 test frame `n`: a colour gradient with a white bar that
/// moves one column per frame.
pub fn pattern_frame(width: u32, height: u32, n: u64) -> Vec<u8> {
    let bar = (n % width.max(1) as u64) as u32;
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            if x == bar {
                data.extend_from_slice(&[0xff, 0xff, 0xff]);
            } else {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                data.extend_from_slice(&[r, g, (n & 0xff) as u8]);
            }
        }
    }
    data
}

/// One 20 ms chunk of mono S16LE tone starting at sample `start`.
pub fn tone_chunk(start: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(AUDIO_FRAME_SAMPLES * 2);
    for i in 0..AUDIO_FRAME_SAMPLES as u64 {
        let t = (start + i) as f32 / AUDIO_RATE as f32;
        let sample = ((TAU * TONE_HZ * t).sin() * TONE_AMPLITUDE) as i16;
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// A thread that pushes one generated buffer per tick into a pad.
pub(super) struct Ticker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    pub(super) fn spawn(
        name: &str,
        interval: Duration,
        output: Pad,
        mut generate: impl FnMut(u64) -> Buffer + Send + 'static,
    ) -> Result<Self, GraphErrorKind> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let label = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("testsrc-{name}"))
            .spawn(move || {
                let mut n = 0u64;
                while flag.load(Ordering::Acquire) {
                    if let Err(e) = output.push(generate(n)) {
                        tracing::debug!(source = %label, error = %e, "buffer not accepted");
                    }
                    n += 1;
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| GraphErrorKind::ThreadSpawn(e.to_string()))?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub(super) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("test source thread panicked");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Camera stand-in producing RGB24 [`pattern_frame`]s.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    fps: u32,
    ticker: Option<Ticker>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            ticker: None,
        }
    }
}

impl CaptureSource for TestPatternSource {
    fn name(&self) -> &str {
        "testsrc"
    }

    fn start(&mut self, output: Pad) -> Result<(), GraphErrorKind> {
        if self.ticker.is_some() {
            return Ok(());
        }
        let info = VideoInfo::new(self.width, self.height, PixelFormat::Rgb24);
        let interval = Duration::from_secs(1) / self.fps;
        self.ticker = Some(Ticker::spawn("video", interval, output, move |n| {
            Buffer::video(pattern_frame(info.width, info.height, n), info)
        })?);
        tracing::debug!(width = self.width, height = self.height, fps = self.fps, "test pattern started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}

/// Microphone stand-in producing a 440 Hz tone.
#[derive(Default)]
pub struct ToneSource {
    ticker: Option<Ticker>,
}

impl CaptureSource for ToneSource {
    fn name(&self) -> &str {
        "tone"
    }

    fn start(&mut self, output: Pad) -> Result<(), GraphErrorKind> {
        if self.ticker.is_some() {
            return Ok(());
        }
        self.ticker = Some(Ticker::spawn("audio", AUDIO_CHUNK, output, |n| {
            Buffer::new(tone_chunk(n * AUDIO_FRAME_SAMPLES as u64))
        })?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FlowError, FnSink};
    use parking_lot::Mutex;

    #[test]
    fn pattern_bar_moves() {
        let a = pattern_frame(8, 2, 0);
        let b = pattern_frame(8, 2, 1);
        assert_eq!(a.len(), 8 * 2 * 3);
        assert_eq!(&a[0..3], &[0xff, 0xff, 0xff]);
        assert_ne!(&b[0..3], &[0xff, 0xff, 0xff]);
        assert_eq!(&b[3..6], &[0xff, 0xff, 0xff]);
    }

    #[test]
    fn tone_chunk_is_twenty_ms() {
        let chunk = tone_chunk(0);
        assert_eq!(chunk.len(), AUDIO_FRAME_SAMPLES * 2);
        assert!(chunk.chunks_exact(2).any(|s| i16::from_le_bytes([s[0], s[1]]) != 0));
    }

    #[test]
    fn pattern_source_pushes_until_stopped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let pad = Pad::new(FnSink(move |b: Buffer| -> Result<(), FlowError> {
            sink_seen.lock().push(b);
            Ok(())
        }));

        let mut source = TestPatternSource::new(4, 4, 100);
        source.start(pad).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        source.stop();
        source.stop();

        let count = seen.lock().len();
        assert!(count > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(seen.lock().len(), count);
        let first = seen.lock()[0].clone();
        assert_eq!(first.video, Some(VideoInfo::new(4, 4, PixelFormat::Rgb24)));
    }
}
