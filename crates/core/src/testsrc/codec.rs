//! Toy converters and codecs.
//!
//! The "video codec" stores a 4-byte `width,height` header followed by
//! packed RGB24 pixels. The "audio codecs" pass 16 kHz mono S16LE through,
//! framed in 20 ms units by the encoder.

use crate::graph::{Buffer, Element, FlowError, PixelFormat, VideoInfo};
use crate::media::FieldValue;

pub const AUDIO_RATE: u32 = 16_000;
/// Samples per 20 ms audio frame.
pub const AUDIO_FRAME_SAMPLES: usize = 320;
const AUDIO_FRAME_BYTES: usize = AUDIO_FRAME_SAMPLES * 2;
const VIDEO_HEADER_LEN: usize = 4;

/// Encode one RGB24 frame in the toy video format.
pub fn encode_video(width: u16, height: u16, rgb24: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(VIDEO_HEADER_LEN + rgb24.len());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(rgb24);
    out
}

/// Raw video format converter (`videoconvert`).
///
/// Converts between RGB24 and BGRx. The output format is set with the
/// `format` property (`RGB` or `BGRx`, default `BGRx`).
pub struct VideoConvert {
    target: PixelFormat,
}

impl VideoConvert {
    pub fn new() -> Self {
        Self {
            target: PixelFormat::Rgb32,
        }
    }
}

impl Default for VideoConvert {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for VideoConvert {
    fn name(&self) -> &str {
        "videoconvert"
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        let info = buffer
            .video
            .ok_or_else(|| FlowError::NotNegotiated("videoconvert needs raw video".into()))?;
        if buffer.len() != info.frame_size() {
            return Err(FlowError::element(
                self.name(),
                format!("{} bytes for {}x{}", buffer.len(), info.width, info.height),
            ));
        }
        if info.format == self.target {
            return Ok(vec![buffer]);
        }

        let out_info = VideoInfo::new(info.width, info.height, self.target);
        let out: Vec<u8> = match self.target {
            PixelFormat::Rgb32 => buffer
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0], 0xff])
                .collect(),
            PixelFormat::Rgb24 => buffer
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        Ok(vec![Buffer::video(out, out_info)])
    }

    fn set_property(&mut self, name: &str, value: FieldValue) -> bool {
        match (name, value) {
            ("format", FieldValue::Str(format)) => match format.as_str() {
                "RGB" => {
                    self.target = PixelFormat::Rgb24;
                    true
                }
                "BGRx" => {
                    self.target = PixelFormat::Rgb32;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Passes buffers through unchanged (`audioconvert`, `audioresample`, audio decoders).
pub struct Passthrough {
    name: &'static str,
}

impl Passthrough {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Element for Passthrough {
    fn name(&self) -> &str {
        self.name
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        Ok(vec![buffer])
    }
}

/// Audio "encoder": regroups PCM into 20 ms frames.
#[derive(Default)]
pub struct AudioFramer {
    pending: Vec<u8>,
}

impl Element for AudioFramer {
    fn name(&self) -> &str {
        "speexenc"
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        self.pending.extend_from_slice(&buffer.data);
        let mut frames = Vec::new();
        while self.pending.len() >= AUDIO_FRAME_BYTES {
            let rest = self.pending.split_off(AUDIO_FRAME_BYTES);
            frames.push(Buffer::new(std::mem::replace(&mut self.pending, rest)));
        }
        Ok(frames)
    }
}

/// Video "encoder" (`theoraenc`).
pub struct VideoEncoder;

impl Element for VideoEncoder {
    fn name(&self) -> &str {
        "theoraenc"
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        let info = buffer
            .video
            .ok_or_else(|| FlowError::NotNegotiated("theoraenc needs raw video".into()))?;
        let (Ok(width), Ok(height)) = (u16::try_from(info.width), u16::try_from(info.height))
        else {
            return Err(FlowError::element(self.name(), "frame too large"));
        };

        let rgb24 = match info.format {
            PixelFormat::Rgb24 => buffer.data.to_vec(),
            PixelFormat::Rgb32 => buffer
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        Ok(vec![Buffer::new(encode_video(width, height, &rgb24))])
    }
}

/// Video "decoder" (`theoradec`).
pub struct VideoDecoder;

impl Element for VideoDecoder {
    fn name(&self) -> &str {
        "theoradec"
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        if buffer.len() < VIDEO_HEADER_LEN {
            return Err(FlowError::element(self.name(), "truncated frame"));
        }
        let width = u16::from_be_bytes([buffer.data[0], buffer.data[1]]) as u32;
        let height = u16::from_be_bytes([buffer.data[2], buffer.data[3]]) as u32;
        let info = VideoInfo::new(width, height, PixelFormat::Rgb24);
        let pixels = buffer.data.slice(VIDEO_HEADER_LEN..);
        if pixels.len() != info.frame_size() {
            return Err(FlowError::element(
                self.name(),
                format!("{} pixel bytes for {width}x{height}", pixels.len()),
            ));
        }
        Ok(vec![Buffer::video(pixels, info)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb24(w: u32, h: u32) -> Buffer {
        let data: Vec<u8> = (0..w * h * 3).map(|i| i as u8).collect();
        Buffer::video(data, VideoInfo::new(w, h, PixelFormat::Rgb24))
    }

    #[test]
    fn convert_rgb24_to_bgrx() {
        let mut convert = VideoConvert::new();
        let out = convert.process(rgb24(2, 1)).unwrap().remove(0);
        assert_eq!(out.video.unwrap().format, PixelFormat::Rgb32);
        assert_eq!(&out.data[..], &[2, 1, 0, 0xff, 5, 4, 3, 0xff]);
    }

    #[test]
    fn convert_format_property() {
        let mut convert = VideoConvert::new();
        assert!(convert.set_property("format", FieldValue::from("RGB")));
        assert!(!convert.set_property("format", FieldValue::from("I420")));
        let input = rgb24(2, 2);
        assert_eq!(convert.process(input.clone()).unwrap(), vec![input]);
    }

    #[test]
    fn video_codec_round_trip() {
        let frame = rgb24(4, 3);
        let encoded = VideoEncoder.process(frame.clone()).unwrap().remove(0);
        assert_eq!(encoded.video, None);
        let decoded = VideoDecoder.process(encoded).unwrap().remove(0);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decoder_rejects_truncated() {
        let mut encoded = encode_video(4, 4, &[0u8; 48]);
        encoded.pop();
        assert!(VideoDecoder.process(Buffer::new(encoded)).is_err());
    }

    #[test]
    fn audio_framer_emits_whole_frames() {
        let mut framer = AudioFramer::default();
        assert!(framer.process(Buffer::new(vec![0u8; 500])).unwrap().is_empty());
        let frames = framer.process(Buffer::new(vec![0u8; 1000])).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == AUDIO_FRAME_BYTES));
    }
}
