//! RTP payloaders, depayloaders and a reordering jitter buffer.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::codec::AUDIO_FRAME_SAMPLES;
use crate::graph::{Buffer, Element, FlowError};
use crate::media::payload::RTP_CAPS_NAME;
use crate::media::rtp::{RTP_HEADER_LEN, RtpHeader, RtpPacket, seq_before};
use crate::media::{FieldValue, MediaKind, Structure};

const DEFAULT_MTU: usize = 1400;
const THEORA_CLOCK_RATE: u32 = 90_000;
const SPEEX_CLOCK_RATE: u32 = 16_000;
/// Leading bytes of an encoded frame advertised as the codec configuration.
const CONFIGURATION_LEN: usize = 4;

/// Splits encoded buffers into RTP packets and reports its output caps.
pub struct RtpPayloader {
    factory: &'static str,
    kind: MediaKind,
    encoding_name: &'static str,
    clock_rate: u32,
    ticks_per_buffer: u32,
    header: RtpHeader,
    mtu: usize,
    /// Theora only knows its configuration once the first frame is encoded.
    needs_configuration: bool,
    configuration: Option<Vec<u8>>,
    clock_base: u32,
    seqnum_base: u16,
}

impl RtpPayloader {
    pub fn speex() -> Self {
        Self::new(
            "rtpspeexpay",
            MediaKind::Audio,
            "SPEEX",
            110,
            SPEEX_CLOCK_RATE,
            AUDIO_FRAME_SAMPLES as u32,
            false,
        )
    }

    pub fn theora(fps: u32) -> Self {
        Self::new(
            "rtptheorapay",
            MediaKind::Video,
            "THEORA",
            96,
            THEORA_CLOCK_RATE,
            THEORA_CLOCK_RATE / fps.max(1),
            true,
        )
    }

    fn new(
        factory: &'static str,
        kind: MediaKind,
        encoding_name: &'static str,
        pt: u8,
        clock_rate: u32,
        ticks_per_buffer: u32,
        needs_configuration: bool,
    ) -> Self {
        let header = RtpHeader::randomized(pt);
        let seqnum_base = header.sequence();
        let clock_base = header.timestamp();
        Self {
            factory,
            kind,
            encoding_name,
            clock_rate,
            ticks_per_buffer,
            header,
            mtu: DEFAULT_MTU,
            needs_configuration,
            configuration: None,
            clock_base,
            seqnum_base,
        }
    }
}

impl Element for RtpPayloader {
    fn name(&self) -> &str {
        self.factory
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        if buffer.is_empty() {
            return Ok(Vec::new());
        }
        if self.needs_configuration && self.configuration.is_none() {
            let end = CONFIGURATION_LEN.min(buffer.len());
            self.configuration = Some(buffer.data[..end].to_vec());
            tracing::debug!(payloader = self.factory, "configuration captured");
        }

        let chunk_size = self.mtu.saturating_sub(RTP_HEADER_LEN).max(1);
        let chunks: Vec<&[u8]> = buffer.data.chunks(chunk_size).collect();
        let last = chunks.len() - 1;
        let mut packets = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + chunk.len());
            packet.extend_from_slice(&self.header.write(i == last));
            packet.extend_from_slice(chunk);
            packets.push(Buffer::new(packet));
        }
        self.header.advance_timestamp(self.ticks_per_buffer);
        Ok(packets)
    }

    fn src_caps(&self) -> Option<Structure> {
        if self.needs_configuration && self.configuration.is_none() {
            return None;
        }
        let mut caps = Structure::new(RTP_CAPS_NAME)
            .with("media", self.kind.as_str())
            .with("payload", self.header.pt as i32)
            .with("clock-rate", self.clock_rate as i32)
            .with("encoding-name", self.encoding_name)
            .with("ssrc", self.header.ssrc)
            .with("clock-base", self.clock_base)
            .with("seqnum-base", self.seqnum_base as u32);
        match &self.configuration {
            Some(configuration) => {
                caps.set("sampling", "RGB");
                caps.set("delivery-method", "inline");
                caps.set("configuration", BASE64_STANDARD.encode(configuration));
            }
            None => caps.set("encoding-params", "1"),
        }
        Some(caps)
    }

    fn set_property(&mut self, name: &str, value: FieldValue) -> bool {
        match (name, value) {
            ("pt", FieldValue::Int(pt)) if (0..=127).contains(&pt) => {
                self.header.pt = pt as u8;
                true
            }
            ("pt", FieldValue::UInt(pt)) if pt <= 127 => {
                self.header.pt = pt as u8;
                true
            }
            ("mtu", FieldValue::UInt(mtu)) if mtu as usize > RTP_HEADER_LEN => {
                self.mtu = mtu as usize;
                true
            }
            _ => false,
        }
    }
}

/// Reassembles RTP payloads into codec buffers.
///
/// Fragmented payloads are collected until the marker bit; a sequence gap
/// discards the partial buffer.
pub struct RtpDepayloader {
    factory: &'static str,
    kind: MediaKind,
    encoding_name: &'static str,
    fragmented: bool,
    pending: Vec<u8>,
    expected: Option<u16>,
    discarding: bool,
}

impl RtpDepayloader {
    pub fn speex() -> Self {
        Self::new("rtpspeexdepay", MediaKind::Audio, "SPEEX", false)
    }

    pub fn vorbis() -> Self {
        Self::new("rtpvorbisdepay", MediaKind::Audio, "VORBIS", false)
    }

    pub fn theora() -> Self {
        Self::new("rtptheoradepay", MediaKind::Video, "THEORA", true)
    }

    fn new(
        factory: &'static str,
        kind: MediaKind,
        encoding_name: &'static str,
        fragmented: bool,
    ) -> Self {
        Self {
            factory,
            kind,
            encoding_name,
            fragmented,
            pending: Vec::new(),
            expected: None,
            discarding: false,
        }
    }
}

impl Element for RtpDepayloader {
    fn name(&self) -> &str {
        self.factory
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        let packet = RtpPacket::parse(&buffer.data)
            .ok_or_else(|| FlowError::element(self.factory, "not an RTP packet"))?;

        if let Some(expected) = self.expected
            && packet.sequence != expected
        {
            tracing::debug!(
                depayloader = self.factory,
                expected,
                got = packet.sequence,
                "sequence gap"
            );
            self.pending.clear();
            self.discarding = self.fragmented;
        }
        self.expected = Some(packet.sequence.wrapping_add(1));

        if !self.fragmented {
            return Ok(vec![Buffer::new(packet.payload.to_vec())]);
        }

        if !self.discarding {
            self.pending.extend_from_slice(packet.payload);
        }
        if !packet.marker {
            return Ok(Vec::new());
        }
        if std::mem::take(&mut self.discarding) {
            return Ok(Vec::new());
        }
        Ok(vec![Buffer::new(std::mem::take(&mut self.pending))])
    }

    fn accepts(&self, caps: &Structure) -> bool {
        caps.has_name(RTP_CAPS_NAME)
            && caps.get_str("media") == Some(self.kind.as_str())
            && caps
                .get_str("encoding-name")
                .is_some_and(|name| name.eq_ignore_ascii_case(self.encoding_name))
    }
}

/// Releases RTP packets in sequence order.
///
/// Out-of-order packets are held until the gap before them fills or more
/// than `depth` packets are waiting, at which point the gap is skipped.
/// Packets older than the release point are dropped.
pub struct JitterBuffer {
    depth: usize,
    next: Option<u16>,
    held: Vec<(u16, Buffer)>,
}

impl JitterBuffer {
    const DEFAULT_LATENCY_MS: u32 = 200;
    const MS_PER_SLOT: u32 = 10;

    pub fn new() -> Self {
        Self {
            depth: Self::depth_for(Self::DEFAULT_LATENCY_MS),
            next: None,
            held: Vec::new(),
        }
    }

    fn depth_for(latency_ms: u32) -> usize {
        (latency_ms / Self::MS_PER_SLOT).clamp(1, 1024) as usize
    }

    fn insert(&mut self, seq: u16, buffer: Buffer, next: u16) {
        let key = seq.wrapping_sub(next);
        match self
            .held
            .binary_search_by_key(&key, |(s, _)| s.wrapping_sub(next))
        {
            Ok(_) => tracing::trace!(seq, "duplicate packet"),
            Err(pos) => self.held.insert(pos, (seq, buffer)),
        }
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for JitterBuffer {
    fn name(&self) -> &str {
        "rtpjitterbuffer"
    }

    fn process(&mut self, buffer: Buffer) -> Result<Vec<Buffer>, FlowError> {
        let seq = RtpPacket::parse(&buffer.data)
            .ok_or_else(|| FlowError::element(self.name(), "not an RTP packet"))?
            .sequence;
        let mut next = *self.next.get_or_insert(seq);
        if seq_before(seq, next) {
            tracing::trace!(seq, next, "late packet dropped");
            return Ok(Vec::new());
        }
        self.insert(seq, buffer, next);

        let mut out = Vec::new();
        while let Some(&(head, _)) = self.held.first() {
            if head == next {
                let (_, buffer) = self.held.remove(0);
                out.push(buffer);
                next = next.wrapping_add(1);
            } else if self.held.len() > self.depth {
                tracing::debug!(missing = head.wrapping_sub(next), "skipping lost packets");
                next = head;
            } else {
                break;
            }
        }
        self.next = Some(next);
        Ok(out)
    }

    fn set_property(&mut self, name: &str, value: FieldValue) -> bool {
        let latency = match (name, value) {
            ("latency", FieldValue::UInt(ms)) => ms,
            ("latency", FieldValue::Int(ms)) if ms >= 0 => ms as u32,
            _ => return false,
        };
        self.depth = Self::depth_for(latency);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PayloadDescriptor;

    fn packet(seq: u16, marker: bool, payload: &[u8]) -> Buffer {
        let mut data = vec![0x80, (marker as u8) << 7 | 96];
        data.extend_from_slice(&seq.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(payload);
        Buffer::new(data)
    }

    fn sequences(buffers: &[Buffer]) -> Vec<u16> {
        buffers
            .iter()
            .map(|b| RtpPacket::parse(&b.data).unwrap().sequence)
            .collect()
    }

    #[test]
    fn speex_caps_are_available_immediately() {
        let pay = RtpPayloader::speex();
        let descriptor = PayloadDescriptor::from_structure(&pay.src_caps().unwrap()).unwrap();
        assert_eq!(descriptor.payload_type, 110);
        assert_eq!(descriptor.encoding_name, "SPEEX");
        assert_eq!(descriptor.clock_rate, Some(16000));
        assert_eq!(descriptor.channels, Some(1));
    }

    #[test]
    fn theora_caps_wait_for_first_frame() {
        let mut pay = RtpPayloader::theora(30);
        assert!(pay.src_caps().is_none());
        pay.process(Buffer::new(vec![0, 64, 0, 48, 1, 2, 3])).unwrap();

        let descriptor = PayloadDescriptor::from_structure(&pay.src_caps().unwrap()).unwrap();
        assert_eq!(descriptor.encoding_name, "THEORA");
        assert_eq!(descriptor.parameter("configuration"), Some("00400030"));
        assert_eq!(descriptor.parameter("delivery-method"), Some("inline"));
    }

    #[test]
    fn payloader_fragments_at_mtu() {
        let mut pay = RtpPayloader::theora(30);
        assert!(pay.set_property("mtu", FieldValue::UInt(112)));
        let packets = pay.process(Buffer::new(vec![7u8; 250])).unwrap();
        assert_eq!(packets.len(), 3);
        let markers: Vec<bool> = packets
            .iter()
            .map(|b| RtpPacket::parse(&b.data).unwrap().marker)
            .collect();
        assert_eq!(markers, vec![false, false, true]);

        let caps = pay.src_caps().unwrap();
        let Some(&FieldValue::UInt(base)) = caps.get("seqnum-base") else {
            panic!("seqnum-base missing from {caps}");
        };
        let base = base as u16;
        assert_eq!(
            sequences(&packets),
            vec![base, base.wrapping_add(1), base.wrapping_add(2)]
        );
    }

    #[test]
    fn depayloader_reassembles_and_drops_gapped_frames() {
        let mut depay = RtpDepayloader::theora();
        assert!(depay.process(packet(0, false, b"ab")).unwrap().is_empty());
        let frame = depay.process(packet(1, true, b"cd")).unwrap();
        assert_eq!(&frame[0].data[..], b"abcd");

        assert!(depay.process(packet(2, false, b"ef")).unwrap().is_empty());
        // packet 3 lost
        assert!(depay.process(packet(4, true, b"gh")).unwrap().is_empty());
        let frame = depay.process(packet(5, true, b"ij")).unwrap();
        assert_eq!(&frame[0].data[..], b"ij");
    }

    #[test]
    fn depayloader_accepts_matching_caps() {
        let depay = RtpDepayloader::speex();
        let speex = PayloadDescriptor::new(MediaKind::Audio, 110, "speex")
            .to_structure()
            .unwrap();
        let theora = PayloadDescriptor::new(MediaKind::Video, 96, "THEORA")
            .to_structure()
            .unwrap();
        assert!(depay.accepts(&speex));
        assert!(!depay.accepts(&theora));
    }

    #[test]
    fn jitter_buffer_reorders() {
        let mut jitter = JitterBuffer::new();
        let mut released = Vec::new();
        for seq in [10, 12, 11, 13] {
            released.extend(jitter.process(packet(seq, false, b"")).unwrap());
        }
        assert_eq!(sequences(&released), vec![10, 11, 12, 13]);

        assert!(jitter.process(packet(9, false, b"")).unwrap().is_empty());
    }

    #[test]
    fn jitter_buffer_skips_gap_when_full() {
        let mut jitter = JitterBuffer::new();
        assert!(jitter.set_property("latency", FieldValue::UInt(10)));

        let mut released = Vec::new();
        for seq in [0, 2, 3] {
            released.extend(jitter.process(packet(seq, false, b"")).unwrap());
        }
        assert_eq!(sequences(&released), vec![0, 2, 3]);
    }

    #[test]
    fn jitter_buffer_handles_wraparound() {
        let mut jitter = JitterBuffer::new();
        let mut released = Vec::new();
        for seq in [65534, 0, 65535, 1] {
            released.extend(jitter.process(packet(seq, false, b"")).unwrap());
        }
        assert_eq!(sequences(&released), vec![65534, 65535, 0, 1]);
    }
}
