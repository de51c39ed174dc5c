use rand::RngExt;

/// Length of the RTP fixed header without CSRCs (RFC 3550 §5.1).
pub const RTP_HEADER_LEN: usize = 12;

/// Outgoing RTP header state for one SSRC.
///
/// ```text
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// |                           Timestamp                           |
/// |                             SSRC                              |
/// ```
///
/// Written headers never carry padding, extensions or CSRCs. The sequence
/// number wraps at 16 bits and the timestamp at 32.
#[derive(Debug)]
pub struct RtpHeader {
    pub pt: u8,
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Header state starting at sequence 0 and timestamp 0.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::starting_at(pt, ssrc, 0, 0)
    }

    /// Header state with explicit sequence and timestamp bases.
    pub fn starting_at(pt: u8, ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            sequence,
            timestamp,
            "rtp sender created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence,
            timestamp,
        }
    }

    /// Random SSRC, sequence base and timestamp base (RFC 3550 §5.1, §8.1).
    pub fn randomized(pt: u8) -> Self {
        let mut rng = rand::rng();
        Self::starting_at(pt, rng.random(), rng.random(), rng.random())
    }

    /// Sequence number of the next written header.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Serialize the next header. `marker` flags the last packet of a frame.
    pub fn write(&mut self, marker: bool) -> [u8; RTP_HEADER_LEN] {
        let mut out = [0u8; RTP_HEADER_LEN];
        out[0] = 0x80;
        out[1] = if marker { 0x80 | self.pt } else { self.pt };
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        self.sequence = self.sequence.wrapping_add(1);
        out
    }

    /// Move the timestamp forward by `ticks` of the media clock.
    pub fn advance_timestamp(&mut self, ticks: u32) {
        self.timestamp = self.timestamp.wrapping_add(ticks);
    }
}

/// Read-only view of a received RTP packet.
///
/// Parsing skips CSRCs and the header extension and strips padding, so
/// [`payload`](Self::payload) is exactly the codec payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub pt: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a packet; `None` if it is not a well-formed RTP version 2 packet.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < RTP_HEADER_LEN || data[0] >> 6 != 2 {
            return None;
        }
        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0f) as usize;

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if extension {
            let ext = data.get(offset..offset + 4)?;
            let words = u16::from_be_bytes([ext[2], ext[3]]) as usize;
            offset += 4 + words * 4;
        }

        let mut end = data.len();
        if padding {
            let pad = *data.last()? as usize;
            end = end.checked_sub(pad)?;
        }
        if offset > end {
            return None;
        }

        Some(Self {
            marker: data[1] & 0x80 != 0,
            pt: data[1] & 0x7f,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: &data[offset..end],
        })
    }
}

/// Compare sequence numbers with wrap-around (RFC 3550 Appendix A.1).
///
/// Returns `true` when `a` comes strictly before `b`.
pub fn seq_before(a: u16, b: u16) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000
}
