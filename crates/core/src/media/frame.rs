use bytes::Bytes;

use super::MediaKind;

/// Bytes per pixel of every [`RenderFrame`] (32-bit RGB, padding byte unused).
pub const RENDER_BYTES_PER_PIXEL: usize = 4;

/// Why a decoded frame was refused by a render sink.
///
/// Rejections are expected occasionally (e.g. during caps renegotiation) and
/// are never fatal: the frame is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame dimensions unknown")]
    MissingDimensions,
    #[error("frame has zero width or height")]
    ZeroDimension,
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// A decoded, display-ready video frame in 32-bit RGB.
///
/// Construction validates that the buffer holds exactly
/// `width * height * 4` bytes; a `RenderFrame` that exists is always
/// well-formed.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderFrame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl RenderFrame {
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self, FrameError> {
        let data = data.into();
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension);
        }
        let expected = width as usize * height as usize * RENDER_BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Validate a frame whose dimensions may not be known.
    pub fn from_parts(
        dimensions: Option<(u32, u32)>,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let (width, height) = dimensions.ok_or(FrameError::MissingDimensions)?;
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major pixels, 4 bytes each.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Pixel at `(x, y)` as `[b0, b1, b2, b3]`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * RENDER_BYTES_PER_PIXEL;
        let px = &self.data[at..at + RENDER_BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl std::fmt::Debug for RenderFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size", &self.data.len())
            .finish()
    }
}

/// An opaque RTP packet travelling between the core and the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPacket {
    pub kind: MediaKind,
    pub data: Bytes,
}

impl TransportPacket {
    pub fn new(kind: MediaKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_size_is_accepted() {
        let frame = RenderFrame::new(4, 4, vec![0u8; 64]).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 4));
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(
            RenderFrame::new(4, 4, vec![0u8; 63]),
            Err(FrameError::SizeMismatch {
                expected: 64,
                actual: 63
            })
        );
    }

    #[test]
    fn unknown_or_zero_dimensions_are_rejected() {
        assert_eq!(
            RenderFrame::from_parts(None, vec![0u8; 64]),
            Err(FrameError::MissingDimensions)
        );
        assert_eq!(
            RenderFrame::new(0, 4, Vec::new()),
            Err(FrameError::ZeroDimension)
        );
    }

    #[test]
    fn pixel_lookup() {
        let mut data = vec![0u8; 2 * 2 * 4];
        data[12..16].copy_from_slice(&[1, 2, 3, 4]);
        let frame = RenderFrame::new(2, 2, data).unwrap();
        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.pixel(2, 0), None);
    }
}
