//! JPEG encoding of raster frames into submission payloads.

use crate::feed::RawFrame;
use bytes::Bytes;
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// MIME type attached to encoded payloads.
pub const PAYLOAD_CONTENT_TYPE: &str = "image/jpeg";

/// File name the payload is submitted under.
pub const PAYLOAD_FILE_NAME: &str = "frame.jpg";

/// Errors that can occur while encoding a frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Frame buffer is empty")]
    EmptyFrame,

    #[error("Frame buffer too short: got {got} bytes, need {need} for {width}x{height}")]
    BufferTooShort {
        got: usize,
        need: usize,
        width: u32,
        height: u32,
    },

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// An encoded still image ready for submission.
///
/// Immutable once produced; owned by the submission client until the
/// request completes or fails.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// JPEG bytes
    pub data: Bytes,

    /// MIME type of the payload
    pub content_type: &'static str,

    /// File name used in the multipart form
    pub file_name: &'static str,

    /// Dimensions of the source frame
    pub width: u32,
    pub height: u32,
}

/// Encodes RGB raster frames to JPEG payloads.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    /// Create an encoder with the given JPEG quality (1-100).
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }

    /// Encode a frame into a JPEG payload.
    pub fn encode(&self, frame: &RawFrame) -> Result<ImagePayload, EncodeError> {
        if frame.data.is_empty() {
            return Err(EncodeError::EmptyFrame);
        }

        let need = frame.width as usize * frame.height as usize * 3;
        if frame.data.len() < need {
            return Err(EncodeError::BufferTooShort {
                got: frame.data.len(),
                need,
                width: frame.width,
                height: frame.height,
            });
        }

        // ImageBuffer::from_raw only fails on a length mismatch, which the
        // check above already rules out.
        let img: RgbImage =
            ImageBuffer::from_raw(frame.width, frame.height, frame.data[..need].to_vec())
                .ok_or(EncodeError::EmptyFrame)?;

        let mut buf = Cursor::new(Vec::new());
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, self.quality);
        img.write_with_encoder(encoder)?;

        Ok(ImagePayload {
            data: Bytes::from(buf.into_inner()),
            content_type: PAYLOAD_CONTENT_TYPE,
            file_name: PAYLOAD_FILE_NAME,
            width: frame.width,
            height: frame.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn create_test_frame(width: u32, height: u32) -> RawFrame {
        let size = (width * height * 3) as usize;
        RawFrame {
            data: vec![128u8; size],
            width,
            height,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let encoder = FrameEncoder::new(85);
        let frame = create_test_frame(16, 16);
        let payload = encoder.encode(&frame).unwrap();

        assert!(!payload.data.is_empty());
        // JPEG SOI marker
        assert_eq!(&payload.data[..2], &[0xFF, 0xD8]);
        assert_eq!(payload.content_type, "image/jpeg");
        assert_eq!(payload.file_name, "frame.jpg");
        assert_eq!(payload.width, 16);
        assert_eq!(payload.height, 16);
    }

    #[test]
    fn test_empty_frame_fails() {
        let encoder = FrameEncoder::new(85);
        let mut frame = create_test_frame(16, 16);
        frame.data.clear();
        assert!(matches!(encoder.encode(&frame), Err(EncodeError::EmptyFrame)));
    }

    #[test]
    fn test_short_buffer_fails() {
        let encoder = FrameEncoder::new(85);
        let mut frame = create_test_frame(16, 16);
        frame.data.truncate(10);
        assert!(matches!(
            encoder.encode(&frame),
            Err(EncodeError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_lower_quality_smaller_payload() {
        let frame = create_test_frame(64, 64);
        let high = FrameEncoder::new(95).encode(&frame).unwrap();
        let low = FrameEncoder::new(10).encode(&frame).unwrap();
        assert!(low.data.len() <= high.data.len());
    }
}
