//! Multipart framing on a TCP byte stream
//!
//! Each part of a message is sent as one frame:
//!
//! ```text
//! ┌──────────────┬────────────────────┬─────────────────────┐
//! │ Flags (1 B)  │ Length (4 bytes)   │ Body (variable)     │
//! │ bit 0 = MORE │ Big-endian u32     │ header JSON / bytes │
//! └──────────────┴────────────────────┴─────────────────────┘
//! ```
//!
//! MORE is set on every frame of a message except the last, so a reader always
//! knows where one message ends without understanding the bodies.
//!
//! A frame longer than the configured limit, or one with unknown flag bits,
//! means the stream can no longer be trusted; the decoder reports
//! `ConnectionClosed` and the connection is dropped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Result, StreamError};

/// Flag bit marking that more frames of the same message follow.
pub const FLAG_MORE: u8 = 0x01;

/// Default per-frame size limit (64 MiB, enough for a raw 4K RGB frame).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Parts in every message: the JSON header and the payload.
pub const MESSAGE_PARTS: usize = 2;

const FRAME_HEADER_LEN: usize = 5;

/// One frame of a multipart message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub more: bool,
    pub body: Bytes,
}

impl WireFrame {
    /// A frame followed by more frames of the same message.
    pub fn more(body: Bytes) -> Self {
        Self { more: true, body }
    }

    /// The final frame of a message.
    pub fn last(body: Bytes) -> Self {
        Self { more: false, body }
    }
}

/// Length-prefixed frame codec for `FramedRead`/`FramedWrite`.
///
/// Partial frames stay buffered inside the codec, so dropping a pending read
/// (e.g. on a receive timeout) never desynchronizes the stream.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Decoder for FrameCodec {
    type Item = WireFrame;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireFrame>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let flags = src[0];
        if flags & !FLAG_MORE != 0 {
            return Err(StreamError::connection_closed(format!(
                "unknown frame flags {flags:#04x}"
            )));
        }

        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_frame_bytes {
            return Err(StreamError::connection_closed(format!(
                "frame of {len} bytes exceeds the {} byte limit",
                self.max_frame_bytes
            )));
        }

        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let body = src.split_to(len).freeze();
        Ok(Some(WireFrame { more: flags & FLAG_MORE != 0, body }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<WireFrame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(StreamError::connection_closed(format!(
                "stream ended inside a frame ({} bytes buffered)",
                src.len()
            ))),
        }
    }
}

impl Encoder<WireFrame> for FrameCodec {
    type Error = StreamError;

    fn encode(&mut self, frame: WireFrame, dst: &mut BytesMut) -> Result<()> {
        let len = u32::try_from(frame.body.len())
            .ok()
            .filter(|&len| len as usize <= self.max_frame_bytes)
            .ok_or_else(|| {
                StreamError::malformed(format!(
                    "frame of {} bytes exceeds the {} byte limit",
                    frame.body.len(),
                    self.max_frame_bytes
                ))
            })?;

        dst.reserve(FRAME_HEADER_LEN + frame.body.len());
        dst.put_u8(if frame.more { FLAG_MORE } else { 0 });
        dst.put_u32(len);
        dst.extend_from_slice(&frame.body);
        Ok(())
    }
}

/// Collects frames into complete multipart messages.
///
/// Parts received so far are kept across calls, so an interrupted read resumes
/// where it left off. A message announcing more than `max_parts` parts is
/// rejected once, and its remaining frames are skipped.
#[derive(Debug)]
pub struct MultipartAssembler {
    parts: Vec<Bytes>,
    max_parts: usize,
    skipping: bool,
}

impl Default for MultipartAssembler {
    fn default() -> Self {
        Self::with_max_parts(MESSAGE_PARTS)
    }
}

impl MultipartAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_parts(max_parts: usize) -> Self {
        Self { parts: Vec::new(), max_parts: max_parts.max(1), skipping: false }
    }

    /// Add a frame; returns the whole message once its last frame arrives.
    ///
    /// # Errors
    ///
    /// `MalformedMessage` when a message runs past `max_parts`. The parts
    /// buffered so far are dropped.
    pub fn push(&mut self, frame: WireFrame) -> Result<Option<Vec<Bytes>>> {
        if self.skipping {
            self.skipping = frame.more;
            return Ok(None);
        }

        self.parts.push(frame.body);
        if !frame.more {
            return Ok(Some(std::mem::take(&mut self.parts)));
        }

        if self.parts.len() >= self.max_parts {
            self.parts.clear();
            self.skipping = true;
            return Err(StreamError::malformed(format!(
                "message has more than {} parts",
                self.max_parts
            )));
        }
        Ok(None)
    }

    /// Number of parts buffered for the message in progress.
    pub fn pending(&self) -> usize {
        self.parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(frames: Vec<WireFrame>) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn frames_decode_in_order_with_their_flags() {
        let mut buf = encode_all(vec![
            WireFrame::more(Bytes::from_static(b"{}")),
            WireFrame::last(Bytes::from_static(&[1, 2, 3])),
        ]);
        let mut codec = FrameCodec::default();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();

        assert!(first.more);
        assert_eq!(first.body.as_ref(), b"{}");
        assert!(!second.more);
        assert_eq!(second.body.as_ref(), &[1, 2, 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let full = encode_all(vec![WireFrame::last(Bytes::from_static(b"payload"))]);
        let mut codec = FrameCodec::default();

        let mut partial = BytesMut::from(&full[..8]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[8..]);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), b"payload");
    }

    #[test]
    fn oversized_frame_closes_the_connection() {
        let mut buf = encode_all(vec![WireFrame::last(Bytes::from(vec![0u8; 64]))]);
        let mut codec = FrameCodec::new(16);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, StreamError::ConnectionClosed { .. }));
    }

    #[test]
    fn unknown_flags_close_the_connection() {
        let mut buf = BytesMut::from(&[0x80u8, 0, 0, 0, 0][..]);
        let err = FrameCodec::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, StreamError::ConnectionClosed { .. }));
    }

    #[test]
    fn assembler_groups_parts_until_the_last_frame() {
        let mut assembler = MultipartAssembler::new();

        assert!(assembler.push(WireFrame::more(Bytes::from_static(b"a"))).unwrap().is_none());
        assert_eq!(assembler.pending(), 1);

        let message = assembler.push(WireFrame::last(Bytes::from_static(b"b"))).unwrap().unwrap();
        assert_eq!(message, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn overlong_message_is_rejected_and_skipped() {
        let mut assembler = MultipartAssembler::new();

        assert!(assembler.push(WireFrame::more(Bytes::from_static(b"h"))).unwrap().is_none());
        let err = assembler.push(WireFrame::more(Bytes::from_static(b"p"))).unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));
        assert_eq!(assembler.pending(), 0);

        // The rest of the rejected message is swallowed without further errors.
        for _ in 0..10 {
            assert!(assembler.push(WireFrame::more(Bytes::from_static(b"x"))).unwrap().is_none());
        }
        assert!(assembler.push(WireFrame::last(Bytes::from_static(b"x"))).unwrap().is_none());

        // The next message assembles normally.
        assert!(assembler.push(WireFrame::more(Bytes::from_static(b"a"))).unwrap().is_none());
        let message = assembler.push(WireFrame::last(Bytes::from_static(b"b"))).unwrap().unwrap();
        assert_eq!(message.len(), 2);
    }

    #[test]
    fn hang_up_inside_a_frame_closes_the_connection() {
        let mut buf = BytesMut::from(&[FLAG_MORE, 0, 0, 0, 100, b'{', b'"', b'd'][..]);
        let mut codec = FrameCodec::default();

        assert!(codec.decode(&mut buf).unwrap().is_none());
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, StreamError::ConnectionClosed { .. }), "{err}");
    }

    #[test]
    fn clean_eof_between_frames_is_not_an_error() {
        let mut buf = encode_all(vec![WireFrame::last(Bytes::from_static(b"done"))]);
        let mut codec = FrameCodec::default();

        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap().body.as_ref(), b"done");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }
}
