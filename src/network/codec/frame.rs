use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame body size in bytes
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Length prefix size
const LEN_SIZE: usize = 4;

/// Channel id size
const CHANNEL_SIZE: usize = 4;

/// A payload tagged with the channel it travels on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel id, routed to the module owning it
    pub channel: i32,

    /// Opaque payload
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

/// Codec for channel-tagged frames
///
/// Wire layout: `[u32 body len][i32 channel][payload]`, big endian.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < LEN_SIZE {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_SIZE];
        len_bytes.copy_from_slice(&src[..LEN_SIZE]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame too large: {} bytes", len),
            ));
        }
        if len < CHANNEL_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame too short: {} bytes", len),
            ));
        }

        if src.len() < LEN_SIZE + len {
            src.reserve(LEN_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_SIZE);
        let channel = src.get_i32();
        let payload = src.split_to(len - CHANNEL_SIZE).freeze();

        Ok(Some(Frame { channel, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let len = CHANNEL_SIZE + frame.payload.len();
        if len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame too large: {} bytes", len),
            ));
        }

        dst.reserve(LEN_SIZE + len);
        dst.put_u32(len as u32);
        dst.put_i32(frame.channel);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
