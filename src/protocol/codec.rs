use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CrowdError;

/// Upper bound on a single frame. Oversized frames poison the connection.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Wire framing: a little-endian u32 length followed by that many bytes of
/// UTF-8 JSON. The codec moves raw frames; message typing happens one layer
/// above.
#[derive(Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = CrowdError;

    fn decode(&mut self, src: &mut BytesMut) -> crate::Result<Option<BytesMut>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let size = Cursor::new(&src[..]).read_u32::<LittleEndian>().unwrap();
        if size > MAX_FRAME_SIZE {
            return Err(CrowdError::generic(format!(
                "frame of {} bytes exceeds the maximum of {}",
                size, MAX_FRAME_SIZE
            )));
        }
        let size = size as usize;
        if src.len() < 4 + size {
            src.reserve(4 + size - src.len());
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(size)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CrowdError;

    fn encode(&mut self, data: Bytes, dst: &mut BytesMut) -> crate::Result<()> {
        assert!(data.len() as u64 <= MAX_FRAME_SIZE as u64);
        dst.reserve(4 + data.len());
        dst.put_u32_le(data.len() as u32);
        dst.extend_from_slice(&data[..]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use super::FrameCodec;

    #[test]
    fn roundtrip() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"{\"type\":\"ping\"}"), &mut buffer)
            .unwrap();
        codec
            .encode(Bytes::from_static(b"{\"type\":\"pong\"}"), &mut buffer)
            .unwrap();

        let first = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&first[..], b"{\"type\":\"ping\"}");
        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&second[..], b"{\"type\":\"pong\"}");
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more_data() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"{\"type\":\"ping\"}"), &mut buffer)
            .unwrap();
        let full = buffer.clone();

        let mut partial = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(codec.decode(&mut buffer).is_err());
    }
}
