//! XDR primitives used by the Firebird remote protocol.
//!
//! Every quantity is big-endian and aligned to four bytes. Variable-length
//! data is followed by zero padding up to the next multiple of four.
//!
//! Encoding is provided as an extension of [`BufMut`] so request structs can
//! write straight into the connection's outgoing buffer. Decoding goes through
//! the async [`XdrRead`] trait, implemented both by the live connection and by
//! the in-memory [`XdrCursor`], so value decoding is written once.

use bytes::{Buf, BufMut, Bytes};

use super::charset::Charset;
use super::error::{FbError, FbResult};

const PAD: [u8; 4] = [0; 4];
const SPACES: [u8; 32] = [b' '; 32];

/// Number of zero bytes needed after `len` bytes to reach 4-byte alignment.
#[inline]
pub fn padding(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

// ============================================================================
// Encoding
// ============================================================================

/// XDR encoding on top of any [`BufMut`].
pub trait XdrWrite: BufMut {
    #[inline]
    fn put_xdr_i32(&mut self, value: i32) {
        self.put_i32(value);
    }

    #[inline]
    fn put_xdr_i64(&mut self, value: i64) {
        self.put_i64(value);
    }

    /// Shorts travel as a full 32-bit word.
    #[inline]
    fn put_xdr_i16(&mut self, value: i16) {
        self.put_i32(i32::from(value));
    }

    #[inline]
    fn put_xdr_f32(&mut self, value: f32) {
        self.put_i32(value.to_bits() as i32);
    }

    #[inline]
    fn put_xdr_f64(&mut self, value: f64) {
        self.put_i64(value.to_bits() as i64);
    }

    /// Booleans are a one byte opaque.
    fn put_xdr_bool(&mut self, value: bool) {
        self.put_xdr_opaque(&[u8::from(value)], 1);
    }

    /// Write `len` bytes: the data, space-filled when shorter, then padding.
    fn put_xdr_opaque(&mut self, data: &[u8], len: usize) {
        let n = data.len().min(len);
        self.put_slice(&data[..n]);
        let mut fill = len - n;
        while fill > 0 {
            let chunk = fill.min(SPACES.len());
            self.put_slice(&SPACES[..chunk]);
            fill -= chunk;
        }
        self.put_slice(&PAD[..padding(len)]);
    }

    /// Length-prefixed opaque.
    fn put_xdr_buffer(&mut self, data: &[u8]) {
        self.put_i32(data.len() as i32);
        self.put_slice(data);
        self.put_slice(&PAD[..padding(data.len())]);
    }

    fn put_xdr_str(&mut self, value: &str, charset: Charset) -> FbResult<()> {
        let bytes = charset.encode(value)?;
        self.put_xdr_buffer(&bytes);
        Ok(())
    }

    /// Segment framing used by `op_batch_segments`.
    ///
    /// The length goes out three times: twice as `len + 2` words and once as
    /// a little-endian short in front of the data.
    fn put_xdr_blob_buffer(&mut self, data: &[u8]) -> FbResult<()> {
        let len = data.len();
        if len > i16::MAX as usize {
            return Err(FbError::Protocol(format!(
                "blob segment of {} bytes exceeds {}",
                len,
                i16::MAX
            )));
        }
        self.put_i32(len as i32 + 2);
        self.put_i32(len as i32 + 2);
        self.put_u16_le(len as u16);
        self.put_slice(data);
        self.put_slice(&PAD[..padding(len + 2)]);
        Ok(())
    }

    /// A buffer whose first byte is `tag` (BPB framing for blob open/create).
    fn put_xdr_typed(&mut self, tag: u8, data: &[u8]) {
        let len = data.len() + 1;
        self.put_i32(len as i32);
        self.put_u8(tag);
        self.put_slice(data);
        self.put_slice(&PAD[..padding(len)]);
    }
}

impl<B: BufMut> XdrWrite for B {}

// ============================================================================
// Decoding
// ============================================================================

/// XDR decoding over a byte source.
///
/// Implementors only supply [`XdrRead::read_bytes`]; all framing is derived.
#[allow(async_fn_in_trait)]
pub trait XdrRead {
    /// Read exactly `len` bytes.
    async fn read_bytes(&mut self, len: usize) -> FbResult<Bytes>;

    async fn skip(&mut self, len: usize) -> FbResult<()> {
        if len > 0 {
            self.read_bytes(len).await?;
        }
        Ok(())
    }

    async fn read_i32(&mut self) -> FbResult<i32> {
        let mut b = self.read_bytes(4).await?;
        Ok(b.get_i32())
    }

    async fn read_i64(&mut self) -> FbResult<i64> {
        let mut b = self.read_bytes(8).await?;
        Ok(b.get_i64())
    }

    async fn read_i16(&mut self) -> FbResult<i16> {
        Ok(self.read_i32().await? as i16)
    }

    async fn read_f32(&mut self) -> FbResult<f32> {
        Ok(f32::from_bits(self.read_i32().await? as u32))
    }

    async fn read_f64(&mut self) -> FbResult<f64> {
        Ok(f64::from_bits(self.read_i64().await? as u64))
    }

    async fn read_bool(&mut self) -> FbResult<bool> {
        let b = self.read_opaque(1).await?;
        Ok(b[0] != 0)
    }

    /// Read `len` bytes and consume the trailing padding.
    async fn read_opaque(&mut self, len: usize) -> FbResult<Bytes> {
        let data = self.read_bytes(len).await?;
        self.skip(padding(len)).await?;
        Ok(data)
    }

    /// Read a length-prefixed opaque. The length word is truncated to 16 bits.
    async fn read_buffer(&mut self) -> FbResult<Bytes> {
        let len = self.read_i32().await? as u16 as usize;
        self.read_opaque(len).await
    }

    async fn read_string(&mut self, charset: Charset) -> FbResult<String> {
        let data = self.read_buffer().await?;
        Ok(charset.decode(&data))
    }
}

/// In-memory XDR reader.
#[derive(Debug, Clone, Default)]
pub struct XdrCursor {
    buf: Bytes,
}

impl XdrCursor {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into() }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

impl XdrRead for XdrCursor {
    async fn read_bytes(&mut self, len: usize) -> FbResult<Bytes> {
        if self.buf.len() < len {
            return Err(FbError::Protocol(format!(
                "unexpected end of buffer: need {} bytes, have {}",
                len,
                self.buf.len()
            )));
        }
        Ok(self.buf.split_to(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_padding_values() {
        let expected = [0, 3, 2, 1, 0, 3, 2, 1];
        for (len, pad) in expected.iter().enumerate() {
            assert_eq!(padding(len), *pad, "padding for {}", len);
        }
    }

    #[test]
    fn test_opaque_space_fill() {
        let mut buf = BytesMut::new();
        buf.put_xdr_opaque(b"ab", 5);
        assert_eq!(&buf[..], b"ab   \0\0\0");
    }

    #[test]
    fn test_blob_buffer_framing() {
        let mut buf = BytesMut::new();
        buf.put_xdr_blob_buffer(b"xyz").unwrap();
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 5, 0, 0, 0, 5, 3, 0, b'x', b'y', b'z', 0, 0, 0]
        );
        assert_eq!(buf.len() % 4, 0);

        let big = vec![0u8; i16::MAX as usize + 1];
        assert!(BytesMut::new().put_xdr_blob_buffer(&big).is_err());
    }

    #[test]
    fn test_typed_framing() {
        let mut buf = BytesMut::new();
        buf.put_xdr_typed(1, &[3, 1, 0]);
        assert_eq!(&buf[..], &[0, 0, 0, 4, 1, 3, 1, 0]);
    }

    #[tokio::test]
    async fn test_buffer_length_truncated_to_u16() {
        let mut raw = BytesMut::new();
        raw.put_i32(0x0001_0003);
        raw.put_slice(b"abc\0");
        let mut cursor = XdrCursor::new(raw.freeze());
        let data = cursor.read_buffer().await.unwrap();
        assert_eq!(&data[..], b"abc");
        assert_eq!(cursor.remaining(), 0);
    }

    #[tokio::test]
    async fn test_short_read_is_protocol_error() {
        let mut cursor = XdrCursor::new(vec![0u8, 1]);
        assert!(matches!(
            cursor.read_i32().await,
            Err(FbError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_stay_aligned_after_padding() {
        for len in 0..8usize {
            let data: Vec<u8> = (1..=len as u8).collect();
            let mut raw = BytesMut::new();
            raw.put_xdr_buffer(&data);
            raw.put_xdr_opaque(&data, len);
            raw.put_xdr_i32(0x1234_5678);
            let total = raw.len();
            assert_eq!(total % 4, 0, "encoded length for {}", len);

            let mut cursor = XdrCursor::new(raw.freeze());
            assert_eq!(&cursor.read_buffer().await.unwrap()[..], &data[..]);
            assert_eq!((total - cursor.remaining()) % 4, 0, "after buffer of {}", len);
            assert_eq!(&cursor.read_opaque(len).await.unwrap()[..], &data[..]);
            assert_eq!((total - cursor.remaining()) % 4, 0, "after opaque of {}", len);
            assert_eq!(cursor.read_i32().await.unwrap(), 0x1234_5678);
            assert_eq!(cursor.remaining(), 0);
        }
    }
}
