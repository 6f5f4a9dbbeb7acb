//! Tagged parameter block builder.
//!
//! DPB, TPB, BPB and EPB all share one layout: a version byte followed by
//! `(tag, value)` clusters. Integer values are `tag, 4, i32 LE`, byte strings
//! are `tag, len, bytes` and flags are a bare tag.

use super::error::{FbError, FbResult};

/// Builder for a parameter block.
#[derive(Debug, Clone, Default)]
pub struct ParamBuffer {
    buf: Vec<u8>,
}

impl ParamBuffer {
    /// Start a block with the given version byte.
    pub fn new(version: u8) -> Self {
        Self { buf: vec![version] }
    }

    /// Start a block with no version byte (used for info item lists).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a bare flag.
    pub fn put_tag(&mut self, tag: u8) -> &mut Self {
        self.buf.push(tag);
        self
    }

    /// Append `tag, 4, i32 LE`.
    pub fn put_int(&mut self, tag: u8, value: i32) -> &mut Self {
        self.buf.push(tag);
        self.buf.push(4);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append `tag, len, bytes`. Values longer than 255 bytes are rejected.
    pub fn put_bytes(&mut self, tag: u8, value: &[u8]) -> FbResult<&mut Self> {
        let len = u8::try_from(value.len()).map_err(|_| {
            FbError::Type(format!(
                "parameter {} is {} bytes, limit is 255",
                tag,
                value.len()
            ))
        })?;
        self.buf.push(tag);
        self.buf.push(len);
        self.buf.extend_from_slice(value);
        Ok(self)
    }

    pub fn put_str(&mut self, tag: u8, value: &str) -> FbResult<&mut Self> {
        self.put_bytes(tag, value.as_bytes())
    }

    /// Append a raw byte without a tag.
    pub fn put_raw(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
