//! Blob I/O.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::database::{DbShared, FbDatabase, HandleKind};
use super::error::{FbError, FbResult};
use super::protocol::*;
use super::transaction::{FbTransaction, TxShared};

/// Largest segment a single `op_get_segment` can return.
const MAX_SEGMENT_SIZE: usize = i16::MAX as usize - 2;

/// Storage type of a new blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlobType {
    #[default]
    Segmented,
    Stream,
}

/// Options used to build the BPB of a new or opened blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlobOptions {
    pub blob_type: BlobType,
    /// Blob subtype (0 binary, 1 text)
    pub subtype: Option<i16>,
}

impl BlobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_type(mut self, blob_type: BlobType) -> Self {
        self.blob_type = blob_type;
        self
    }

    pub fn subtype(mut self, subtype: i16) -> Self {
        self.subtype = Some(subtype);
        self
    }

    /// BPB items; the version byte is added when the message is encoded.
    pub fn to_bpb(&self) -> Vec<u8> {
        let kind = match self.blob_type {
            BlobType::Segmented => bpb::TYPE_SEGMENTED,
            BlobType::Stream => bpb::TYPE_STREAM,
        };
        let mut block = vec![bpb::TYPE, 1, kind];
        if let Some(subtype) = self.subtype {
            let [lo, hi] = subtype.to_le_bytes();
            block.extend_from_slice(&[bpb::SOURCE_TYPE, 2, lo, hi]);
            block.extend_from_slice(&[bpb::TARGET_TYPE, 2, lo, hi]);
        }
        block
    }
}

/// Origin of a [`FbBlob::seek`] offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Start = 0,
    Current = 1,
    End = 2,
}

/// Read-state flags of an open blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RblFlags {
    pub eof: bool,
    /// Last read ended mid-segment
    pub segment: bool,
    /// The server has no data beyond the last segment
    pub eof_pending: bool,
    pub create: bool,
}

/// An open blob.
pub struct FbBlob {
    db: Arc<DbShared>,
    transaction: Arc<TxShared>,
    handle: i32,
    blob_id: i64,
    position: i64,
    rbl: RblFlags,
    segment_size: usize,
}

impl FbBlob {
    /// Create a new blob for writing. Its id is valid once the blob is closed.
    pub async fn create(
        db: &FbDatabase,
        transaction: &FbTransaction,
        options: &BlobOptions,
    ) -> FbResult<Self> {
        let mut blob = Self::new(db, transaction, 0);
        blob.open_request(op::CREATE_BLOB2, Some(options.to_bpb())).await?;
        blob.rbl.create = true;
        Ok(blob)
    }

    /// Open an existing blob for reading.
    pub async fn open(db: &FbDatabase, transaction: &FbTransaction, blob_id: i64) -> FbResult<Self> {
        let mut blob = Self::new(db, transaction, blob_id);
        blob.open_request(op::OPEN_BLOB2, None).await?;
        Ok(blob)
    }

    fn new(db: &FbDatabase, transaction: &FbTransaction, blob_id: i64) -> Self {
        Self {
            db: db.shared.clone(),
            transaction: transaction.shared.clone(),
            handle: INVALID_OBJECT,
            blob_id,
            position: 0,
            rbl: RblFlags::default(),
            segment_size: db.shared.packet_size().clamp(1, MAX_SEGMENT_SIZE),
        }
    }

    async fn open_request(&mut self, opcode: i32, bpb: Option<Vec<u8>>) -> FbResult<()> {
        self.transaction.ensure_active()?;
        let response = {
            let mut conn = self.db.lock().await?;
            conn.send_message(&OpenBlob {
                op: opcode,
                bpb,
                tr_handle: self.transaction.handle,
                blob_id: self.blob_id,
            })
            .await?;
            conn.read_response().await?
        };
        self.handle = response.object_handle;
        if opcode == op::CREATE_BLOB2 {
            self.blob_id = response.blob_id;
        }
        self.db.handles.lock().insert(HandleKind::Blob, self.handle);
        debug!(handle = self.handle, blob_id = self.blob_id, opcode, "blob opened");
        Ok(())
    }

    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn blob_id(&self) -> i64 {
        self.blob_id
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn flags(&self) -> RblFlags {
        self.rbl
    }

    pub fn is_eof(&self) -> bool {
        self.rbl.eof
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn set_segment_size(&mut self, size: usize) {
        self.segment_size = size.clamp(1, MAX_SEGMENT_SIZE);
    }

    /// Read the next batch of segments, or `None` at end of blob.
    pub async fn read_segment(&mut self) -> FbResult<Option<Vec<u8>>> {
        self.check_handle()?;
        if self.rbl.eof {
            return Ok(None);
        }
        let length = (self.segment_size + 2).min(i16::MAX as usize) as i32;
        let response = {
            let mut conn = self.db.lock().await?;
            conn.send_message(&GetSegment {
                blob_handle: self.handle,
                length,
            })
            .await?;
            conn.read_response().await?
        };

        self.rbl.segment = response.object_handle == 1;
        if response.object_handle == 2 {
            self.rbl.eof_pending = true;
        }
        if response.data.is_empty() {
            self.rbl.eof = true;
            return Ok(None);
        }
        let data = unpack_segments(response.data)?;
        self.position += data.len() as i64;
        Ok(Some(data))
    }

    /// Read from the current position to the end.
    pub async fn read_to_end(&mut self) -> FbResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_segment().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Append `data` in `segment_size` chunks.
    pub async fn write(&mut self, data: &[u8]) -> FbResult<()> {
        self.check_handle()?;
        for chunk in data.chunks(self.segment_size) {
            let mut conn = self.db.lock().await?;
            conn.send_message(&BatchSegments {
                blob_handle: self.handle,
                data: chunk,
            })
            .await?;
            conn.read_response().await?;
            self.position += chunk.len() as i64;
        }
        Ok(())
    }

    /// Move to `offset` relative to `mode`; returns the new position.
    pub async fn seek(&mut self, mode: SeekMode, offset: i32) -> FbResult<i64> {
        self.check_handle()?;
        let response = {
            let mut conn = self.db.lock().await?;
            conn.send_message(&SeekBlob {
                blob_handle: self.handle,
                mode: mode as i32,
                offset,
            })
            .await?;
            conn.read_response().await?
        };
        self.position = i64::from(response.object_handle);
        self.rbl.eof = false;
        self.rbl.eof_pending = false;
        Ok(self.position)
    }

    /// Close the blob, keeping what was written.
    pub async fn close(&mut self) -> FbResult<()> {
        self.release(op::CLOSE_BLOB).await
    }

    /// Close the blob, discarding a blob being created.
    pub async fn cancel(&mut self) -> FbResult<()> {
        self.release(op::CANCEL_BLOB).await
    }

    async fn release(&mut self, opcode: i32) -> FbResult<()> {
        self.check_handle()?;
        {
            let mut conn = self.db.lock().await?;
            conn.send_message(&ReleaseObject {
                op: opcode,
                handle: self.handle,
            })
            .await?;
            conn.read_response().await?;
        }
        self.db.handles.lock().remove(HandleKind::Blob, self.handle);
        debug!(handle = self.handle, opcode, "blob released");
        self.handle = INVALID_OBJECT;
        Ok(())
    }

    fn check_handle(&self) -> FbResult<()> {
        self.db.handles.lock().check(HandleKind::Blob, self.handle)
    }

    // ========================================================================
    // Convenience
    // ========================================================================

    /// Read a whole blob by id.
    pub async fn read_all(
        db: &FbDatabase,
        transaction: &FbTransaction,
        blob_id: i64,
    ) -> FbResult<Vec<u8>> {
        let mut blob = Self::open(db, transaction, blob_id).await?;
        let data = blob.read_to_end().await?;
        blob.close().await?;
        Ok(data)
    }

    /// Store `data` in a new blob and return its id.
    pub async fn write_all(
        db: &FbDatabase,
        transaction: &FbTransaction,
        data: &[u8],
        options: &BlobOptions,
    ) -> FbResult<i64> {
        let mut blob = Self::create(db, transaction, options).await?;
        if let Err(e) = blob.write(data).await {
            if !e.is_fatal() {
                let _ = blob.cancel().await;
            }
            return Err(e);
        }
        blob.close().await?;
        Ok(blob.blob_id)
    }
}

impl std::fmt::Debug for FbBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbBlob")
            .field("handle", &self.handle)
            .field("blob_id", &self.blob_id)
            .field("position", &self.position)
            .field("rbl", &self.rbl)
            .finish()
    }
}

/// Strip the 2-byte little-endian length header from each segment.
fn unpack_segments(data: Bytes) -> FbResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;
    while pos < data.len() {
        let header = data
            .get(pos..pos + 2)
            .ok_or_else(|| FbError::Protocol("truncated segment header".to_string()))?;
        let len = u16::from_le_bytes([header[0], header[1]]) as usize;
        let segment = data
            .get(pos + 2..pos + 2 + len)
            .ok_or_else(|| FbError::Protocol("truncated blob segment".to_string()))?;
        out.extend_from_slice(segment);
        pos += 2 + len;
    }
    Ok(out)
}
