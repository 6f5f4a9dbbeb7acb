//! Array slices.
//!
//! Array columns are read and written whole through `op_get_slice` and
//! `op_put_slice`. Each call carries an SDL program describing the element
//! type and the bounds of every dimension.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::debug;

use super::database::{DbShared, FbDatabase};
use super::error::{isc, FbError, FbResult};
use super::protocol::*;
use super::statement::FbStatement;
use super::transaction::{FbTransaction, TxShared};
use super::types::{decode_value, encode_value, FbValue, FieldDescriptor, SqlType};
use super::xdr::XdrRead;

/// Dimension limit of the SDL `do` loops.
pub const MAX_DIMENSIONS: usize = 16;

const DESCRIPTOR_SQL: &str = "SELECT Y.RDB$FIELD_TYPE, Y.RDB$FIELD_SCALE, Y.RDB$FIELD_LENGTH, \
     Y.RDB$DIMENSIONS, X.RDB$FIELD_SOURCE \
     FROM RDB$RELATION_FIELDS X, RDB$FIELDS Y \
     WHERE X.RDB$FIELD_SOURCE = Y.RDB$FIELD_NAME \
     AND X.RDB$RELATION_NAME = ? AND X.RDB$FIELD_NAME = ?";

const BOUNDS_SQL: &str = "SELECT X.RDB$LOWER_BOUND, X.RDB$UPPER_BOUND \
     FROM RDB$FIELD_DIMENSIONS X \
     WHERE X.RDB$FIELD_NAME = ? \
     ORDER BY X.RDB$DIMENSION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayBound {
    pub lower: i32,
    pub upper: i32,
}

impl ArrayBound {
    pub fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    pub fn len(&self) -> usize {
        (self.upper - self.lower + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Element type and shape of an array column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDesc {
    /// BLR type code of one element
    pub blr_type: u8,
    pub scale: i8,
    /// Element length in bytes
    pub length: i16,
    pub relation_name: String,
    pub field_name: String,
    /// Traverse the last dimension first
    pub column_major: bool,
    pub bounds: Vec<ArrayBound>,
}

impl ArrayDesc {
    /// Number of elements in the whole array.
    pub fn element_count(&self) -> usize {
        self.bounds.iter().map(ArrayBound::len).product()
    }

    /// Byte length of a full slice.
    pub fn slice_length(&self) -> usize {
        let count = self.element_count();
        let mut length = count * self.length.max(0) as usize;
        if matches!(self.blr_type, blr::VARYING | blr::VARYING2) {
            length += count * 2;
        }
        length
    }

    /// Descriptor for a single element, as the value codec sees it.
    pub fn element_field(&self) -> FbResult<FieldDescriptor> {
        let sql_type = SqlType::from_blr(self.blr_type).ok_or_else(|| {
            FbError::Type(format!("unsupported array element type {}", self.blr_type))
        })?;
        let mut field = FieldDescriptor::new(sql_type, i32::from(self.length));
        field.scale = i32::from(self.scale);
        field.relation = self.relation_name.clone();
        field.name = self.field_name.clone();
        Ok(field)
    }
}

// ============================================================================
// SDL
// ============================================================================

fn put_literal(program: &mut Vec<u8>, value: i32) {
    if let Ok(tiny) = i8::try_from(value) {
        program.push(sdl::TINY_INTEGER);
        program.push(tiny as u8);
    } else if let Ok(short) = i16::try_from(value) {
        program.push(sdl::SHORT_INTEGER);
        program.extend_from_slice(&short.to_le_bytes());
    } else {
        program.push(sdl::LONG_INTEGER);
        program.extend_from_slice(&value.to_le_bytes());
    }
}

fn put_name(program: &mut Vec<u8>, tag: u8, name: &str) -> FbResult<()> {
    let len = u8::try_from(name.len())
        .map_err(|_| FbError::Type(format!("name too long for SDL: {}", name)))?;
    program.push(tag);
    program.push(len);
    program.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Build the SDL program describing a full slice of `desc`.
pub fn generate_sdl(desc: &ArrayDesc) -> FbResult<Vec<u8>> {
    let dimensions = desc.bounds.len();
    if dimensions > MAX_DIMENSIONS {
        return Err(FbError::status(isc::INVALID_DIMENSION));
    }

    let mut program = vec![sdl::VERSION1, sdl::STRUCT, 1, desc.blr_type];
    match desc.blr_type {
        blr::SHORT | blr::LONG | blr::INT64 | blr::QUAD => program.push(desc.scale as u8),
        blr::TEXT | blr::TEXT2 | blr::CSTRING | blr::CSTRING2 | blr::VARYING | blr::VARYING2 => {
            program.extend_from_slice(&desc.length.to_le_bytes())
        }
        _ => {}
    }
    put_name(&mut program, sdl::RELATION, &desc.relation_name)?;
    put_name(&mut program, sdl::FIELD, &desc.field_name)?;

    let order: Vec<usize> = if desc.column_major {
        (0..dimensions).rev().collect()
    } else {
        (0..dimensions).collect()
    };
    for n in order {
        let bound = desc.bounds[n];
        if bound.lower == 1 {
            program.extend_from_slice(&[sdl::DO1, n as u8]);
        } else {
            program.extend_from_slice(&[sdl::DO2, n as u8]);
            put_literal(&mut program, bound.lower);
        }
        put_literal(&mut program, bound.upper);
    }

    program.extend_from_slice(&[sdl::ELEMENT, 1, sdl::SCALAR, 0, dimensions as u8]);
    for n in 0..dimensions {
        program.extend_from_slice(&[sdl::VARIABLE, n as u8]);
    }
    program.push(sdl::EOC);
    Ok(program)
}

/// Storage length of fixed-size element types.
fn fixed_length(blr_type: u8) -> i16 {
    match blr_type {
        blr::BOOL => 1,
        blr::SHORT => 2,
        blr::LONG | blr::FLOAT | blr::SQL_DATE | blr::SQL_TIME => 4,
        blr::INT64 | blr::QUAD | blr::DOUBLE | blr::D_FLOAT | blr::TIMESTAMP => 8,
        _ => 0,
    }
}

struct SdlReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SdlReader<'a> {
    fn byte(&mut self) -> FbResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| FbError::Protocol("truncated SDL".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> FbResult<&'a [u8]> {
        let out = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or_else(|| FbError::Protocol("truncated SDL".to_string()))?;
        self.pos += n;
        Ok(out)
    }

    fn literal(&mut self) -> FbResult<i32> {
        match self.byte()? {
            sdl::TINY_INTEGER => Ok(i32::from(self.byte()? as i8)),
            sdl::SHORT_INTEGER => {
                let b = self.bytes(2)?;
                Ok(i32::from(i16::from_le_bytes([b[0], b[1]])))
            }
            sdl::LONG_INTEGER => {
                let b = self.bytes(4)?;
                Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            other => Err(FbError::Protocol(format!("unexpected SDL literal tag {}", other))),
        }
    }

    fn name(&mut self) -> FbResult<String> {
        let len = self.byte()? as usize;
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }
}

/// Decode an SDL program produced by [`generate_sdl`].
pub fn parse_sdl(buf: &[u8]) -> FbResult<ArrayDesc> {
    let mut r = SdlReader { buf, pos: 0 };
    let unexpected = |what: &str, tag: u8| FbError::Protocol(format!("expected {} in SDL, got {}", what, tag));

    let version = r.byte()?;
    if version != sdl::VERSION1 {
        return Err(unexpected("version1", version));
    }
    let tag = r.byte()?;
    if tag != sdl::STRUCT {
        return Err(unexpected("struct", tag));
    }
    r.byte()?;
    let blr_type = r.byte()?;
    let mut scale = 0i8;
    let mut length = fixed_length(blr_type);
    match blr_type {
        blr::SHORT | blr::LONG | blr::INT64 | blr::QUAD => scale = r.byte()? as i8,
        blr::TEXT | blr::TEXT2 | blr::CSTRING | blr::CSTRING2 | blr::VARYING | blr::VARYING2 => {
            let b = r.bytes(2)?;
            length = i16::from_le_bytes([b[0], b[1]]);
        }
        _ => {}
    }

    let mut relation_name = String::new();
    let mut field_name = String::new();
    let mut loops: Vec<(usize, ArrayBound)> = Vec::new();
    loop {
        match r.byte()? {
            sdl::RELATION => relation_name = r.name()?,
            sdl::FIELD => field_name = r.name()?,
            sdl::DO1 => {
                let n = r.byte()? as usize;
                let upper = r.literal()?;
                loops.push((n, ArrayBound::new(1, upper)));
            }
            sdl::DO2 => {
                let n = r.byte()? as usize;
                let lower = r.literal()?;
                let upper = r.literal()?;
                loops.push((n, ArrayBound::new(lower, upper)));
            }
            sdl::ELEMENT => break,
            other => return Err(unexpected("relation, field or do", other)),
        }
    }

    let column_major = loops.len() > 1 && loops[0].0 == loops.len() - 1;
    let mut bounds = vec![ArrayBound::new(0, 0); loops.len()];
    for (n, bound) in loops {
        let slot = bounds
            .get_mut(n)
            .ok_or_else(|| FbError::Protocol(format!("SDL loop variable {} out of range", n)))?;
        *slot = bound;
    }

    Ok(ArrayDesc {
        blr_type,
        scale,
        length,
        relation_name,
        field_name,
        column_major,
        bounds,
    })
}

// ============================================================================
// Array
// ============================================================================

/// An array column value bound to a transaction.
pub struct FbArray {
    db: Arc<DbShared>,
    transaction: Arc<TxShared>,
    array_id: i64,
    desc: ArrayDesc,
}

impl FbArray {
    pub fn new(db: &FbDatabase, transaction: &FbTransaction, array_id: i64, desc: ArrayDesc) -> Self {
        Self {
            db: db.shared.clone(),
            transaction: transaction.shared.clone(),
            array_id,
            desc,
        }
    }

    /// Look up the descriptor of `relation.field` and bind `array_id`.
    pub async fn open(
        db: &FbDatabase,
        transaction: &FbTransaction,
        array_id: i64,
        relation: &str,
        field: &str,
    ) -> FbResult<Self> {
        let desc = Self::lookup(db, transaction, relation, field).await?;
        Ok(Self::new(db, transaction, array_id, desc))
    }

    pub fn array_id(&self) -> i64 {
        self.array_id
    }

    pub fn descriptor(&self) -> &ArrayDesc {
        &self.desc
    }

    /// Read every element, in traversal order.
    pub async fn get_slice(&self) -> FbResult<Vec<FbValue>> {
        self.transaction.ensure_active()?;
        let sdl = generate_sdl(&self.desc)?;
        let field = self.desc.element_field()?;
        let slice_length = i32::try_from(self.desc.slice_length())
            .map_err(|_| FbError::Type("array slice too large".to_string()))?;

        let mut conn = self.db.lock().await?;
        conn.send_message(&GetSlice {
            tr_handle: self.transaction.handle,
            array_id: self.array_id,
            slice_length,
            sdl,
        })
        .await?;

        let operation = conn.read_operation().await?;
        if operation != op::SLICE {
            let response = conn.process_operation(operation).await?;
            return Err(FbError::Protocol(format!(
                "unexpected reply to get_slice: {:?}",
                response
            )));
        }
        conn.read_i32().await?;
        let length = conn.read_i32().await?.max(0) as usize;
        let element_length = usize::try_from(self.desc.length)
            .ok()
            .filter(|l| *l > 0)
            .ok_or_else(|| FbError::Type("array element length must be positive".to_string()))?;
        let count = length / element_length;

        let charset = conn.charset();
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(decode_value(&mut *conn, &field, charset).await?);
        }
        debug!(array_id = self.array_id, elements = values.len(), "slice read");
        Ok(values)
    }

    /// Write `values` as a full slice; returns the new array id.
    pub async fn put_slice(&mut self, values: &[FbValue]) -> FbResult<i64> {
        self.transaction.ensure_active()?;
        let expected = self.desc.element_count();
        if values.len() != expected {
            return Err(FbError::Type(format!(
                "array expects {} elements, got {}",
                expected,
                values.len()
            )));
        }
        let sdl = generate_sdl(&self.desc)?;
        let field = self.desc.element_field()?;
        let slice_length = i32::try_from(self.desc.slice_length())
            .map_err(|_| FbError::Type("array slice too large".to_string()))?;

        let mut conn = self.db.lock().await?;
        let charset = conn.charset();
        let mut slice = BytesMut::new();
        for value in values {
            encode_value(&mut slice, &field, value, charset)?;
        }
        conn.send_message(&PutSlice {
            tr_handle: self.transaction.handle,
            slice_length,
            sdl,
            slice: slice.to_vec(),
        })
        .await?;
        let response = conn.read_response().await?;
        self.array_id = response.blob_id;
        debug!(array_id = self.array_id, elements = values.len(), "slice written");
        Ok(self.array_id)
    }

    /// Read the element type and bounds of `relation.field` from the system
    /// tables.
    pub async fn lookup(
        db: &FbDatabase,
        transaction: &FbTransaction,
        relation: &str,
        field: &str,
    ) -> FbResult<ArrayDesc> {
        let mut statement = FbStatement::new(db, Some(transaction));
        statement.prepare(DESCRIPTOR_SQL).await?;
        statement
            .execute(&[
                FbValue::Text(relation.to_string()),
                FbValue::Text(field.to_string()),
            ])
            .await?;
        let row = statement.fetch().await?.ok_or_else(|| {
            FbError::Type(format!("{}.{} is not an array column", relation, field))
        })?;
        let int = |i: usize| -> FbResult<i64> {
            row.get(i)
                .and_then(FbValue::as_i64)
                .ok_or_else(|| FbError::Protocol(format!("unexpected array descriptor column {}", i)))
        };
        let blr_type = u8::try_from(int(0)?)
            .map_err(|_| FbError::Type("array element type out of range".to_string()))?;
        let scale = int(1)? as i8;
        let length = int(2)? as i16;
        let dimensions = int(3)?.max(0) as usize;
        let source = row
            .get(4)
            .and_then(FbValue::as_str)
            .map(|s| s.trim_end().to_string())
            .ok_or_else(|| FbError::Protocol("missing array field source".to_string()))?;
        statement.free(super::statement::FreeMode::Close).await?;

        statement.prepare(BOUNDS_SQL).await?;
        statement.execute(&[FbValue::Text(source)]).await?;
        let mut bounds = Vec::with_capacity(dimensions);
        while let Some(row) = statement.fetch().await? {
            let lower = row.first().and_then(FbValue::as_i64).unwrap_or(1);
            let upper = row.get(1).and_then(FbValue::as_i64).unwrap_or(0);
            bounds.push(ArrayBound::new(lower as i32, upper as i32));
        }
        statement.free(super::statement::FreeMode::Drop).await?;

        if bounds.len() != dimensions {
            return Err(FbError::Protocol(format!(
                "array {}.{} has {} dimensions but {} bounds",
                relation,
                field,
                dimensions,
                bounds.len()
            )));
        }
        Ok(ArrayDesc {
            blr_type,
            scale,
            length,
            relation_name: relation.to_string(),
            field_name: field.to_string(),
            column_major: false,
            bounds,
        })
    }
}

impl std::fmt::Debug for FbArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbArray")
            .field("array_id", &self.array_id)
            .field("desc", &self.desc)
            .finish()
    }
}
