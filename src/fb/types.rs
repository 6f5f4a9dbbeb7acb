//! Firebird SQL types, column descriptors and row value encoding.
//!
//! Rows travel as XDR encoded messages described by a BLR program built from
//! the column descriptors. Protocol 10 to 12 follow every value with a 32-bit
//! null indicator; protocol 13 sends a leading null bitmap and omits null
//! values entirely.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use smallvec::SmallVec;

use super::charset::Charset;
use super::error::{isc, FbError, FbResult, StatusArg, StatusError};
use super::protocol::blr;
use super::xdr::{XdrRead, XdrWrite};

// ============================================================================
// SQL Types
// ============================================================================

/// SQL type code with the nullable bit masked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlType(pub i32);

impl SqlType {
    pub const VARYING: SqlType = SqlType(448);
    pub const TEXT: SqlType = SqlType(452);
    pub const DOUBLE: SqlType = SqlType(480);
    pub const FLOAT: SqlType = SqlType(482);
    pub const LONG: SqlType = SqlType(496);
    pub const SHORT: SqlType = SqlType(500);
    pub const TIMESTAMP: SqlType = SqlType(510);
    pub const BLOB: SqlType = SqlType(520);
    pub const D_FLOAT: SqlType = SqlType(530);
    pub const ARRAY: SqlType = SqlType(540);
    pub const QUAD: SqlType = SqlType(550);
    pub const TYPE_TIME: SqlType = SqlType(560);
    pub const TYPE_DATE: SqlType = SqlType(570);
    pub const INT64: SqlType = SqlType(580);
    pub const BOOLEAN: SqlType = SqlType(32764);
    pub const NULL: SqlType = SqlType(32766);

    /// Strip the nullable bit from a raw describe value.
    #[inline]
    pub fn from_raw(raw: i32) -> Self {
        SqlType(raw & !1)
    }

    /// True for the integer storage types that can carry a decimal scale.
    pub fn is_scaled_integer(self) -> bool {
        matches!(
            self,
            SqlType::SHORT | SqlType::LONG | SqlType::INT64 | SqlType::QUAD
        )
    }

    pub fn is_text(self) -> bool {
        matches!(self, SqlType::TEXT | SqlType::VARYING)
    }

    /// SQL type matching an array element's BLR type.
    pub fn from_blr(code: u8) -> Option<Self> {
        Some(match code {
            blr::TEXT | blr::TEXT2 | blr::CSTRING | blr::CSTRING2 => SqlType::TEXT,
            blr::VARYING | blr::VARYING2 => SqlType::VARYING,
            blr::SHORT => SqlType::SHORT,
            blr::LONG => SqlType::LONG,
            blr::INT64 => SqlType::INT64,
            blr::QUAD => SqlType::QUAD,
            blr::FLOAT => SqlType::FLOAT,
            blr::DOUBLE => SqlType::DOUBLE,
            blr::D_FLOAT => SqlType::D_FLOAT,
            blr::SQL_DATE => SqlType::TYPE_DATE,
            blr::SQL_TIME => SqlType::TYPE_TIME,
            blr::TIMESTAMP => SqlType::TIMESTAMP,
            blr::BOOL => SqlType::BOOLEAN,
            _ => return None,
        })
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Description of one column or parameter, as returned by statement prepare.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Raw type code, including the nullable bit
    pub sql_type: i32,
    pub sub_type: i32,
    pub scale: i32,
    /// Storage length in bytes
    pub length: i32,
    pub name: String,
    pub relation: String,
    pub owner: String,
    pub alias: String,
}

impl FieldDescriptor {
    pub fn new(sql_type: SqlType, length: i32) -> Self {
        Self {
            sql_type: sql_type.0 | 1,
            length,
            ..Default::default()
        }
    }

    #[inline]
    pub fn data_type(&self) -> SqlType {
        SqlType::from_raw(self.sql_type)
    }

    #[inline]
    pub fn is_nullable(&self) -> bool {
        self.sql_type & 1 != 0
    }

    /// True for NUMERIC/DECIMAL columns.
    pub fn is_numeric(&self) -> bool {
        self.scale < 0 && self.data_type().is_scaled_integer()
    }

    /// Charset declared on a text column.
    pub fn charset(&self) -> Charset {
        Charset::from_id(self.sub_type & 0xff).unwrap_or(Charset::None)
    }

    /// Declared character count of a CHAR/VARCHAR column.
    pub fn char_count(&self) -> usize {
        self.length.max(0) as usize / self.charset().bytes_per_character()
    }
}

/// Ordered column or parameter descriptors of a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDescriptor {
    pub fields: Vec<FieldDescriptor>,
}

/// Descriptors are shared between a statement and the rows it produces.
pub type SharedDescriptor = Arc<RowDescriptor>;

impl RowDescriptor {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    /// Descriptor with `count` blank fields, filled in while parsing describe info.
    pub fn with_len(count: usize) -> Self {
        Self {
            fields: vec![FieldDescriptor::default(); count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor> {
        self.fields.iter()
    }

    /// BLR message description. Every field is followed by a short null
    /// indicator slot.
    pub fn to_blr(&self) -> FbResult<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + self.fields.len() * 6);
        out.extend_from_slice(&[blr::VERSION5, blr::BEGIN, blr::MESSAGE, 0]);
        let par_count = u16::try_from(self.fields.len() * 2)
            .map_err(|_| FbError::Type("too many fields for a BLR message".to_string()))?;
        out.extend_from_slice(&par_count.to_le_bytes());

        for field in &self.fields {
            let len = (field.length as u16).to_le_bytes();
            let scale = field.scale as i8 as u8;
            match field.data_type() {
                SqlType::VARYING => out.extend_from_slice(&[blr::VARYING, len[0], len[1]]),
                SqlType::TEXT => out.extend_from_slice(&[blr::TEXT, len[0], len[1]]),
                SqlType::DOUBLE => out.push(blr::DOUBLE),
                SqlType::FLOAT => out.push(blr::FLOAT),
                SqlType::D_FLOAT => out.push(blr::D_FLOAT),
                SqlType::TYPE_DATE => out.push(blr::SQL_DATE),
                SqlType::TYPE_TIME => out.push(blr::SQL_TIME),
                SqlType::TIMESTAMP => out.push(blr::TIMESTAMP),
                SqlType::BLOB | SqlType::ARRAY => out.extend_from_slice(&[blr::QUAD, 0]),
                SqlType::LONG => out.extend_from_slice(&[blr::LONG, scale]),
                SqlType::SHORT => out.extend_from_slice(&[blr::SHORT, scale]),
                SqlType::INT64 => out.extend_from_slice(&[blr::INT64, scale]),
                SqlType::QUAD => out.extend_from_slice(&[blr::QUAD, scale]),
                SqlType::BOOLEAN => out.push(blr::BOOL),
                SqlType::NULL => out.extend_from_slice(&[blr::TEXT, 0, 0]),
                other => {
                    return Err(FbError::Type(format!(
                        "unsupported SQL type {} in BLR message",
                        other.0
                    )))
                }
            }
            out.extend_from_slice(&[blr::SHORT, 0]);
        }

        out.extend_from_slice(&[blr::END, blr::EOC]);
        Ok(out)
    }
}

// ============================================================================
// Values
// ============================================================================

/// Exact decimal value of a NUMERIC/DECIMAL column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    pub unscaled: i64,
    /// Decimal exponent, zero or negative
    pub scale: i32,
}

impl Numeric {
    pub fn new(unscaled: i64, scale: i32) -> Self {
        Self { unscaled, scale }
    }

    pub fn to_f64(self) -> f64 {
        self.unscaled as f64 * 10f64.powi(self.scale)
    }

    /// Unscaled value expressed at `scale`.
    pub fn rescale(self, scale: i32) -> FbResult<i64> {
        let diff = self.scale - scale;
        let overflow = || FbError::status(isc::ARITH_EXCEPT);
        if diff >= 0 {
            let factor = 10i64.checked_pow(diff as u32).ok_or_else(overflow)?;
            self.unscaled.checked_mul(factor).ok_or_else(overflow)
        } else {
            let factor = 10i64.checked_pow((-diff) as u32).ok_or_else(overflow)?;
            Ok(self.unscaled / factor)
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale >= 0 {
            return write!(f, "{}", i128::from(self.unscaled) * 10i128.pow(self.scale as u32));
        }
        let digits = (-self.scale) as usize;
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let abs = self.unscaled.unsigned_abs().to_string();
        let padded = format!("{:0>width$}", abs, width = digits + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - digits);
        write!(f, "{}{}.{}", sign, int_part, frac_part)
    }
}

/// A Firebird value.
#[derive(Debug, Clone, PartialEq)]
pub enum FbValue {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Numeric(Numeric),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Boolean(bool),
    BlobId(i64),
    ArrayId(i64),
}

/// One fetched row. Rows of up to 16 columns stay inline.
pub type Row = SmallVec<[FbValue; 16]>;

impl FbValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, FbValue::Null)
    }

    /// Integer view of the value, used for coercion into integer columns.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FbValue::SmallInt(v) => Some(i64::from(*v)),
            FbValue::Integer(v) => Some(i64::from(*v)),
            FbValue::BigInt(v) => Some(*v),
            FbValue::Boolean(v) => Some(i64::from(*v)),
            FbValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FbValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

// ============================================================================
// Date and time
// ============================================================================

const TIME_UNITS_PER_SECOND: u32 = 10_000;
const NANOS_PER_TIME_UNIT: u32 = 100_000;

/// Day zero of the Firebird calendar (the Modified Julian Day epoch).
fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).unwrap_or(NaiveDate::MIN)
}

pub fn encode_date(date: NaiveDate) -> i32 {
    date.signed_duration_since(base_date()).num_days() as i32
}

pub fn decode_date(days: i32) -> FbResult<NaiveDate> {
    base_date()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| FbError::Type(format!("date out of range: {} days", days)))
}

pub fn encode_time(time: NaiveTime) -> i32 {
    (time.num_seconds_from_midnight() * TIME_UNITS_PER_SECOND
        + time.nanosecond().min(999_999_999) / NANOS_PER_TIME_UNIT) as i32
}

pub fn decode_time(units: i32) -> FbResult<NaiveTime> {
    let units = units as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(
        units / TIME_UNITS_PER_SECOND,
        (units % TIME_UNITS_PER_SECOND) * NANOS_PER_TIME_UNIT,
    )
    .ok_or_else(|| FbError::Type(format!("time out of range: {}", units)))
}

// ============================================================================
// Encoding
// ============================================================================

/// Charset used to transcode text: the attachment charset, unless it is
/// NONE, in which case the column's own charset applies.
#[inline]
pub fn effective_charset(connection: Charset, field: &FieldDescriptor) -> Charset {
    if connection.is_none() {
        field.charset()
    } else {
        connection
    }
}

fn truncation_error() -> FbError {
    FbError::Server(StatusError::new(vec![
        StatusArg::Gds(isc::ARITH_EXCEPT),
        StatusArg::Gds(isc::STRING_TRUNCATION),
    ]))
}

fn mismatch(field: &FieldDescriptor, value: &FbValue) -> FbError {
    FbError::Type(format!(
        "cannot convert {:?} to SQL type {}",
        value,
        field.data_type().0
    ))
}

fn text_bytes(field: &FieldDescriptor, value: &FbValue, charset: Charset) -> FbResult<Vec<u8>> {
    let text = match value {
        FbValue::Bytes(b) => return Ok(b.clone()),
        FbValue::Text(s) => s.clone(),
        FbValue::Numeric(n) => n.to_string(),
        FbValue::SmallInt(v) => v.to_string(),
        FbValue::Integer(v) => v.to_string(),
        FbValue::BigInt(v) => v.to_string(),
        FbValue::Float(v) => v.to_string(),
        FbValue::Double(v) => v.to_string(),
        FbValue::Boolean(v) => v.to_string(),
        FbValue::Date(d) => d.to_string(),
        FbValue::Time(t) => t.to_string(),
        FbValue::Timestamp(ts) => ts.to_string(),
        _ => return Err(mismatch(field, value)),
    };
    if field.length % field.charset().bytes_per_character() as i32 == 0
        && text.chars().count() > field.char_count()
    {
        return Err(truncation_error());
    }
    charset.encode(&text)
}

fn scaled_integer(field: &FieldDescriptor, value: &FbValue) -> FbResult<i64> {
    match value {
        FbValue::Numeric(n) => n.rescale(field.scale),
        FbValue::Double(v) => Ok((v * 10f64.powi(-field.scale)).round() as i64),
        FbValue::Float(v) => Ok((f64::from(*v) * 10f64.powi(-field.scale)).round() as i64),
        other => {
            let v = other.as_i64().ok_or_else(|| mismatch(field, other))?;
            Numeric::new(v, 0).rescale(field.scale)
        }
    }
}

/// Append one value in the layout described by `field`. `Null` writes the
/// zero value of the column type; the caller emits the null marker.
pub fn encode_value(
    buf: &mut BytesMut,
    field: &FieldDescriptor,
    value: &FbValue,
    charset: Charset,
) -> FbResult<()> {
    let charset = effective_charset(charset, field);
    let null = value.is_null();
    match field.data_type() {
        SqlType::TEXT => {
            let bytes = if null {
                Vec::new()
            } else {
                text_bytes(field, value, charset)?
            };
            if bytes.len() > field.length as usize {
                return Err(truncation_error());
            }
            buf.put_xdr_opaque(&bytes, field.length as usize);
        }
        SqlType::VARYING => {
            let bytes = if null {
                Vec::new()
            } else {
                text_bytes(field, value, charset)?
            };
            if bytes.len() > field.length as usize {
                return Err(truncation_error());
            }
            buf.put_xdr_buffer(&bytes);
        }
        SqlType::SHORT => {
            let v = if null { 0 } else { scaled_integer(field, value)? };
            let v = i16::try_from(v).map_err(|_| FbError::status(isc::ARITH_EXCEPT))?;
            buf.put_xdr_i16(v);
        }
        SqlType::LONG => {
            let v = if null { 0 } else { scaled_integer(field, value)? };
            let v = i32::try_from(v).map_err(|_| FbError::status(isc::ARITH_EXCEPT))?;
            buf.put_xdr_i32(v);
        }
        SqlType::INT64 => {
            let v = if null { 0 } else { scaled_integer(field, value)? };
            buf.put_xdr_i64(v);
        }
        SqlType::FLOAT => {
            let v = match value {
                FbValue::Null => 0.0,
                FbValue::Float(v) => *v,
                FbValue::Double(v) => *v as f32,
                FbValue::Numeric(n) => n.to_f64() as f32,
                other => other.as_i64().ok_or_else(|| mismatch(field, other))? as f32,
            };
            buf.put_xdr_f32(v);
        }
        SqlType::DOUBLE | SqlType::D_FLOAT => {
            let v = match value {
                FbValue::Null => 0.0,
                FbValue::Float(v) => f64::from(*v),
                FbValue::Double(v) => *v,
                FbValue::Numeric(n) => n.to_f64(),
                other => other.as_i64().ok_or_else(|| mismatch(field, other))? as f64,
            };
            buf.put_xdr_f64(v);
        }
        SqlType::TYPE_DATE => {
            let days = match value {
                FbValue::Null => 0,
                FbValue::Date(d) => encode_date(*d),
                FbValue::Timestamp(ts) => encode_date(ts.date()),
                other => return Err(mismatch(field, other)),
            };
            buf.put_xdr_i32(days);
        }
        SqlType::TYPE_TIME => {
            let units = match value {
                FbValue::Null => 0,
                FbValue::Time(t) => encode_time(*t),
                FbValue::Timestamp(ts) => encode_time(ts.time()),
                other => return Err(mismatch(field, other)),
            };
            buf.put_xdr_i32(units);
        }
        SqlType::TIMESTAMP => {
            let (days, units) = match value {
                FbValue::Null => (0, 0),
                FbValue::Timestamp(ts) => (encode_date(ts.date()), encode_time(ts.time())),
                FbValue::Date(d) => (encode_date(*d), 0),
                other => return Err(mismatch(field, other)),
            };
            buf.put_xdr_i32(days);
            buf.put_xdr_i32(units);
        }
        SqlType::BOOLEAN => {
            let v = match value {
                FbValue::Null => false,
                FbValue::Boolean(v) => *v,
                other => other.as_i64().ok_or_else(|| mismatch(field, other))? != 0,
            };
            buf.put_xdr_bool(v);
        }
        SqlType::BLOB | SqlType::ARRAY | SqlType::QUAD => {
            let id = match value {
                FbValue::Null => 0,
                FbValue::BlobId(id) | FbValue::ArrayId(id) | FbValue::BigInt(id) => *id,
                other => return Err(mismatch(field, other)),
            };
            buf.put_xdr_i64(id);
        }
        SqlType::NULL => {}
        other => {
            return Err(FbError::Type(format!(
                "unsupported parameter type {}",
                other.0
            )))
        }
    }
    Ok(())
}

/// Encode a full message.
///
/// With `null_bitmap` set (protocol 13) a bitmap of null positions precedes
/// the non-null values; otherwise every value is followed by a null marker.
pub fn encode_row(
    buf: &mut BytesMut,
    descriptor: &RowDescriptor,
    values: &[FbValue],
    charset: Charset,
    null_bitmap: bool,
) -> FbResult<()> {
    if values.len() != descriptor.len() {
        return Err(FbError::Type(format!(
            "statement expects {} parameters, got {}",
            descriptor.len(),
            values.len()
        )));
    }

    if null_bitmap {
        let mut bitmap = vec![0u8; descriptor.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.put_xdr_opaque(&bitmap, bitmap.len());
        for (field, value) in descriptor.iter().zip(values) {
            if !value.is_null() {
                encode_value(buf, field, value, charset)?;
            }
        }
    } else {
        for (field, value) in descriptor.iter().zip(values) {
            encode_value(buf, field, value, charset)?;
            buf.put_xdr_i32(if value.is_null() { -1 } else { 0 });
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Read one value in the layout described by `field`.
pub async fn decode_value<R: XdrRead>(
    reader: &mut R,
    field: &FieldDescriptor,
    charset: Charset,
) -> FbResult<FbValue> {
    let inner = effective_charset(charset, field);
    let value = match field.data_type() {
        SqlType::TEXT => {
            let data = reader.read_opaque(field.length.max(0) as usize).await?;
            if field.charset().is_octets() {
                FbValue::Bytes(data.to_vec())
            } else {
                let s = inner.decode(&data);
                let bpc = field.charset().bytes_per_character() as i32;
                if field.length % bpc == 0 && s.chars().count() > field.char_count() {
                    FbValue::Text(s.chars().take(field.char_count()).collect())
                } else {
                    FbValue::Text(s)
                }
            }
        }
        SqlType::VARYING => {
            let data = reader.read_buffer().await?;
            if field.charset().is_octets() {
                FbValue::Bytes(data.to_vec())
            } else {
                FbValue::Text(inner.decode(&data))
            }
        }
        SqlType::SHORT => {
            let v = reader.read_i16().await?;
            if field.is_numeric() {
                FbValue::Numeric(Numeric::new(i64::from(v), field.scale))
            } else {
                FbValue::SmallInt(v)
            }
        }
        SqlType::LONG => {
            let v = reader.read_i32().await?;
            if field.is_numeric() {
                FbValue::Numeric(Numeric::new(i64::from(v), field.scale))
            } else {
                FbValue::Integer(v)
            }
        }
        SqlType::INT64 | SqlType::QUAD => {
            let v = reader.read_i64().await?;
            if field.is_numeric() {
                FbValue::Numeric(Numeric::new(v, field.scale))
            } else {
                FbValue::BigInt(v)
            }
        }
        SqlType::FLOAT => FbValue::Float(reader.read_f32().await?),
        SqlType::DOUBLE | SqlType::D_FLOAT => FbValue::Double(reader.read_f64().await?),
        SqlType::TYPE_DATE => FbValue::Date(decode_date(reader.read_i32().await?)?),
        SqlType::TYPE_TIME => FbValue::Time(decode_time(reader.read_i32().await?)?),
        SqlType::TIMESTAMP => {
            let date = decode_date(reader.read_i32().await?)?;
            let time = decode_time(reader.read_i32().await?)?;
            FbValue::Timestamp(date.and_time(time))
        }
        SqlType::BOOLEAN => FbValue::Boolean(reader.read_bool().await?),
        SqlType::BLOB => FbValue::BlobId(reader.read_i64().await?),
        SqlType::ARRAY => FbValue::ArrayId(reader.read_i64().await?),
        SqlType::NULL => FbValue::Null,
        other => {
            return Err(FbError::Type(format!(
                "unsupported column type {}",
                other.0
            )))
        }
    };
    Ok(value)
}

/// Read one message in the layout of `descriptor`.
pub async fn decode_row<R: XdrRead>(
    reader: &mut R,
    descriptor: &RowDescriptor,
    charset: Charset,
    null_bitmap: bool,
) -> FbResult<Row> {
    let mut row = Row::with_capacity(descriptor.len());

    if null_bitmap {
        if descriptor.is_empty() {
            return Ok(row);
        }
        let bitmap = reader.read_opaque(descriptor.len().div_ceil(8)).await?;
        for (i, field) in descriptor.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                row.push(FbValue::Null);
            } else {
                row.push(decode_value(reader, field, charset).await?);
            }
        }
        return Ok(row);
    }

    for field in descriptor.iter() {
        let value = decode_value(reader, field, charset).await?;
        match reader.read_i32().await? {
            0 => row.push(value),
            -1 => row.push(FbValue::Null),
            other => {
                return Err(FbError::Protocol(format!(
                    "invalid null indicator {} for column {}",
                    other, field.name
                )))
            }
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::xdr::XdrCursor;

    fn field(sql_type: SqlType, length: i32, scale: i32) -> FieldDescriptor {
        FieldDescriptor {
            sql_type: sql_type.0 | 1,
            length,
            scale,
            sub_type: Charset::Utf8.id(),
            ..Default::default()
        }
    }

    #[test]
    fn test_blr_for_integer_and_varchar() {
        let desc = RowDescriptor::new(vec![
            field(SqlType::LONG, 4, 0),
            field(SqlType::VARYING, 40, 0),
        ]);
        assert_eq!(
            desc.to_blr().unwrap(),
            vec![5, 2, 4, 0, 4, 0, 8, 0, 7, 0, 37, 40, 0, 7, 0, 255, 76]
        );
    }

    #[test]
    fn test_numeric_display_and_rescale() {
        assert_eq!(Numeric::new(1234, -2).to_string(), "12.34");
        assert_eq!(Numeric::new(-5, -3).to_string(), "-0.005");
        assert_eq!(Numeric::new(12, 0).to_string(), "12");
        assert_eq!(Numeric::new(15, -1).rescale(-3).unwrap(), 1500);
        assert_eq!(Numeric::new(1599, -3).rescale(-1).unwrap(), 15);
    }

    #[test]
    fn test_date_and_time_epochs() {
        let base = NaiveDate::from_ymd_opt(1858, 11, 17).unwrap();
        assert_eq!(encode_date(base), 0);
        let d = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(encode_date(d), 51544);
        assert_eq!(decode_date(51544).unwrap(), d);

        let t = NaiveTime::from_hms_milli_opt(13, 45, 30, 250).unwrap();
        assert_eq!(encode_time(t), (13 * 3600 + 45 * 60 + 30) * 10_000 + 2_500);
        assert_eq!(decode_time(encode_time(t)).unwrap(), t);
    }

    #[test]
    fn test_char_parameter_truncation_is_rejected() {
        let f = FieldDescriptor {
            sub_type: Charset::Ascii.id(),
            ..field(SqlType::TEXT, 3, 0)
        };
        let mut buf = BytesMut::new();
        let err = encode_value(&mut buf, &f, &FbValue::Text("abcd".into()), Charset::Ascii)
            .unwrap_err();
        match err {
            FbError::Server(status) => {
                assert_eq!(status.error_code(), isc::ARITH_EXCEPT);
                assert!(status.args.contains(&StatusArg::Gds(isc::STRING_TRUNCATION)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_row_with_null_indicators() {
        let desc = RowDescriptor::new(vec![
            field(SqlType::LONG, 4, 0),
            field(SqlType::VARYING, 20, 0),
            field(SqlType::INT64, 8, -2),
        ]);
        let values = vec![
            FbValue::Integer(42),
            FbValue::Null,
            FbValue::Numeric(Numeric::new(31415, -2)),
        ];
        let mut buf = BytesMut::new();
        encode_row(&mut buf, &desc, &values, Charset::Utf8, false).unwrap();
        assert_eq!(buf.len() % 4, 0);

        let mut cursor = XdrCursor::new(buf.freeze());
        let row = decode_row(&mut cursor, &desc, Charset::Utf8, false)
            .await
            .unwrap();
        assert_eq!(row.as_slice(), values.as_slice());
        assert_eq!(cursor.remaining(), 0);
    }

    #[tokio::test]
    async fn test_row_with_null_bitmap() {
        let desc = RowDescriptor::new(vec![
            field(SqlType::SHORT, 2, 0),
            field(SqlType::BOOLEAN, 1, 0),
            field(SqlType::TEXT, 20, 0),
        ]);
        let values = vec![FbValue::Null, FbValue::Boolean(true), FbValue::Text("hi".into())];
        let mut buf = BytesMut::new();
        encode_row(&mut buf, &desc, &values, Charset::Utf8, true).unwrap();
        // bitmap word, boolean word, CHAR(5) in UTF8 is 20 bytes
        assert_eq!(buf.len(), 4 + 4 + 20);
        assert_eq!(buf[0], 0b001);

        let mut cursor = XdrCursor::new(buf.freeze());
        let row = decode_row(&mut cursor, &desc, Charset::Utf8, true)
            .await
            .unwrap();
        assert_eq!(row[0], FbValue::Null);
        assert_eq!(row[1], FbValue::Boolean(true));
        // CHAR values come back space padded to the declared character count
        assert_eq!(row[2], FbValue::Text("hi   ".into()));
    }

    #[tokio::test]
    async fn test_invalid_null_indicator() {
        let desc = RowDescriptor::new(vec![field(SqlType::LONG, 4, 0)]);
        let mut raw = BytesMut::new();
        raw.put_xdr_i32(1);
        raw.put_xdr_i32(7);
        let mut cursor = XdrCursor::new(raw.freeze());
        assert!(matches!(
            decode_row(&mut cursor, &desc, Charset::Utf8, false).await,
            Err(FbError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_boundary_values_survive_both_null_layouts() {
        let octets = |sql_type: SqlType, length: i32| FieldDescriptor {
            sub_type: Charset::Octets.id(),
            ..field(sql_type, length, 0)
        };
        let max_opaque = i16::MAX as i32 - 2;
        let desc = RowDescriptor::new(vec![
            field(SqlType::SHORT, 2, 0),
            field(SqlType::SHORT, 2, 0),
            field(SqlType::LONG, 4, 0),
            field(SqlType::LONG, 4, 0),
            field(SqlType::INT64, 8, 0),
            field(SqlType::INT64, 8, 0),
            field(SqlType::VARYING, 40, 0),
            octets(SqlType::VARYING, max_opaque),
            field(SqlType::FLOAT, 4, 0),
            field(SqlType::DOUBLE, 8, 0),
            field(SqlType::TIMESTAMP, 8, 0),
            field(SqlType::LONG, 4, 0),
            field(SqlType::VARYING, 40, 0),
        ]);
        let timestamp = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(23, 59, 59, 999_900)
            .unwrap();
        let values = vec![
            FbValue::SmallInt(i16::MIN),
            FbValue::SmallInt(i16::MAX),
            FbValue::Integer(i32::MIN),
            FbValue::Integer(i32::MAX),
            FbValue::BigInt(i64::MIN),
            FbValue::BigInt(i64::MAX),
            FbValue::Text(String::new()),
            FbValue::Bytes(vec![0xA5; max_opaque as usize]),
            FbValue::Float(f32::MIN_POSITIVE),
            FbValue::Double(f64::MAX),
            FbValue::Timestamp(timestamp),
            FbValue::Null,
            FbValue::Null,
        ];

        for null_bitmap in [false, true] {
            let mut buf = BytesMut::new();
            encode_row(&mut buf, &desc, &values, Charset::Utf8, null_bitmap).unwrap();
            assert_eq!(buf.len() % 4, 0);

            let mut cursor = XdrCursor::new(buf.freeze());
            let row = decode_row(&mut cursor, &desc, Charset::Utf8, null_bitmap)
                .await
                .unwrap();
            assert_eq!(row.as_slice(), values.as_slice(), "null bitmap {}", null_bitmap);
            assert_eq!(cursor.remaining(), 0);
        }
    }
}
