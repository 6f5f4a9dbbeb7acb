//! Firebird remote protocol constants, request encoding and response types.
//!
//! Every packet starts with a big-endian opcode word followed by XDR fields.
//! Requests implement [`FrontendMessage`] and are appended to the connection's
//! outgoing buffer; nothing is sent until the caller flushes.

use bytes::{Bytes, BytesMut};

use super::charset::Charset;
use super::error::{FbError, FbResult, StatusError};
use super::xdr::XdrWrite;

// ============================================================================
// Protocol Constants
// ============================================================================

pub const CONNECT_VERSION3: i32 = 3;
pub const ARCH_GENERIC: i32 = 1;

pub const FB_PROTOCOL_FLAG: i32 = 0x8000;
pub const FB_PROTOCOL_MASK: i32 = !FB_PROTOCOL_FLAG;

pub const PROTOCOL_VERSION10: i32 = 10;
pub const PROTOCOL_VERSION11: i32 = FB_PROTOCOL_FLAG | 11;
pub const PROTOCOL_VERSION12: i32 = FB_PROTOCOL_FLAG | 12;
pub const PROTOCOL_VERSION13: i32 = FB_PROTOCOL_FLAG | 13;

pub const PTYPE_RPC: i32 = 2;
pub const PTYPE_BATCH_SEND: i32 = 3;
pub const PTYPE_LAZY_SEND: i32 = 5;
pub const PFLAG_COMPRESS: i32 = 0x100;
/// Packet type bits of an accepted protocol; the rest are flags.
pub const PTYPE_MASK: i32 = 0xFF;

/// Auxiliary port request type for `op_connect_request`.
pub const P_REQ_ASYNC: i32 = 1;

pub const WIRE_CRYPT_DISABLED: i32 = 0;

pub const SQL_DIALECT_V6: i32 = 3;

pub const DSQL_CLOSE: i32 = 1;
pub const DSQL_DROP: i32 = 2;

pub const INVALID_OBJECT: i32 = 0xFFFF;

pub const ROWS_AFFECTED_BUFFER_SIZE: i32 = 34;
pub const STATEMENT_TYPE_BUFFER_SIZE: i32 = 8;
pub const PREPARE_INFO_BUFFER_SIZE: i32 = 32768;
pub const DEFAULT_MAX_BUFFER_SIZE: i32 = 8192;
pub const DATABASE_INFO_BUFFER_SIZE: i32 = 256;

/// Packet opcodes.
pub mod op {
    pub const CONNECT: i32 = 1;
    pub const EXIT: i32 = 2;
    pub const ACCEPT: i32 = 3;
    pub const REJECT: i32 = 4;
    pub const DISCONNECT: i32 = 6;
    pub const RESPONSE: i32 = 9;
    pub const ATTACH: i32 = 19;
    pub const CREATE: i32 = 20;
    pub const DETACH: i32 = 21;
    pub const TRANSACTION: i32 = 29;
    pub const COMMIT: i32 = 30;
    pub const ROLLBACK: i32 = 31;
    pub const PREPARE: i32 = 32;
    pub const CREATE_BLOB: i32 = 34;
    pub const OPEN_BLOB: i32 = 35;
    pub const GET_SEGMENT: i32 = 36;
    pub const CANCEL_BLOB: i32 = 38;
    pub const CLOSE_BLOB: i32 = 39;
    pub const INFO_DATABASE: i32 = 40;
    pub const INFO_TRANSACTION: i32 = 42;
    pub const BATCH_SEGMENTS: i32 = 44;
    pub const QUE_EVENTS: i32 = 48;
    pub const CANCEL_EVENTS: i32 = 49;
    pub const COMMIT_RETAINING: i32 = 50;
    pub const PREPARE2: i32 = 51;
    pub const EVENT: i32 = 52;
    pub const CONNECT_REQUEST: i32 = 53;
    pub const OPEN_BLOB2: i32 = 56;
    pub const CREATE_BLOB2: i32 = 57;
    pub const GET_SLICE: i32 = 58;
    pub const PUT_SLICE: i32 = 59;
    pub const SLICE: i32 = 60;
    pub const SEEK_BLOB: i32 = 61;
    pub const ALLOCATE_STATEMENT: i32 = 62;
    pub const EXECUTE: i32 = 63;
    pub const FETCH: i32 = 65;
    pub const FETCH_RESPONSE: i32 = 66;
    pub const FREE_STATEMENT: i32 = 67;
    pub const PREPARE_STATEMENT: i32 = 68;
    pub const INFO_SQL: i32 = 70;
    pub const DUMMY: i32 = 71;
    pub const EXECUTE2: i32 = 76;
    pub const SQL_RESPONSE: i32 = 78;
    pub const DROP_DATABASE: i32 = 81;
    pub const ROLLBACK_RETAINING: i32 = 86;
    pub const CONT_AUTH: i32 = 92;
    pub const ACCEPT_DATA: i32 = 94;
    pub const COND_ACCEPT: i32 = 98;
}

/// User identification (`CNCT_*`) tags sent in the connect packet.
pub mod cnct {
    pub const USER: u8 = 1;
    pub const HOST: u8 = 4;
    pub const USER_VERIFICATION: u8 = 6;
    pub const SPECIFIC_DATA: u8 = 7;
    pub const PLUGIN_NAME: u8 = 8;
    pub const LOGIN: u8 = 9;
    pub const PLUGIN_LIST: u8 = 10;
    pub const CLIENT_CRYPT: u8 = 11;
}

/// Database parameter block tags.
pub mod dpb {
    pub const VERSION1: u8 = 1;
    pub const PAGE_SIZE: u8 = 4;
    pub const FORCE_WRITE: u8 = 24;
    pub const USER_NAME: u8 = 28;
    pub const PASSWORD: u8 = 29;
    pub const LC_CTYPE: u8 = 48;
    pub const OVERWRITE: u8 = 54;
    pub const CONNECT_TIMEOUT: u8 = 57;
    pub const SQL_ROLE_NAME: u8 = 60;
    pub const SQL_DIALECT: u8 = 63;
    pub const SET_DB_CHARSET: u8 = 68;
    pub const PROCESS_ID: u8 = 71;
    pub const PROCESS_NAME: u8 = 74;
    pub const CLIENT_VERSION: u8 = 80;
    pub const SPECIFIC_AUTH_DATA: u8 = 84;
    pub const AUTH_PLUGIN_LIST: u8 = 85;
    pub const AUTH_PLUGIN_NAME: u8 = 86;
}

/// Transaction parameter block tags.
pub mod tpb {
    pub const VERSION3: u8 = 3;
    pub const CONSISTENCY: u8 = 1;
    pub const CONCURRENCY: u8 = 2;
    pub const WAIT: u8 = 6;
    pub const NOWAIT: u8 = 7;
    pub const READ: u8 = 8;
    pub const WRITE: u8 = 9;
    pub const READ_COMMITTED: u8 = 15;
    pub const AUTOCOMMIT: u8 = 16;
    pub const REC_VERSION: u8 = 17;
    pub const NO_REC_VERSION: u8 = 18;
    pub const NO_AUTO_UNDO: u8 = 20;
    pub const LOCK_TIMEOUT: u8 = 21;
}

/// Blob parameter block tags.
pub mod bpb {
    pub const VERSION1: u8 = 1;
    pub const SOURCE_TYPE: u8 = 1;
    pub const TARGET_TYPE: u8 = 2;
    pub const TYPE: u8 = 3;
    pub const SOURCE_INTERP: u8 = 4;
    pub const TARGET_INTERP: u8 = 5;
    pub const TYPE_SEGMENTED: u8 = 0;
    pub const TYPE_STREAM: u8 = 1;
}

pub const EPB_VERSION1: u8 = 1;

/// Information request items and their values.
pub mod info {
    pub const END: u8 = 1;
    pub const TRUNCATED: u8 = 2;
    pub const ERROR: u8 = 3;

    pub const PAGE_SIZE: u8 = 14;
    pub const ODS_VERSION: u8 = 32;
    pub const ODS_MINOR_VERSION: u8 = 33;
    pub const DB_SQL_DIALECT: u8 = 62;
    pub const ATT_CHARSET: u8 = 101;
    pub const FIREBIRD_VERSION: u8 = 103;

    pub const TRA_ID: u8 = 4;

    pub const REQ_SELECT_COUNT: u8 = 13;
    pub const REQ_INSERT_COUNT: u8 = 14;
    pub const REQ_UPDATE_COUNT: u8 = 15;
    pub const REQ_DELETE_COUNT: u8 = 16;

    pub const SQL_SELECT: u8 = 4;
    pub const SQL_BIND: u8 = 5;
    pub const SQL_DESCRIBE_VARS: u8 = 7;
    pub const SQL_DESCRIBE_END: u8 = 8;
    pub const SQL_SQLDA_SEQ: u8 = 9;
    pub const SQL_TYPE: u8 = 11;
    pub const SQL_SUB_TYPE: u8 = 12;
    pub const SQL_SCALE: u8 = 13;
    pub const SQL_LENGTH: u8 = 14;
    pub const SQL_FIELD: u8 = 16;
    pub const SQL_RELATION: u8 = 17;
    pub const SQL_OWNER: u8 = 18;
    pub const SQL_ALIAS: u8 = 19;
    pub const SQL_SQLDA_START: u8 = 20;
    pub const SQL_STMT_TYPE: u8 = 21;
    pub const SQL_RECORDS: u8 = 23;
}

/// Status vector argument kinds.
pub mod arg {
    pub const END: i32 = 0;
    pub const GDS: i32 = 1;
    pub const STRING: i32 = 2;
    pub const NUMBER: i32 = 4;
    pub const INTERPRETED: i32 = 5;
    pub const WARNING: i32 = 18;
    pub const SQL_STATE: i32 = 19;
}

/// BLR codes used in message descriptions.
pub mod blr {
    pub const VERSION5: u8 = 5;
    pub const BEGIN: u8 = 2;
    pub const MESSAGE: u8 = 4;
    pub const EOC: u8 = 76;
    pub const END: u8 = 255;

    pub const TEXT: u8 = 14;
    pub const TEXT2: u8 = 15;
    pub const SHORT: u8 = 7;
    pub const LONG: u8 = 8;
    pub const QUAD: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const D_FLOAT: u8 = 11;
    pub const SQL_DATE: u8 = 12;
    pub const SQL_TIME: u8 = 13;
    pub const INT64: u8 = 16;
    pub const BOOL: u8 = 23;
    pub const DOUBLE: u8 = 27;
    pub const TIMESTAMP: u8 = 35;
    pub const VARYING: u8 = 37;
    pub const VARYING2: u8 = 38;
    pub const CSTRING: u8 = 40;
    pub const CSTRING2: u8 = 41;
}

/// SDL (slice description language) codes.
pub mod sdl {
    pub const VERSION1: u8 = 1;
    pub const RELATION: u8 = 2;
    pub const FIELD: u8 = 4;
    pub const STRUCT: u8 = 6;
    pub const VARIABLE: u8 = 7;
    pub const SCALAR: u8 = 8;
    pub const TINY_INTEGER: u8 = 9;
    pub const SHORT_INTEGER: u8 = 10;
    pub const LONG_INTEGER: u8 = 11;
    pub const DO2: u8 = 34;
    pub const DO1: u8 = 35;
    pub const ELEMENT: u8 = 36;
    pub const EOC: u8 = 255;
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages into the outgoing buffer.
pub trait FrontendMessage {
    fn encode(&self, buf: &mut BytesMut, charset: Charset) -> FbResult<()>;
}

/// One protocol tuple offered during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOffer {
    pub version: i32,
    pub min_type: i32,
    pub max_type: i32,
}

impl ProtocolOffer {
    /// Protocols offered by this client, least preferred first.
    pub fn supported(compression: bool) -> Vec<ProtocolOffer> {
        let flag = if compression { PFLAG_COMPRESS } else { 0 };
        vec![
            ProtocolOffer {
                version: PROTOCOL_VERSION10,
                min_type: PTYPE_RPC,
                max_type: PTYPE_BATCH_SEND,
            },
            ProtocolOffer {
                version: PROTOCOL_VERSION11,
                min_type: PTYPE_RPC,
                max_type: PTYPE_LAZY_SEND | flag,
            },
            ProtocolOffer {
                version: PROTOCOL_VERSION12,
                min_type: PTYPE_RPC,
                max_type: PTYPE_LAZY_SEND | flag,
            },
            ProtocolOffer {
                version: PROTOCOL_VERSION13,
                min_type: PTYPE_RPC,
                max_type: PTYPE_LAZY_SEND | flag,
            },
        ]
    }
}

/// `op_connect`: opens the protocol negotiation.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub path: String,
    pub user_identification: Vec<u8>,
    pub protocols: Vec<ProtocolOffer>,
}

impl FrontendMessage for ConnectRequest {
    fn encode(&self, buf: &mut BytesMut, charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::CONNECT);
        buf.put_xdr_i32(op::ATTACH);
        buf.put_xdr_i32(CONNECT_VERSION3);
        buf.put_xdr_i32(ARCH_GENERIC);
        buf.put_xdr_str(&self.path, charset)?;
        buf.put_xdr_i32(self.protocols.len() as i32);
        buf.put_xdr_buffer(&self.user_identification);
        for (weight, offer) in self.protocols.iter().enumerate() {
            buf.put_xdr_i32(offer.version);
            buf.put_xdr_i32(ARCH_GENERIC);
            buf.put_xdr_i32(offer.min_type);
            buf.put_xdr_i32(offer.max_type);
            buf.put_xdr_i32(weight as i32);
        }
        Ok(())
    }
}

/// `op_attach` / `op_create`.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub op: i32,
    pub path: String,
    pub dpb: Vec<u8>,
}

impl FrontendMessage for AttachRequest {
    fn encode(&self, buf: &mut BytesMut, charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(self.op);
        buf.put_xdr_i32(0);
        buf.put_xdr_str(&self.path, charset)?;
        buf.put_xdr_buffer(&self.dpb);
        Ok(())
    }
}

/// Any request whose payload is a single handle: detach, drop database,
/// commit, rollback, blob close/cancel, statement allocation.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseObject {
    pub op: i32,
    pub handle: i32,
}

impl FrontendMessage for ReleaseObject {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(self.op);
        buf.put_xdr_i32(self.handle);
        Ok(())
    }
}

/// A bare opcode (`op_disconnect`).
#[derive(Debug, Clone, Copy)]
pub struct Opcode(pub i32);

impl FrontendMessage for Opcode {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(self.0);
        Ok(())
    }
}

/// `op_info_database` / `op_info_transaction` / `op_info_sql`.
#[derive(Debug, Clone)]
pub struct InfoRequest {
    pub op: i32,
    pub handle: i32,
    pub items: Vec<u8>,
    pub buffer_length: i32,
}

impl FrontendMessage for InfoRequest {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(self.op);
        buf.put_xdr_i32(self.handle);
        buf.put_xdr_i32(0);
        buf.put_xdr_buffer(&self.items);
        buf.put_xdr_i32(self.buffer_length);
        Ok(())
    }
}

/// `op_transaction`.
#[derive(Debug, Clone)]
pub struct StartTransaction {
    pub db_handle: i32,
    pub tpb: Vec<u8>,
}

impl FrontendMessage for StartTransaction {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::TRANSACTION);
        buf.put_xdr_i32(self.db_handle);
        buf.put_xdr_buffer(&self.tpb);
        Ok(())
    }
}

/// `op_prepare2`: first phase of a two-phase commit with a recovery message.
#[derive(Debug, Clone)]
pub struct Prepare2 {
    pub tr_handle: i32,
    pub message: Vec<u8>,
}

impl FrontendMessage for Prepare2 {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::PREPARE2);
        buf.put_xdr_i32(self.tr_handle);
        buf.put_xdr_buffer(&self.message);
        Ok(())
    }
}

/// `op_prepare_statement`.
#[derive(Debug, Clone)]
pub struct PrepareStatement {
    pub tr_handle: i32,
    pub stmt_handle: i32,
    pub dialect: i32,
    pub sql: String,
    pub items: Vec<u8>,
    pub buffer_length: i32,
}

impl FrontendMessage for PrepareStatement {
    fn encode(&self, buf: &mut BytesMut, charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::PREPARE_STATEMENT);
        buf.put_xdr_i32(self.tr_handle);
        buf.put_xdr_i32(self.stmt_handle);
        buf.put_xdr_i32(self.dialect);
        buf.put_xdr_str(&self.sql, charset)?;
        buf.put_xdr_buffer(&self.items);
        buf.put_xdr_i32(self.buffer_length);
        Ok(())
    }
}

/// `op_execute` / `op_execute2`.
///
/// The input message is already XDR encoded and is appended verbatim.
#[derive(Debug, Clone)]
pub struct Execute {
    pub op: i32,
    pub stmt_handle: i32,
    pub tr_handle: i32,
    pub input: Option<(Vec<u8>, Bytes)>,
    pub output_blr: Option<Vec<u8>>,
}

impl FrontendMessage for Execute {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(self.op);
        buf.put_xdr_i32(self.stmt_handle);
        buf.put_xdr_i32(self.tr_handle);
        match &self.input {
            Some((blr, message)) => {
                buf.put_xdr_buffer(blr);
                buf.put_xdr_i32(0);
                buf.put_xdr_i32(1);
                buf.extend_from_slice(message);
            }
            None => {
                buf.put_xdr_buffer(&[]);
                buf.put_xdr_i32(0);
                buf.put_xdr_i32(0);
            }
        }
        if self.op == op::EXECUTE2 {
            buf.put_xdr_buffer(self.output_blr.as_deref().unwrap_or(&[]));
            buf.put_xdr_i32(0);
        }
        Ok(())
    }
}

/// `op_fetch`.
#[derive(Debug, Clone)]
pub struct Fetch {
    pub stmt_handle: i32,
    pub blr: Vec<u8>,
    pub fetch_size: i32,
}

impl FrontendMessage for Fetch {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::FETCH);
        buf.put_xdr_i32(self.stmt_handle);
        buf.put_xdr_buffer(&self.blr);
        buf.put_xdr_i32(0);
        buf.put_xdr_i32(self.fetch_size);
        Ok(())
    }
}

/// `op_free_statement`.
#[derive(Debug, Clone, Copy)]
pub struct FreeStatement {
    pub stmt_handle: i32,
    pub option: i32,
}

impl FrontendMessage for FreeStatement {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::FREE_STATEMENT);
        buf.put_xdr_i32(self.stmt_handle);
        buf.put_xdr_i32(self.option);
        Ok(())
    }
}

/// `op_create_blob[2]` / `op_open_blob[2]`.
#[derive(Debug, Clone)]
pub struct OpenBlob {
    pub op: i32,
    pub bpb: Option<Vec<u8>>,
    pub tr_handle: i32,
    pub blob_id: i64,
}

impl FrontendMessage for OpenBlob {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(self.op);
        if let Some(bpb) = &self.bpb {
            buf.put_xdr_typed(bpb::VERSION1, bpb);
        }
        buf.put_xdr_i32(self.tr_handle);
        buf.put_xdr_i64(self.blob_id);
        Ok(())
    }
}

/// `op_get_segment`.
#[derive(Debug, Clone, Copy)]
pub struct GetSegment {
    pub blob_handle: i32,
    pub length: i32,
}

impl FrontendMessage for GetSegment {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::GET_SEGMENT);
        buf.put_xdr_i32(self.blob_handle);
        buf.put_xdr_i32(self.length);
        buf.put_xdr_i32(0);
        Ok(())
    }
}

/// `op_batch_segments`.
#[derive(Debug, Clone)]
pub struct BatchSegments<'a> {
    pub blob_handle: i32,
    pub data: &'a [u8],
}

impl FrontendMessage for BatchSegments<'_> {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::BATCH_SEGMENTS);
        buf.put_xdr_i32(self.blob_handle);
        buf.put_xdr_blob_buffer(self.data)
    }
}

/// `op_seek_blob`.
#[derive(Debug, Clone, Copy)]
pub struct SeekBlob {
    pub blob_handle: i32,
    pub mode: i32,
    pub offset: i32,
}

impl FrontendMessage for SeekBlob {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::SEEK_BLOB);
        buf.put_xdr_i32(self.blob_handle);
        buf.put_xdr_i32(self.mode);
        buf.put_xdr_i32(self.offset);
        Ok(())
    }
}

/// `op_get_slice`.
#[derive(Debug, Clone)]
pub struct GetSlice {
    pub tr_handle: i32,
    pub array_id: i64,
    pub slice_length: i32,
    pub sdl: Vec<u8>,
}

impl FrontendMessage for GetSlice {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::GET_SLICE);
        buf.put_xdr_i32(self.tr_handle);
        buf.put_xdr_i64(self.array_id);
        buf.put_xdr_i32(self.slice_length);
        buf.put_xdr_buffer(&self.sdl);
        buf.put_xdr_buffer(&[]);
        buf.put_xdr_i32(0);
        Ok(())
    }
}

/// `op_put_slice`.
#[derive(Debug, Clone)]
pub struct PutSlice {
    pub tr_handle: i32,
    pub slice_length: i32,
    pub sdl: Vec<u8>,
    pub slice: Vec<u8>,
}

impl FrontendMessage for PutSlice {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::PUT_SLICE);
        buf.put_xdr_i32(self.tr_handle);
        buf.put_xdr_i64(0);
        buf.put_xdr_i32(self.slice_length);
        buf.put_xdr_buffer(&self.sdl);
        buf.put_xdr_buffer(&[]);
        buf.put_xdr_i32(self.slice_length);
        buf.extend_from_slice(&self.slice);
        Ok(())
    }
}

/// `op_connect_request`: asks the server for an auxiliary event port.
#[derive(Debug, Clone, Copy)]
pub struct ConnectAuxRequest {
    pub db_handle: i32,
}

impl FrontendMessage for ConnectAuxRequest {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::CONNECT_REQUEST);
        buf.put_xdr_i32(P_REQ_ASYNC);
        buf.put_xdr_i32(self.db_handle);
        buf.put_xdr_i32(0);
        Ok(())
    }
}

/// `op_que_events`.
#[derive(Debug, Clone)]
pub struct QueEvents {
    pub db_handle: i32,
    pub epb: Vec<u8>,
    pub local_id: i32,
}

impl FrontendMessage for QueEvents {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::QUE_EVENTS);
        buf.put_xdr_i32(self.db_handle);
        buf.put_xdr_buffer(&self.epb);
        buf.put_xdr_i32(0);
        buf.put_xdr_i32(0);
        buf.put_xdr_i32(self.local_id);
        Ok(())
    }
}

/// `op_cancel_events`.
#[derive(Debug, Clone, Copy)]
pub struct CancelEvents {
    pub db_handle: i32,
    pub local_id: i32,
}

impl FrontendMessage for CancelEvents {
    fn encode(&self, buf: &mut BytesMut, _charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::CANCEL_EVENTS);
        buf.put_xdr_i32(self.db_handle);
        buf.put_xdr_i32(self.local_id);
        Ok(())
    }
}

/// `op_cont_auth`: next round of a multi-step authentication.
#[derive(Debug, Clone)]
pub struct ContAuth {
    pub data: Vec<u8>,
    pub plugin_name: String,
    pub plugin_list: String,
    pub keys: Vec<u8>,
}

impl FrontendMessage for ContAuth {
    fn encode(&self, buf: &mut BytesMut, charset: Charset) -> FbResult<()> {
        buf.put_xdr_i32(op::CONT_AUTH);
        buf.put_xdr_buffer(&self.data);
        buf.put_xdr_str(&self.plugin_name, charset)?;
        buf.put_xdr_str(&self.plugin_list, charset)?;
        buf.put_xdr_buffer(&self.keys);
        Ok(())
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// `op_response`: the generic reply to most requests.
#[derive(Debug, Clone, Default)]
pub struct GenericResponse {
    pub object_handle: i32,
    pub blob_id: i64,
    pub data: Bytes,
    /// Warnings returned alongside a successful reply.
    pub warning: Option<StatusError>,
}

/// Header of one row batch element in `op_fetch_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: i32,
    pub count: i32,
}

/// `op_sql_response`: carries the output row of `op_execute2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlResponse {
    pub count: i32,
}

/// `op_cont_auth` sent by the server.
#[derive(Debug, Clone, Default)]
pub struct ContAuthResponse {
    pub server_data: Bytes,
    pub plugin_name: String,
    pub plugin_list: String,
    pub server_keys: Bytes,
}

/// Decoded backend reply.
#[derive(Debug, Clone)]
pub enum Response {
    Generic(GenericResponse),
    Fetch(FetchResponse),
    Sql(SqlResponse),
    ContAuth(ContAuthResponse),
}

// ============================================================================
// Info Buffers
// ============================================================================

/// Little-endian integer of arbitrary width, as used inside info buffers.
pub fn vax_integer(bytes: &[u8]) -> i64 {
    bytes
        .iter()
        .enumerate()
        .fold(0i64, |acc, (i, &b)| acc | (i64::from(b) << (8 * i)))
}

/// Split an info response into `(item, value)` clusters.
///
/// Stops at `isc_info_end`. A truncated buffer is a protocol error; callers
/// that can recover from truncation inspect the raw bytes themselves.
pub fn info_items(buf: &[u8]) -> FbResult<Vec<(u8, &[u8])>> {
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let tag = buf[pos];
        pos += 1;
        match tag {
            info::END => break,
            info::TRUNCATED => {
                return Err(FbError::Protocol("info buffer truncated".to_string()))
            }
            _ => {}
        }
        if pos + 2 > buf.len() {
            return Err(FbError::Protocol(format!(
                "info item {} is missing its length",
                tag
            )));
        }
        let len = vax_integer(&buf[pos..pos + 2]) as usize;
        pos += 2;
        if pos + len > buf.len() {
            return Err(FbError::Protocol(format!(
                "info item {} overruns the buffer",
                tag
            )));
        }
        items.push((tag, &buf[pos..pos + len]));
        pos += len;
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_object_layout() {
        let mut buf = BytesMut::new();
        ReleaseObject {
            op: op::COMMIT,
            handle: 7,
        }
        .encode(&mut buf, Charset::Utf8)
        .unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 30, 0, 0, 0, 7]);
    }

    #[test]
    fn test_connect_request_offers_weights_in_order() {
        let mut buf = BytesMut::new();
        ConnectRequest {
            path: "db".to_string(),
            user_identification: vec![1, 0],
            protocols: ProtocolOffer::supported(true),
        }
        .encode(&mut buf, Charset::Utf8)
        .unwrap();
        // header (4 words) + path (4 + 4) + count (4) + uid (4 + 4) + 4 tuples of 5 words
        assert_eq!(buf.len(), 16 + 8 + 4 + 8 + 4 * 20);
        let last = &buf[buf.len() - 20..];
        assert_eq!(&last[0..4], &PROTOCOL_VERSION13.to_be_bytes());
        assert_eq!(&last[12..16], &(PTYPE_LAZY_SEND | PFLAG_COMPRESS).to_be_bytes());
        assert_eq!(&last[16..20], &3i32.to_be_bytes());
    }

    #[test]
    fn test_execute_without_params() {
        let mut buf = BytesMut::new();
        Execute {
            op: op::EXECUTE,
            stmt_handle: 2,
            tr_handle: 3,
            input: None,
            output_blr: None,
        }
        .encode(&mut buf, Charset::Utf8)
        .unwrap();
        assert_eq!(buf.len(), 6 * 4);
    }

    #[test]
    fn test_vax_integer_has_no_sign_extension() {
        assert_eq!(vax_integer(&[0x01, 0x02]), 0x0201);
        assert_eq!(vax_integer(&[0xFF, 0xFF]), 0xFFFF);
        assert_eq!(vax_integer(&[]), 0);
    }

    #[test]
    fn test_info_items_split() {
        let buf = [62, 1, 0, 3, 14, 2, 0, 0, 0x10, 1];
        let items = info_items(&buf).unwrap();
        assert_eq!(items, vec![(62u8, &[3u8][..]), (14u8, &[0u8, 0x10][..])]);
        assert!(info_items(&[2]).is_err());
    }
}
