//! Scripted protocol tests.
//!
//! Each flow runs against a `tokio_test::io` mock that asserts the exact
//! request bytes and plays back the server replies.

use bytes::BytesMut;
use tokio_test::io::{Builder, Mock};

use super::charset::Charset;
use super::config::FbConfig;
use super::connection::FbConnection;
use super::database::FbDatabase;
use super::error::FbError;
use super::protocol::*;
use super::xdr::XdrWrite;

const DB_HANDLE: i32 = 1;
const TR_HANDLE: i32 = 5;
const STMT_HANDLE: i32 = 7;

fn request<M: FrontendMessage>(msg: &M) -> Vec<u8> {
    let mut buf = BytesMut::new();
    msg.encode(&mut buf, Charset::Utf8).unwrap();
    buf.to_vec()
}

fn response(handle: i32, blob_id: i64, data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_xdr_i32(op::RESPONSE);
    buf.put_xdr_i32(handle);
    buf.put_xdr_i64(blob_id);
    buf.put_xdr_buffer(data);
    buf.put_xdr_i32(arg::END);
    buf.to_vec()
}

fn error_response(code: i32) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_xdr_i32(op::RESPONSE);
    buf.put_xdr_i32(0);
    buf.put_xdr_i64(0);
    buf.put_xdr_buffer(&[]);
    buf.put_xdr_i32(arg::GDS);
    buf.put_xdr_i32(code);
    buf.put_xdr_i32(arg::END);
    buf.to_vec()
}

fn database(mock: Mock) -> FbDatabase {
    let config = FbConfig::default();
    let conn = FbConnection::from_stream(Box::new(mock), &config).unwrap();
    FbDatabase::attached(conn, &config, DB_HANDLE)
}

/// Script for `begin_transaction` with default options.
fn begin(builder: &mut Builder) -> &mut Builder {
    builder
        .write(&request(&StartTransaction {
            db_handle: DB_HANDLE,
            tpb: super::transaction::TransactionOptions::default().to_tpb(),
        }))
        .read(&response(TR_HANDLE, 0, &[]))
}

// ============================================================================
// Transactions
// ============================================================================

mod transactions {
    use super::*;
    use crate::fb::transaction::{TransactionOptions, TransactionState};

    #[tokio::test]
    async fn test_begin_and_commit() {
        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&ReleaseObject {
                op: op::COMMIT,
                handle: TR_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());

        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        assert_eq!(tx.handle(), TR_HANDLE);
        assert_eq!(db.transaction_count(), 1);

        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TransactionState::None);
        assert_eq!(db.transaction_count(), 0);
        assert!(matches!(tx.commit().await, Err(FbError::State(_))));
    }

    #[tokio::test]
    async fn test_retaining_keeps_transaction_active() {
        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&ReleaseObject {
                op: op::COMMIT_RETAINING,
                handle: TR_HANDLE,
            }))
            .read(&response(0, 0, &[]))
            .write(&request(&ReleaseObject {
                op: op::ROLLBACK,
                handle: TR_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());

        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        tx.commit_retaining().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Active);
        tx.rollback().await.unwrap();
        assert_eq!(tx.state(), TransactionState::None);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back_before_next_request() {
        let items = [info::PAGE_SIZE, info::END];
        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&ReleaseObject {
                op: op::ROLLBACK,
                handle: TR_HANDLE,
            }))
            .read(&response(0, 0, &[]))
            .write(&request(&InfoRequest {
                op: op::INFO_DATABASE,
                handle: DB_HANDLE,
                items: items.to_vec(),
                buffer_length: DATABASE_INFO_BUFFER_SIZE,
            }))
            .read(&response(0, 0, &[info::PAGE_SIZE, 4, 0, 0, 0x20, 0, 0, info::END]));
        let db = database(builder.build());

        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        drop(tx);
        assert_eq!(db.transaction_count(), 0);

        let data = db.info(&items, DATABASE_INFO_BUFFER_SIZE).await.unwrap();
        assert_eq!(data[0], info::PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_detach_with_open_transaction_is_rejected() {
        let mut builder = Builder::new();
        begin(&mut builder);
        let db = database(builder.build());

        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        assert!(matches!(db.detach().await, Err(FbError::State(_))));
        std::mem::forget(tx);
    }
}

// ============================================================================
// Statements
// ============================================================================

mod statements {
    use super::*;
    use crate::fb::statement::{describe_items, FbStatement, StatementState, StatementType};
    use crate::fb::transaction::TransactionOptions;
    use crate::fb::types::{FbValue, FieldDescriptor, RowDescriptor};

    const SQL: &str = "SELECT ID FROM T";

    fn item(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    /// Describe reply for one nullable INTEGER output column and no inputs.
    fn describe_reply() -> Vec<u8> {
        let mut buf = vec![info::SQL_SELECT];
        buf.extend(item(info::SQL_DESCRIBE_VARS, &[1, 0, 0, 0]));
        buf.extend(item(info::SQL_SQLDA_SEQ, &[1, 0, 0, 0]));
        buf.extend(item(info::SQL_TYPE, &[0xF1, 0x01, 0, 0]));
        buf.extend(item(info::SQL_SUB_TYPE, &[0, 0, 0, 0]));
        buf.extend(item(info::SQL_SCALE, &[0, 0, 0, 0]));
        buf.extend(item(info::SQL_LENGTH, &[4, 0, 0, 0]));
        buf.extend(item(info::SQL_FIELD, b"ID"));
        buf.extend(item(info::SQL_RELATION, b"T"));
        buf.extend(item(info::SQL_OWNER, b"SYSDBA"));
        buf.extend(item(info::SQL_ALIAS, b"ID"));
        buf.push(info::SQL_DESCRIBE_END);
        buf.push(info::SQL_BIND);
        buf.extend(item(info::SQL_DESCRIBE_VARS, &[0, 0, 0, 0]));
        buf.push(info::END);
        buf
    }

    fn output_blr() -> Vec<u8> {
        let field = FieldDescriptor {
            sql_type: 497,
            length: 4,
            ..Default::default()
        };
        RowDescriptor::new(vec![field]).to_blr().unwrap()
    }

    fn row(value: i32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_xdr_i32(op::FETCH_RESPONSE);
        buf.put_xdr_i32(0);
        buf.put_xdr_i32(1);
        buf.put_xdr_i32(value);
        buf.put_xdr_i32(0);
        buf.to_vec()
    }

    fn end_of_cursor() -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_xdr_i32(op::FETCH_RESPONSE);
        buf.put_xdr_i32(100);
        buf.put_xdr_i32(0);
        buf.to_vec()
    }

    fn prepare_script(builder: &mut Builder) -> &mut Builder {
        prepare_script_for(builder, SQL, &describe_reply(), 1)
    }

    fn prepare_script_for<'a>(
        builder: &'a mut Builder,
        sql: &str,
        describe: &[u8],
        statement_type: u8,
    ) -> &'a mut Builder {
        builder
            .write(&request(&ReleaseObject {
                op: op::ALLOCATE_STATEMENT,
                handle: DB_HANDLE,
            }))
            .read(&response(STMT_HANDLE, 0, &[]))
            .write(&request(&PrepareStatement {
                tr_handle: TR_HANDLE,
                stmt_handle: STMT_HANDLE,
                dialect: SQL_DIALECT_V6,
                sql: sql.to_string(),
                items: describe_items(None),
                buffer_length: PREPARE_INFO_BUFFER_SIZE,
            }))
            .read(&response(0, 0, describe))
            .write(&request(&InfoRequest {
                op: op::INFO_SQL,
                handle: STMT_HANDLE,
                items: vec![info::SQL_STMT_TYPE],
                buffer_length: STATEMENT_TYPE_BUFFER_SIZE,
            }))
            .read(&response(
                0,
                0,
                &[info::SQL_STMT_TYPE, 4, 0, statement_type, 0, 0, 0, info::END],
            ))
    }

    #[tokio::test]
    async fn test_prepare_execute_fetch() {
        let mut builder = Builder::new();
        begin(&mut builder);
        prepare_script(&mut builder)
            .write(&request(&Execute {
                op: op::EXECUTE,
                stmt_handle: STMT_HANDLE,
                tr_handle: TR_HANDLE,
                input: None,
                output_blr: None,
            }))
            .read(&response(0, 0, &[]))
            .write(&request(&Fetch {
                stmt_handle: STMT_HANDLE,
                blr: output_blr(),
                fetch_size: 200,
            }))
            .read(&row(10))
            .read(&row(20))
            .read(&end_of_cursor());
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut stmt = FbStatement::new(&db, Some(&tx));
        assert_eq!(stmt.prepare(SQL).await.unwrap(), StatementType::Select);
        assert_eq!(stmt.state(), StatementState::Prepared);
        assert_eq!(stmt.output_descriptor().len(), 1);
        assert_eq!(stmt.output_descriptor().fields[0].alias, "ID");
        assert!(stmt.input_descriptor().is_empty());
        assert_eq!(db.open_handles(), 1);

        stmt.execute(&[]).await.unwrap();
        assert_eq!(stmt.records_affected(), -1);
        let rows = stmt.fetch_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], FbValue::Integer(10));
        assert_eq!(rows[1][0], FbValue::Integer(20));
        assert_eq!(stmt.fetch().await.unwrap(), None);
        std::mem::forget(stmt);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_insert_reports_records_affected() {
        const INSERT: &str = "INSERT INTO T (ID) VALUES (1)";
        let mut describe = vec![info::SQL_SELECT];
        describe.extend(item(info::SQL_DESCRIBE_VARS, &[0, 0, 0, 0]));
        describe.push(info::SQL_BIND);
        describe.extend(item(info::SQL_DESCRIBE_VARS, &[0, 0, 0, 0]));
        describe.push(info::END);

        let mut counts = item(info::REQ_SELECT_COUNT, &[0, 0, 0, 0]);
        counts.extend(item(info::REQ_INSERT_COUNT, &[1, 0, 0, 0]));
        counts.extend(item(info::REQ_UPDATE_COUNT, &[0, 0, 0, 0]));
        counts.extend(item(info::REQ_DELETE_COUNT, &[0, 0, 0, 0]));
        counts.push(info::END);
        let mut records = item(info::SQL_RECORDS, &counts);
        records.push(info::END);

        let mut builder = Builder::new();
        begin(&mut builder);
        prepare_script_for(&mut builder, INSERT, &describe, 2)
            .write(&request(&Execute {
                op: op::EXECUTE,
                stmt_handle: STMT_HANDLE,
                tr_handle: TR_HANDLE,
                input: None,
                output_blr: None,
            }))
            .read(&response(0, 0, &[]))
            .write(&request(&InfoRequest {
                op: op::INFO_SQL,
                handle: STMT_HANDLE,
                items: vec![info::SQL_RECORDS],
                buffer_length: ROWS_AFFECTED_BUFFER_SIZE,
            }))
            .read(&response(0, 0, &records));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut stmt = FbStatement::new(&db, Some(&tx));
        assert_eq!(stmt.prepare(INSERT).await.unwrap(), StatementType::Insert);
        stmt.execute(&[]).await.unwrap();
        assert_eq!(stmt.records_affected(), 1);
        assert_eq!(stmt.records_affected_detail().unwrap().insert, 1);
        // Non-cursor statements have nothing to fetch.
        assert_eq!(stmt.fetch().await.unwrap(), None);
        std::mem::forget(stmt);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_out_of_order_calls_are_rejected_locally() {
        let mut builder = Builder::new();
        begin(&mut builder);
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut stmt = FbStatement::new(&db, Some(&tx));
        assert!(matches!(stmt.fetch().await, Err(FbError::State(_))));
        assert!(matches!(stmt.execute(&[]).await, Err(FbError::State(_))));
        assert_eq!(stmt.state(), StatementState::Deallocated);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_commit_closes_bound_statements() {
        let mut builder = Builder::new();
        begin(&mut builder);
        prepare_script(&mut builder)
            .write(&request(&ReleaseObject {
                op: op::COMMIT,
                handle: TR_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut stmt = FbStatement::new(&db, Some(&tx));
        stmt.prepare(SQL).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(stmt.state(), StatementState::Closed);
        assert!(matches!(stmt.fetch().await, Err(FbError::State(_))));
        std::mem::forget(stmt);
    }

    #[tokio::test]
    async fn test_server_error_on_prepare_keeps_statement_usable() {
        const BAD_SQL: &str = "SELEC";
        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&ReleaseObject {
                op: op::ALLOCATE_STATEMENT,
                handle: DB_HANDLE,
            }))
            .read(&response(STMT_HANDLE, 0, &[]))
            .write(&request(&PrepareStatement {
                tr_handle: TR_HANDLE,
                stmt_handle: STMT_HANDLE,
                dialect: SQL_DIALECT_V6,
                sql: BAD_SQL.to_string(),
                items: describe_items(None),
                buffer_length: PREPARE_INFO_BUFFER_SIZE,
            }))
            .read(&error_response(335544569));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut stmt = FbStatement::new(&db, Some(&tx));
        let err = stmt.prepare(BAD_SQL).await.unwrap_err();
        assert_eq!(err.code(), Some(335544569));
        assert_eq!(stmt.state(), StatementState::Allocated);
        std::mem::forget(stmt);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_failed_reprepare_discards_previous_statement() {
        const BAD_SQL: &str = "SELEC ID FROM T";
        let mut builder = Builder::new();
        begin(&mut builder);
        prepare_script(&mut builder)
            .write(&request(&PrepareStatement {
                tr_handle: TR_HANDLE,
                stmt_handle: STMT_HANDLE,
                dialect: SQL_DIALECT_V6,
                sql: BAD_SQL.to_string(),
                items: describe_items(None),
                buffer_length: PREPARE_INFO_BUFFER_SIZE,
            }))
            .read(&error_response(335544569));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut stmt = FbStatement::new(&db, Some(&tx));
        stmt.prepare(SQL).await.unwrap();
        assert_eq!(stmt.output_descriptor().len(), 1);

        assert!(stmt.prepare(BAD_SQL).await.is_err());
        assert_eq!(stmt.state(), StatementState::Allocated);
        assert_eq!(stmt.statement_type(), StatementType::Unknown(0));
        assert!(stmt.output_descriptor().is_empty());
        assert!(stmt.input_descriptor().is_empty());
        assert!(matches!(stmt.execute(&[]).await, Err(FbError::State(_))));
        std::mem::forget(stmt);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_dropped_statement_is_freed_before_next_request() {
        let mut builder = Builder::new();
        begin(&mut builder);
        prepare_script(&mut builder)
            .write(&request(&FreeStatement {
                stmt_handle: STMT_HANDLE,
                option: DSQL_DROP,
            }))
            .read(&response(0, 0, &[]))
            .write(&request(&ReleaseObject {
                op: op::COMMIT,
                handle: TR_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut stmt = FbStatement::new(&db, Some(&tx));
        stmt.prepare(SQL).await.unwrap();
        drop(stmt);
        tx.commit().await.unwrap();
        assert_eq!(db.open_handles(), 0);
    }
}

// ============================================================================
// Blobs
// ============================================================================

mod blobs {
    use super::*;
    use crate::fb::blob::FbBlob;
    use crate::fb::transaction::TransactionOptions;

    const BLOB_HANDLE: i32 = 3;
    const BLOB_ID: i64 = 0x0000_0081_0000_0001;

    #[tokio::test]
    async fn test_read_all_walks_segments() {
        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&OpenBlob {
                op: op::OPEN_BLOB2,
                bpb: None,
                tr_handle: TR_HANDLE,
                blob_id: BLOB_ID,
            }))
            .read(&response(BLOB_HANDLE, 0, &[]))
            .write(&request(&GetSegment {
                blob_handle: BLOB_HANDLE,
                length: 8194,
            }))
            .read(&response(1, 0, &[3, 0, b'a', b'b', b'c']))
            .write(&request(&GetSegment {
                blob_handle: BLOB_HANDLE,
                length: 8194,
            }))
            .read(&response(2, 0, &[2, 0, b'd', b'e']))
            .write(&request(&GetSegment {
                blob_handle: BLOB_HANDLE,
                length: 8194,
            }))
            .read(&response(2, 0, &[]))
            .write(&request(&ReleaseObject {
                op: op::CLOSE_BLOB,
                handle: BLOB_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let data = FbBlob::read_all(&db, &tx, BLOB_ID).await.unwrap();
        assert_eq!(data, b"abcde".to_vec());
        assert_eq!(db.open_handles(), 0);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_write_all_returns_new_id() {
        let options = crate::fb::blob::BlobOptions::default();
        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&OpenBlob {
                op: op::CREATE_BLOB2,
                bpb: Some(options.to_bpb()),
                tr_handle: TR_HANDLE,
                blob_id: 0,
            }))
            .read(&response(BLOB_HANDLE, BLOB_ID, &[]))
            .write(&request(&BatchSegments {
                blob_handle: BLOB_HANDLE,
                data: b"hello",
            }))
            .read(&response(0, 0, &[]))
            .write(&request(&ReleaseObject {
                op: op::CLOSE_BLOB,
                handle: BLOB_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let id = FbBlob::write_all(&db, &tx, b"hello", &options).await.unwrap();
        assert_eq!(id, BLOB_ID);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_three_segment_round_trip() {
        const SEGMENT: usize = 8192;
        let payload: Vec<u8> = (0..3 * SEGMENT).map(|i| (i % 251) as u8).collect();
        let options = crate::fb::blob::BlobOptions::default();

        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&OpenBlob {
                op: op::CREATE_BLOB2,
                bpb: Some(options.to_bpb()),
                tr_handle: TR_HANDLE,
                blob_id: 0,
            }))
            .read(&response(BLOB_HANDLE, BLOB_ID, &[]));
        for chunk in payload.chunks(SEGMENT) {
            builder
                .write(&request(&BatchSegments {
                    blob_handle: BLOB_HANDLE,
                    data: chunk,
                }))
                .read(&response(0, 0, &[]));
        }
        builder
            .write(&request(&ReleaseObject {
                op: op::CLOSE_BLOB,
                handle: BLOB_HANDLE,
            }))
            .read(&response(0, 0, &[]))
            .write(&request(&OpenBlob {
                op: op::OPEN_BLOB2,
                bpb: None,
                tr_handle: TR_HANDLE,
                blob_id: BLOB_ID,
            }))
            .read(&response(BLOB_HANDLE, 0, &[]));
        for chunk in payload.chunks(SEGMENT) {
            let mut segment = (chunk.len() as u16).to_le_bytes().to_vec();
            segment.extend_from_slice(chunk);
            builder
                .write(&request(&GetSegment {
                    blob_handle: BLOB_HANDLE,
                    length: SEGMENT as i32 + 2,
                }))
                .read(&response(0, 0, &segment));
        }
        builder
            .write(&request(&GetSegment {
                blob_handle: BLOB_HANDLE,
                length: SEGMENT as i32 + 2,
            }))
            .read(&response(2, 0, &[]))
            .write(&request(&ReleaseObject {
                op: op::CLOSE_BLOB,
                handle: BLOB_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let id = FbBlob::write_all(&db, &tx, &payload, &options).await.unwrap();
        let read = FbBlob::read_all(&db, &tx, id).await.unwrap();
        assert_eq!(read, payload);
        std::mem::forget(tx);
    }

    #[tokio::test]
    async fn test_closed_blob_handle_is_rejected() {
        let mut builder = Builder::new();
        begin(&mut builder)
            .write(&request(&OpenBlob {
                op: op::OPEN_BLOB2,
                bpb: None,
                tr_handle: TR_HANDLE,
                blob_id: BLOB_ID,
            }))
            .read(&response(BLOB_HANDLE, 0, &[]))
            .write(&request(&ReleaseObject {
                op: op::CANCEL_BLOB,
                handle: BLOB_HANDLE,
            }))
            .read(&response(0, 0, &[]));
        let db = database(builder.build());
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let mut blob = FbBlob::open(&db, &tx, BLOB_ID).await.unwrap();
        blob.cancel().await.unwrap();
        assert!(matches!(blob.read_segment().await, Err(FbError::State(_))));
        std::mem::forget(tx);
    }
}

// ============================================================================
// Integration Tests (require a running Firebird server)
// ============================================================================

#[cfg(feature = "firebird-integration-tests")]
mod integration {
    use super::*;
    use crate::fb::blob::{BlobOptions, FbBlob};
    use crate::fb::config::FbPoolConfig;
    use crate::fb::pool::FbPool;
    use crate::fb::statement::{FbStatement, FreeMode, StatementType};
    use crate::fb::transaction::TransactionOptions;
    use crate::fb::types::FbValue;

    fn env(name: &str, default: &str) -> String {
        std::env::var(name).unwrap_or_else(|_| default.to_string())
    }

    fn config() -> FbConfig {
        FbConfig::new(
            &env("FIREBIRD_TEST_HOST", "localhost"),
            &env("FIREBIRD_TEST_DATABASE", "/tmp/fbwire_test.fdb"),
        )
        .user(&env("FIREBIRD_TEST_USER", "SYSDBA"))
        .password(&env("FIREBIRD_TEST_PASSWORD", "masterkey"))
    }

    #[tokio::test]
    async fn test_attach_and_info() {
        let db = FbDatabase::attach(&config()).await.unwrap();
        assert!(db.server_version().is_some());
        let info = db.database_info().await.unwrap();
        assert!(info.page_size.unwrap_or(0) > 0);
        db.detach().await.unwrap();
    }

    #[tokio::test]
    async fn test_select_with_parameters() {
        let db = FbDatabase::attach(&config()).await.unwrap();
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        let mut stmt = FbStatement::new(&db, Some(&tx));
        let kind = stmt
            .prepare("SELECT CAST(? AS INTEGER) + 1 FROM RDB$DATABASE")
            .await
            .unwrap();
        assert_eq!(kind, StatementType::Select);
        stmt.execute(&[FbValue::Integer(41)]).await.unwrap();
        let row = stmt.fetch().await.unwrap().unwrap();
        assert_eq!(row[0].as_i64(), Some(42));
        stmt.free(FreeMode::Drop).await.unwrap();
        tx.commit().await.unwrap();
        db.detach().await.unwrap();
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let db = FbDatabase::attach(&config()).await.unwrap();
        let tx = db
            .begin_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        let payload = vec![7u8; 100_000];
        let id = FbBlob::write_all(&db, &tx, &payload, &BlobOptions::default())
            .await
            .unwrap();
        let read = FbBlob::read_all(&db, &tx, id).await.unwrap();
        assert_eq!(read, payload);
        tx.rollback().await.unwrap();
        db.detach().await.unwrap();
    }

    #[tokio::test]
    async fn test_pool_reuses_sessions() {
        let pool = FbPool::new(FbPoolConfig::new().max_size(Some(2)));
        let config = config();
        let first_handle = {
            let session = pool.get(&config).await.unwrap();
            session.handle()
        };
        assert_eq!(pool.idle_count(&config), 1);
        let session = pool.get(&config).await.unwrap();
        assert_eq!(session.handle(), first_handle);
        drop(session);
        pool.close().await;
    }
}
