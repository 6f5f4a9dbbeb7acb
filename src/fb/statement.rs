//! Prepared statements.
//!
//! A statement moves through allocate, prepare, execute and fetch. Each step
//! validates the current [`StatementState`] before touching the wire, so a
//! call out of order fails with [`FbError::State`] and leaves the state as it
//! was. Rows are fetched in batches of `fetch_size` and served from a local
//! queue.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::debug;

use super::charset::Charset;
use super::connection::FbConnection;
use super::database::{DbShared, DeferredRelease, FbDatabase, HandleKind};
use super::error::{isc, FbError, FbResult};
use super::protocol::*;
use super::transaction::{FbTransaction, TxShared};
use super::types::{decode_row, encode_row, FbValue, FieldDescriptor, Row, RowDescriptor, SharedDescriptor};

/// Resubmissions allowed when describe info comes back truncated.
const MAX_DESCRIBE_ROUNDS: usize = 10;

const DESCRIBE_VARS: [u8; 11] = [
    info::SQL_DESCRIBE_VARS,
    info::SQL_SQLDA_SEQ,
    info::SQL_TYPE,
    info::SQL_SUB_TYPE,
    info::SQL_SCALE,
    info::SQL_LENGTH,
    info::SQL_FIELD,
    info::SQL_RELATION,
    info::SQL_OWNER,
    info::SQL_ALIAS,
    info::SQL_DESCRIBE_END,
];

const STATEMENT_TYPE_ITEMS: [u8; 1] = [info::SQL_STMT_TYPE];
const RECORDS_AFFECTED_ITEMS: [u8; 1] = [info::SQL_RECORDS];

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Deallocated,
    Allocated,
    Prepared,
    Executed,
    Closed,
    Error,
}

/// Statement kind reported by `isc_info_sql_stmt_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    GetSegment,
    PutSegment,
    StoredProcedure,
    StartTransaction,
    Commit,
    Rollback,
    SelectForUpdate,
    SetGenerator,
    Savepoint,
    Unknown(i32),
}

impl StatementType {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => StatementType::Select,
            2 => StatementType::Insert,
            3 => StatementType::Update,
            4 => StatementType::Delete,
            5 => StatementType::Ddl,
            6 => StatementType::GetSegment,
            7 => StatementType::PutSegment,
            8 => StatementType::StoredProcedure,
            9 => StatementType::StartTransaction,
            10 => StatementType::Commit,
            11 => StatementType::Rollback,
            12 => StatementType::SelectForUpdate,
            13 => StatementType::SetGenerator,
            14 => StatementType::Savepoint,
            other => StatementType::Unknown(other),
        }
    }

    /// Statements that open a server-side cursor.
    pub fn has_cursor(self) -> bool {
        matches!(self, StatementType::Select | StatementType::SelectForUpdate)
    }

    /// Statements whose affected row count is queried after execution.
    pub fn is_dml(self) -> bool {
        matches!(
            self,
            StatementType::Insert
                | StatementType::Update
                | StatementType::Delete
                | StatementType::StoredProcedure
        )
    }
}

/// How [`FbStatement::free`] releases server resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeMode {
    /// Close the cursor, keep the prepared statement
    Close,
    /// Release the statement handle
    Drop,
}

/// Per-operation row counts from `isc_info_sql_records`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordsAffected {
    pub select: i64,
    pub insert: i64,
    pub update: i64,
    pub delete: i64,
}

impl RecordsAffected {
    /// Rows changed by the statement (selected rows are not counted).
    pub fn total(&self) -> i64 {
        self.insert + self.update + self.delete
    }

    /// Parse an `isc_info_sql_records` reply.
    pub fn parse(buf: &[u8]) -> FbResult<Self> {
        let mut counts = RecordsAffected::default();
        for (item, nested) in info_items(buf)? {
            if item != info::SQL_RECORDS {
                continue;
            }
            for (counter, value) in info_items(nested)? {
                let n = vax_integer(value);
                match counter {
                    info::REQ_SELECT_COUNT => counts.select = n,
                    info::REQ_INSERT_COUNT => counts.insert = n,
                    info::REQ_UPDATE_COUNT => counts.update = n,
                    info::REQ_DELETE_COUNT => counts.delete = n,
                    _ => {}
                }
            }
        }
        Ok(counts)
    }
}

/// State shared with the owning transaction, which closes the statement
/// when it completes.
#[derive(Debug)]
pub(crate) struct StatementCore {
    state: StatementState,
    rows: VecDeque<Row>,
    all_fetched: bool,
    /// Output row of an executed stored procedure, returned by the next fetch
    output_row: Option<Row>,
}

impl StatementCore {
    fn new() -> Self {
        Self {
            state: StatementState::Deallocated,
            rows: VecDeque::new(),
            all_fetched: false,
            output_row: None,
        }
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.all_fetched = false;
        self.output_row = None;
    }

    pub(crate) fn transaction_ended(&mut self) {
        if matches!(self.state, StatementState::Prepared | StatementState::Executed) {
            self.state = StatementState::Closed;
        }
        self.clear();
    }
}

// ============================================================================
// Statement
// ============================================================================

/// A DSQL statement on an attachment.
pub struct FbStatement {
    db: Arc<DbShared>,
    transaction: Option<Weak<TxShared>>,
    handle: i32,
    core: Arc<Mutex<StatementCore>>,
    statement_type: StatementType,
    input: SharedDescriptor,
    output: SharedDescriptor,
    fetch_size: usize,
    return_records_affected: bool,
    records_affected: Option<RecordsAffected>,
}

impl FbStatement {
    /// New statement bound to `transaction`. Nothing is sent until
    /// [`FbStatement::allocate`] or [`FbStatement::prepare`].
    pub fn new(db: &FbDatabase, transaction: Option<&FbTransaction>) -> Self {
        let mut statement = Self {
            db: db.shared.clone(),
            transaction: None,
            handle: INVALID_OBJECT,
            core: Arc::new(Mutex::new(StatementCore::new())),
            statement_type: StatementType::Unknown(0),
            input: SharedDescriptor::default(),
            output: SharedDescriptor::default(),
            fetch_size: db.shared.fetch_size(),
            return_records_affected: true,
            records_affected: None,
        };
        if let Some(tx) = transaction {
            statement.set_transaction(tx);
        }
        statement
    }

    /// Bind the statement to another transaction.
    pub fn set_transaction(&mut self, transaction: &FbTransaction) {
        transaction.shared.register(&self.core);
        self.transaction = Some(transaction.downgrade());
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> StatementState {
        self.core.lock().state
    }

    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    pub fn input_descriptor(&self) -> &SharedDescriptor {
        &self.input
    }

    pub fn output_descriptor(&self) -> &SharedDescriptor {
        &self.output
    }

    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    pub fn set_fetch_size(&mut self, size: usize) {
        self.fetch_size = size.max(1);
    }

    /// Query affected rows after DML executions (on by default).
    pub fn set_return_records_affected(&mut self, enabled: bool) {
        self.return_records_affected = enabled;
    }

    /// Rows changed by the last execution, or -1 when not known.
    pub fn records_affected(&self) -> i64 {
        self.records_affected.map_or(-1, |r| r.total())
    }

    pub fn records_affected_detail(&self) -> Option<RecordsAffected> {
        self.records_affected
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Allocate a server handle.
    pub async fn allocate(&mut self) -> FbResult<()> {
        self.expect_state(&[StatementState::Deallocated], "allocate")?;
        let mut conn = self.db.lock().await?;
        conn.send_message(&ReleaseObject {
            op: op::ALLOCATE_STATEMENT,
            handle: self.db.handle(),
        })
        .await?;
        let response = conn.read_response().await?;
        self.handle = response.object_handle;
        self.db.handles.lock().insert(HandleKind::Statement, self.handle);
        self.core.lock().state = StatementState::Allocated;
        debug!(handle = self.handle, "statement allocated");
        Ok(())
    }

    /// Prepare `sql`, allocating first when needed, and describe its
    /// parameters and columns.
    pub async fn prepare(&mut self, sql: &str) -> FbResult<StatementType> {
        let tr_handle = self.transaction_handle()?;
        if self.state() == StatementState::Deallocated {
            self.allocate().await?;
        }
        self.check_handle()?;
        // A failed prepare must not leave the previous statement usable.
        self.input = SharedDescriptor::default();
        self.output = SharedDescriptor::default();
        self.statement_type = StatementType::Unknown(0);
        self.records_affected = None;
        {
            let mut core = self.core.lock();
            core.clear();
            core.state = StatementState::Allocated;
        }

        let db = self.db.clone();
        let result = {
            let mut conn = db.lock().await?;
            self.prepare_on(&mut conn, tr_handle, sql).await
        };
        match result {
            Ok(statement_type) => {
                self.core.lock().state = StatementState::Prepared;
                debug!(
                    handle = self.handle,
                    ?statement_type,
                    inputs = self.input.len(),
                    outputs = self.output.len(),
                    "statement prepared"
                );
                Ok(statement_type)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn prepare_on(
        &mut self,
        conn: &mut FbConnection,
        tr_handle: i32,
        sql: &str,
    ) -> FbResult<StatementType> {
        let items = describe_items(None);
        conn.send_message(&PrepareStatement {
            tr_handle,
            stmt_handle: self.handle,
            dialect: self.db.dialect(),
            sql: sql.to_string(),
            items,
            buffer_length: PREPARE_INFO_BUFFER_SIZE,
        })
        .await?;
        let mut data = conn.read_response().await?.data;

        let charset = conn.charset();
        let mut describe = DescribeState::default();
        let mut rounds = 0;
        while parse_describe(&data, charset, &mut describe)? == DescribeProgress::Truncated {
            rounds += 1;
            if rounds > MAX_DESCRIBE_ROUNDS {
                return Err(FbError::Protocol(format!(
                    "describe info still truncated after {} requests",
                    MAX_DESCRIBE_ROUNDS
                )));
            }
            debug!(handle = self.handle, rounds, "describe info truncated, resubmitting");
            data = sql_info(conn, self.handle, describe_items(Some(&describe)), PREPARE_INFO_BUFFER_SIZE)
                .await?;
        }
        let [output, input] = describe.into_descriptors();
        self.output = Arc::new(output);
        self.input = Arc::new(input);

        let data = sql_info(
            conn,
            self.handle,
            STATEMENT_TYPE_ITEMS.to_vec(),
            STATEMENT_TYPE_BUFFER_SIZE,
        )
        .await?;
        self.statement_type = parse_statement_type(&data)?;
        Ok(self.statement_type)
    }

    /// Execute with `params` bound to the input descriptor.
    pub async fn execute(&mut self, params: &[FbValue]) -> FbResult<()> {
        self.expect_state(
            &[
                StatementState::Prepared,
                StatementState::Executed,
                StatementState::Closed,
            ],
            "execute",
        )?;
        let tr_handle = self.transaction_handle()?;
        self.check_handle()?;
        if params.len() != self.input.len() {
            return Err(FbError::Type(format!(
                "statement expects {} parameters, got {}",
                self.input.len(),
                params.len()
            )));
        }

        let reopen = self.state() == StatementState::Executed && self.statement_type.has_cursor();
        self.core.lock().clear();
        self.records_affected = None;

        let db = self.db.clone();
        let result = {
            let mut conn = db.lock().await?;
            self.execute_on(&mut conn, tr_handle, params, reopen).await
        };
        match result {
            Ok(output_row) => {
                let mut core = self.core.lock();
                core.output_row = output_row;
                core.state = StatementState::Executed;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn execute_on(
        &mut self,
        conn: &mut FbConnection,
        tr_handle: i32,
        params: &[FbValue],
        reopen: bool,
    ) -> FbResult<Option<Row>> {
        if reopen {
            conn.send_message(&FreeStatement {
                stmt_handle: self.handle,
                option: DSQL_CLOSE,
            })
            .await?;
            conn.read_response().await?;
        }

        let null_bitmap = conn.uses_null_bitmap();
        let charset = conn.charset();
        let input = if self.input.is_empty() {
            None
        } else {
            let mut message = BytesMut::new();
            encode_row(&mut message, &self.input, params, charset, null_bitmap)?;
            Some((self.input.to_blr()?, message.freeze()))
        };
        let procedure = self.statement_type == StatementType::StoredProcedure;
        conn.send_message(&Execute {
            op: if procedure { op::EXECUTE2 } else { op::EXECUTE },
            stmt_handle: self.handle,
            tr_handle,
            input,
            output_blr: if procedure {
                Some(self.output.to_blr()?)
            } else {
                None
            },
        })
        .await?;

        let mut output_row = None;
        if procedure {
            let operation = conn.read_operation().await?;
            match conn.process_operation(operation).await? {
                Response::Sql(SqlResponse { count }) => {
                    if count > 0 {
                        output_row =
                            Some(decode_row(conn, &self.output, charset, null_bitmap).await?);
                    }
                    conn.read_response().await?;
                }
                Response::Generic(_) => {}
                other => {
                    return Err(FbError::Protocol(format!(
                        "unexpected reply to execute2: {:?}",
                        other
                    )))
                }
            }
        } else {
            conn.read_response().await?;
        }

        if self.return_records_affected && self.statement_type.is_dml() {
            let data = sql_info(
                conn,
                self.handle,
                RECORDS_AFFECTED_ITEMS.to_vec(),
                ROWS_AFFECTED_BUFFER_SIZE,
            )
            .await?;
            self.records_affected = Some(RecordsAffected::parse(&data)?);
        }
        Ok(output_row)
    }

    /// Next row, or `None` once the cursor is exhausted.
    pub async fn fetch(&mut self) -> FbResult<Option<Row>> {
        self.expect_state(&[StatementState::Executed], "fetch")?;
        if self.statement_type == StatementType::StoredProcedure {
            return Ok(self.core.lock().output_row.take());
        }
        if !self.statement_type.has_cursor() {
            return Ok(None);
        }

        let need_more = {
            let core = self.core.lock();
            core.rows.is_empty() && !core.all_fetched
        };
        if need_more {
            self.check_handle()?;
            let result = {
                let mut conn = self.db.lock().await?;
                self.fetch_batch(&mut conn).await
            };
            match result {
                Ok((rows, done)) => {
                    let mut core = self.core.lock();
                    core.rows.extend(rows);
                    core.all_fetched = done;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
        Ok(self.core.lock().rows.pop_front())
    }

    async fn fetch_batch(&self, conn: &mut FbConnection) -> FbResult<(Vec<Row>, bool)> {
        conn.send_message(&Fetch {
            stmt_handle: self.handle,
            blr: self.output.to_blr()?,
            fetch_size: i32::try_from(self.fetch_size).unwrap_or(i32::MAX),
        })
        .await?;

        let null_bitmap = conn.uses_null_bitmap();
        let charset = conn.charset();
        let mut rows = Vec::new();
        loop {
            let operation = conn.read_operation().await?;
            match conn.process_operation(operation).await? {
                Response::Fetch(FetchResponse { status: 0, count }) if count > 0 => {
                    rows.push(decode_row(conn, &self.output, charset, null_bitmap).await?);
                }
                Response::Fetch(FetchResponse { status, .. }) => {
                    debug!(handle = self.handle, rows = rows.len(), status, "fetch batch");
                    return Ok((rows, status == 100));
                }
                Response::Generic(_) => return Ok((rows, false)),
                other => {
                    return Err(FbError::Protocol(format!(
                        "unexpected reply to fetch: {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// Fetch every remaining row.
    pub async fn fetch_all(&mut self) -> FbResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close the cursor or release the statement.
    pub async fn free(&mut self, mode: FreeMode) -> FbResult<()> {
        match mode {
            FreeMode::Close => self.close().await,
            FreeMode::Drop => self.release().await,
        }
    }

    async fn close(&mut self) -> FbResult<()> {
        let state = self.state();
        if !matches!(
            state,
            StatementState::Prepared | StatementState::Executed | StatementState::Error
        ) {
            return Ok(());
        }
        if state == StatementState::Executed && self.statement_type.has_cursor() {
            self.check_handle()?;
            let mut conn = self.db.lock().await?;
            conn.send_message(&FreeStatement {
                stmt_handle: self.handle,
                option: DSQL_CLOSE,
            })
            .await?;
            conn.read_response().await?;
        }
        let mut core = self.core.lock();
        core.clear();
        core.state = StatementState::Closed;
        Ok(())
    }

    async fn release(&mut self) -> FbResult<()> {
        if self.state() == StatementState::Deallocated || self.handle == INVALID_OBJECT {
            return Ok(());
        }
        {
            let mut conn = self.db.lock().await?;
            conn.send_message(&FreeStatement {
                stmt_handle: self.handle,
                option: DSQL_DROP,
            })
            .await?;
            conn.read_response().await?;
        }
        self.db.handles.lock().remove(HandleKind::Statement, self.handle);
        debug!(handle = self.handle, "statement released");
        self.handle = INVALID_OBJECT;
        self.input = SharedDescriptor::default();
        self.output = SharedDescriptor::default();
        self.statement_type = StatementType::Unknown(0);
        let mut core = self.core.lock();
        core.clear();
        core.state = StatementState::Deallocated;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn expect_state(&self, allowed: &[StatementState], operation: &str) -> FbResult<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(FbError::State(format!(
                "cannot {} a statement in state {:?}",
                operation, state
            )))
        }
    }

    fn transaction_handle(&self) -> FbResult<i32> {
        let tx = self
            .transaction
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| FbError::State("statement has no transaction".to_string()))?;
        tx.ensure_active()?;
        Ok(tx.handle)
    }

    fn check_handle(&self) -> FbResult<()> {
        self.db.handles.lock().check(HandleKind::Statement, self.handle)
    }

    /// Transport failures leave the statement unusable.
    fn fail(&self, err: FbError) -> FbError {
        if err.is_fatal() {
            self.core.lock().state = StatementState::Error;
        }
        err
    }
}

impl Drop for FbStatement {
    fn drop(&mut self) {
        if self.handle != INVALID_OBJECT && self.state() != StatementState::Deallocated {
            self.db.defer(DeferredRelease::Statement(self.handle));
        }
    }
}

impl std::fmt::Debug for FbStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbStatement")
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("statement_type", &self.statement_type)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Describe info
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescribeProgress {
    Done,
    Truncated,
}

/// Descriptors decoded so far: index 0 is the output (select) list, 1 the
/// input (bind) list.
#[derive(Debug, Default)]
pub(crate) struct DescribeState {
    parts: [Option<Vec<FieldDescriptor>>; 2],
    /// Last `sqlda_seq` seen per part (1-based)
    seq: [usize; 2],
}

impl DescribeState {
    fn into_descriptors(self) -> [RowDescriptor; 2] {
        self.parts
            .map(|fields| RowDescriptor::new(fields.unwrap_or_default()))
    }
}

/// Describe item list. After a truncation each part restarts one item
/// before the last sequence number seen, so a partly decoded column is
/// described again.
pub(crate) fn describe_items(resume: Option<&DescribeState>) -> Vec<u8> {
    let mut items = Vec::with_capacity(2 * (DESCRIBE_VARS.len() + 5));
    for (part, head) in [info::SQL_SELECT, info::SQL_BIND].into_iter().enumerate() {
        if let Some(state) = resume {
            let start = u16::try_from(state.seq[part].saturating_sub(1)).unwrap_or(u16::MAX);
            let [lo, hi] = start.to_le_bytes();
            items.extend_from_slice(&[info::SQL_SQLDA_START, 2, lo, hi]);
        }
        items.push(head);
        items.extend_from_slice(&DESCRIBE_VARS);
    }
    items
}

fn sqlda_error() -> FbError {
    FbError::status(isc::DSQL_SQLDA_ERR)
}

/// Value bytes of the item at `pos` (after its tag); advances `pos`.
fn item_value<'a>(buf: &'a [u8], pos: &mut usize) -> FbResult<&'a [u8]> {
    let header = buf.get(*pos..*pos + 2).ok_or_else(sqlda_error)?;
    let len = vax_integer(header) as usize;
    let value = buf.get(*pos + 2..*pos + 2 + len).ok_or_else(sqlda_error)?;
    *pos += 2 + len;
    Ok(value)
}

fn parse_describe(buf: &[u8], charset: Charset, state: &mut DescribeState) -> FbResult<DescribeProgress> {
    let mut pos = 0;
    let mut part = 0;
    while pos < buf.len() {
        let item = buf[pos];
        pos += 1;
        match item {
            info::END => return Ok(DescribeProgress::Done),
            info::TRUNCATED => return Ok(DescribeProgress::Truncated),
            info::SQL_SELECT => part = 0,
            info::SQL_BIND => part = 1,
            info::SQL_DESCRIBE_END => {}
            info::SQL_DESCRIBE_VARS => {
                let count = vax_integer(item_value(buf, &mut pos)?) as usize;
                if state.parts[part].is_none() {
                    state.parts[part] = Some(vec![FieldDescriptor::default(); count]);
                }
            }
            info::SQL_SQLDA_SEQ => {
                state.seq[part] = vax_integer(item_value(buf, &mut pos)?) as usize;
            }
            info::SQL_TYPE
            | info::SQL_SUB_TYPE
            | info::SQL_SCALE
            | info::SQL_LENGTH
            | info::SQL_FIELD
            | info::SQL_RELATION
            | info::SQL_OWNER
            | info::SQL_ALIAS => {
                let value = item_value(buf, &mut pos)?;
                let index = state.seq[part].checked_sub(1).ok_or_else(sqlda_error)?;
                let field = state.parts[part]
                    .as_mut()
                    .and_then(|fields| fields.get_mut(index))
                    .ok_or_else(sqlda_error)?;
                // Numeric items are shorts; sign-extend so negative scales survive.
                let short = vax_integer(value) as i16 as i32;
                match item {
                    info::SQL_TYPE => field.sql_type = short,
                    info::SQL_SUB_TYPE => field.sub_type = short,
                    info::SQL_SCALE => field.scale = short,
                    info::SQL_LENGTH => field.length = short,
                    info::SQL_FIELD => field.name = charset.decode(value),
                    info::SQL_RELATION => field.relation = charset.decode(value),
                    info::SQL_OWNER => field.owner = charset.decode(value),
                    _ => field.alias = charset.decode(value),
                }
            }
            _ => return Err(sqlda_error()),
        }
    }
    Ok(DescribeProgress::Done)
}

fn parse_statement_type(buf: &[u8]) -> FbResult<StatementType> {
    info_items(buf)?
        .into_iter()
        .find(|(item, _)| *item == info::SQL_STMT_TYPE)
        .map(|(_, value)| StatementType::from_code(vax_integer(value) as i32))
        .ok_or_else(|| FbError::Protocol("statement type missing from info reply".to_string()))
}

/// `op_info_sql` round trip.
async fn sql_info(
    conn: &mut FbConnection,
    stmt_handle: i32,
    items: Vec<u8>,
    buffer_length: i32,
) -> FbResult<bytes::Bytes> {
    conn.send_message(&InfoRequest {
        op: op::INFO_SQL,
        handle: stmt_handle,
        items,
        buffer_length,
    })
    .await?;
    Ok(conn.read_response().await?.data)
}
