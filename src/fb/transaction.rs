//! Transactions.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::database::{DbShared, DeferredRelease, FbDatabase};
use super::error::{FbError, FbResult};
use super::params::ParamBuffer;
use super::protocol::*;
use super::statement::StatementCore;

/// Buffer length for `op_info_transaction` replies.
const TRANSACTION_INFO_BUFFER_SIZE: i32 = 128;

// ============================================================================
// Options
// ============================================================================

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Table-level locking (`isc_tpb_consistency`)
    Consistency,
    /// Snapshot (`isc_tpb_concurrency`)
    Concurrency,
    /// Read committed, waiting for uncommitted record versions
    ReadCommitted,
    /// Read committed, reading the latest committed version
    #[default]
    ReadCommittedRecordVersion,
}

/// Lock conflict behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    #[default]
    Wait,
    NoWait,
    /// Wait at most this many seconds
    Timeout(i32),
}

/// Options used to build the TPB of a new transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation: Isolation,
    pub read_only: bool,
    pub wait: LockWait,
    pub autocommit: bool,
    pub no_auto_undo: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn wait(mut self, wait: LockWait) -> Self {
        self.wait = wait;
        self
    }

    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = enabled;
        self
    }

    pub fn no_auto_undo(mut self, enabled: bool) -> Self {
        self.no_auto_undo = enabled;
        self
    }

    /// Encode as an `isc_tpb_version3` block.
    pub fn to_tpb(&self) -> Vec<u8> {
        let mut block = ParamBuffer::new(tpb::VERSION3);
        match self.isolation {
            Isolation::Consistency => {
                block.put_tag(tpb::CONSISTENCY);
            }
            Isolation::Concurrency => {
                block.put_tag(tpb::CONCURRENCY);
            }
            Isolation::ReadCommitted => {
                block.put_tag(tpb::READ_COMMITTED).put_tag(tpb::NO_REC_VERSION);
            }
            Isolation::ReadCommittedRecordVersion => {
                block.put_tag(tpb::READ_COMMITTED).put_tag(tpb::REC_VERSION);
            }
        }
        block.put_tag(if self.read_only { tpb::READ } else { tpb::WRITE });
        match self.wait {
            LockWait::Wait => {
                block.put_tag(tpb::WAIT);
            }
            LockWait::NoWait => {
                block.put_tag(tpb::NOWAIT);
            }
            LockWait::Timeout(secs) => {
                block.put_tag(tpb::WAIT).put_int(tpb::LOCK_TIMEOUT, secs);
            }
        }
        if self.autocommit {
            block.put_tag(tpb::AUTOCOMMIT);
        }
        if self.no_auto_undo {
            block.put_tag(tpb::NO_AUTO_UNDO);
        }
        block.into_bytes()
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Committed, rolled back, or never started
    None,
    Active,
    /// First phase of a two-phase commit done
    Prepared,
}

pub(crate) struct TxShared {
    pub(crate) db: Arc<DbShared>,
    pub(crate) handle: i32,
    state: Mutex<TransactionState>,
    statements: Mutex<Vec<Weak<Mutex<StatementCore>>>>,
}

impl TxShared {
    pub(crate) fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Statement handles run on must belong to an active transaction.
    pub(crate) fn ensure_active(&self) -> FbResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            other => Err(FbError::State(format!(
                "transaction {} is {:?}, expected Active",
                self.handle, other
            ))),
        }
    }

    pub(crate) fn register(&self, statement: &Arc<Mutex<StatementCore>>) {
        let mut statements = self.statements.lock();
        statements.retain(|s| s.strong_count() > 0);
        statements.push(Arc::downgrade(statement));
    }

    /// Close every bound statement's cursor and drop its queued rows.
    fn close_statements(&self) {
        let statements = std::mem::take(&mut *self.statements.lock());
        for statement in statements.iter().filter_map(Weak::upgrade) {
            statement.lock().transaction_ended();
        }
    }
}

/// A transaction on an attachment.
pub struct FbTransaction {
    pub(crate) shared: Arc<TxShared>,
}

impl FbTransaction {
    /// Start a transaction with `options`.
    pub async fn begin(db: &FbDatabase, options: &TransactionOptions) -> FbResult<Self> {
        let shared_db = db.shared.clone();
        let handle = {
            let mut conn = shared_db.lock().await?;
            conn.send_message(&StartTransaction {
                db_handle: shared_db.handle(),
                tpb: options.to_tpb(),
            })
            .await?;
            conn.read_response().await?.object_handle
        };
        shared_db.transaction_started();
        debug!(handle, "transaction started");
        Ok(Self {
            shared: Arc::new(TxShared {
                db: shared_db,
                handle,
                state: Mutex::new(TransactionState::Active),
                statements: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn handle(&self) -> i32 {
        self.shared.handle
    }

    pub fn state(&self) -> TransactionState {
        self.shared.state()
    }

    pub async fn commit(&self) -> FbResult<()> {
        self.finish(op::COMMIT).await
    }

    pub async fn rollback(&self) -> FbResult<()> {
        self.finish(op::ROLLBACK).await
    }

    /// Commit and keep the transaction context open.
    pub async fn commit_retaining(&self) -> FbResult<()> {
        self.retain(op::COMMIT_RETAINING).await
    }

    /// Roll back and keep the transaction context open.
    pub async fn rollback_retaining(&self) -> FbResult<()> {
        self.retain(op::ROLLBACK_RETAINING).await
    }

    /// First phase of a two-phase commit, with an optional recovery message.
    pub async fn prepare(&self, message: Option<&[u8]>) -> FbResult<()> {
        self.shared.ensure_active()?;
        let mut conn = self.shared.db.lock().await?;
        match message {
            Some(message) => {
                conn.send_message(&Prepare2 {
                    tr_handle: self.handle(),
                    message: message.to_vec(),
                })
                .await?
            }
            None => {
                conn.send_message(&ReleaseObject {
                    op: op::PREPARE,
                    handle: self.handle(),
                })
                .await?
            }
        }
        conn.read_response().await?;
        *self.shared.state.lock() = TransactionState::Prepared;
        debug!(handle = self.handle(), "transaction prepared");
        Ok(())
    }

    /// Raw `op_info_transaction` reply for `items`.
    pub async fn info(&self, items: &[u8], buffer_length: i32) -> FbResult<Bytes> {
        let mut conn = self.shared.db.lock().await?;
        conn.send_message(&InfoRequest {
            op: op::INFO_TRANSACTION,
            handle: self.handle(),
            items: items.to_vec(),
            buffer_length,
        })
        .await?;
        Ok(conn.read_response().await?.data)
    }

    /// Server-side transaction id.
    pub async fn transaction_id(&self) -> FbResult<i64> {
        let data = self
            .info(&[info::TRA_ID, info::END], TRANSACTION_INFO_BUFFER_SIZE)
            .await?;
        info_items(&data)?
            .into_iter()
            .find(|(item, _)| *item == info::TRA_ID)
            .map(|(_, value)| vax_integer(value))
            .ok_or_else(|| FbError::Protocol("transaction id missing from info reply".to_string()))
    }

    async fn finish(&self, opcode: i32) -> FbResult<()> {
        match self.state() {
            TransactionState::Active | TransactionState::Prepared => {}
            TransactionState::None => {
                return Err(FbError::State(format!(
                    "transaction {} is not active",
                    self.handle()
                )))
            }
        }
        {
            let mut conn = self.shared.db.lock().await?;
            conn.send_message(&ReleaseObject {
                op: opcode,
                handle: self.handle(),
            })
            .await?;
            conn.read_response().await?;
        }
        *self.shared.state.lock() = TransactionState::None;
        self.shared.db.transaction_finished();
        self.shared.close_statements();
        debug!(handle = self.handle(), opcode, "transaction finished");
        Ok(())
    }

    async fn retain(&self, opcode: i32) -> FbResult<()> {
        self.shared.ensure_active()?;
        let mut conn = self.shared.db.lock().await?;
        conn.send_message(&ReleaseObject {
            op: opcode,
            handle: self.handle(),
        })
        .await?;
        conn.read_response().await?;
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> Weak<TxShared> {
        Arc::downgrade(&self.shared)
    }
}

impl Drop for FbTransaction {
    /// An unfinished transaction is rolled back before the next round trip.
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if *state != TransactionState::None {
            *state = TransactionState::None;
            self.shared.db.defer(DeferredRelease::Transaction(self.shared.handle));
            self.shared.db.transaction_finished();
            debug!(handle = self.shared.handle, "transaction dropped while open");
        }
    }
}

impl std::fmt::Debug for FbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbTransaction")
            .field("handle", &self.shared.handle)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tpb() {
        assert_eq!(
            TransactionOptions::default().to_tpb(),
            vec![
                tpb::VERSION3,
                tpb::READ_COMMITTED,
                tpb::REC_VERSION,
                tpb::WRITE,
                tpb::WAIT
            ]
        );
    }

    #[test]
    fn test_snapshot_read_only_with_lock_timeout() {
        let block = TransactionOptions::new()
            .isolation(Isolation::Concurrency)
            .read_only(true)
            .wait(LockWait::Timeout(5))
            .no_auto_undo(true)
            .to_tpb();
        assert_eq!(
            block,
            vec![
                tpb::VERSION3,
                tpb::CONCURRENCY,
                tpb::READ,
                tpb::WAIT,
                tpb::LOCK_TIMEOUT,
                4,
                5,
                0,
                0,
                0,
                tpb::NO_AUTO_UNDO
            ]
        );
    }

    #[test]
    fn test_nowait_autocommit() {
        let block = TransactionOptions::new()
            .isolation(Isolation::Consistency)
            .wait(LockWait::NoWait)
            .autocommit(true)
            .to_tpb();
        assert_eq!(
            block,
            vec![
                tpb::VERSION3,
                tpb::CONSISTENCY,
                tpb::WRITE,
                tpb::NOWAIT,
                tpb::AUTOCOMMIT
            ]
        );
    }
}
