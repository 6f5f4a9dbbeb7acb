//! Firebird wire protocol client.
//!
//! Architecture:
//! - `xdr`, `types`: XDR primitives and the SQL value codec
//! - `wire`, `connection`: transport, handshake and request/response framing
//! - `srp`, `auth`: SRP/SRP-256 authentication
//! - `database`, `transaction`, `statement`: attachment, transactions and DSQL
//! - `blob`, `array`: large object and array slice I/O
//! - `events`: auxiliary connection and event notifications
//! - `pool`: keyed session pool

pub mod array;
pub mod auth;
pub mod blob;
pub mod charset;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod events;
pub mod params;
pub mod pool;
pub mod protocol;
pub mod srp;
pub mod statement;
pub mod transaction;
pub mod types;
pub mod wire;
pub mod xdr;

#[cfg(test)]
mod tests;

pub use array::{ArrayBound, ArrayDesc, FbArray};
pub use blob::{BlobOptions, BlobType, FbBlob, SeekMode};
pub use charset::Charset;
pub use config::{FbConfig, FbPoolConfig};
pub use connection::FbConnection;
pub use database::{DatabaseInfo, FbDatabase};
pub use error::{FbError, FbResult, StatusArg, StatusError};
pub use events::{EventCount, EventSubscription};
pub use pool::{FbPool, PooledSession};
pub use statement::{FbStatement, FreeMode, RecordsAffected, StatementState, StatementType};
pub use transaction::{FbTransaction, Isolation, LockWait, TransactionOptions, TransactionState};
pub use types::{FbValue, FieldDescriptor, Numeric, Row, RowDescriptor, SqlType};
