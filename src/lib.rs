//! fbwire - an async Firebird wire protocol client.
//!
//! ```no_run
//! use fbwire::{FbConfig, FbDatabase, FbStatement, TransactionOptions};
//!
//! # async fn demo() -> fbwire::FbResult<()> {
//! let config = FbConfig::new("localhost", "/data/employee.fdb").password("masterkey");
//! let db = FbDatabase::attach(&config).await?;
//! let tx = db.begin_transaction(&TransactionOptions::default()).await?;
//! let mut stmt = FbStatement::new(&db, Some(&tx));
//! stmt.prepare("SELECT 1 FROM RDB$DATABASE").await?;
//! stmt.execute(&[]).await?;
//! while let Some(row) = stmt.fetch().await? {
//!     println!("{:?}", row);
//! }
//! tx.commit().await?;
//! db.detach().await?;
//! # Ok(())
//! # }
//! ```

pub mod fb;

pub use fb::*;
