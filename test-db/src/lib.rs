//! Throwaway MySQL databases for tests.
//!
//! A [`TestDb`] creates a uniquely named working database and migrates it.
//! With `reset` enabled it also builds a migrated template database and
//! records its tables and AUTO_INCREMENT counters, so [`TestDb::reset`] can
//! put the working database back into the pristine state before every test
//! case. [`TestDb::teardown`] drops everything it created.
//!
//! ```no_run
//! # async fn run(config: common::config::DatabaseConfig) -> test_db::TestDbResult<()> {
//! use test_db::{TestDb, TestDbOptions};
//!
//! let mut db = TestDb::setup(&config, |db| println!("using {}", db.working_database_name()),
//!     TestDbOptions::default()).await?;
//! // before each case
//! db.reset().await?;
//! // at the end of the suite
//! db.teardown().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod inventory;
pub mod provisioner;
pub mod session;

pub use error::{ResetStep, TestDbError, TestDbResult};
pub use inventory::{TableEntry, TableInventory};
pub use provisioner::{Connection, DatabaseHandle, Provisioner};
pub use session::{SessionState, TestDb, TestDbOptions};
