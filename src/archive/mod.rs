//! Archive tables: partition naming, the registry and store contracts, and
//! the SQLite implementation of both.
//!
//! Aggregated reports are stored in one table per month and archive kind.
//! The maintenance jobs only ever read the registry and purge or optimize
//! existing tables; creating partitions belongs to the archiving write path.

mod error;
mod partition;
#[cfg(feature = "database-sqlite")]
mod sqlite;
mod traits;

pub use error::{ArchiveError, ArchiveResult};
pub use partition::{
    ArchiveKind, ArchivePartition, ArchivePeriod, RETENTION_BOUNDARY_DAY, parse_period,
};
#[cfg(feature = "database-sqlite")]
pub use sqlite::{DONE_ERROR, DONE_OK, DONE_OK_TEMPORARY, PERIOD_RANGE, SqliteArchiveStore};
pub use traits::{ArchiveStore, ArchiveTableRegistry, PurgeStats};
