use async_trait::async_trait;
use chrono::NaiveDate;

use super::{error::ArchiveResult, partition::ArchivePartition};

/// Counts of what a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Temporary archives of today whose time-to-live had passed.
    pub temporary_archives: u64,
    /// Archives whose processing ended in error.
    pub error_archives: u64,
    /// Rows of custom date-range archives processed before yesterday.
    pub range_rows: u64,
}

impl PurgeStats {
    pub fn total(&self) -> u64 {
        self.temporary_archives + self.error_archives + self.range_rows
    }

    pub fn merge(&mut self, other: PurgeStats) {
        self.temporary_archives += other.temporary_archives;
        self.error_archives += other.error_archives;
        self.range_rows += other.range_rows;
    }
}

/// Enumerates the archive tables present in storage.
///
/// Implementations must be thread-safe; every installed table is listed
/// exactly once per call.
#[async_trait]
pub trait ArchiveTableRegistry: Send + Sync {
    /// Names of all installed archive tables, read from storage metadata.
    async fn list_installed_tables(&self) -> ArchiveResult<Vec<String>>;

    /// Installed archive tables resolved to their periods.
    ///
    /// Tables whose name does not carry a period are logged and left out.
    async fn list_installed_partitions(&self) -> ArchiveResult<Vec<ArchivePartition>> {
        let tables = self.list_installed_tables().await?;
        let mut partitions = Vec::with_capacity(tables.len());

        for table in tables {
            match ArchivePartition::parse(table) {
                Ok(partition) => partitions.push(partition),
                Err(e) => tracing::warn!(error = %e, "Ignoring archive table"),
            }
        }

        Ok(partitions)
    }
}

/// Storage operations the maintenance jobs need from the archive database.
///
/// Both operations must be idempotent: re-running them after a failure or
/// an overlapping run is safe.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Remove archives considered outdated in the partition of `boundary`'s
    /// month. Which archives are outdated is decided by the store.
    async fn purge_outdated_archives(&self, boundary: NaiveDate) -> ArchiveResult<PurgeStats>;

    /// Reclaim storage for all `tables` in one batch.
    async fn optimize_tables(&self, tables: &[String]) -> ArchiveResult<()>;
}
