//! Scheduled background jobs.
//!
//! Plugins contribute [`ScheduledJob`] records at startup; the
//! [`TaskScheduler`] keeps a timetable of their next runs and executes due
//! jobs sequentially in priority order. With a persistent
//! [`TimetableStore`] the next run times survive restarts. The archive
//! maintenance plugin registers:
//!
//! - **purge_outdated_archives** (daily, high priority): deletes superseded
//!   and expired archives in every monthly partition.
//! - **optimize_archive_table** (daily, lowest priority): compacts all archive
//!   tables after the purge.
//!
//! # Example
//!
//! ```toml
//! [maintenance]
//! enabled = true
//! tick_secs = 300
//! purge_concurrency = 2
//! ```

mod archive_maintenance;
mod descriptor;
mod scheduler;
mod timetable;

pub use archive_maintenance::{
    ArchiveMaintenance, ArchiveMaintenancePlugin, MaintenanceError, MaintenancePassReport,
    MaintenanceResult, OptimizeReport, PartitionFailure, PurgeReport, PurgedPeriod,
};
pub use descriptor::{JobError, JobHandler, JobPriority, Plugin, Schedule, ScheduledJob};
pub use scheduler::{JobRun, TaskScheduler, start_scheduler_worker};
#[cfg(feature = "database-sqlite")]
pub use timetable::SqliteTimetable;
pub use timetable::{MemoryTimetable, Timetable, TimetableStore};
