//! Purge and optimization of archive tables.
//!
//! Two daily jobs keep the archive tables small:
//!
//! - `purge_outdated_archives` deletes superseded and expired archives in
//!   every monthly partition, scoped by the partition's retention boundary
//!   (the 15th of its month).
//! - `optimize_archive_table` then compacts every archive table in one batch.
//!
//! Compaction must see a fully purged state. Every purge pass holds the pass
//! gate until all of its partitions are done, and compaction waits on the
//! same gate; the scheduler additionally runs the purge at a higher priority.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::{StreamExt, stream};
use tokio::sync::Mutex;

use super::descriptor::{JobError, JobHandler, JobPriority, Plugin, Schedule, ScheduledJob};
use crate::{
    archive::{
        ArchiveError, ArchivePeriod, ArchiveStore, ArchiveTableRegistry, PurgeStats, parse_period,
    },
    config::MaintenanceConfig,
    observability::metrics,
};

const OWNER: &str = "ArchiveMaintenance";

/// Errors that fail a maintenance run as a whole.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("Failed to list archive tables: {0}")]
    Registry(#[source] ArchiveError),

    #[error("Purge failed for {failed} of {attempted} archive partitions")]
    PurgeIncomplete { failed: usize, attempted: usize },

    #[error("Failed to optimize {tables} archive tables: {source}")]
    Optimize {
        tables: usize,
        #[source]
        source: ArchiveError,
    },
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;

/// A period that was purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgedPeriod {
    pub period: ArchivePeriod,
    pub boundary: NaiveDate,
    pub stats: PurgeStats,
}

/// A partition, or period, that could not be purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    /// The table name for malformed names, the `YYYY_MM` period otherwise.
    pub partition: String,
    pub error: ArchiveError,
}

/// Outcome of one purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub purged: Vec<PurgedPeriod>,
    /// Periods left alone because of dry-run mode.
    pub skipped: Vec<ArchivePeriod>,
    pub failures: Vec<PartitionFailure>,
}

impl PurgeReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of periods and malformed tables the pass tried to handle.
    pub fn attempted(&self) -> usize {
        self.purged.len() + self.skipped.len() + self.failures.len()
    }

    pub fn stats(&self) -> PurgeStats {
        let mut total = PurgeStats::default();
        for purged in &self.purged {
            total.merge(purged.stats);
        }
        total
    }

    fn sort(&mut self) {
        self.purged.sort_by_key(|p| p.period);
        self.skipped.sort();
        self.failures.sort_by(|a, b| a.partition.cmp(&b.partition));
    }
}

/// Outcome of one optimize pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Number of tables handed to the store. Zero means no store call.
    pub tables: usize,
}

/// Outcome of a purge stage followed by a compaction stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenancePassReport {
    pub purge: PurgeReport,
    pub optimize: OptimizeReport,
}

/// Runs the archive maintenance operations against a registry and a store.
pub struct ArchiveMaintenance {
    registry: Arc<dyn ArchiveTableRegistry>,
    store: Arc<dyn ArchiveStore>,
    purge_concurrency: usize,
    dry_run: bool,
    pass_gate: Mutex<()>,
}

impl ArchiveMaintenance {
    pub fn new(
        registry: Arc<dyn ArchiveTableRegistry>,
        store: Arc<dyn ArchiveStore>,
        config: &MaintenanceConfig,
    ) -> Self {
        Self {
            registry,
            store,
            purge_concurrency: config.purge_concurrency.max(1),
            dry_run: config.purge.dry_run,
            pass_gate: Mutex::new(()),
        }
    }

    /// Purge outdated archives in every installed partition.
    ///
    /// A malformed table name or a failed purge is recorded against that
    /// partition and the pass continues. Only a registry failure fails the
    /// call itself.
    pub async fn purge_outdated_archives(&self) -> MaintenanceResult<PurgeReport> {
        let _gate = self.pass_gate.lock().await;
        self.purge_stage().await
    }

    /// Compact all installed archive tables in a single store call.
    ///
    /// Waits for any in-flight purge pass to finish first.
    pub async fn optimize_archive_table(&self) -> MaintenanceResult<OptimizeReport> {
        let _gate = self.pass_gate.lock().await;
        self.optimize_stage().await
    }

    /// Purge every partition, then compact, without letting another pass in
    /// between the two stages.
    pub async fn run_maintenance_pass(&self) -> MaintenanceResult<MaintenancePassReport> {
        let _gate = self.pass_gate.lock().await;
        let run_id = uuid::Uuid::new_v4();

        tracing::info!(run_id = %run_id, "Starting archive maintenance pass");

        let purge = self.purge_stage().await?;
        if !purge.is_success() {
            tracing::warn!(
                run_id = %run_id,
                failures = purge.failures.len(),
                "Purge stage finished with failures, optimizing anyway"
            );
        }

        let optimize = self.optimize_stage().await?;

        tracing::info!(
            run_id = %run_id,
            periods_purged = purge.purged.len(),
            archives_deleted = purge.stats().total(),
            tables_optimized = optimize.tables,
            "Archive maintenance pass complete"
        );

        Ok(MaintenancePassReport { purge, optimize })
    }

    async fn purge_stage(&self) -> MaintenanceResult<PurgeReport> {
        let tables = self
            .registry
            .list_installed_tables()
            .await
            .map_err(MaintenanceError::Registry)?;

        let mut report = PurgeReport::default();
        let mut periods = BTreeSet::new();

        for table in tables {
            match parse_period(&table) {
                Ok(period) => {
                    periods.insert(period);
                }
                Err(error) => {
                    tracing::warn!(table = %table, error = %error, "Skipping archive table");
                    metrics::record_purge_partition("failure");
                    report.failures.push(PartitionFailure {
                        partition: table,
                        error,
                    });
                }
            }
        }

        if self.dry_run {
            for period in periods {
                tracing::info!(
                    period = %period,
                    boundary = %period.retention_boundary(),
                    "DRY RUN: Would purge outdated archives"
                );
                metrics::record_purge_partition("skipped");
                report.skipped.push(period);
            }
            return Ok(report);
        }

        // Periods are distinct, so concurrent purges never share a partition.
        let outcomes: Vec<_> = stream::iter(periods)
            .map(|period| async move {
                let boundary = period.retention_boundary();
                (period, boundary, self.store.purge_outdated_archives(boundary).await)
            })
            .buffer_unordered(self.purge_concurrency)
            .collect()
            .await;

        for (period, boundary, outcome) in outcomes {
            match outcome {
                Ok(stats) => {
                    tracing::debug!(
                        period = %period,
                        boundary = %boundary,
                        deleted = stats.total(),
                        "Purged outdated archives"
                    );
                    metrics::record_purge_partition("success");
                    metrics::record_archives_deleted("temporary", stats.temporary_archives);
                    metrics::record_archives_deleted("error", stats.error_archives);
                    metrics::record_archives_deleted("range", stats.range_rows);
                    report.purged.push(PurgedPeriod {
                        period,
                        boundary,
                        stats,
                    });
                }
                Err(error) => {
                    tracing::error!(
                        period = %period,
                        boundary = %boundary,
                        error = %error,
                        "Failed to purge outdated archives"
                    );
                    metrics::record_purge_partition("failure");
                    report.failures.push(PartitionFailure {
                        partition: period.to_string(),
                        error,
                    });
                }
            }
        }

        report.sort();
        Ok(report)
    }

    async fn optimize_stage(&self) -> MaintenanceResult<OptimizeReport> {
        let tables = self
            .registry
            .list_installed_tables()
            .await
            .map_err(MaintenanceError::Registry)?;

        if tables.is_empty() {
            tracing::debug!("No archive tables to optimize");
            return Ok(OptimizeReport::default());
        }

        let count = tables.len();
        match self.store.optimize_tables(&tables).await {
            Ok(()) => {
                metrics::record_tables_optimized(count as u64, true);
                tracing::debug!(tables = count, "Optimized archive tables");
                Ok(OptimizeReport { tables: count })
            }
            Err(source) => {
                metrics::record_tables_optimized(count as u64, false);
                Err(MaintenanceError::Optimize {
                    tables: count,
                    source,
                })
            }
        }
    }
}

/// Registers the purge and optimize jobs with the scheduler.
pub struct ArchiveMaintenancePlugin {
    maintenance: Arc<ArchiveMaintenance>,
}

impl ArchiveMaintenancePlugin {
    pub fn new(maintenance: Arc<ArchiveMaintenance>) -> Self {
        Self { maintenance }
    }
}

impl Plugin for ArchiveMaintenancePlugin {
    fn name(&self) -> &'static str {
        OWNER
    }

    fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        vec![
            ScheduledJob::new(
                OWNER,
                "purge_outdated_archives",
                Schedule::Daily,
                JobPriority::High,
                Arc::new(PurgeJob(self.maintenance.clone())),
            ),
            ScheduledJob::new(
                OWNER,
                "optimize_archive_table",
                Schedule::Daily,
                JobPriority::Lowest,
                Arc::new(OptimizeJob(self.maintenance.clone())),
            ),
        ]
    }
}

struct PurgeJob(Arc<ArchiveMaintenance>);

#[async_trait]
impl JobHandler for PurgeJob {
    async fn run(&self) -> Result<String, JobError> {
        let report = self.0.purge_outdated_archives().await?;

        if !report.is_success() {
            return Err(MaintenanceError::PurgeIncomplete {
                failed: report.failures.len(),
                attempted: report.attempted(),
            }
            .into());
        }

        if !report.skipped.is_empty() {
            return Ok(format!(
                "dry run, {} periods left untouched",
                report.skipped.len()
            ));
        }

        Ok(format!(
            "purged {} periods, {} archives deleted",
            report.purged.len(),
            report.stats().total()
        ))
    }
}

struct OptimizeJob(Arc<ArchiveMaintenance>);

#[async_trait]
impl JobHandler for OptimizeJob {
    async fn run(&self) -> Result<String, JobError> {
        let report = self.0.optimize_archive_table().await?;
        Ok(format!("optimized {} tables", report.tables))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::archive::ArchiveResult;

    #[derive(Default)]
    struct FakeRegistry {
        tables: Vec<String>,
        fail: bool,
    }

    impl FakeRegistry {
        fn with(tables: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                tables: tables.iter().map(|t| t.to_string()).collect(),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl ArchiveTableRegistry for FakeRegistry {
        async fn list_installed_tables(&self) -> ArchiveResult<Vec<String>> {
            if self.fail {
                return Err(ArchiveError::store_unavailable("metadata unreadable"));
            }
            Ok(self.tables.clone())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Purge(NaiveDate),
        Optimize(Vec<String>),
    }

    #[derive(Default)]
    struct FakeStore {
        calls: StdMutex<Vec<Call>>,
        failing_boundaries: HashSet<NaiveDate>,
        fail_optimize: bool,
        purge_delay: Option<Duration>,
        purge_in_flight: AtomicBool,
        optimize_overlapped_purge: AtomicBool,
    }

    impl FakeStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn purge_calls(&self) -> Vec<NaiveDate> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Purge(d) => Some(d),
                    Call::Optimize(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ArchiveStore for FakeStore {
        async fn purge_outdated_archives(&self, boundary: NaiveDate) -> ArchiveResult<PurgeStats> {
            self.purge_in_flight.store(true, Ordering::SeqCst);
            if let Some(delay) = self.purge_delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(Call::Purge(boundary));
            self.purge_in_flight.store(false, Ordering::SeqCst);

            if self.failing_boundaries.contains(&boundary) {
                return Err(ArchiveError::store_unavailable("database is locked"));
            }
            Ok(PurgeStats {
                temporary_archives: 2,
                error_archives: 1,
                range_rows: 0,
            })
        }

        async fn optimize_tables(&self, tables: &[String]) -> ArchiveResult<()> {
            if self.purge_in_flight.load(Ordering::SeqCst) {
                self.optimize_overlapped_purge.store(true, Ordering::SeqCst);
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Optimize(tables.to_vec()));
            if self.fail_optimize {
                return Err(ArchiveError::store_unavailable("disk full"));
            }
            Ok(())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn maintenance(
        registry: Arc<FakeRegistry>,
        store: Arc<FakeStore>,
        config: MaintenanceConfig,
    ) -> ArchiveMaintenance {
        ArchiveMaintenance::new(registry, store, &config)
    }

    const THREE_MONTHS: [&str; 3] = [
        "archive_numeric_2023_01",
        "archive_numeric_2023_06",
        "archive_numeric_2023_12",
    ];

    #[tokio::test]
    async fn test_purge_uses_mid_month_boundaries() {
        let store = Arc::new(FakeStore::default());
        let jobs = maintenance(
            FakeRegistry::with(&THREE_MONTHS),
            store.clone(),
            MaintenanceConfig::default(),
        );

        let report = jobs.purge_outdated_archives().await.unwrap();

        assert_eq!(
            store.purge_calls(),
            vec![date(2023, 1, 15), date(2023, 6, 15), date(2023, 12, 15)]
        );
        assert!(report.is_success());
        assert_eq!(report.purged.len(), 3);
        assert_eq!(report.stats().total(), 9);
    }

    #[tokio::test]
    async fn test_purge_with_no_tables_makes_no_store_calls() {
        let store = Arc::new(FakeStore::default());
        let jobs = maintenance(
            FakeRegistry::with(&[]),
            store.clone(),
            MaintenanceConfig::default(),
        );

        let report = jobs.purge_outdated_archives().await.unwrap();
        let optimized = jobs.optimize_archive_table().await.unwrap();

        assert!(store.calls().is_empty());
        assert_eq!(report, PurgeReport::default());
        assert_eq!(optimized.tables, 0);
    }

    #[tokio::test]
    async fn test_purge_continues_after_partition_failure() {
        let store = Arc::new(FakeStore {
            failing_boundaries: HashSet::from([date(2023, 6, 15)]),
            ..Default::default()
        });
        let jobs = maintenance(
            FakeRegistry::with(&THREE_MONTHS),
            store.clone(),
            MaintenanceConfig::default(),
        );

        let report = jobs.purge_outdated_archives().await.unwrap();

        assert_eq!(store.purge_calls().len(), 3);
        assert!(!report.is_success());
        assert_eq!(report.purged.len(), 2);
        assert_eq!(
            report.failures,
            vec![PartitionFailure {
                partition: "2023_06".into(),
                error: ArchiveError::store_unavailable("database is locked"),
            }]
        );
    }

    #[tokio::test]
    async fn test_purge_reports_malformed_table_names() {
        let store = Arc::new(FakeStore::default());
        let jobs = maintenance(
            FakeRegistry::with(&["archive_numeric_2023_01", "archive_numeric_latest"]),
            store.clone(),
            MaintenanceConfig::default(),
        );

        let report = jobs.purge_outdated_archives().await.unwrap();

        assert_eq!(store.purge_calls(), vec![date(2023, 1, 15)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].partition, "archive_numeric_latest");
        assert_eq!(
            report.failures[0].error,
            ArchiveError::MalformedPartitionName("archive_numeric_latest".into())
        );
    }

    #[tokio::test]
    async fn test_purge_calls_store_once_per_period() {
        let store = Arc::new(FakeStore::default());
        let jobs = maintenance(
            FakeRegistry::with(&[
                "archive_numeric_2023_01",
                "archive_blob_2023_01",
                "archive_blob_2023_02",
            ]),
            store.clone(),
            MaintenanceConfig::default(),
        );

        jobs.purge_outdated_archives().await.unwrap();

        assert_eq!(
            store.purge_calls(),
            vec![date(2023, 1, 15), date(2023, 2, 15)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_purge_covers_every_period() {
        let store = Arc::new(FakeStore::default());
        let config = MaintenanceConfig {
            purge_concurrency: 4,
            ..Default::default()
        };
        let jobs = maintenance(FakeRegistry::with(&THREE_MONTHS), store.clone(), config);

        let report = jobs.purge_outdated_archives().await.unwrap();

        let mut calls = store.purge_calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![date(2023, 1, 15), date(2023, 6, 15), date(2023, 12, 15)]
        );
        let periods: Vec<_> = report.purged.iter().map(|p| p.period.to_string()).collect();
        assert_eq!(periods, vec!["2023_01", "2023_06", "2023_12"]);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_untouched() {
        let store = Arc::new(FakeStore::default());
        let mut config = MaintenanceConfig::default();
        config.purge.dry_run = true;
        let jobs = maintenance(FakeRegistry::with(&THREE_MONTHS), store.clone(), config);

        let report = jobs.purge_outdated_archives().await.unwrap();

        assert!(store.purge_calls().is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_registry_failure_fails_the_run() {
        let store = Arc::new(FakeStore::default());
        let registry = Arc::new(FakeRegistry {
            fail: true,
            ..Default::default()
        });
        let jobs = maintenance(registry, store.clone(), MaintenanceConfig::default());

        let err = jobs.purge_outdated_archives().await.unwrap_err();

        assert!(matches!(err, MaintenanceError::Registry(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_optimize_issues_single_batch_with_all_tables() {
        let tables = [
            "archive_numeric_2023_01",
            "archive_blob_2023_01",
            "archive_numeric_2023_02",
        ];
        let store = Arc::new(FakeStore::default());
        let jobs = maintenance(
            FakeRegistry::with(&tables),
            store.clone(),
            MaintenanceConfig::default(),
        );

        let report = jobs.optimize_archive_table().await.unwrap();

        assert_eq!(report.tables, 3);
        assert_eq!(
            store.calls(),
            vec![Call::Optimize(tables.iter().map(|t| t.to_string()).collect())]
        );
    }

    #[tokio::test]
    async fn test_optimize_failure_fails_the_run() {
        let store = Arc::new(FakeStore {
            fail_optimize: true,
            ..Default::default()
        });
        let jobs = maintenance(
            FakeRegistry::with(&THREE_MONTHS),
            store,
            MaintenanceConfig::default(),
        );

        let err = jobs.optimize_archive_table().await.unwrap_err();

        assert!(matches!(err, MaintenanceError::Optimize { tables: 3, .. }));
    }

    #[tokio::test]
    async fn test_maintenance_pass_purges_before_optimizing() {
        let store = Arc::new(FakeStore::default());
        let jobs = maintenance(
            FakeRegistry::with(&THREE_MONTHS),
            store.clone(),
            MaintenanceConfig {
                purge_concurrency: 3,
                ..Default::default()
            },
        );

        let report = jobs.run_maintenance_pass().await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(calls.last(), Some(Call::Optimize(t)) if t.len() == 3));
        assert_eq!(report.purge.purged.len(), 3);
        assert_eq!(report.optimize.tables, 3);
    }

    #[tokio::test]
    async fn test_optimize_waits_for_in_flight_purge() {
        let store = Arc::new(FakeStore {
            purge_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let jobs = Arc::new(maintenance(
            FakeRegistry::with(&THREE_MONTHS),
            store.clone(),
            MaintenanceConfig::default(),
        ));

        let purging = {
            let jobs = jobs.clone();
            tokio::spawn(async move { jobs.purge_outdated_archives().await })
        };
        // Let the purge take the gate first.
        tokio::time::sleep(Duration::from_millis(10)).await;
        jobs.optimize_archive_table().await.unwrap();
        purging.await.unwrap().unwrap();

        assert!(!store.optimize_overlapped_purge.load(Ordering::SeqCst));
        assert!(matches!(store.calls().last(), Some(Call::Optimize(_))));
    }

    #[test]
    fn test_plugin_registers_daily_jobs() {
        let jobs = Arc::new(maintenance(
            FakeRegistry::with(&[]),
            Arc::new(FakeStore::default()),
            MaintenanceConfig::default(),
        ));
        let plugin = ArchiveMaintenancePlugin::new(jobs);

        let scheduled = plugin.scheduled_jobs();

        let summary: Vec<_> = scheduled
            .iter()
            .map(|j| (j.name(), j.schedule(), j.priority()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    "ArchiveMaintenance.purge_outdated_archives".to_string(),
                    Schedule::Daily,
                    JobPriority::High
                ),
                (
                    "ArchiveMaintenance.optimize_archive_table".to_string(),
                    Schedule::Daily,
                    JobPriority::Lowest
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_purge_job_reports_failure() {
        let store = Arc::new(FakeStore {
            failing_boundaries: HashSet::from([date(2023, 1, 15)]),
            ..Default::default()
        });
        let jobs = Arc::new(maintenance(
            FakeRegistry::with(&THREE_MONTHS),
            store,
            MaintenanceConfig::default(),
        ));

        let err = PurgeJob(jobs).run().await.unwrap_err();

        assert!(matches!(
            err,
            JobError::Maintenance(MaintenanceError::PurgeIncomplete {
                failed: 1,
                attempted: 3
            })
        ));
    }
}
