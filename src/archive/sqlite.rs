//! SQLite-backed archive store.
//!
//! Archive tables follow the analytics schema: one `archive_numeric_YYYY_MM`
//! and one `archive_blob_YYYY_MM` table per month, keyed by
//! `(idarchive, name)`. Each archive carries `done*` flag rows in its numeric
//! table whose `value` records how processing ended.

use std::{collections::BTreeSet, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use super::{
    error::{ArchiveError, ArchiveResult},
    partition::{ArchiveKind, ArchivePeriod},
    traits::{ArchiveStore, ArchiveTableRegistry, PurgeStats},
};
use crate::config::{MaintenanceConfig, PurgeConfig, SqliteConfig};

/// Archive processed successfully.
pub const DONE_OK: i64 = 1;
/// Archive processing failed.
pub const DONE_ERROR: i64 = 2;
/// Archive of a period that was still in progress when processed.
pub const DONE_OK_TEMPORARY: i64 = 3;
/// `period` value of custom date-range archives.
pub const PERIOD_RANGE: i64 = 5;

/// Timestamp layout of `ts_archived`; sorts lexicographically.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keeps `IN (...)` lists under SQLite's bound-parameter limit.
const DELETE_CHUNK_SIZE: usize = 500;

/// Archive store and table registry over a SQLite pool.
pub struct SqliteArchiveStore {
    pool: SqlitePool,
    table_prefix: String,
    purge: PurgeConfig,
}

impl SqliteArchiveStore {
    pub fn new(pool: SqlitePool, table_prefix: impl Into<String>, purge: PurgeConfig) -> Self {
        Self {
            pool,
            table_prefix: table_prefix.into(),
            purge,
        }
    }

    /// Open a pool for the configured database file.
    pub async fn connect(
        database: &SqliteConfig,
        maintenance: &MaintenanceConfig,
    ) -> ArchiveResult<Self> {
        let options = if database.path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&database.path)
                .create_if_missing(database.create_if_missing)
        }
        .busy_timeout(database.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(database.max_connections)
            .connect_with(options)
            .await?;

        tracing::debug!(
            path = %database.path,
            max_connections = database.max_connections,
            "Connected to archive database"
        );

        Ok(Self::new(
            pool,
            maintenance.table_prefix.clone(),
            maintenance.purge.clone(),
        ))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn table_exists(&self, name: &str) -> ArchiveResult<bool> {
        let row =
            sqlx::query("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.try_get::<i64, _>(0)? > 0)
    }

    /// Temporary archives processed before this instant are outdated.
    ///
    /// With browser-triggered archiving reports are rebuilt on demand, so
    /// anything older than twice the TTL can go. Otherwise the scheduled
    /// archiver owns today's reports and only earlier ones are dropped.
    fn temporary_archive_cutoff(&self, now: DateTime<Utc>) -> ArchiveResult<DateTime<Utc>> {
        if !self.purge.browser_triggered_archiving {
            return Ok(start_of_day(now.date_naive()));
        }

        self.purge
            .today_archive_ttl()
            .and_then(|ttl| ttl.checked_mul(2))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                ArchiveError::store_unavailable(format!(
                    "temporary archive TTL of {}s is out of range",
                    self.purge.today_archive_ttl_secs
                ))
            })
    }

    pub(crate) async fn purge_outdated_archives_at(
        &self,
        boundary: NaiveDate,
        now: DateTime<Utc>,
    ) -> ArchiveResult<PurgeStats> {
        let mut stats = PurgeStats::default();
        let Some(period) = ArchivePeriod::containing(boundary) else {
            return Ok(stats);
        };

        let numeric = ArchiveKind::Numeric.table_name(&self.table_prefix, period);
        let blob = ArchiveKind::Blob.table_name(&self.table_prefix, period);
        let has_numeric = self.table_exists(&numeric).await?;
        let mut tables = Vec::with_capacity(2);
        if has_numeric {
            tables.push(numeric.clone());
        }
        if self.table_exists(&blob).await? {
            tables.push(blob);
        }
        if tables.is_empty() {
            tracing::debug!(period = %period, "No archive tables for period, nothing to purge");
            return Ok(stats);
        }

        let cutoff = self
            .temporary_archive_cutoff(now)?
            .format(TS_FORMAT)
            .to_string();
        let yesterday = start_of_day(now.date_naive() - TimeDelta::days(1))
            .format(TS_FORMAT)
            .to_string();

        // Done flags live in the numeric table only; without it, only range
        // archives can be identified.
        let mut errored = BTreeSet::new();
        let mut temporary = BTreeSet::new();
        if has_numeric {
            let rows = sqlx::query(&format!(
                r#"
                SELECT idarchive, value FROM {}
                WHERE name LIKE 'done%'
                  AND ((value = ? AND ts_archived < ?) OR value = ?)
                "#,
                quote_ident(&numeric)
            ))
            .bind(DONE_OK_TEMPORARY)
            .bind(&cutoff)
            .bind(DONE_ERROR)
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                let id: i64 = row.try_get("idarchive")?;
                let value: f64 = row.try_get("value")?;
                if value as i64 == DONE_ERROR {
                    errored.insert(id);
                } else {
                    temporary.insert(id);
                }
            }
            temporary.retain(|id| !errored.contains(id));
        }
        let ids: Vec<i64> = errored.iter().chain(temporary.iter()).copied().collect();

        let mut tx = self.pool.begin().await?;

        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            for table in &tables {
                let sql = format!(
                    "DELETE FROM {} WHERE idarchive IN ({})",
                    quote_ident(table),
                    placeholders
                );
                let mut query = sqlx::query(&sql);
                for id in chunk {
                    query = query.bind(*id);
                }
                query.execute(&mut *tx).await?;
            }
        }

        for table in &tables {
            let result = sqlx::query(&format!(
                "DELETE FROM {} WHERE period = ? AND ts_archived < ?",
                quote_ident(table)
            ))
            .bind(PERIOD_RANGE)
            .bind(&yesterday)
            .execute(&mut *tx)
            .await?;
            stats.range_rows += result.rows_affected();
        }

        tx.commit().await?;

        stats.error_archives = errored.len() as u64;
        stats.temporary_archives = temporary.len() as u64;

        tracing::debug!(
            period = %period,
            cutoff = %cutoff,
            temporary_archives = stats.temporary_archives,
            error_archives = stats.error_archives,
            range_rows = stats.range_rows,
            "Purged outdated archives"
        );

        Ok(stats)
    }
}

#[async_trait]
impl ArchiveTableRegistry for SqliteArchiveStore {
    async fn list_installed_tables(&self) -> ArchiveResult<Vec<String>> {
        let numeric = like_prefix(&ArchiveKind::Numeric.table_base(&self.table_prefix));
        let blob = like_prefix(&ArchiveKind::Blob.table_base(&self.table_prefix));

        let rows = sqlx::query(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table'
              AND (name LIKE ? ESCAPE '\' OR name LIKE ? ESCAPE '\')
            ORDER BY name
            "#,
        )
        .bind(numeric)
        .bind(blob)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl ArchiveStore for SqliteArchiveStore {
    async fn purge_outdated_archives(&self, boundary: NaiveDate) -> ArchiveResult<PurgeStats> {
        self.purge_outdated_archives_at(boundary, Utc::now()).await
    }

    async fn optimize_tables(&self, tables: &[String]) -> ArchiveResult<()> {
        if tables.is_empty() {
            return Ok(());
        }

        for table in tables {
            sqlx::query(&format!("ANALYZE {}", quote_ident(table)))
                .execute(&self.pool)
                .await?;
        }

        // SQLite reclaims free pages for the whole file at once
        sqlx::query("VACUUM").execute(&self.pool).await?;

        tracing::debug!(tables = tables.len(), "Optimized archive tables");
        Ok(())
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// LIKE pattern matching `<base>_<anything>`, with `base` taken literally.
fn like_prefix(base: &str) -> String {
    let escaped = base
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}\\_%")
}
