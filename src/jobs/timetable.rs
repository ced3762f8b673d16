//! Where the scheduler keeps the next run time of every job.
//!
//! Persisting the timetable lets a restarted process pick up jobs that
//! became due while it was down instead of pushing them to their next
//! occurrence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::descriptor::JobError;

/// Next run time per job name.
pub type Timetable = HashMap<String, DateTime<Utc>>;

#[async_trait]
pub trait TimetableStore: Send + Sync {
    async fn load(&self) -> Result<Timetable, JobError>;

    async fn save(&self, job: &str, next_run: DateTime<Utc>) -> Result<(), JobError>;
}

/// Process-local timetable, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTimetable {
    entries: Mutex<Timetable>,
}

impl MemoryTimetable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimetableStore for MemoryTimetable {
    async fn load(&self) -> Result<Timetable, JobError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn save(&self, job: &str, next_run: DateTime<Utc>) -> Result<(), JobError> {
        self.entries.lock().await.insert(job.to_string(), next_run);
        Ok(())
    }
}

#[cfg(feature = "database-sqlite")]
pub use sqlite::SqliteTimetable;

#[cfg(feature = "database-sqlite")]
mod sqlite {
    use sqlx::{Row, SqlitePool};

    use super::*;

    /// Timetable kept in a `<prefix>scheduler_timetable` table.
    pub struct SqliteTimetable {
        pool: SqlitePool,
        table: String,
    }

    impl SqliteTimetable {
        /// Create the backing table if needed.
        pub async fn new(pool: SqlitePool, table_prefix: &str) -> Result<Self, JobError> {
            let table = format!("{table_prefix}scheduler_timetable");
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{table}" (
                    job TEXT PRIMARY KEY NOT NULL,
                    next_run TEXT NOT NULL
                )
                "#
            ))
            .execute(&pool)
            .await
            .map_err(storage_error)?;

            Ok(Self { pool, table })
        }
    }

    #[async_trait]
    impl TimetableStore for SqliteTimetable {
        async fn load(&self) -> Result<Timetable, JobError> {
            let rows = sqlx::query(&format!(r#"SELECT job, next_run FROM "{}""#, self.table))
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;

            rows.into_iter()
                .map(|row| {
                    let job: String = row.try_get("job").map_err(storage_error)?;
                    let next_run: DateTime<Utc> =
                        row.try_get("next_run").map_err(storage_error)?;
                    Ok((job, next_run))
                })
                .collect()
        }

        async fn save(&self, job: &str, next_run: DateTime<Utc>) -> Result<(), JobError> {
            sqlx::query(&format!(
                r#"
                INSERT INTO "{}" (job, next_run) VALUES (?, ?)
                ON CONFLICT(job) DO UPDATE SET next_run = excluded.next_run
                "#,
                self.table
            ))
            .bind(job)
            .bind(next_run)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
            Ok(())
        }
    }

    fn storage_error(e: sqlx::Error) -> JobError {
        JobError::Timetable(e.to_string())
    }

    #[cfg(test)]
    mod tests {
        use chrono::TimeZone;
        use sqlx::sqlite::SqlitePoolOptions;

        use super::*;

        async fn create_pool() -> SqlitePool {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .expect("Failed to create in-memory SQLite pool")
        }

        #[tokio::test]
        async fn test_sqlite_timetable_persists_and_updates() {
            let pool = create_pool().await;
            let first = Utc.with_ymd_and_hms(2023, 6, 2, 0, 0, 0).unwrap();
            let second = Utc.with_ymd_and_hms(2023, 6, 3, 0, 0, 0).unwrap();

            let timetable = SqliteTimetable::new(pool.clone(), "piwik_").await.unwrap();
            timetable.save("Core.purge", first).await.unwrap();
            timetable.save("Core.purge", second).await.unwrap();
            timetable.save("Core.optimize", first).await.unwrap();

            // A fresh handle over the same database sees the saved entries.
            let reopened = SqliteTimetable::new(pool, "piwik_").await.unwrap();
            let entries = reopened.load().await.unwrap();

            assert_eq!(entries.len(), 2);
            assert_eq!(entries["Core.purge"], second);
            assert_eq!(entries["Core.optimize"], first);
        }
    }
}
