//! Scheduled job descriptors and static plugin registration.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Timelike, Utc};

use super::archive_maintenance::MaintenanceError;

/// Relative ordering of jobs that are due at the same time.
/// Higher priority jobs run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    Highest,
    High,
    Normal,
    Low,
    Lowest,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Highest => "highest",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
            JobPriority::Lowest => "lowest",
        }
    }
}

/// Recurrence rule of a scheduled job. Calendar rules are aligned to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// At the start of every hour.
    Hourly,
    /// At midnight every day.
    Daily,
    /// At midnight every Monday.
    Weekly,
    /// A fixed interval after the previous run.
    Every(Duration),
}

impl Schedule {
    /// First run time strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = |days: i64| {
            (now.date_naive() + TimeDelta::days(days))
                .and_time(NaiveTime::MIN)
                .and_utc()
        };

        match self {
            Schedule::Hourly => {
                let hour_start = now.date_naive().and_time(
                    NaiveTime::from_hms_opt(now.hour(), 0, 0).unwrap_or(NaiveTime::MIN),
                );
                hour_start.and_utc() + TimeDelta::hours(1)
            }
            Schedule::Daily => midnight(1),
            Schedule::Weekly => {
                let days_to_monday = 7 - i64::from(now.weekday().num_days_from_monday());
                midnight(days_to_monday)
            }
            Schedule::Every(interval) => {
                now + TimeDelta::from_std(*interval).unwrap_or(TimeDelta::MAX)
            }
        }
    }
}

/// Errors a job run can end with.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),

    #[error("{0}")]
    Failed(String),

    #[error("Job timetable unavailable: {0}")]
    Timetable(String),
}

/// The operation a scheduled job invokes.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run once; returns a short human-readable summary.
    async fn run(&self) -> Result<String, JobError>;
}

/// An immutable `(owner, method, schedule, priority)` record handed to the
/// scheduler at startup.
#[derive(Clone)]
pub struct ScheduledJob {
    owner: &'static str,
    method: &'static str,
    schedule: Schedule,
    priority: JobPriority,
    handler: Arc<dyn JobHandler>,
}

impl ScheduledJob {
    pub fn new(
        owner: &'static str,
        method: &'static str,
        schedule: Schedule,
        priority: JobPriority,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            owner,
            method,
            schedule,
            priority,
            handler,
        }
    }

    /// Unique name used by the scheduler's timetable: `owner.method`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.owner, self.method)
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub(crate) fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("owner", &self.owner)
            .field("method", &self.method)
            .field("schedule", &self.schedule)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A component contributing scheduled jobs, composed at process startup.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn scheduled_jobs(&self) -> Vec<ScheduledJob>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Highest < JobPriority::High);
        assert!(JobPriority::High < JobPriority::Normal);
        assert!(JobPriority::Low < JobPriority::Lowest);
    }

    #[test]
    fn test_daily_runs_next_midnight() {
        assert_eq!(
            Schedule::Daily.next_run_after(at(2023, 12, 31, 17, 45)),
            at(2024, 1, 1, 0, 0)
        );
        assert_eq!(
            Schedule::Daily.next_run_after(at(2023, 6, 1, 0, 0)),
            at(2023, 6, 2, 0, 0)
        );
    }

    #[test]
    fn test_hourly_runs_next_hour() {
        assert_eq!(
            Schedule::Hourly.next_run_after(at(2023, 6, 1, 23, 10)),
            at(2023, 6, 2, 0, 0)
        );
    }

    #[test]
    fn test_weekly_runs_next_monday() {
        // 2023-06-07 is a Wednesday
        assert_eq!(
            Schedule::Weekly.next_run_after(at(2023, 6, 7, 9, 0)),
            at(2023, 6, 12, 0, 0)
        );
        // From a Monday, the following Monday
        assert_eq!(
            Schedule::Weekly.next_run_after(at(2023, 6, 12, 0, 0)),
            at(2023, 6, 19, 0, 0)
        );
    }

    #[test]
    fn test_every_interval() {
        let schedule = Schedule::Every(Duration::from_secs(90));
        assert_eq!(
            schedule.next_run_after(at(2023, 6, 1, 10, 0)),
            at(2023, 6, 1, 10, 1) + TimeDelta::seconds(30)
        );
    }
}
