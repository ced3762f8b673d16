//! Archive partitions and their year-month periods.
//!
//! Every archive table holds one month of aggregated reports and carries the
//! month in its name: `<prefix>archive_numeric_2024_03`,
//! `<prefix>archive_blob_2024_03`.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{ArchiveError, ArchiveResult};

/// Day of the month used as the retention boundary.
///
/// Mid-month keeps the boundary clear of partial first and last days when it
/// is compared against archive-processing timestamps.
pub const RETENTION_BOUNDARY_DAY: u32 = 15;

/// The two kinds of archive tables created for each month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// Numeric metrics and the `done` flags of each archive.
    Numeric,
    /// Serialized report tables.
    Blob,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 2] = [ArchiveKind::Numeric, ArchiveKind::Blob];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Numeric => "numeric",
            ArchiveKind::Blob => "blob",
        }
    }

    /// Table name without the period suffix, e.g. `piwik_archive_blob`.
    pub fn table_base(&self, prefix: &str) -> String {
        format!("{prefix}archive_{}", self.as_str())
    }

    /// Full table name of this kind for `period`.
    pub fn table_name(&self, prefix: &str, period: ArchivePeriod) -> String {
        period.table_name(&self.table_base(prefix))
    }
}

/// The year-month a partition covers.
///
/// Only constructible through [`ArchivePeriod::new`]; serialized as `YYYY_MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ArchivePeriod {
    year: i32,
    month: u32,
}

impl ArchivePeriod {
    /// Build a period, rejecting months outside 1..=12 and years that do not
    /// have four digits.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        ((1000..=9999).contains(&year) && (1..=12).contains(&month))
            .then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Name of the partition of this period under `base`: `base_YYYY_MM`.
    pub fn table_name(&self, base: &str) -> String {
        format!("{base}_{self}")
    }

    /// The date rows of this partition are purged against: the 15th.
    pub fn retention_boundary(&self) -> NaiveDate {
        // `new` guarantees a valid year and month, and every month has a 15th.
        NaiveDate::from_ymd_opt(self.year, self.month, RETENTION_BOUNDARY_DAY)
            .unwrap_or(NaiveDate::MIN)
    }

    /// Period containing `date`.
    pub fn containing(date: NaiveDate) -> Option<Self> {
        use chrono::Datelike;
        Self::new(date.year(), date.month())
    }
}

impl fmt::Display for ArchivePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{:02}", self.year, self.month)
    }
}

impl From<ArchivePeriod> for String {
    fn from(period: ArchivePeriod) -> Self {
        period.to_string()
    }
}

impl TryFrom<String> for ArchivePeriod {
    type Error = ArchiveError;

    /// Parse a bare `YYYY_MM` period.
    fn try_from(value: String) -> ArchiveResult<Self> {
        let invalid = || ArchiveError::MalformedPartitionName(value.clone());
        let (year, month) = value.split_once('_').ok_or_else(invalid)?;
        if year.len() != 4
            || month.len() != 2
            || !year.bytes().all(|b| b.is_ascii_digit())
            || !month.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

/// Resolve a partition name to its period.
///
/// The name must end in `_YYYY_MM` after a non-empty base. Pure; never
/// touches storage.
pub fn parse_period(name: &str) -> ArchiveResult<ArchivePeriod> {
    let malformed = || ArchiveError::MalformedPartitionName(name.to_string());

    let mut parts = name.rsplitn(3, '_');
    let (Some(month), Some(year), Some(base)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };

    if base.is_empty()
        || month.len() != 2
        || year.len() != 4
        || !month.bytes().all(|b| b.is_ascii_digit())
        || !year.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(malformed());
    }

    let year: i32 = year.parse().map_err(|_| malformed())?;
    let month: u32 = month.parse().map_err(|_| malformed())?;

    ArchivePeriod::new(year, month).ok_or_else(malformed)
}

/// An installed archive table together with the period it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchivePartition {
    name: String,
    period: ArchivePeriod,
}

impl ArchivePartition {
    /// Parse an installed table name.
    pub fn parse(name: impl Into<String>) -> ArchiveResult<Self> {
        let name = name.into();
        let period = parse_period(&name)?;
        Ok(Self { name, period })
    }

    /// Partition of `kind` for `period`.
    pub fn of(kind: ArchiveKind, prefix: &str, period: ArchivePeriod) -> Self {
        Self {
            name: kind.table_name(prefix, period),
            period,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> ArchivePeriod {
        self.period
    }

    pub fn retention_boundary(&self) -> NaiveDate {
        self.period.retention_boundary()
    }
}

impl fmt::Display for ArchivePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
