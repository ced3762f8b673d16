use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Malformed archive partition name '{0}': expected a name ending in _YYYY_MM")]
    MalformedPartitionName(String),

    #[error("Archive store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ArchiveError {
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable(reason.into())
    }
}

#[cfg(feature = "database-sqlite")]
impl From<sqlx::Error> for ArchiveError {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
