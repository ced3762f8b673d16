//! Overlay errors.

use thiserror::Error;

use super::traits::SiteId;

/// Errors returned to overlay callers. Only authentication problems are
/// surfaced; downstream failures become suppressed results.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverlayError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("User '{login}' does not have view access to site {site_id}")]
    InsufficientPermission { login: String, site_id: SiteId },
}

pub type OverlayResult<T> = Result<T, OverlayError>;

/// Failure reported by a collaborator the overlay reads from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownstreamError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Site {0} not found")]
    SiteNotFound(SiteId),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl DownstreamError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}
