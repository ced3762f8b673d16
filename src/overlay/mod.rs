//! Overlay read API.
//!
//! Authenticates the caller against a site and reads through to the site
//! registry and the transitions service. Downstream failures are reported as
//! [`Enrichment::Suppressed`] with an empty value instead of an error.

mod api;
mod error;
mod traits;
mod url;

pub use api::{Enrichment, FOLLOWING_PAGES_REPORTS, FollowingPagesRequest, OverlayApi};
pub use error::{DownstreamError, OverlayError, OverlayResult};
pub use traits::{
    AccessControl, ActionType, Credentials, Identity, Site, SiteId, SiteRegistry, TransitionRow,
    TransitionsPart, TransitionsQuery, TransitionsReport, TransitionsService,
};
pub use url::{SESSION_QUERY_PARAMETERS, exclude_query_parameters, parameters_to_exclude};
