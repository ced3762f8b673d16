//! The overlay read API.
//!
//! Every call authenticates first and propagates authentication failures.
//! Anything that goes wrong afterwards, in the site registry or the
//! transitions service, is logged and turned into [`Enrichment::Suppressed`]
//! because overlay data is advisory.

use std::{collections::HashSet, sync::Arc};

use serde::Serialize;

use super::{
    error::{DownstreamError, OverlayError, OverlayResult},
    traits::{
        AccessControl, ActionType, Credentials, Identity, SiteId, SiteRegistry, TransitionRow,
        TransitionsPart, TransitionsQuery, TransitionsService,
    },
    url::{exclude_query_parameters, parameters_to_exclude},
};
use crate::{config::OverlayConfig, observability::metrics};

/// Transitions reports merged into the following pages, in output order.
pub const FOLLOWING_PAGES_REPORTS: [&str; 3] = ["followingPages", "outlinks", "downloads"];

/// A best-effort result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Enrichment<T> {
    Fetched(T),
    /// A downstream failure was swallowed; the value is empty.
    Suppressed { reason: String },
}

impl<T> Enrichment<T> {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed { .. })
    }
}

impl<T: Default> Enrichment<T> {
    /// The value to hand out: the fetched value, or empty when suppressed.
    pub fn into_inner(self) -> T {
        match self {
            Self::Fetched(value) => value,
            Self::Suppressed { .. } => T::default(),
        }
    }
}

/// A following-pages lookup for one page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowingPagesRequest {
    pub url: String,
    pub site_id: SiteId,
    pub period: String,
    pub date: String,
    pub segment: Option<String>,
}

pub struct OverlayApi {
    access: Arc<dyn AccessControl>,
    sites: Arc<dyn SiteRegistry>,
    transitions: Arc<dyn TransitionsService>,
    config: OverlayConfig,
}

impl OverlayApi {
    pub fn new(
        access: Arc<dyn AccessControl>,
        sites: Arc<dyn SiteRegistry>,
        transitions: Arc<dyn TransitionsService>,
        config: OverlayConfig,
    ) -> Self {
        Self {
            access,
            sites,
            transitions,
            config,
        }
    }

    /// Resolve the caller and require view access to `site_id`.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        site_id: SiteId,
    ) -> OverlayResult<Identity> {
        let Some(identity) = self.access.reload_access(credentials).await else {
            tracing::debug!(site_id, "Overlay authentication failed");
            return Err(OverlayError::AuthenticationFailed);
        };

        if !identity.has_view_access(site_id) {
            tracing::debug!(login = %identity.login, site_id, "Overlay access denied");
            return Err(OverlayError::InsufficientPermission {
                login: identity.login,
                site_id,
            });
        }

        Ok(identity)
    }

    /// The site's excluded query parameters together with the global ones.
    ///
    /// Names are compared case-insensitively, like URL parameter stripping
    /// does; the first spelling seen is kept.
    pub async fn get_excluded_query_parameters(
        &self,
        credentials: &Credentials,
        site_id: SiteId,
    ) -> OverlayResult<Enrichment<Vec<String>>> {
        self.authenticate(credentials, site_id).await?;

        match self.site_excluded_parameters(site_id).await {
            Ok(site_params) => {
                let mut seen = HashSet::new();
                let params = site_params
                    .iter()
                    .chain(&self.config.global_excluded_query_parameters)
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty() && seen.insert(p.to_ascii_lowercase()))
                    .map(str::to_string)
                    .collect();
                Ok(Enrichment::Fetched(params))
            }
            Err(e) => Ok(suppress("get_excluded_query_parameters", site_id, e)),
        }
    }

    /// Pages, outlinks and downloads visitors went to after `request.url`,
    /// as one list.
    pub async fn get_following_pages(
        &self,
        credentials: &Credentials,
        request: &FollowingPagesRequest,
    ) -> OverlayResult<Enrichment<Vec<TransitionRow>>> {
        let site_id = request.site_id;
        self.authenticate(credentials, site_id).await?;

        let site_params = match self.site_excluded_parameters(site_id).await {
            Ok(params) => params,
            Err(e) => return Ok(suppress("get_following_pages", site_id, e)),
        };
        let excluded = parameters_to_exclude(
            site_params.iter().map(String::as_str),
            self.config
                .global_excluded_query_parameters
                .iter()
                .map(String::as_str),
        );

        let query = TransitionsQuery {
            action: exclude_query_parameters(&request.url, &excluded),
            action_type: ActionType::Url,
            site_id,
            period: request.period.clone(),
            date: request.date.clone(),
            segment: request.segment.clone(),
            limit: self.config.following_pages_limit,
            part: TransitionsPart::FollowingActions,
            normalize_urls: true,
        };

        let mut report = match self.transitions.get_transitions_for_action(&query).await {
            Ok(report) => report,
            Err(e) => return Ok(suppress("get_following_pages", site_id, e)),
        };

        let rows = FOLLOWING_PAGES_REPORTS
            .iter()
            .filter_map(|name| report.remove(*name))
            .flatten()
            .collect();

        Ok(Enrichment::Fetched(rows))
    }

    async fn site_excluded_parameters(
        &self,
        site_id: SiteId,
    ) -> Result<Vec<String>, DownstreamError> {
        let site = self.sites.get_site_from_id(site_id).await?;
        self.sites.excluded_query_parameters(&site).await
    }
}

fn suppress<T>(operation: &'static str, site_id: SiteId, error: DownstreamError) -> Enrichment<T> {
    tracing::warn!(
        operation,
        site_id,
        error = %error,
        "Suppressing overlay downstream failure"
    );
    metrics::record_overlay_suppressed(operation);
    Enrichment::Suppressed {
        reason: error.to_string(),
    }
}
