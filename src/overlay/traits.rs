use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::DownstreamError;

pub type SiteId = u32;

/// What the caller presented to identify itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token_auth: Option<String>,
    pub session_id: Option<String>,
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token_auth: Some(token.into()),
            session_id: None,
        }
    }
}

/// A resolved caller and the sites it may view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub login: String,
    pub superuser: bool,
    pub view_sites: HashSet<SiteId>,
}

impl Identity {
    pub fn has_view_access(&self, site_id: SiteId) -> bool {
        self.superuser || self.view_sites.contains(&site_id)
    }
}

/// A tracked website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub main_url: String,
}

/// One row of a transitions report. Columns other than the label are passed
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRow {
    pub label: String,
    #[serde(flatten)]
    pub columns: serde_json::Map<String, serde_json::Value>,
}

impl TransitionRow {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            columns: serde_json::Map::new(),
        }
    }

    pub fn with_column(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.columns.insert(name.to_string(), value.into());
        self
    }
}

/// Reports keyed by name, e.g. `followingPages`.
pub type TransitionsReport = HashMap<String, Vec<TransitionRow>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Url,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionsPart {
    All,
    PreviousActions,
    FollowingActions,
}

/// Parameters of a transitions lookup for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionsQuery {
    pub action: String,
    pub action_type: ActionType,
    pub site_id: SiteId,
    pub period: String,
    pub date: String,
    pub segment: Option<String>,
    pub limit: u32,
    pub part: TransitionsPart,
    pub normalize_urls: bool,
}

/// Resolves credentials into an identity.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Re-read the caller's access. `None` when nothing resolves.
    async fn reload_access(&self, credentials: &Credentials) -> Option<Identity>;
}

#[async_trait]
pub trait SiteRegistry: Send + Sync {
    async fn get_site_from_id(&self, site_id: SiteId) -> Result<Site, DownstreamError>;

    /// Query parameters the site excludes from its URLs.
    async fn excluded_query_parameters(&self, site: &Site) -> Result<Vec<String>, DownstreamError>;
}

#[async_trait]
pub trait TransitionsService: Send + Sync {
    async fn get_transitions_for_action(
        &self,
        query: &TransitionsQuery,
    ) -> Result<TransitionsReport, DownstreamError>;
}
