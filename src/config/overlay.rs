use serde::{Deserialize, Serialize};

/// Overlay facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct OverlayConfig {
    /// Rows requested from the transitions service before grouping.
    /// Default: 300
    #[serde(default = "default_following_pages_limit")]
    pub following_pages_limit: u32,

    /// Query parameters stripped from every site's URLs, in addition to the
    /// per-site exclusions.
    #[serde(default)]
    pub global_excluded_query_parameters: Vec<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            following_pages_limit: default_following_pages_limit(),
            global_excluded_query_parameters: Vec::new(),
        }
    }
}

fn default_following_pages_limit() -> u32 {
    300
}

impl OverlayConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.following_pages_limit == 0 {
            return Err("overlay.following_pages_limit must be greater than 0".into());
        }
        Ok(())
    }
}
