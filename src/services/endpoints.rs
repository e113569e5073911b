use std::sync::Arc;

use crate::config::ConfigError;

/// Ordered candidate upstream URLs. Immutable after startup; every request starts from the first.
#[derive(Debug, Clone)]
pub struct EndpointSelector {
    urls: Arc<[String]>,
}

pub fn build_upstream_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut rel = path.trim_start_matches('/');
    if base.ends_with("/v1") && rel.starts_with("v1/") {
        rel = rel.trim_start_matches("v1/");
    }
    if rel.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base, rel)
}

impl EndpointSelector {
    pub fn new(bases: &[String], path: &str) -> Result<Self, ConfigError> {
        if bases.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        let urls: Vec<String> = bases.iter().map(|b| build_upstream_url(b, path)).collect();
        Ok(Self { urls: urls.into() })
    }

    pub fn select(&self) -> impl Iterator<Item = &str> + '_ {
        self.urls.iter().map(String::as_str)
    }
}
