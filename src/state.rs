// src/state.rs
use std::sync::Arc;

use anyhow::Context;

use crate::config::GatewayConfig;
use crate::services::endpoints::EndpointSelector;
use crate::services::upstream::{RetryPolicy, UpstreamClient};

pub type SharedState = Arc<AppState>;

/// Everything a request needs. Built once at startup and never mutated.
pub struct AppState {
    pub config: GatewayConfig,
    pub endpoints: EndpointSelector,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let endpoints = EndpointSelector::new(&config.upstream_endpoints, &config.upstream_path)
            .context("no usable upstream endpoints")?;
        let upstream = UpstreamClient::new(RetryPolicy::from_config(&config))
            .context("failed to build upstream HTTP client")?;

        Ok(Self {
            config,
            endpoints,
            upstream,
        })
    }
}
