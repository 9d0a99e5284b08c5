//! Web search providers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sdk::EngineError;

use crate::config::SearchConfig;
use crate::llm::ProviderError;

pub mod serpapi;

/// One ranked search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Answers free-text queries with ranked results
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Results in provider rank order
    async fn query(&self, text: &str) -> Result<Vec<SearchResult>, ProviderError>;

    async fn check_health(&self) -> bool {
        true
    }
}

/// Construct the configured search provider
pub fn build_provider(config: &SearchConfig) -> Result<Arc<dyn SearchProvider>, EngineError> {
    Ok(Arc::new(serpapi::SerpApiProvider::new(
        config.base_url.clone(),
        config.api_key_env.clone(),
        config.max_results,
        config.timeout_secs,
    )?))
}
