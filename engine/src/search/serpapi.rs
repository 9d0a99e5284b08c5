//! SerpApi Google search provider
//!
//! Calls `GET {base_url}/search.json?engine=google&q=..&api_key=..` and maps
//! `organic_results[] {title, link, snippet}` into [`SearchResult`]s.

use async_trait::async_trait;
use serde::Deserialize;

use sdk::EngineError;

use super::{SearchProvider, SearchResult};
use crate::llm::ProviderError;

pub struct SerpApiProvider {
    base_url: String,
    api_key_env: String,
    max_results: usize,
    client: reqwest::Client,
}

impl SerpApiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key_env: impl Into<String>,
        max_results: usize,
        timeout_secs: u64,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key_env: api_key_env.into(),
            max_results,
            client: crate::llm::http_client(timeout_secs)?,
        })
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingCredential(self.api_key_env.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SearchProvider for SerpApiProvider {
    fn name(&self) -> &str {
        "serpapi"
    }

    async fn check_health(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn query(&self, text: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let api_key = self.api_key()?;
        let url = format!("{}/search.json", self.base_url);
        let num = self.max_results.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("engine", "google"),
                ("q", text),
                ("num", num.as_str()),
                ("api_key", api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let data: SerpApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        // SerpApi reports "no results" as an error string with status 200
        if let Some(error) = data.error {
            if data.organic_results.is_empty() && !error.contains("hasn't returned any results") {
                return Err(ProviderError::InvalidRequest(error));
            }
        }

        let results: Vec<SearchResult> = data
            .organic_results
            .into_iter()
            .take(self.max_results)
            .map(|r| SearchResult {
                title: r.title,
                url: r.link,
                snippet: r.snippet,
            })
            .collect();

        tracing::debug!("SerpApi returned {} results for '{}'", results.len(), text);
        Ok(results)
    }
}
