use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use sdk::{Worker, WorkerKind, WorkerResponse};

use crate::search::{SearchProvider, SearchResult};

/// Answers tasks with web search results
pub struct SearchWorker {
    provider: Arc<dyn SearchProvider>,
}

impl SearchWorker {
    pub const NAME: &'static str = "SearchWorker";

    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

fn summarize(task: &str, results: &[SearchResult]) -> String {
    let mut text = format!("Found {} results for: {}", results.len(), task);
    for (i, r) in results.iter().enumerate() {
        text.push_str(&format!("\n{}. {} - {}: {}", i + 1, r.title, r.url, r.snippet));
    }
    text
}

#[async_trait]
impl Worker for SearchWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Search
    }

    async fn execute(&self, task: &str) -> WorkerResponse {
        let results = match self.provider.query(task).await {
            Ok(results) => results,
            Err(e) => return super::provider_failure(Self::NAME, task, e),
        };

        let results_json = serde_json::to_value(&results).unwrap_or(Value::Null);

        WorkerResponse::success(Self::NAME, task, summarize(task, &results))
            .with_metadata("results_count", results.len())
            .with_metadata("results", results_json)
            .with_metadata("provider", self.provider.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderError;
    use sdk::FailureKind;

    struct FixedSearch(Result<Vec<SearchResult>, fn() -> ProviderError>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn query(&self, _text: &str) -> Result<Vec<SearchResult>, ProviderError> {
            match &self.0 {
                Ok(results) => Ok(results.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    #[tokio::test]
    async fn test_search_success_formats_results() {
        let worker = SearchWorker::new(Arc::new(FixedSearch(Ok(vec![SearchResult {
            title: "Tokio".to_string(),
            url: "https://tokio.rs".to_string(),
            snippet: "An async runtime".to_string(),
        }]))));

        let response = worker.execute("async rust").await;

        assert!(response.is_success());
        assert_eq!(response.worker_name, "SearchWorker");
        assert!(response.result.starts_with("Found 1 results for: async rust"));
        assert!(response.result.contains("Tokio - https://tokio.rs: An async runtime"));
        assert_eq!(response.metadata["results_count"], 1);
        assert_eq!(response.metadata["results"][0]["url"], "https://tokio.rs");
    }

    #[tokio::test]
    async fn test_search_failure_becomes_error_response() {
        let worker = SearchWorker::new(Arc::new(FixedSearch(Err(|| {
            ProviderError::NetworkError("connection reset".to_string())
        }))));

        let response = worker.execute("async rust").await;

        assert!(!response.is_success());
        assert_eq!(response.failure_kind(), Some(FailureKind::Provider));
        assert!(response.result.contains("connection reset"));
    }
}
