//! Text generation providers
//!
//! `GenerationProvider` is the single capability the code generation worker
//! needs: turn a prompt into text. OpenAI-compatible endpoints and a local
//! Ollama server are supported; `build_provider` picks one from config.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};

use sdk::EngineError;

use crate::config::GenerationConfig;

pub mod ollama;
pub mod openai;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Instruction sent ahead of every generation prompt
pub const SYSTEM_PROMPT: &str = "You are a Python code generator. \
Reply with a single runnable Python program and nothing else. \
Do not wrap the code in markdown and do not add explanations.";

/// Errors raised by generation and search providers
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(e: reqwest::Error, endpoint: &str) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_connect() {
            ProviderError::ProviderUnavailable(format!("Cannot connect to {}", endpoint))
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => ProviderError::AuthenticationFailed(body),
            429 => ProviderError::RateLimitExceeded,
            400..=499 => ProviderError::InvalidRequest(body),
            _ => ProviderError::ProviderUnavailable(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Produces text for a prompt
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider identifier ("openai", "ollama")
    fn name(&self) -> &str;

    /// Model the provider sends requests to
    fn model(&self) -> &str;

    /// Generate a completion for `prompt`
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Whether the provider looks usable without spending a request
    async fn check_health(&self) -> bool {
        true
    }
}

/// Construct the configured generation provider
pub fn build_provider(
    config: &GenerationConfig,
) -> std::result::Result<Arc<dyn GenerationProvider>, EngineError> {
    let provider: Arc<dyn GenerationProvider> = match config.provider.as_str() {
        "openai" => Arc::new(openai::OpenAIProvider::new(
            config.base_url(),
            config.model(),
            config.api_key_env.clone(),
            config.timeout_secs,
        )?),
        "ollama" => Arc::new(ollama::OllamaProvider::new(
            config.base_url(),
            config.model(),
            config.timeout_secs,
        )?),
        other => {
            return Err(EngineError::Config(format!(
                "Unknown generation provider: {}",
                other
            )))
        }
    };
    Ok(provider)
}

/// Build the shared HTTP client with a request timeout
pub(crate) fn http_client(timeout_secs: u64) -> std::result::Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EngineError::Network(format!("Failed to create HTTP client: {}", e)))
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```")
            .expect("Invalid code fence pattern")
    })
}

/// Extract the code from a model reply.
///
/// Models often wrap code in markdown fences despite instructions. When fenced
/// blocks are present their bodies are joined, otherwise the trimmed reply is
/// returned as-is.
pub fn strip_code_fences(content: &str) -> String {
    let blocks: Vec<&str> = fence_regex()
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim_end()))
        .collect();

    if blocks.is_empty() {
        content.trim().to_string()
    } else {
        blocks.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences_plain_text() {
        assert_eq!(strip_code_fences("  print(1)\n"), "print(1)");
    }

    #[test]
    fn test_strip_code_fences_single_block() {
        let reply = "Here you go:\n```python\ndef add(a, b):\n    return a + b\n```\nEnjoy!";
        assert_eq!(strip_code_fences(reply), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn test_strip_code_fences_multiple_blocks() {
        let reply = "```\nx = 1\n```\nthen\n```py\nprint(x)\n```";
        assert_eq!(strip_code_fences(reply), "x = 1\n\nprint(x)");
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimitExceeded
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            ProviderError::ProviderUnavailable(_)
        ));
    }

    #[test]
    fn test_build_provider_rejects_unknown() {
        let config = GenerationConfig {
            provider: "mystery".to_string(),
            ..Default::default()
        };
        assert!(build_provider(&config).is_err());
    }

    #[test]
    fn test_build_provider_ollama() {
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            ..Default::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "llama3.1:8b");
    }
}
