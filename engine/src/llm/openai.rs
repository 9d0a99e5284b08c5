use async_trait::async_trait;
use serde_json::json;

use sdk::EngineError;

use super::{GenerationProvider, ProviderError, SYSTEM_PROMPT};

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 2000;

/// OpenAI-compatible chat completions provider.
///
/// The API key is read from `api_key_env` on every call so that a key exported
/// after startup is picked up and a missing key is reported per request.
pub struct OpenAIProvider {
    base_url: String,
    model: String,
    api_key_env: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_env: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key_env: api_key_env.into(),
            client: super::http_client(timeout_secs)?,
        })
    }

    fn api_key(&self) -> super::Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingCredential(self.api_key_env.clone()))
    }
}

#[async_trait]
impl GenerationProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn check_health(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn generate(&self, prompt: &str) -> super::Result<String> {
        let api_key = self.api_key()?;

        let url = format!("{}/chat/completions", self.base_url);

        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        tracing::debug!(
            "OpenAI request: model={}, prompt_chars={}",
            self.model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| ProviderError::ParseError("No message content in response".to_string()))?;

        Ok(content.to_string())
    }
}
