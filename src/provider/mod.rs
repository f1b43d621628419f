//! AI-provider integration.
//!
//! Two narrow traits at the seam: [`GenerationProvider`] for chat
//! completions and [`EmbeddingProvider`] for text embeddings. Concrete
//! providers are OpenAI-style HTTP APIs called through `reqwest`; credential
//! rotation lives in [`rotation`].

pub mod rotation;

pub use rotation::{CredentialSnapshot, FailureSignal, ProviderPool};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderError;

/// Text-generation provider.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate a reply for `prompt` under `system_prompt`.
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String, ProviderError>;

    /// Whether this provider believes it can currently serve requests.
    fn is_available(&self) -> bool;
}

/// Text-embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` into an opaque float vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// OpenAI-compatible chat-completions client for one credential.
pub struct HttpGenerationProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    credential_id: String,
}

impl HttpGenerationProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        credential_id: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            credential_id: credential_id.into(),
        }
    }

    /// Classify an HTTP status into the rotation failure signal, if any.
    pub fn failure_signal(status: reqwest::StatusCode) -> Option<FailureSignal> {
        match status.as_u16() {
            429 => Some(FailureSignal::RateLimited),
            402 | 403 => Some(FailureSignal::QuotaExhausted),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.8,
            "max_tokens": 200,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                credential: self.credential_id.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if let Some(signal) = Self::failure_signal(status) {
            return Err(match signal {
                FailureSignal::RateLimited => ProviderError::RateLimited {
                    credential: self.credential_id.clone(),
                },
                FailureSignal::QuotaExhausted => ProviderError::QuotaExhausted {
                    credential: self.credential_id.clone(),
                },
            });
        }
        if !status.is_success() {
            return Err(ProviderError::RequestFailed {
                credential: self.credential_id.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        let parsed: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    credential: self.credential_id.clone(),
                    reason: e.to_string(),
                })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse {
                credential: self.credential_id.clone(),
                reason: "empty choices".to_string(),
            })?;

        Ok(text.trim().to_string())
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// OpenAI-compatible embeddings client.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                credential: "embedding".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::RequestFailed {
                credential: "embedding".to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    credential: "embedding".to_string(),
                    reason: e.to_string(),
                })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse {
                credential: "embedding".to_string(),
                reason: "empty data".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limit() {
        let signal =
            HttpGenerationProvider::failure_signal(reqwest::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(signal, Some(FailureSignal::RateLimited));
    }

    #[test]
    fn status_403_is_quota_exhaustion() {
        let signal = HttpGenerationProvider::failure_signal(reqwest::StatusCode::FORBIDDEN);
        assert_eq!(signal, Some(FailureSignal::QuotaExhausted));
    }

    #[test]
    fn server_errors_are_not_sticky_signals() {
        let signal =
            HttpGenerationProvider::failure_signal(reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(signal, None);
    }
}
