// src/services/provider.rs
//! Chat-completion collaborator.
//!
//! The gate only ever sees [`ChatProvider`]; [`OpenAiProvider`] is the
//! production implementation speaking the OpenAI chat-completions wire format.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

use crate::config::ProviderConfig;

/// Why a chat call failed. Informational only: no variant triggers a retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("provider timed out")]
    Timeout,
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Text suitable for showing to the person chatting.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderError::QuotaExceeded(_) => "API quota exceeded. Please try again later.",
            ProviderError::ModelUnavailable(_) => {
                "Model access not available. Please check your API key permissions."
            }
            ProviderError::Timeout | ProviderError::Other(_) => {
                "Error communicating with the chat provider"
            }
        }
    }
}

pub trait ChatProvider: Send + Sync {
    fn send_chat(&self, message: &str) -> std::result::Result<String, ProviderError>;
}

/// Map a failed response (HTTP status if any, plus body or error text) onto [`ProviderError`].
pub fn classify_failure(status: Option<u16>, body: &str) -> ProviderError {
    let lower = body.to_ascii_lowercase();
    if lower.contains("insufficient_quota") {
        return ProviderError::QuotaExceeded(body.to_string());
    }
    if lower.contains("model_not_found") || lower.contains("model not found") || status == Some(404) {
        return ProviderError::ModelUnavailable(body.to_string());
    }
    match status {
        Some(code) => ProviderError::Other(format!("HTTP {code}: {body}")),
        None => ProviderError::Other(body.to_string()),
    }
}

pub struct OpenAiProvider {
    client: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    /// Build from config; the API key comes from the environment variable
    /// named by `cfg.api_key_env`.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map(|k| k.trim().to_string())
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("environment variable {} is missing", cfg.api_key_env))?;
        Self::new(cfg, api_key)
    }

    pub fn new(cfg: &ProviderConfig, api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building chat provider HTTP client")?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        })
    }
}

impl ChatProvider for OpenAiProvider {
    fn send_chat(&self, message: &str) -> std::result::Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": message }],
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    classify_failure(None, &e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Other(e.to_string())
            }
        })?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "chat provider returned an error");
            return Err(classify_failure(Some(status.as_u16()), &body));
        }

        let data: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Other(format!("invalid response body: {e}")))?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Other("response has no message content".to_string()))
    }
}
