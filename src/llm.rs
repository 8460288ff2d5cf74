//! Generative model client
//!
//! The generator seam: given a fully-built prompt, return candidate SQL
//! text. The HTTP implementation targets an Ollama-compatible completion
//! endpoint; the output is untrusted and goes straight to the Guardian.

use crate::config::LlmConfig;
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

/// External collaborator contract: turn a prompt into candidate SQL
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AppError>;
}

/// Ollama-backed SQL generator (non-streaming completion API)
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl SqlGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AppError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
            }
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("model endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Generation(format!(
                "model endpoint returned {}: {}",
                status, text
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Generation(format!("invalid model response: {}", e)))?;

        let output = payload["response"].as_str().unwrap_or_default().trim();
        if output.is_empty() {
            return Err(AppError::Generation(
                "model returned empty output".to_string(),
            ));
        }

        Ok(output.to_string())
    }
}
