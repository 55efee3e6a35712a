//! HTTP oracle clients
//!
//! OpenAI-compatible chat completions (OpenAI, Azure and compatible
//! gateways) and the Ollama generate API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use triplex_core::{Oracle, OracleConfig, Result, TriplexError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// OpenAI Client
// ============================================================================

/// OpenAI API client
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Choice {
    message: Message,
    finish_reason: Option<String>,
}

impl OpenAiClient {
    /// Create a new OpenAI client; `max_tokens` caps every request
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
            max_tokens,
        }
    }

    /// Create from config
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| TriplexError::ConfigError("OpenAI API key required".to_string()))?;

        let client = Self::new(api_key.clone(), config.model.clone(), config.max_tokens);
        Ok(match &config.base_url {
            Some(url) => client.with_base_url(url.clone()),
            None => client,
        })
    }

    /// Set custom base URL (for Azure or compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, prompt: &str, max_tokens: u32, temperature: f32) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: max_tokens.min(self.max_tokens),
            temperature,
        }
    }
}

#[async_trait]
impl Oracle for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let request = self.request(prompt, max_tokens, temperature);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| TriplexError::OracleError(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TriplexError::OracleError(format!("OpenAI error: {error_text}")));
        }

        let result: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| TriplexError::OracleError(format!("Failed to parse response: {e}")))?;

        result
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| TriplexError::OracleError("No response generated".to_string()))
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct OllamaResponse {
    response: String,
    done: bool,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens,
        }
    }

    /// Create from config
    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(config.ollama_url.clone(), config.model.clone(), config.max_tokens)
    }

    fn request(&self, prompt: &str, max_tokens: u32, temperature: f32) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                num_predict: max_tokens.min(self.max_tokens),
                temperature,
            },
        }
    }
}

#[async_trait]
impl Oracle for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let request = self.request(prompt, max_tokens, temperature);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TriplexError::OracleError(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TriplexError::OracleError(format!("Ollama error: {error_text}")));
        }

        let result: OllamaResponse = response.json().await.map_err(|e| {
            TriplexError::OracleError(format!("Failed to parse Ollama response: {e}"))
        })?;

        Ok(result.response)
    }
}

// ============================================================================
// Tests
// ============================================================================
