//! Hosted language model access.
//!
//! The query engine hands a fully assembled prompt to an [`LlmClient`]; the Azure OpenAI adapter
//! sends it as a single user message to a chat-completions deployment and returns the first
//! choice verbatim (trimmed).

use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced while calling the language model.
#[derive(Debug, Error)]
pub enum LlmClientError {
    /// Provider could not be reached.
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by completion providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate an answer for the given prompt.
    async fn complete(&self, prompt: &str) -> Result<String, LlmClientError>;
}

/// Build the LLM client described by configuration.
pub fn get_llm_client(config: &Config) -> Box<dyn LlmClient> {
    Box::new(AzureOpenAiClient::new(
        config.azure_openai_endpoint.clone(),
        config.azure_openai_api_key.clone(),
        config.azure_openai_deployment.clone(),
        config.azure_openai_model.clone(),
        config.azure_openai_api_version.clone(),
    ))
}

/// Chat-completions client for an Azure OpenAI deployment.
pub struct AzureOpenAiClient {
    http: Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    model: String,
    api_version: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl AzureOpenAiClient {
    /// Construct a client for one deployment of an Azure OpenAI resource.
    pub fn new(
        endpoint: String,
        api_key: String,
        deployment: String,
        model: String,
        api_version: String,
    ) -> Self {
        let http = Client::builder()
            .user_agent("finfunc/llm")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            endpoint,
            api_key,
            deployment,
            model,
            api_version,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint.trim_end_matches('/'),
            self.deployment
        )
    }
}

#[async_trait]
impl LlmClient for AzureOpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmClientError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        tracing::debug!(
            deployment = %self.deployment,
            model = %self.model,
            prompt_chars = prompt.len(),
            "Dispatching chat completion"
        );

        let response = self
            .http
            .post(self.url())
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                LlmClientError::ProviderUnavailable(format!(
                    "failed to reach Azure OpenAI at {}: {error}",
                    self.endpoint
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::GenerationFailed(format!(
                "Azure OpenAI returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            LlmClientError::InvalidResponse(format!("failed to decode chat response: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LlmClientError::InvalidResponse("response had no choices".into()))
    }
}
