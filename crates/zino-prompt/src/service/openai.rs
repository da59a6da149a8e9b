//! OpenAI-compatible chat completions.

use super::BackendService;
use crate::{error::BoxError, function::ExecutionSettings, transcript::ChatTurn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{fmt, time::Duration};

/// Base URL for the OpenAI API.
const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// A backend service posting to the `/chat/completions` endpoint of an
/// OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiChatService {
    model_id: String,
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl fmt::Debug for OpenAiChatService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiChatService")
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl OpenAiChatService {
    /// Creates a service for the model with the default API URL.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            base_url: OPENAI_API_BASE_URL.to_owned(),
            api_key: None,
            http_client: reqwest::Client::new(),
        }
    }

    /// Sets the base URL, e.g. of a self-hosted compatible server.
    #[inline]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the API key sent as a bearer token.
    #[inline]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Uses a custom HTTP client.
    #[inline]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    /// Builds an HTTP client with the request timeout.
    pub fn with_timeout(self, timeout: Duration) -> Result<Self, BoxError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self.with_http_client(client))
    }

    /// Returns the base URL.
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the request body: the model, the messages and the
    /// forwarded execution parameters.
    fn request_body(&self, turns: &[ChatTurn], settings: &ExecutionSettings) -> Map<String, Value> {
        let mut body = settings.parameters().clone();
        body.insert("model".to_owned(), self.model_id.clone().into());
        let messages = turns
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                })
            })
            .collect::<Vec<_>>();
        body.insert("messages".to_owned(), messages.into());
        body
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait::async_trait]
impl BackendService for OpenAiChatService {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete_chat(
        &self,
        turns: &[ChatTurn],
        settings: &ExecutionSettings,
    ) -> Result<String, BoxError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request_body(turns, settings);
        let mut request = self.http_client.post(url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        tracing::debug!(
            model_id = self.model_id.as_str(),
            turns = turns.len(),
            "sending chat completion"
        );

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(format!("chat completion failed with status {status}: {message}").into());
        }
        let completion = response.json::<ChatCompletion>().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| "chat completion has no choices".into())
    }
}
