use crate::classify::{classify_status, classify_transport, logged};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::parse::{parse_completion, sse_chunks};
use crate::types::*;
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use std::borrow::Cow;
use std::time::Duration;

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ChatError>>;

/// The two chat-completion operations, as seen by the web layer.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Run a completion and return the whole reply.
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<ChatResponse, ChatError>;

    /// Run a streaming completion. Status failures are reported here; the
    /// returned stream only fails on timeout.
    async fn complete_streaming(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ChunkStream, ChatError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// Everything it holds is fixed at construction, so one instance can be
/// cloned or shared across tasks freely.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u64,
    timeout: Duration,
    max_prompt_chars: Option<usize>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::new()
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        ChatClientBuilder::from_config(config).build()
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.url
    }

    pub fn default_model(&self) -> &str {
        &self.model
    }

    pub async fn complete(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ChatResponse, ChatError> {
        let request = self.prepare(prompt, model, false)?;
        let url = self.url.as_str();
        self.log_start(&request);

        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request.to_wire())
            .send()
            .await
            .map_err(|e| logged(classify_transport(&e, url), url))?;

        let status = resp.status();
        tracing::info!(url = %url, status = status.as_u16(), "chat completion responded");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|e| {
                tracing::warn!(url = %url, error = %e, "could not read error body");
                String::new()
            });
            return Err(logged(classify_status(status, &body, url), url));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| logged(classify_transport(&e, url), url))?;

        let response = parse_completion(&body).map_err(|e| logged(e, url))?;
        tracing::info!(
            url = %url,
            model = %request.model,
            reply_chars = response.content.chars().count(),
            total_tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "chat completion succeeded"
        );
        Ok(response)
    }

    pub async fn complete_streaming(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ChunkStream, ChatError> {
        let request = self.prepare(prompt, model, true)?;
        let url = self.url.as_str();
        self.log_start(&request);

        let send = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .bearer_auth(&self.api_key)
            .json(&request.to_wire())
            .send();

        let resp = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(logged(classify_transport(&e, url), url)),
            Err(_) => return Err(logged(ChatError::Timeout { url: url.to_string() }, url)),
        };

        let status = resp.status();
        tracing::info!(url = %url, status = status.as_u16(), "chat stream responded");

        if !status.is_success() {
            let body = match tokio::time::timeout(self.timeout, resp.text()).await {
                Ok(Ok(body)) => body,
                Ok(Err(e)) => {
                    tracing::warn!(url = %url, error = %e, "could not read error body");
                    String::new()
                }
                Err(_) => String::new(),
            };
            return Err(logged(classify_status(status, &body, url), url));
        }

        Ok(sse_chunks(resp.bytes_stream(), self.timeout, self.url.clone()))
    }

    fn prepare(
        &self,
        prompt: &str,
        model: Option<&str>,
        stream: bool,
    ) -> Result<ChatRequest, ChatError> {
        if prompt.trim().is_empty() {
            return Err(logged(
                ChatError::InvalidRequest("prompt is empty".into()),
                &self.url,
            ));
        }

        let prompt = match self.max_prompt_chars {
            Some(max) => truncate_chars(prompt, max),
            None => Cow::Borrowed(prompt),
        };
        if matches!(prompt, Cow::Owned(_)) {
            tracing::info!(
                max_chars = self.max_prompt_chars,
                "prompt truncated to the configured limit"
            );
        }

        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.model.as_str());

        let mut request = ChatRequest::new(prompt.into_owned())
            .with_model(model)
            .streaming(stream);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        Ok(request)
    }

    fn log_start(&self, request: &ChatRequest) {
        tracing::info!(
            url = %self.url,
            model = %request.model,
            stream = request.stream,
            prompt_chars = request.prompt.chars().count(),
            "sending chat completion"
        );
        tracing::debug!(prompt = %request.prompt, "chat completion prompt");
    }
}

#[async_trait]
impl ChatService for ChatClient {
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<ChatResponse, ChatError> {
        ChatClient::complete(self, prompt, model).await
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ChunkStream, ChatError> {
        ChatClient::complete_streaming(self, prompt, model).await
    }
}

/// Keep at most `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max) {
        Some((cut, _)) => Cow::Owned(text[..cut].to_string()),
        None => Cow::Borrowed(text),
    }
}

fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

pub struct ChatClientBuilder {
    config: ChatConfig,
    timeout: Option<Duration>,
}

impl ChatClientBuilder {
    pub fn new() -> Self {
        Self::from_config(&ChatConfig::default())
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            config: config.clone(),
            timeout: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Overrides `timeout_secs` from the config.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_prompt_chars(mut self, max: Option<usize>) -> Self {
        self.config.max_prompt_chars = max;
        self
    }

    /// Fails when the API key is missing or the base URL is not http(s).
    pub fn build(self) -> Result<ChatClient, ChatError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ChatError::Config("an API key is required".into()))?
            .to_string();

        let base = url::Url::parse(self.config.base_url.trim()).map_err(|e| {
            ChatError::Config(format!("invalid base URL {:?}: {}", self.config.base_url, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "base URL must be http or https: {}",
                base
            )));
        }

        let timeout = self.timeout.unwrap_or_else(|| self.config.timeout());
        let http = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("building HTTP client: {}", e)))?;

        let url = chat_completions_url(self.config.base_url.trim());
        tracing::info!(
            url = %url,
            model = %self.config.model,
            api_key_len = api_key.len(),
            "chat client ready"
        );

        Ok(ChatClient {
            http,
            url,
            api_key,
            model: self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            timeout,
            max_prompt_chars: self.config.max_prompt_chars,
        })
    }
}

impl Default for ChatClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
