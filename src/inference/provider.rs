use std::fmt;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use super::types::{ChatMessage, MediaPayload, ModelInfo, SendOptions};

/// Errors that can occur during provider operations.
#[derive(Debug)]
pub enum ProviderError {
    /// Provider misconfigured (missing API key, bad URL).
    Config(String),
    /// Network-level failure (timeout, DNS, connection refused, broken body stream).
    Network(String),
    /// API returned an error response.
    Api { status: u16, message: String },
    /// Failed to parse the provider's response.
    Parse(String),
    /// The chunk receiver was dropped before the stream finished.
    ChannelClosed,
    /// The caller cancelled the request mid-stream.
    Cancelled,
}

impl ProviderError {
    /// True when the vendor rejected the request because the model cannot do web search.
    pub fn is_web_search_unsupported(&self) -> bool {
        let text = match self {
            ProviderError::Api { message, .. } => message.to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        text.contains("not supported")
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Config(msg) => write!(f, "config error: {msg}"),
            ProviderError::Network(msg) => write!(f, "network error: {msg}"),
            ProviderError::Api { status, message } => {
                write!(f, "API error (HTTP {status}): {message}")
            }
            ProviderError::Parse(msg) => write!(f, "parse error: {msg}"),
            ProviderError::ChannelClosed => write!(f, "channel closed"),
            ProviderError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Ordered system prompts plus tool-description prompts owned by one client.
///
/// Nothing is ever deduplicated or reset between calls; a fresh client starts empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptSet {
    system: Vec<String>,
    tools: Vec<String>,
}

impl PromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system.push(prompt.into());
    }

    /// Replaces the tool-description prompts.
    pub fn set_available_tools(&mut self, prompts: Vec<String>) {
        self.tools = prompts;
    }

    pub fn system_prompts(&self) -> &[String] {
        &self.system
    }

    pub fn tool_prompts(&self) -> &[String] {
        &self.tools
    }

    /// System prompts joined by blank lines, followed by an `## Available Tools`
    /// section when any tool prompts are set.
    pub fn build(&self) -> String {
        let mut prompt = self.system.join("\n\n");
        if !self.tools.is_empty() {
            prompt.push_str("\n## Available Tools\n\n");
            prompt.push_str(&self.tools.join("\n\n"));
        }
        prompt
    }
}

/// A full conversation turn list to send.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    /// Falls back to the client's default model when `None`.
    pub model: Option<&'a str>,
    pub options: SendOptions,
}

impl<'a> ChatRequest<'a> {
    pub fn new(messages: &'a [ChatMessage]) -> Self {
        Self {
            messages,
            model: None,
            options: SendOptions::default(),
        }
    }
}

/// One user turn carrying an optional prompt and a single media attachment.
#[derive(Debug, Clone, Copy)]
pub struct MediaRequest<'a> {
    pub media: &'a MediaPayload,
    pub mime_type: &'a str,
    pub prompt: Option<&'a str>,
    pub model: Option<&'a str>,
    pub options: SendOptions,
}

impl<'a> MediaRequest<'a> {
    pub fn new(media: &'a MediaPayload, mime_type: &'a str) -> Self {
        Self {
            media,
            mime_type,
            prompt: None,
            model: None,
            options: SendOptions::default(),
        }
    }
}

/// Where incremental text goes while a response streams in.
///
/// Chunks are delivered over a channel in stream order, so the receiver can
/// render them on another task without blocking the network read.
#[derive(Debug, Clone, Default)]
pub struct StreamSink {
    sender: Option<Sender<String>>,
    cancel: Option<CancellationToken>,
}

impl StreamSink {
    /// No chunk delivery and no cancellation; only the final string matters.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn channel(sender: Sender<String>) -> Self {
        Self {
            sender: Some(sender),
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// Runs `fut` to completion unless the cancellation token fires first.
    pub async fn cancellable<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ProviderError::Cancelled),
                result = fut => result,
            },
            None => fut.await,
        }
    }

    /// Forwards one increment to the receiver, if any.
    ///
    /// A full channel applies backpressure, but the wait still yields to cancellation.
    pub async fn emit(&self, text: &str) -> Result<(), ProviderError> {
        let Some(sender) = &self.sender else {
            return Ok(());
        };
        self.cancellable(async {
            sender.send(text.to_string()).await.map_err(|_| {
                warn!("Chunk send failed: receiver dropped");
                ProviderError::ChannelClosed
            })
        })
        .await
    }
}

/// The capability set every AI source exposes.
///
/// Prompt mutation takes `&mut self` while sends take `&self`, so prompts are
/// fixed for the duration of any in-flight request.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Returns the name of the provider.
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    fn prompts(&self) -> &PromptSet;

    fn prompts_mut(&mut self) -> &mut PromptSet;

    fn add_system_prompt(&mut self, prompt: String) {
        self.prompts_mut().add_system_prompt(prompt);
    }

    fn set_available_tools(&mut self, prompts: Vec<String>) {
        self.prompts_mut().set_available_tools(prompts);
    }

    fn build_system_prompt(&self) -> String {
        self.prompts().build()
    }

    /// Sends one user turn with optional text and a media attachment; returns the full reply.
    async fn send_media(
        &self,
        request: MediaRequest<'_>,
        sink: StreamSink,
    ) -> Result<String, ProviderError>;

    /// Sends the conversation and returns the full, trimmed reply.
    async fn send_chat(
        &self,
        request: ChatRequest<'_>,
        sink: StreamSink,
    ) -> Result<String, ProviderError>;

    /// Lists the vendor's model catalog.
    async fn available_models(&self) -> Result<Vec<ModelInfo>, ProviderError>;
}

/// Strips trailing slashes from a configured base URL, falling back to `default`.
pub fn normalize_base_url(base_url: Option<String>, default: &str) -> String {
    base_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Logs an outgoing query: model, accumulated system prompts, and the conversation.
pub(crate) fn log_query(provider: &str, model: &str, prompts: &PromptSet, messages: &[ChatMessage]) {
    debug!(
        "AI query to {} with {}: system_prompts={:?}, tool_prompts={}, messages={:?}",
        provider,
        model,
        prompts.system_prompts(),
        prompts.tool_prompts().len(),
        messages
    );
}

/// Turns a non-2xx response into `ProviderError::Api` carrying the body text.
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    debug!("{} response status: {}", provider, response.status());

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let err_body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        warn!("{} API error: {} - {}", provider, status, err_body);
        return Err(ProviderError::Api {
            status,
            message: err_body,
        });
    }

    Ok(response)
}
