//! OpenRouter provider using the Chat Completions API.
//!
//! Online search is OpenRouter's `web` plugin. Sources come back as
//! `url_citation` annotations on the streamed choices and are appended to
//! the answer as an `### ONLINE_SEARCH` block when the stream ends.

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::chat_completions::{chat_messages, media_parts, ChatCompletionChunk, ChatCompletionMessage, ChatRole, MessageContent};
use crate::inference::citations::citation_appendix;
use crate::inference::provider::{ensure_success, log_query, normalize_base_url};
use crate::inference::stream::{aggregate_stream, event_stream, json_events};
use crate::inference::{
    ChatClient, ChatRequest, MediaRequest, ModelInfo, PromptSet, ProviderError, SendOptions,
    StreamSink,
};

pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_OPENROUTER_MODEL: &str = "google/gemini-2.0-flash-exp:free";

/// Site identity OpenRouter uses for app rankings. Sent on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRouterAttribution {
    pub referer: String,
    pub title: String,
}

impl Default for OpenRouterAttribution {
    fn default() -> Self {
        Self {
            referer: "https://skidhw.serina.in".to_string(),
            title: "Serina-chan Helper".to_string(),
        }
    }
}

// ============================================================================
// OpenRouter API Types
// ============================================================================

#[derive(Serialize, Debug, PartialEq, Eq)]
struct Plugin {
    id: &'static str,
}

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatCompletionMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugins: Option<Vec<Plugin>>,
}

#[derive(Deserialize, Debug)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize, Debug)]
struct ModelEntry {
    id: String,
}

fn web_plugins(options: SendOptions) -> Option<Vec<Plugin>> {
    options.online_search.then(|| vec![Plugin { id: "web" }])
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// OpenRouter API provider using Chat Completions
pub struct OpenRouterProvider {
    api_key: String,
    base_url: String,
    attribution: OpenRouterAttribution,
    prompts: PromptSet,
    client: reqwest::Client,
}

impl OpenRouterProvider {
    /// Creates a new OpenRouter provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenRouter API key
    /// * `base_url` - Optional custom base URL (defaults to OpenRouter's API)
    /// * `attribution` - `HTTP-Referer` / `X-Title` header values
    pub fn new(api_key: String, base_url: Option<String>, attribution: OpenRouterAttribution) -> Self {
        Self {
            api_key,
            base_url: normalize_base_url(base_url, DEFAULT_OPENROUTER_BASE_URL),
            attribution,
            prompts: PromptSet::new(),
            client: reqwest::Client::new(),
        }
    }

    fn with_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.attribution.referer)
            .header("X-Title", &self.attribution.title)
    }

    /// Streams a completion, collecting `url_citation` annotations alongside the text.
    ///
    /// When any citations arrived, the ONLINE_SEARCH block is appended to the
    /// result and also sent through the sink as one final chunk.
    async fn execute_stream(
        &self,
        model: &str,
        messages: &[ChatCompletionMessage],
        options: SendOptions,
        sink: &StreamSink,
    ) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            stream: true,
            plugins: web_plugins(options),
        };

        info!(
            "OpenRouter request: model={}, message_count={}, online_search={}",
            model,
            messages.len(),
            options.online_search
        );

        let send = self
            .with_headers(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(&request)
            .send();
        let response = sink
            .cancellable(async { send.await.map_err(|e| ProviderError::Network(e.to_string())) })
            .await?;
        let response = ensure_success("OpenRouter", response).await?;

        let chunks = json_events::<ChatCompletionChunk>(event_stream(response));
        let mut aggregate = aggregate_stream(chunks, sink, |chunk, aggregate| {
            for citation in chunk.citations() {
                aggregate.push_citation(citation);
            }
        })
        .await?;

        if let Some(appendix) = citation_appendix(&aggregate.citations) {
            debug!("Appending {} citations", aggregate.citations.len());
            aggregate.text.push_str(&appendix);
            sink.emit(&appendix).await?;
        }

        Ok(aggregate.text.trim().to_string())
    }
}

#[async_trait]
impl ChatClient for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn default_model(&self) -> &str {
        DEFAULT_OPENROUTER_MODEL
    }

    fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    fn prompts_mut(&mut self) -> &mut PromptSet {
        &mut self.prompts
    }

    async fn send_media(
        &self,
        request: MediaRequest<'_>,
        sink: StreamSink,
    ) -> Result<String, ProviderError> {
        let model = request.model.unwrap_or(DEFAULT_OPENROUTER_MODEL);
        let mut messages = chat_messages(&self.build_system_prompt(), &[]);
        messages.push(ChatCompletionMessage {
            role: ChatRole::User,
            content: MessageContent::Parts(media_parts(
                request.media,
                request.mime_type,
                request.prompt,
            )),
        });

        self.execute_stream(model, &messages, request.options, &sink)
            .await
    }

    async fn send_chat(
        &self,
        request: ChatRequest<'_>,
        sink: StreamSink,
    ) -> Result<String, ProviderError> {
        let model = request.model.unwrap_or(DEFAULT_OPENROUTER_MODEL);
        log_query(self.name(), model, &self.prompts, request.messages);
        let messages = chat_messages(&self.build_system_prompt(), request.messages);
        self.execute_stream(model, &messages, request.options, &sink)
            .await
    }

    async fn available_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let response = self
            .with_headers(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = ensure_success("OpenRouter", response).await?;
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                display_name: m.id.clone(),
                id: m.id,
            })
            .collect())
    }
}
