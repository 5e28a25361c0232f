//! OpenAI provider.
//!
//! Plain text chats go through Chat Completions streaming. Media and
//! web-search requests go through the Responses API, whose SSE events are
//! tagged by `type`; only `response.output_text.delta` carries answer text
//! and every other event is ignored.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::chat_completions::{chat_messages, map_role, ChatCompletionChunk, ChatCompletionMessage, ChatRole};
use super::media::{decode_text, file_content_block, image_url};
use crate::inference::provider::{ensure_success, log_query, normalize_base_url};
use crate::inference::stream::{
    collect_text, event_stream, json_events, stream_api_error, stream_error, SseEvent, TextChunk,
};
use crate::inference::types::is_image_mime;
use crate::inference::{
    ChatClient, ChatMessage, ChatRequest, MediaPayload, MediaRequest, ModelInfo, PromptSet,
    ProviderError, SendOptions, StreamSink,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatCompletionMessage],
    stream: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputPart {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
enum InputContent {
    Text(String),
    Parts(Vec<InputPart>),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
struct InputMessage {
    role: ChatRole,
    content: InputContent,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
struct WebSearchTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
}

#[derive(Serialize, Debug)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a [InputMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WebSearchTool>>,
    stream: bool,
}

/// Responses API stream events. Unknown tags fall through to `Other`.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
enum ResponsesEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<serde_json::Value>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "response.failed")]
    ResponseFailed {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },
    #[serde(other)]
    Other,
}

impl TextChunk for ResponsesEvent {
    fn text(&self) -> Option<&str> {
        match self {
            ResponsesEvent::OutputTextDelta { delta } => Some(delta),
            _ => None,
        }
    }

    fn error(&self) -> Option<ProviderError> {
        match self {
            ResponsesEvent::Error { code, message } => {
                Some(stream_api_error(code.as_ref(), message.as_deref()))
            }
            ResponsesEvent::ResponseFailed { response } => Some(
                match response.as_ref().and_then(|r| r.get("error")).filter(|e| !e.is_null()) {
                    Some(error) => stream_error(error),
                    None => stream_api_error(None, Some("response failed")),
                },
            ),
            _ => None,
        }
    }
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

// ============================================================================
// Translation Layer
// ============================================================================

/// Web-search tool identifier for a model family.
fn web_search_tool_type(model: &str) -> &'static str {
    if model.contains("4.1") || model.contains("4o") {
        "web_search_preview"
    } else {
        "web_search"
    }
}

fn search_tools(model: &str, online_search: bool) -> Option<Vec<WebSearchTool>> {
    online_search.then(|| {
        vec![WebSearchTool {
            tool_type: web_search_tool_type(model),
        }]
    })
}

fn system_input(system_prompt: &str) -> Option<InputMessage> {
    (!system_prompt.trim().is_empty()).then(|| InputMessage {
        role: ChatRole::System,
        content: InputContent::Text(system_prompt.to_string()),
    })
}

/// Conversation as Responses API input, for chats that need web search.
fn messages_to_input(system_prompt: &str, messages: &[ChatMessage]) -> Vec<InputMessage> {
    system_input(system_prompt)
        .into_iter()
        .chain(messages.iter().filter_map(|message| {
            message.trimmed().map(|text| InputMessage {
                role: map_role(message.role),
                content: InputContent::Text(text.to_string()),
            })
        }))
        .collect()
}

/// Optional prompt, then an image part or the attachment decoded as text.
fn media_input_parts(media: &MediaPayload, mime_type: &str, prompt: Option<&str>) -> Vec<InputPart> {
    let mut parts = Vec::new();
    if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
        parts.push(InputPart::InputText {
            text: prompt.to_string(),
        });
    }

    if is_image_mime(mime_type) {
        parts.push(InputPart::InputImage {
            image_url: image_url(media, mime_type),
        });
    } else if let Some(text) = decode_text(media, mime_type) {
        parts.push(InputPart::InputText {
            text: file_content_block(&text),
        });
    }

    parts
}

/// Decodes one Responses SSE event. The tag normally sits in the JSON `type`
/// field; when it only appears on the `event:` line, that is used instead.
fn parse_responses_event(event: SseEvent) -> Result<ResponsesEvent, ProviderError> {
    let mut value: serde_json::Value = serde_json::from_str(&event.data)
        .map_err(|e| ProviderError::Parse(format!("{e} in Responses event: {}", event.data)))?;

    if let (Some(name), Some(object)) = (event.event, value.as_object_mut())
        && !object.contains_key("type")
    {
        object.insert("type".to_string(), serde_json::Value::String(name));
    }

    serde_json::from_value(value).map_err(|e| ProviderError::Parse(e.to_string()))
}

fn responses_events(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ResponsesEvent, ProviderError>> + Send {
    event_stream(response).map(|event| event.and_then(parse_responses_event))
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// OpenAI API client.
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    prompts: PromptSet,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Creates a new OpenAI provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `base_url` - Optional custom base URL (defaults to OpenAI's API)
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: normalize_base_url(base_url, DEFAULT_OPENAI_BASE_URL),
            prompts: PromptSet::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Streams a Chat Completions response and returns the trimmed text.
    async fn execute_stream(
        &self,
        model: &str,
        messages: &[ChatCompletionMessage],
        sink: &StreamSink,
    ) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            stream: true,
        };

        info!(
            "OpenAI chat request: model={}, message_count={}",
            model,
            messages.len()
        );

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();
        let response = sink
            .cancellable(async { send.await.map_err(|e| ProviderError::Network(e.to_string())) })
            .await?;
        let response = ensure_success("OpenAI", response).await?;

        collect_text(json_events::<ChatCompletionChunk>(event_stream(response)), sink).await
    }

    /// Opens a Responses API stream, with or without the web-search tool.
    async fn open_responses_stream(
        &self,
        model: &str,
        input: &[InputMessage],
        online_search: bool,
        sink: &StreamSink,
    ) -> Result<reqwest::Response, ProviderError> {
        let request = ResponsesRequest {
            model,
            input,
            tools: search_tools(model, online_search),
            stream: true,
        };

        info!(
            "OpenAI Responses request: model={}, input_count={}, online_search={}",
            model,
            input.len(),
            online_search
        );

        let send = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();
        let response = sink
            .cancellable(async { send.await.map_err(|e| ProviderError::Network(e.to_string())) })
            .await?;
        ensure_success("OpenAI", response).await
    }

    /// Streams a Responses API reply.
    ///
    /// If web search was requested and the model rejects it, the request is
    /// retried once without the tool. Any other failure is returned as is.
    async fn execute_responses_stream(
        &self,
        model: &str,
        input: &[InputMessage],
        options: SendOptions,
        sink: &StreamSink,
    ) -> Result<String, ProviderError> {
        let response = match self
            .open_responses_stream(model, input, options.online_search, sink)
            .await
        {
            Ok(response) => response,
            Err(err) if options.online_search && err.is_web_search_unsupported() => {
                warn!("Web search not supported for model {model}; falling back without search.");
                self.open_responses_stream(model, input, false, sink).await?
            }
            Err(err) => return Err(err),
        };

        collect_text(responses_events(response), sink).await
    }
}

#[async_trait]
impl ChatClient for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        DEFAULT_OPENAI_MODEL
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
        let model = request.model.unwrap_or(DEFAULT_OPENAI_MODEL);
        let parts = media_input_parts(request.media, request.mime_type, request.prompt);

        let mut input: Vec<InputMessage> = system_input(&self.build_system_prompt()).into_iter().collect();
        input.push(InputMessage {
            role: ChatRole::User,
            content: InputContent::Parts(parts),
        });

        self.execute_responses_stream(model, &input, request.options, &sink)
            .await
    }

    async fn send_chat(
        &self,
        request: ChatRequest<'_>,
        sink: StreamSink,
    ) -> Result<String, ProviderError> {
        let model = request.model.unwrap_or(DEFAULT_OPENAI_MODEL);
        log_query(self.name(), model, &self.prompts, request.messages);
        let system_prompt = self.build_system_prompt();

        if request.options.online_search {
            let input = messages_to_input(&system_prompt, request.messages);
            return self
                .execute_responses_stream(model, &input, request.options, &sink)
                .await;
        }

        let messages = chat_messages(&system_prompt, request.messages);
        self.execute_stream(model, &messages, &sink).await
    }

    async fn available_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = ensure_success("OpenAI", response).await?;
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
