//! Gemini provider using the `streamGenerateContent` SSE endpoint.
//!
//! This integration has no separate system slot: accumulated system prompts
//! travel as a synthetic leading `user` turn. Web grounding arrives as
//! `groundingMetadata` on each candidate and is rendered into an
//! `### ONLINE_SEARCH` block once the stream ends.

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::inference::citations::format_online_search;
use crate::inference::provider::{ensure_success, log_query, normalize_base_url};
use crate::inference::stream::{aggregate_stream, event_stream, json_events, stream_error, TextChunk};
use crate::inference::{
    ChatClient, ChatMessage, ChatRequest, Citation, MediaPayload, MediaRequest, ModelInfo,
    PromptSet, ProviderError, Role, SendOptions, StreamSink,
};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";

/// Thinking budget that lets the model decide how much to think.
pub const UNBOUNDED_THINKING_BUDGET: i32 = -1;

const MODEL_PAGE_SIZE: &str = "1000";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
    #[serde(rename = "HARM_CATEGORY_CIVIC_INTEGRITY")]
    CivicIntegrity,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
    Off,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

/// Vendor extras fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub thinking_budget: i32,
    pub safety_settings: Vec<SafetySetting>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            thinking_budget: UNBOUNDED_THINKING_BUDGET,
            safety_settings: default_safety_settings(),
        }
    }
}

/// The four content categories, all set to `BLOCK_NONE`.
pub fn default_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::BlockNone,
    })
    .collect()
}

// ============================================================================
// Gemini API Types
// ============================================================================

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum GeminiRole {
    User,
    Model,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

/// Serializes externally tagged: `{"text": ..}`, `{"inlineData": {..}}`, `{"fileData": {..}}`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    InlineData(Blob),
    FileData(FileData),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
struct Content {
    role: GeminiRole,
    parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: i32,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Serialize, Debug, Default)]
struct GoogleSearch {}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    safety_settings: &'a [SafetySetting],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug, Default)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
    #[serde(default)]
    web_search_queries: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Deserialize, Debug, Default)]
struct WebSource {
    uri: Option<String>,
    title: Option<String>,
}

/// One streamed chunk reduced to what we use: visible text, grounding, and
/// any error the API reported mid-stream.
#[derive(Debug, Default)]
struct GeminiChunk {
    text: String,
    grounding: Option<GroundingMetadata>,
    error: Option<serde_json::Value>,
}

impl From<GenerateContentChunk> for GeminiChunk {
    fn from(chunk: GenerateContentChunk) -> Self {
        let error = chunk.error;
        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return GeminiChunk {
                error,
                ..Default::default()
            };
        };
        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        GeminiChunk {
            text,
            grounding: candidate.grounding_metadata,
            error,
        }
    }
}

impl TextChunk for GeminiChunk {
    fn text(&self) -> Option<&str> {
        Some(&self.text)
    }

    fn error(&self) -> Option<ProviderError> {
        self.error.as_ref().map(stream_error)
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<GeminiModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
}

// ============================================================================
// Translation Layer
// ============================================================================

/// Leading synthetic user turn carrying the system prompt, if there is one.
fn system_turn(system_prompt: &str) -> Option<Content> {
    if system_prompt.trim().is_empty() {
        return None;
    }
    Some(Content {
        role: GeminiRole::User,
        parts: vec![Part::Text(system_prompt.to_string())],
    })
}

/// Maps the conversation to Gemini contents. `assistant` becomes `model`,
/// everything else `user`. Blank messages are dropped.
fn messages_to_contents(messages: &[ChatMessage]) -> Vec<Content> {
    messages
        .iter()
        .filter_map(|message| {
            let text = message.trimmed()?;
            let role = match message.role {
                Role::Assistant => GeminiRole::Model,
                Role::User | Role::System => GeminiRole::User,
            };
            Some(Content {
                role,
                parts: vec![Part::Text(text.to_string())],
            })
        })
        .collect()
}

/// Builds the single user turn for a media request: optional prompt text, then the attachment.
fn media_to_content(media: &MediaPayload, mime_type: &str, prompt: Option<&str>) -> Content {
    let mut parts = Vec::new();
    if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
        parts.push(Part::Text(prompt.to_string()));
    }
    parts.push(match media {
        MediaPayload::Remote(uri) => Part::FileData(FileData {
            mime_type: mime_type.to_string(),
            file_uri: uri.clone(),
        }),
        MediaPayload::Inline(data) => Part::InlineData(Blob {
            mime_type: mime_type.to_string(),
            data: data.clone(),
        }),
    });
    Content {
        role: GeminiRole::User,
        parts,
    }
}

fn search_tools(options: SendOptions) -> Option<Vec<Tool>> {
    options.online_search.then(|| {
        vec![Tool {
            google_search: GoogleSearch::default(),
        }]
    })
}

/// Accepts both bare ids and the catalog's `models/...` names.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Folds one chunk's grounding metadata into the running aggregate.
fn collect_grounding(chunk: &GeminiChunk, aggregate: &mut crate::inference::StreamAggregate) {
    let Some(grounding) = &chunk.grounding else {
        return;
    };
    for gc in &grounding.grounding_chunks {
        let (url, title) = match &gc.web {
            Some(web) => (web.uri.clone(), web.title.clone()),
            None => (None, None),
        };
        aggregate.push_citation(Citation {
            url,
            title,
            ..Default::default()
        });
    }
    if let Some(queries) = &grounding.web_search_queries {
        aggregate.replace_queries(queries.clone());
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Google Gemini API client.
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    config: GeminiConfig,
    prompts: PromptSet,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Creates a new Gemini provider.
    ///
    /// # Arguments
    /// * `api_key` - Gemini API key
    /// * `base_url` - Optional custom base URL (defaults to Google's API)
    /// * `config` - Thinking budget and safety thresholds
    pub fn new(api_key: String, base_url: Option<String>, config: GeminiConfig) -> Self {
        Self {
            api_key,
            base_url: normalize_base_url(base_url, DEFAULT_GEMINI_BASE_URL),
            config,
            prompts: PromptSet::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Prepends the system turn, streams the reply, and appends grounding results.
    async fn stream_generate(
        &self,
        model: &str,
        mut contents: Vec<Content>,
        options: SendOptions,
        sink: &StreamSink,
    ) -> Result<String, ProviderError> {
        if let Some(system) = system_turn(&self.build_system_prompt()) {
            contents.insert(0, system);
        }

        let request = GenerateContentRequest {
            contents,
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    thinking_budget: self.config.thinking_budget,
                },
            },
            safety_settings: &self.config.safety_settings,
            tools: search_tools(options),
        };

        info!(
            "Gemini request: model={}, content_count={}, online_search={}",
            model,
            request.contents.len(),
            options.online_search
        );

        let send = self
            .client
            .post(format!(
                "{}/v1beta/{}:streamGenerateContent",
                self.base_url,
                model_path(model)
            ))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send();
        let response = sink
            .cancellable(async { send.await.map_err(|e| ProviderError::Network(e.to_string())) })
            .await?;
        let response = ensure_success("Gemini", response).await?;

        let chunks = json_events::<GenerateContentChunk>(event_stream(response))
            .map(|chunk| chunk.map(GeminiChunk::from));
        let aggregate = aggregate_stream(chunks, sink, collect_grounding).await?;

        debug!(
            "Gemini grounding: {} chunks, {} queries",
            aggregate.citations.len(),
            aggregate.queries.len()
        );

        let formatted = format_online_search(
            &aggregate.citations,
            &aggregate.queries,
            aggregate.text.trim(),
        );
        Ok(formatted.trim().to_string())
    }
}

#[async_trait]
impl ChatClient for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        DEFAULT_GEMINI_MODEL
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
        let model = request.model.unwrap_or(DEFAULT_GEMINI_MODEL);
        debug!(
            "Gemini media request: mime={}, remote={}",
            request.mime_type,
            matches!(request.media, MediaPayload::Remote(_))
        );
        let content = media_to_content(request.media, request.mime_type, request.prompt);
        self.stream_generate(model, vec![content], request.options, &sink)
            .await
    }

    async fn send_chat(
        &self,
        request: ChatRequest<'_>,
        sink: StreamSink,
    ) -> Result<String, ProviderError> {
        let model = request.model.unwrap_or(DEFAULT_GEMINI_MODEL);
        log_query(self.name(), model, &self.prompts, request.messages);
        let contents = messages_to_contents(request.messages);
        self.stream_generate(model, contents, request.options, &sink)
            .await
    }

    async fn available_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", MODEL_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .client
                .get(format!("{}/v1beta/models", self.base_url))
                .query(&query)
                .header("x-goog-api-key", &self.api_key)
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            let response = ensure_success("Gemini", response).await?;
            let page: ModelList = response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            models.extend(page.models.into_iter().map(|m| ModelInfo {
                display_name: m.display_name.unwrap_or_else(|| m.name.clone()),
                id: m.name,
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!("Gemini model catalog: {} models", models.len());
        Ok(models)
    }
}
