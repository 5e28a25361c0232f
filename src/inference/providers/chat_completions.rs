//! Chat Completions wire types shared by the OpenAI and OpenRouter providers.

use serde::{Deserialize, Serialize};

use super::media::{decode_text, file_content_block, image_url};
use crate::inference::stream::{stream_api_error, stream_error, TextChunk};
use crate::inference::types::is_image_mime;
use crate::inference::{ChatMessage, Citation, MediaPayload, ProviderError, Role};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(super) enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub(super) struct ImageUrl {
    pub url: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Plain string for ordinary turns, a part list for multimodal ones.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub(super) enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub(super) struct ChatCompletionMessage {
    pub role: ChatRole,
    pub content: MessageContent,
}

impl ChatCompletionMessage {
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }
}

// ============================================================================
// Translation Layer
// ============================================================================

pub(super) fn map_role(role: Role) -> ChatRole {
    match role {
        Role::Assistant => ChatRole::Assistant,
        Role::System => ChatRole::System,
        Role::User => ChatRole::User,
    }
}

/// System prompt first (when non-blank), then the trimmed, non-blank conversation.
pub(super) fn chat_messages(system_prompt: &str, messages: &[ChatMessage]) -> Vec<ChatCompletionMessage> {
    let system = (!system_prompt.trim().is_empty())
        .then(|| ChatCompletionMessage::text(ChatRole::System, system_prompt));

    system
        .into_iter()
        .chain(messages.iter().filter_map(|message| {
            message
                .trimmed()
                .map(|text| ChatCompletionMessage::text(map_role(message.role), text))
        }))
        .collect()
}

/// Optional prompt text, then either an image part or the attachment decoded as text.
pub(super) fn media_parts(media: &MediaPayload, mime_type: &str, prompt: Option<&str>) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
        parts.push(ContentPart::Text {
            text: prompt.to_string(),
        });
    }

    if is_image_mime(mime_type) {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image_url(media, mime_type),
            },
        });
    } else if let Some(text) = decode_text(media, mime_type) {
        parts.push(ContentPart::Text {
            text: file_content_block(&text),
        });
    }

    parts
}

// ============================================================================
// Streaming Types
// ============================================================================

#[derive(Deserialize, Debug, Default)]
pub(super) struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkBody>,
    #[serde(default)]
    message: Option<ChunkBody>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    annotations: Option<Vec<Annotation>>,
}

#[derive(Deserialize, Debug, Default)]
struct Annotation {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    url_citation: Option<UrlCitation>,
}

#[derive(Deserialize, Debug, Default)]
struct UrlCitation {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    start_index: Option<usize>,
    #[serde(default)]
    end_index: Option<usize>,
}

impl ChatCompletionChunk {
    /// `url_citation` annotations on the first choice, looked up on both
    /// `message` and `delta` since either may carry them mid-stream.
    pub fn citations(&self) -> Vec<Citation> {
        let Some(choice) = self.choices.first() else {
            return Vec::new();
        };
        [&choice.message, &choice.delta]
            .into_iter()
            .flatten()
            .filter_map(|body| body.annotations.as_ref())
            .flatten()
            .filter(|annotation| annotation.kind == "url_citation")
            .filter_map(|annotation| annotation.url_citation.as_ref())
            .map(|c| Citation {
                url: c.url.clone(),
                title: c.title.clone(),
                content: c.content.clone(),
                start_index: c.start_index,
                end_index: c.end_index,
            })
            .collect()
    }
}

impl TextChunk for ChatCompletionChunk {
    fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(|delta| delta.content.as_deref())
    }

    /// A top-level `error` object, or a choice that finished with `finish_reason: "error"`.
    fn error(&self) -> Option<ProviderError> {
        if let Some(error) = &self.error {
            return Some(stream_error(error));
        }
        self.choices
            .iter()
            .any(|choice| choice.finish_reason.as_deref() == Some("error"))
            .then(|| stream_api_error(None, Some("stream finished with finish_reason \"error\"")))
    }
}
