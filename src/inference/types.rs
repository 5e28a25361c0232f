use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn in the conversation. Order in the caller's slice is chronological.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Trimmed content, or `None` if the message is blank and must not be sent.
    pub fn trimmed(&self) -> Option<&str> {
        let trimmed = self.content.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }
}

/// Media attached to a single user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    /// An http(s) URI the vendor fetches itself.
    Remote(String),
    /// Base64-encoded bytes sent inline.
    Inline(String),
}

impl MediaPayload {
    /// Classifies a raw payload string: anything starting with `http` is a remote URI.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with("http") {
            MediaPayload::Remote(raw)
        } else {
            MediaPayload::Inline(raw)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MediaPayload::Remote(s) | MediaPayload::Inline(s) => s,
        }
    }
}

/// Returns true for `image/*` MIME types.
pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Ask the vendor to ground the answer with a web search.
    pub online_search: bool,
}

impl SendOptions {
    pub fn online() -> Self {
        Self {
            online_search: true,
        }
    }
}

/// An entry in a provider's model catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
}

/// A web source the model cited or grounded on.
///
/// Gemini grounding chunks only fill `url` and `title`; OpenRouter
/// `url_citation` annotations also carry the snippet and character offsets.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Citation {
    pub url: Option<String>,
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<usize>,
}

impl Citation {
    pub fn web(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }
}

/// Transient per-call state: the text so far plus any search metadata seen on the stream.
#[derive(Debug, Default)]
pub struct StreamAggregate {
    pub text: String,
    pub citations: Vec<Citation>,
    pub queries: Vec<String>,
    pub chunk_count: usize,
}

impl StreamAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: &str) {
        self.chunk_count += 1;
        self.text.push_str(text);
    }

    pub fn push_citation(&mut self, citation: Citation) {
        self.citations.push(citation);
    }

    /// Later query lists replace earlier ones; the last chunk that reports queries wins.
    pub fn replace_queries(&mut self, queries: Vec<String>) {
        self.queries = queries;
    }
}
