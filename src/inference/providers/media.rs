//! Attachment handling shared by the OpenAI-compatible providers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::warn;

use crate::inference::MediaPayload;

/// URL for an image part: the URI itself for remote media, a data URI otherwise.
pub(super) fn image_url(media: &MediaPayload, mime_type: &str) -> String {
    match media {
        MediaPayload::Remote(uri) => uri.clone(),
        MediaPayload::Inline(data) => format!("data:{mime_type};base64,{data}"),
    }
}

/// Best-effort decode of a non-image attachment into text.
///
/// Failures are logged and yield `None`; the caller omits the part and carries on.
pub(super) fn decode_text(media: &MediaPayload, mime_type: &str) -> Option<String> {
    let data = match media {
        MediaPayload::Inline(data) => data,
        MediaPayload::Remote(uri) => {
            warn!("Cannot inline remote {mime_type} attachment {uri}; omitting it");
            return None;
        }
    };

    let bytes = match STANDARD.decode(data.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to decode base64 {mime_type} attachment: {e}");
            return None;
        }
    };

    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Attachment of type {mime_type} is not UTF-8 text: {e}");
            None
        }
    }
}

/// Wraps decoded file text the way it is shown to the model.
pub(super) fn file_content_block(text: &str) -> String {
    format!("\n\n[File Content]\n{text}\n\n")
}
