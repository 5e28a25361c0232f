//! Reading local files into media payloads.

use std::fs;
use std::io;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;

use crate::inference::MediaPayload;

/// Guesses a MIME type from the file extension. Unknown extensions are sent as text.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("md") | Some("markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        _ => "text/plain",
    }
}

/// Reads a file and base64-encodes it as an inline payload.
pub fn load_file(path: &Path) -> io::Result<MediaPayload> {
    let bytes = fs::read(path)?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(MediaPayload::Inline(STANDARD.encode(bytes)))
}
