//! Stream plumbing shared by every provider.
//!
//! Vendor bodies arrive as Server-Sent Events. [`SseDecoder`] splits the raw
//! bytes into events, [`event_stream`] lifts that onto a `reqwest` body, and
//! [`aggregate_stream`] folds typed chunks into the final reply while
//! forwarding each text increment to the caller's [`StreamSink`].

use std::collections::VecDeque;
use std::pin::pin;

use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::provider::{ProviderError, StreamSink};
use super::types::StreamAggregate;

/// A chunk that may carry a text increment.
pub trait TextChunk {
    fn text(&self) -> Option<&str>;

    /// An error the vendor reported inside an otherwise successful stream.
    fn error(&self) -> Option<ProviderError> {
        None
    }
}

/// Status reported for in-stream errors that carry no numeric code.
pub const STREAM_ERROR_STATUS: u16 = 500;

/// Maps a vendor `error` object (or bare error string) found in a stream event.
pub fn stream_error(error: &Value) -> ProviderError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str());
    stream_api_error(error.get("code"), message)
}

/// Builds the `Api` error for an in-stream failure. Numeric HTTP-like codes
/// become the status; anything else reports [`STREAM_ERROR_STATUS`].
pub fn stream_api_error(code: Option<&Value>, message: Option<&str>) -> ProviderError {
    let status = code
        .and_then(Value::as_u64)
        .filter(|c| (100..600).contains(c))
        .map(|c| c as u16)
        .unwrap_or(STREAM_ERROR_STATUS);
    let message = message
        .filter(|m| !m.trim().is_empty())
        .or_else(|| code.and_then(Value::as_str))
        .unwrap_or("An error occurred during streaming")
        .to_string();
    ProviderError::Api { status, message }
}

/// Consumes `stream` in order, appending every non-empty text increment to the
/// aggregate and forwarding it to `sink` before pulling the next chunk.
///
/// `inspect` sees every chunk first, so providers can pick up citation or
/// grounding metadata carried next to the text.
pub async fn aggregate_stream<S, C, F>(
    stream: S,
    sink: &StreamSink,
    mut inspect: F,
) -> Result<StreamAggregate, ProviderError>
where
    S: Stream<Item = Result<C, ProviderError>>,
    C: TextChunk,
    F: FnMut(&C, &mut StreamAggregate),
{
    let mut stream = pin!(stream);
    let mut aggregate = StreamAggregate::new();

    loop {
        let next = match sink.cancellable(async { Ok(stream.next().await) }).await {
            Ok(next) => next,
            Err(e) => {
                info!("Stream cancelled after {} chunks", aggregate.chunk_count);
                return Err(e);
            }
        };

        let Some(item) = next else { break };
        let chunk = item?;
        if let Some(err) = chunk.error() {
            warn!(
                "Error event after {} chunks: {}",
                aggregate.chunk_count, err
            );
            return Err(err);
        }
        inspect(&chunk, &mut aggregate);

        if let Some(text) = chunk.text()
            && !text.is_empty()
        {
            aggregate.push_text(text);
            debug!(
                "Content chunk (len={}, total={})",
                text.len(),
                aggregate.text.len()
            );
            sink.emit(text).await?;
        }
    }

    info!(
        "Stream ended: {} chunks, {} content bytes",
        aggregate.chunk_count,
        aggregate.text.len()
    );
    Ok(aggregate)
}

/// Aggregates a stream of text chunks and returns the trimmed concatenation.
pub async fn collect_text<S, C>(stream: S, sink: &StreamSink) -> Result<String, ProviderError>
where
    S: Stream<Item = Result<C, ProviderError>>,
    C: TextChunk,
{
    let aggregate = aggregate_stream(stream, sink, |_, _| {}).await?;
    Ok(aggregate.text.trim().to_string())
}

// ============================================================================
// Server-Sent Events
// ============================================================================

/// One `data:` payload, tagged with the most recent `event:` line if there was one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE event parser.
///
/// Bytes are buffered until a full line is available so multi-byte characters
/// split across network reads decode intact. `data:` lines accumulate until a
/// blank line dispatches them as one event (joined with `\n`); the blank line
/// also clears any pending `event:` name. The `[DONE]` sentinel and comment
/// lines are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    current_event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }

        events
    }

    /// Flushes a trailing line that had no newline and dispatches any event
    /// still waiting for its blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            if let Some(event) = self.process_line(line.trim_end_matches(['\r', '\n'])) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.trim().is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        debug!("SSE line: {}", line);

        if let Some(event_type) = line.strip_prefix("event:") {
            self.current_event = Some(event_type.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data.push(data.to_string());
        }

        None
    }

    /// Ends the current event. Clears the pending event name even when no
    /// data arrived for it.
    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.current_event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        if data.trim() == "[DONE]" {
            debug!("Received [DONE] marker");
            return None;
        }
        Some(SseEvent { event, data })
    }
}

/// Lifts a streaming HTTP body into a stream of SSE events.
pub fn event_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send {
    let body = Box::pin(response.bytes_stream());
    futures::stream::unfold(
        (body, SseDecoder::new(), VecDeque::new(), false),
        |(mut body, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (body, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match body.next().await {
                    Some(Ok(bytes)) => {
                        debug!("Raw chunk received: {} bytes", bytes.len());
                        pending.extend(decoder.push(&bytes));
                    }
                    Some(Err(e)) => {
                        done = true;
                        let err = ProviderError::Network(e.to_string());
                        return Some((Err(err), (body, decoder, pending, done)));
                    }
                    None => {
                        done = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    )
}

/// Decodes each event's JSON payload into a typed chunk.
pub fn json_events<T>(
    events: impl Stream<Item = Result<SseEvent, ProviderError>> + Send,
) -> impl Stream<Item = Result<T, ProviderError>> + Send
where
    T: DeserializeOwned,
{
    events.map(|event| {
        let event = event?;
        serde_json::from_str::<T>(&event.data).map_err(|e| {
            ProviderError::Parse(format!("{e} in stream event {:?}: {}", event.event, event.data))
        })
    })
}
