//! Streaming completion relay: one authenticated POST against the Groq
//! chat-completions endpoint per prompt, with the event-stream response
//! parsed line by line and each text delta forwarded as soon as it arrives.

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::constants;

const DONE_SENTINEL: &str = "[DONE]";
const EVENT_PREFIX: &str = "data:";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Bounds the idle gap between body chunks, not the total stream duration:
// a completion may stream for arbitrarily long as long as deltas keep
// arriving. A whole-request timeout would cut long replies off mid-stream.
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

// Structures matching the OpenAI-compatible streaming chunk format.
// Only the delta text is of interest; everything else is ignored.
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Failures the relay can hit before or during the body read. Never escapes
/// this module: both variants are rendered as an inline error fragment.
#[derive(Debug, Error)]
enum RelayError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Outcome of examining one line of the response body.
#[derive(Debug, PartialEq)]
enum StreamLine {
    /// Blank, prefix-only, malformed, or carrying no text delta.
    Skip,
    /// The terminator sentinel; stop reading even if more lines follow.
    Done,
    /// An incremental text delta to yield immediately.
    Token(String),
}

/// Parse one event-stream line: strip the `data:` prefix if present, detect
/// the terminator sentinel, otherwise pull `choices[0].delta.content` out of
/// the JSON payload. Malformed JSON is skipped, not fatal.
fn parse_stream_line(line: &str) -> StreamLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return StreamLine::Skip;
    }
    let payload = trimmed
        .strip_prefix(EVENT_PREFIX)
        .map(str::trim_start)
        .unwrap_or(trimmed);
    if payload.is_empty() {
        return StreamLine::Skip;
    }
    if payload == DONE_SENTINEL {
        return StreamLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|token| !token.is_empty())
            .map_or(StreamLine::Skip, StreamLine::Token),
        Err(e) => {
            warn!("Failed to parse stream line as JSON: {} - Error: {}", payload, e);
            StreamLine::Skip
        }
    }
}

/// Split off every complete (newline-terminated) line in `buf`, leaving any
/// unterminated tail behind for the next body chunk. Event frames can be torn
/// mid-JSON by chunk boundaries; only whole lines may reach the parser.
fn take_complete_lines(buf: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.find('\n') {
        lines.push(buf.drain(..=pos).collect());
    }
    lines
}

/// Client for the chat-completions endpoint.
pub struct CompletionRelay {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl CompletionRelay {
    /// Relay against the configured endpoint (GROQ_URL / GROQ_API_KEY).
    pub fn new() -> Self {
        Self::with_endpoint(constants::GROQ_URL.clone(), constants::GROQ_API_KEY.clone())
    }

    /// Relay against an explicit endpoint; used by tests with a mock server.
    pub fn with_endpoint(endpoint: String, api_key: String) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_IDLE_TIMEOUT)
            .build()
            .expect("HTTP client construction only fails when no TLS backend is available");
        Self {
            client,
            endpoint,
            api_key,
        }
    }

    /// Stream one completion for `prompt`, forwarding each text fragment
    /// through `tx` as it arrives. Returns the accumulated reply text.
    ///
    /// This never fails from the caller's perspective: transport errors,
    /// non-success statuses, and mid-stream failures all surface as a single
    /// `\n[API Error: ...]` fragment followed by the end of the sequence.
    /// The returned accumulation contains tokens only, no error annotation,
    /// so it is safe to hand to speech playback.
    #[instrument(skip(self, prompt, tx))]
    pub async fn stream_completion(
        &self,
        prompt: &str,
        model_slug: &str,
        tx: mpsc::Sender<String>,
    ) -> String {
        let mut accumulated = String::new();
        if let Err(e) = self
            .run_stream(prompt, model_slug, &tx, &mut accumulated)
            .await
        {
            warn!("Completion stream failed: {}", e);
            let _ = tx.send(format!("\n[API Error: {}]", e)).await;
        }
        accumulated
    }

    async fn run_stream(
        &self,
        prompt: &str,
        model_slug: &str,
        tx: &mpsc::Sender<String>,
        accumulated: &mut String,
    ) -> Result<(), RelayError> {
        let request_body = json!({
            "model": model_slug,
            "messages": [
                {"role": "system", "content": constants::SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "stream": true
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(RelayError::Status { status, body });
        }

        let mut stream = response.bytes_stream();
        // Carry buffer: event frames can be split across body chunks, so only
        // complete lines are parsed and the tail is kept for the next chunk.
        let mut buf = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            for line in take_complete_lines(&mut buf) {
                match parse_stream_line(&line) {
                    StreamLine::Skip => {}
                    StreamLine::Done => {
                        debug!("Terminator sentinel received, ending stream");
                        return Ok(());
                    }
                    StreamLine::Token(token) => {
                        accumulated.push_str(&token);
                        if tx.send(token).await.is_err() {
                            debug!("Fragment receiver dropped, ending stream");
                            return Ok(());
                        }
                    }
                }
            }
        }

        // Body ended without a trailing newline; the buffer may still hold
        // one final frame.
        if let StreamLine::Token(token) = parse_stream_line(&buf) {
            accumulated.push_str(&token);
            let _ = tx.send(token).await;
        }

        Ok(())
    }
}

impl Default for CompletionRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_and_prefix_only_lines_skipped() {
        assert_eq!(parse_stream_line(""), StreamLine::Skip);
        assert_eq!(parse_stream_line("   "), StreamLine::Skip);
        assert_eq!(parse_stream_line("data:"), StreamLine::Skip);
        assert_eq!(parse_stream_line("data:   "), StreamLine::Skip);
    }

    #[test]
    fn test_done_sentinel_with_and_without_prefix() {
        assert_eq!(parse_stream_line("data: [DONE]"), StreamLine::Done);
        assert_eq!(parse_stream_line("[DONE]"), StreamLine::Done);
    }

    #[test]
    fn test_delta_extraction() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_stream_line(line), StreamLine::Token("Hi".to_string()));
        // Whitespace-only deltas still count as tokens; only empty is dropped.
        let line = r#"data: {"choices":[{"delta":{"content":" there"}}]}"#;
        assert_eq!(
            parse_stream_line(line),
            StreamLine::Token(" there".to_string())
        );
    }

    #[test]
    fn test_unprefixed_json_still_parses() {
        let line = r#"{"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(parse_stream_line(line), StreamLine::Token("x".to_string()));
    }

    #[test]
    fn test_malformed_json_skipped() {
        assert_eq!(parse_stream_line("data: {not json"), StreamLine::Skip);
        assert_eq!(parse_stream_line("garbage"), StreamLine::Skip);
    }

    #[test]
    fn test_missing_or_empty_delta_skipped() {
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{}}]}"#),
            StreamLine::Skip
        );
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            StreamLine::Skip
        );
        assert_eq!(parse_stream_line(r#"data: {"choices":[]}"#), StreamLine::Skip);
        assert_eq!(parse_stream_line(r#"data: {}"#), StreamLine::Skip);
    }

    #[test]
    fn test_frame_split_across_chunks_reassembled() {
        // A frame torn mid-JSON by a chunk boundary must not reach the
        // parser until its closing newline arrives, and then parse whole.
        let mut buf = String::new();
        buf.push_str(r#"data: {"choices":[{"delta":{"content":"Hi"#);
        assert!(take_complete_lines(&mut buf).is_empty());

        buf.push_str(" there\"}}]}\n");
        let lines = take_complete_lines(&mut buf);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_stream_line(&lines[0]),
            StreamLine::Token("Hi there".to_string())
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunk_with_complete_lines_and_tail() {
        let mut buf = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: [DONE]\ndata: {\"cho",
        );
        let lines = take_complete_lines(&mut buf);
        assert_eq!(lines.len(), 2);
        assert_eq!(parse_stream_line(&lines[0]), StreamLine::Token("a".to_string()));
        assert_eq!(parse_stream_line(&lines[1]), StreamLine::Done);
        // The torn tail stays buffered for the next chunk.
        assert_eq!(buf, "data: {\"cho");
    }

    #[test]
    fn test_empty_and_newline_free_buffers_yield_nothing() {
        let mut buf = String::new();
        assert!(take_complete_lines(&mut buf).is_empty());
        buf.push_str("no newline yet");
        assert!(take_complete_lines(&mut buf).is_empty());
        assert_eq!(buf, "no newline yet");
    }

    #[test]
    fn test_only_first_choice_considered() {
        let line = r#"data: {"choices":[{"delta":{"content":"a"}},{"delta":{"content":"b"}}]}"#;
        assert_eq!(parse_stream_line(line), StreamLine::Token("a".to_string()));
    }
}
