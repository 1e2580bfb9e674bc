//! SSE decoding for the chat stream.
//!
//! [`SseDecoder`] turns body chunks into `(event, data)` pairs;
//! [`ChatStream`] folds those pairs into a [`ChatResult`].

use {serde_json::Value, tracing::debug};

use crate::{
    error::{Error, Result},
    result::ChatResult,
    usage::{TokenUsage, normalize_usage},
};

/// One `data:` line and the `event:` name in effect when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental line decoder. Partial lines stay buffered until the chunk
/// that completes them arrives, so multi-byte characters split across
/// chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk and return the data lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            if let Some(event) = self.line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }

    /// Decode a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw).into_owned();
        self.line(line.trim_end_matches('\r'))
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if let Some(name) = line.strip_prefix("event: ") {
            self.event = Some(name.trim().to_string());
            return None;
        }
        let data = line.strip_prefix("data: ")?;
        // The cursor applies to one data line only.
        let event = self.event.take();
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        Some(SseEvent {
            event,
            data: data.to_string(),
        })
    }
}

/// What the caller should do after one event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStep {
    Continue,
    /// Accumulated text changed; carries the full text so far.
    Delta(String),
    Done(ChatResult),
}

/// Per-call decoding state.
#[derive(Debug, Default)]
pub struct ChatStream {
    text: String,
    conversation_id: Option<String>,
    result: Option<ChatResult>,
}

impl ChatStream {
    /// `conversation_id` is the caller's, used when the server names none.
    pub fn new(conversation_id: Option<&str>) -> Self {
        Self {
            conversation_id: conversation_id.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Apply one event. Only an `error` event fails; unparseable data is
    /// skipped.
    pub fn apply(&mut self, event: &SseEvent) -> Result<StreamStep> {
        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "skipping malformed SSE data");
                return Ok(StreamStep::Continue);
            },
        };

        match event.event.as_deref() {
            Some("meta") => {
                if let Some(id) = payload.get("conversationId").and_then(Value::as_str) {
                    self.conversation_id = Some(id.to_string());
                }
                Ok(StreamStep::Continue)
            },
            Some("content") => match payload.get("content").and_then(Value::as_str) {
                // Full text so far, not a delta. A shorter value still replaces it.
                Some(content) => {
                    self.text = content.to_string();
                    Ok(StreamStep::Delta(self.text.clone()))
                },
                None => Ok(StreamStep::Continue),
            },
            Some("done") => {
                let mut result =
                    ChatResult::assistant(self.text.clone(), normalize_usage(payload.get("usage")));
                result.conversation_id = payload
                    .get("conversationId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| self.conversation_id.clone());
                result.token_balance = payload.get("tokenBalance").and_then(Value::as_f64);
                self.result = Some(result.clone());
                Ok(StreamStep::Done(result))
            },
            Some("error") => Err(Error::Stream(error_text(&payload))),
            _ => Ok(StreamStep::Continue),
        }
    }

    /// The `done` result, or a zero-usage result from the text so far.
    pub fn into_result(self) -> ChatResult {
        match self.result {
            Some(result) => result,
            None => {
                let mut result = ChatResult::assistant(self.text, TokenUsage::default());
                result.conversation_id = self.conversation_id;
                result
            },
        }
    }
}

/// Human-readable message of an error payload: `error` (string or
/// `{message}`), else `message`.
pub(crate) fn error_message(payload: &Value) -> Option<String> {
    match payload.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn error_text(payload: &Value) -> String {
    error_message(payload).unwrap_or_else(|| "stream error".into())
}
