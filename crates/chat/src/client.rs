//! HTTP chat calls with a single refresh-and-retry on 401.

use std::sync::Arc;

use {
    futures::StreamExt,
    gatelink_auth::Session,
    reqwest::{RequestBuilder, Response, StatusCode, header::ACCEPT},
    serde::Serialize,
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{
    config::ChatConfig,
    error::{Error, Result},
    result::{ChatResult, ContentBlock},
    sse::{ChatStream, SseDecoder, StreamStep, error_message},
    usage::normalize_usage,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
    session: Arc<Session>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(config: ChatConfig, session: Arc<Session>) -> Self {
        Self::with_http(reqwest::Client::new(), config, session)
    }

    pub fn with_http(http: reqwest::Client, config: ChatConfig, session: Arc<Session>) -> Self {
        Self {
            http,
            config,
            session,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Stream a reply. `on_delta` receives the full text so far after each
    /// `content` event; `on_done` runs once with the final result when the
    /// server sends `done`. Cancelling `cancel` aborts the request and no
    /// callback runs afterwards.
    pub async fn send_streaming_chat<D, F>(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        mut on_delta: D,
        mut on_done: F,
        cancel: Option<CancellationToken>,
    ) -> Result<ChatResult>
    where
        D: FnMut(&str),
        F: FnMut(&ChatResult),
    {
        let cancel = cancel.unwrap_or_default();
        let url = self.config.stream_url();
        let body = ChatRequest {
            message,
            conversation_id,
        };
        let response = self
            .send_with_refresh(&cancel, |token| {
                authorize(
                    self.http
                        .post(&url)
                        .header(ACCEPT, "text/event-stream")
                        .json(&body),
                    token,
                )
            })
            .await?;

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut stream = ChatStream::new(conversation_id);
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            for event in decoder.push(&chunk?) {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                dispatch(stream.apply(&event)?, &mut on_delta, &mut on_done);
            }
        }
        if let Some(event) = decoder.finish() {
            dispatch(stream.apply(&event)?, &mut on_delta, &mut on_done);
        }
        Ok(stream.into_result())
    }

    /// Non-streaming variant: one JSON reply.
    pub async fn send_chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatResult> {
        let url = self.config.chat_url();
        let body = ChatRequest {
            message,
            conversation_id,
        };
        let cancel = CancellationToken::new();
        let response = self
            .send_with_refresh(&cancel, |token| {
                authorize(self.http.post(&url).json(&body), token)
            })
            .await?;
        let payload: Value = response.json().await?;
        Ok(result_from_json(&payload, conversation_id))
    }

    /// Send, and on 401 refresh once and resend. The final response is
    /// returned only if its status is a success.
    async fn send_with_refresh(
        &self,
        cancel: &CancellationToken,
        build: impl Fn(Option<String>) -> RequestBuilder,
    ) -> Result<Response> {
        let response = send(cancel, build(self.session.access_token())).await?;
        if response.status() != StatusCode::UNAUTHORIZED || !self.session.has_refresh_token() {
            return check_status(response).await;
        }

        debug!("access token rejected, refreshing");
        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            refreshed = self.session.refresh() => refreshed?,
        }
        let response = send(cancel, build(self.session.access_token())).await?;
        check_status(response).await
    }
}

fn authorize(request: RequestBuilder, token: Option<String>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn send(cancel: &CancellationToken, request: RequestBuilder) -> Result<Response> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        response = request.send() => Ok(response?),
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| error_message(&v))
        .unwrap_or_else(|| format!("request failed: {}", status.as_u16()));
    warn!(status = status.as_u16(), %message, "chat request failed");
    Err(Error::Status {
        status: status.as_u16(),
        message,
    })
}

fn dispatch<D, F>(step: StreamStep, on_delta: &mut D, on_done: &mut F)
where
    D: FnMut(&str),
    F: FnMut(&ChatResult),
{
    match step {
        StreamStep::Continue => {},
        StreamStep::Delta(text) => on_delta(&text),
        StreamStep::Done(result) => on_done(&result),
    }
}

/// Build a result from a non-streaming reply. `content` may be a string or
/// a list of text blocks.
fn result_from_json(payload: &Value, conversation_id: Option<&str>) -> ChatResult {
    let text = match payload.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| serde_json::from_value::<ContentBlock>(b.clone()).ok())
            .map(|ContentBlock::Text { text }| text)
            .collect(),
        _ => String::new(),
    };
    let mut result = ChatResult::assistant(text, normalize_usage(payload.get("usage")));
    result.conversation_id = payload
        .get("conversationId")
        .and_then(Value::as_str)
        .or(conversation_id)
        .map(str::to_string);
    result.token_balance = payload.get("tokenBalance").and_then(Value::as_f64);
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn request_body_omits_missing_conversation() {
        let body = ChatRequest {
            message: "hi",
            conversation_id: None,
        };
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({ "message": "hi" }));
    }

    #[test]
    fn json_reply_with_block_content() {
        let result = result_from_json(
            &json!({
                "content": [{ "type": "text", "text": "Hel" }, { "type": "text", "text": "lo" }],
                "usage": { "input": 1, "output": 2 },
                "tokenBalance": 7.5
            }),
            Some("c3"),
        );
        assert_eq!(result.text(), "Hello");
        assert_eq!(result.usage.output, 2);
        assert_eq!(result.conversation_id.as_deref(), Some("c3"));
        assert_eq!(result.token_balance, Some(7.5));
    }
}
