use serde::Deserialize;

/// HTTP endpoints of the chat API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL every path below is appended to.
    pub api_base_url: String,
    /// SSE endpoint for streaming replies.
    pub chat_stream_path: String,
    /// Non-streaming endpoint.
    pub chat_path: String,
    pub refresh_path: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:18789/api".into(),
            chat_stream_path: "/chat/stream".into(),
            chat_path: "/chat/send".into(),
            refresh_path: "/auth/refresh".into(),
        }
    }
}

impl ChatConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    fn join(&self, path: &str) -> String {
        format!("{}{path}", self.api_base_url.trim_end_matches('/'))
    }

    pub fn stream_url(&self) -> String {
        self.join(&self.chat_stream_path)
    }

    pub fn chat_url(&self) -> String {
        self.join(&self.chat_path)
    }

    pub fn refresh_url(&self) -> String {
        self.join(&self.refresh_path)
    }
}
