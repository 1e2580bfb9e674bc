//! In-process fake gateway for socket tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use {
    futures::{SinkExt, StreamExt},
    gatelink_gateway_client::{BackoffConfig, GatewayConfig},
    serde_json::{Value, json},
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
    },
    tokio_tungstenite::{
        WebSocketStream, accept_async,
        tungstenite::{
            Message,
            protocol::{CloseFrame, frame::coding::CloseCode},
        },
    },
};

const STEP: Duration = Duration::from_secs(5);

pub struct FakeGateway {
    pub url: String,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

impl FakeGateway {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, conns) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(tcp).await
                    && tx.send(ServerConn { ws }).is_err()
                {
                    break;
                }
            }
        });
        Self {
            url: format!("ws://127.0.0.1:{}", addr.port()),
            conns,
        }
    }

    /// Fast timings so reconnect paths finish quickly.
    pub fn config(&self) -> GatewayConfig {
        GatewayConfig {
            request_timeout_ms: 2_000,
            connect_quiet_period_ms: 50,
            backoff: BackoffConfig {
                initial_ms: 50,
                factor: 1.7,
                max_ms: 200,
            },
            ..GatewayConfig::new(&self.url)
        }
    }

    pub async fn next_conn(&mut self) -> ServerConn {
        tokio::time::timeout(STEP, self.conns.recv())
            .await
            .expect("client did not connect in time")
            .expect("listener gone")
    }

    /// `true` if no further connection arrives within `wait`.
    pub async fn no_conn_within(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.conns.recv()).await.is_err()
    }
}

pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send");
    }

    pub async fn recv_json(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(STEP, self.ws.next())
                .await
                .expect("no frame in time")
                .expect("socket ended")
                .expect("socket error");
            match msg {
                Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
                Message::Close(frame) => panic!("unexpected close: {frame:?}"),
                _ => {},
            }
        }
    }

    /// Wait for the client's close frame and return its code.
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            let msg = tokio::time::timeout(STEP, self.ws.next())
                .await
                .expect("no close in time");
            match msg {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => {},
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn challenge(&mut self, nonce: &str) {
        self.send_json(json!({
            "type": "event",
            "event": "connect.challenge",
            "payload": { "nonce": nonce, "ts": 1_700_000_000_000u64 }
        }))
        .await;
    }

    /// Read the connect request and return `(request id, params)`.
    pub async fn recv_connect(&mut self) -> (String, Value) {
        let frame = self.recv_json().await;
        assert_eq!(frame["type"], "req");
        assert_eq!(frame["method"], "connect");
        (
            frame["id"].as_str().expect("id").to_string(),
            frame["params"].clone(),
        )
    }

    pub async fn reply_ok(&mut self, id: &str, payload: Value) {
        self.send_json(json!({ "type": "res", "id": id, "ok": true, "payload": payload }))
            .await;
    }

    pub async fn reply_err(&mut self, id: &str, code: &str, message: &str) {
        self.send_json(json!({
            "type": "res",
            "id": id,
            "ok": false,
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    /// Accept the next connect with a plain `hello-ok`.
    pub async fn handshake(&mut self) -> Value {
        let (id, params) = self.recv_connect().await;
        self.reply_ok(&id, hello(None)).await;
        params
    }

    pub async fn event(&mut self, name: &str, payload: Value, seq: Option<u64>) {
        let mut frame = json!({ "type": "event", "event": name, "payload": payload });
        if let Some(seq) = seq {
            frame["seq"] = json!(seq);
        }
        self.send_json(frame).await;
    }

    pub async fn close(&mut self, code: u16, reason: &str) {
        let _ = self
            .ws
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            }))
            .await;
    }
}

pub fn hello(device_token: Option<&str>) -> Value {
    let mut hello = json!({
        "type": "hello-ok",
        "protocol": 3,
        "features": { "methods": ["health", "cron.list"], "events": ["cron", "chat"] }
    });
    if let Some(token) = device_token {
        hello["auth"] = json!({
            "deviceToken": token,
            "role": "operator",
            "scopes": ["operator.admin"],
            "issuedAtMs": 1_700_000_000_000u64
        });
    }
    hello
}

/// Poll `check` until it holds or the step deadline passes.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + STEP;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
