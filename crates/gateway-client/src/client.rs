//! Gateway protocol client: one socket, many in-flight requests.
//!
//! A background task owns the socket. It runs the connect handshake,
//! routes inbound frames (responses to the pending table, events to the
//! [`EventHub`]) and reconnects with backoff until [`GatewayClient::stop`].
//! Callers only ever see [`GatewayClient::request`] and friends.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    futures::{SinkExt, StreamExt, future::OptionFuture},
    gatelink_auth::{
        DeviceAuthEntry, DeviceIdentity, DeviceTokenStore, MemoryDeviceTokenStore, Session,
    },
    gatelink_protocol::{
        CONNECT_CHALLENGE_EVENT, CONNECT_METHOD, ConnectChallenge, ErrorShape, GatewayFrame,
        HELLO_OK, HelloOk, RequestFrame, ResponseFrame, close_codes, error_codes,
    },
    secrecy::ExposeSecret,
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tokio::{net::TcpStream, sync::mpsc, task::JoinHandle},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{
            Message,
            protocol::{CloseFrame, frame::coding::CloseCode},
        },
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    backoff::Backoff,
    config::GatewayConfig,
    error::{Error, Result},
    events::{CONNECTED_EVENT, DISCONNECTED_EVENT, EventHub, GAP_EVENT, GatewayEvent},
    handshake::{ConnectPlan, HandshakeState, plan_connect},
    pending::PendingRequests,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Outbound half of the socket currently owned by the connection task.
struct ActiveConn {
    epoch: u64,
    tx: mpsc::UnboundedSender<Message>,
    handshaken: bool,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone)]
struct CloseInfo {
    code: u16,
    reason: String,
}

impl CloseInfo {
    fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(close_codes::ABNORMAL, reason)
    }
}

struct ClientInner {
    config: GatewayConfig,
    identity: Option<Arc<dyn DeviceIdentity>>,
    device_tokens: Arc<dyn DeviceTokenStore>,
    session: Option<Arc<Session>>,
    events: EventHub,
    pending: PendingRequests,
    conn: Mutex<Option<ActiveConn>>,
    next_epoch: AtomicU64,
    closed: AtomicBool,
    running: Mutex<Option<RunHandle>>,
    backoff: Mutex<Backoff>,
    hello: RwLock<Option<HelloOk>>,
}

/// Cloneable handle to one gateway session.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.inner.config.url)
            .field("connected", &self.is_connected())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

pub struct GatewayClientBuilder {
    config: GatewayConfig,
    identity: Option<Arc<dyn DeviceIdentity>>,
    device_tokens: Option<Arc<dyn DeviceTokenStore>>,
    session: Option<Arc<Session>>,
    events: Option<EventHub>,
}

impl GatewayClientBuilder {
    /// Device key used to sign the handshake. Without one the client
    /// connects with the shared token only.
    pub fn identity(mut self, identity: Arc<dyn DeviceIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn device_tokens(mut self, store: Arc<dyn DeviceTokenStore>) -> Self {
        self.device_tokens = Some(store);
        self
    }

    /// HTTP session whose access token is the shared-token fallback and
    /// whose refresh runs after an `UNAUTHORIZED` handshake.
    pub fn session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Publish into an existing hub instead of a private one.
    pub fn events(mut self, hub: EventHub) -> Self {
        self.events = Some(hub);
        self
    }

    pub fn build(self) -> GatewayClient {
        let backoff = Backoff::new(&self.config.backoff);
        GatewayClient {
            inner: Arc::new(ClientInner {
                identity: self.identity,
                device_tokens: self
                    .device_tokens
                    .unwrap_or_else(|| Arc::new(MemoryDeviceTokenStore::new())),
                session: self.session,
                events: self.events.unwrap_or_default(),
                pending: PendingRequests::default(),
                conn: Mutex::new(None),
                next_epoch: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                running: Mutex::new(None),
                backoff: Mutex::new(backoff),
                hello: RwLock::new(None),
                config: self.config,
            }),
        }
    }
}

impl GatewayClient {
    pub fn builder(config: GatewayConfig) -> GatewayClientBuilder {
        GatewayClientBuilder {
            config,
            identity: None,
            device_tokens: None,
            session: None,
            events: None,
        }
    }

    pub fn new(config: GatewayConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    /// Start the connection task if it is not already running.
    ///
    /// Must be called inside a tokio runtime; connection failures are
    /// reported through the close path, never returned here.
    pub fn start(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
        let mut running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|run| !run.task.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("gateway client started outside a tokio runtime");
            return;
        };
        let cancel = CancellationToken::new();
        let task = runtime.spawn(run_loop(Arc::clone(&self.inner), cancel.clone()));
        *running = Some(RunHandle { cancel, task });
    }

    /// Close the socket, stop reconnecting and reject every pending request.
    pub fn stop(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let run = self
            .inner
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(run) = run {
            run.cancel.cancel();
        }
        self.inner
            .conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        *self.inner.hello.write().unwrap_or_else(|e| e.into_inner()) = None;
        let rejected = self.inner.pending.reject_all(|| Error::Stopped);
        if rejected > 0 {
            debug!(rejected, "gateway client stopped with requests in flight");
        }
    }

    /// True once the handshake has completed on a socket that is still open.
    pub fn is_connected(&self) -> bool {
        let conn = self.inner.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.as_ref()
            .is_some_and(|c| c.handshaken && !c.tx.is_closed())
    }

    /// `hello-ok` of the current connection.
    pub fn hello(&self) -> Option<HelloOk> {
        self.inner
            .hello
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether both handles drive the same connection.
    pub fn same_client(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Delay the next reconnect attempt will wait.
    pub fn reconnect_delay(&self) -> Duration {
        self.inner
            .backoff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current()
    }

    /// Send `method` and wait up to `timeout` for its response payload.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&RequestFrame::new(&id, method, params))?;

        // Registered under the connection lock so a concurrent close either
        // sees the entry or rejects us before it is written.
        let rx = {
            let conn = self.inner.conn.lock().unwrap_or_else(|e| e.into_inner());
            let Some(active) = conn.as_ref().filter(|c| !c.tx.is_closed()) else {
                return Err(Error::NotConnected);
            };
            let rx = self.inner.pending.insert(&id, method, active.epoch);
            if active.tx.send(Message::Text(frame.into())).is_err() {
                self.inner.pending.remove(&id);
                return Err(Error::NotConnected);
            }
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Stopped),
            Err(_) => {
                self.inner.pending.remove(&id);
                debug!(method, %id, "gateway request timed out");
                Err(Error::Timeout {
                    method: method.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            },
        }
    }

    /// [`request`](Self::request) with the configured default timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request(method, params, self.inner.config.request_timeout())
            .await
    }

    /// [`call`](Self::call), deserializing the payload into `T`.
    pub async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let payload = self.call(method, params).await?;
        Ok(serde_json::from_value(payload)?)
    }
}

// ── Connection task ──────────────────────────────────────────────────────────

async fn run_loop(inner: Arc<ClientInner>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() || inner.closed.load(Ordering::SeqCst) {
            break;
        }
        let epoch = inner.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(url = %inner.config.url, epoch, "opening gateway socket");

        let attempt = tokio::select! {
            () = cancel.cancelled() => break,
            result = connect_async(inner.config.url.as_str()) => result,
        };
        match attempt {
            Ok((ws, _)) => {
                let close = run_connection(&inner, epoch, ws, &cancel).await;
                inner.on_close(epoch, &close, true);
            },
            Err(e) => {
                inner.on_close(epoch, &CloseInfo::abnormal(e.to_string()), false);
            },
        }

        if cancel.is_cancelled() || inner.closed.load(Ordering::SeqCst) {
            break;
        }
        let delay = inner
            .backoff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "gateway reconnect scheduled");
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {},
        }
    }
    debug!("gateway connection task finished");
}

/// Drive one open socket until it closes. Returns why it closed.
async fn run_connection(
    inner: &Arc<ClientInner>,
    epoch: u64,
    ws: WsStream,
    cancel: &CancellationToken,
) -> CloseInfo {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let outbound = tx.clone();
    *inner.conn.lock().unwrap_or_else(|e| e.into_inner()) = Some(ActiveConn {
        epoch,
        tx,
        handshaken: false,
    });

    let mut handshake = HandshakeState::default();
    let mut last_seq: Option<u64> = None;
    let mut connect: Option<ConnectFuture> = None;
    let quiet = tokio::time::sleep(inner.config.connect_quiet_period());
    tokio::pin!(quiet);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                let _ = sink.send(close_message(close_codes::NORMAL, "client stopped")).await;
                return CloseInfo::new(close_codes::NORMAL, "client stopped");
            },
            Some(msg) = rx.recv() => {
                if let Err(e) = sink.send(msg).await {
                    return CloseInfo::abnormal(e.to_string());
                }
            },
            () = &mut quiet, if !handshake.connect_sent => {
                debug!("no connect challenge, connecting without nonce");
                connect = Some(inner.begin_connect(&mut handshake));
            },
            Some(result) = OptionFuture::from(connect.as_mut()) => {
                connect = None;
                if let Err(close) = inner.finish_connect(epoch, &handshake, result) {
                    let _ = sink.send(close_message(close.code, &close.reason)).await;
                    return close;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(nonce) = inner.handle_text(text.as_str(), &mut last_seq, &outbound)
                        && !handshake.connect_sent
                    {
                        handshake.nonce = Some(nonce);
                        connect = Some(inner.begin_connect(&mut handshake));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    return frame.map_or_else(
                        || CloseInfo::abnormal("closed without status"),
                        |f| CloseInfo::new(u16::from(f.code), f.reason.as_str()),
                    );
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => return CloseInfo::abnormal(e.to_string()),
                None => return CloseInfo::abnormal("socket ended"),
            },
        }
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl ClientInner {
    /// Shared gateway token: configured, else the HTTP session's access token.
    fn shared_token(&self) -> Option<String> {
        self.config
            .token
            .as_ref()
            .map(|t| t.expose_secret().clone())
            .or_else(|| self.session.as_ref().and_then(|s| s.access_token()))
    }

    fn begin_connect(self: &Arc<Self>, handshake: &mut HandshakeState) -> ConnectFuture {
        handshake.connect_sent = true;
        let ConnectPlan {
            params,
            device_id,
            can_fallback_to_shared,
        } = plan_connect(
            &self.config,
            self.identity.as_deref(),
            self.device_tokens.as_ref(),
            self.shared_token(),
            handshake.nonce.as_deref(),
            now_ms(),
        );
        debug!(
            signed = device_id.is_some(),
            nonce = handshake.nonce.is_some(),
            "sending connect"
        );
        handshake.device_id = device_id;
        handshake.can_fallback_to_shared = can_fallback_to_shared;

        let client = GatewayClient {
            inner: Arc::clone(self),
        };
        let timeout = self.config.request_timeout();
        Box::pin(async move {
            let params = serde_json::to_value(&params)?;
            client.request(CONNECT_METHOD, Some(params), timeout).await
        })
    }

    /// Apply the connect outcome. `Err` carries the close to send.
    fn finish_connect(
        &self,
        epoch: u64,
        handshake: &HandshakeState,
        result: Result<Value>,
    ) -> std::result::Result<(), CloseInfo> {
        let hello = result
            .and_then(|payload| Ok(serde_json::from_value::<HelloOk>(payload)?))
            .and_then(|hello| {
                if hello.r#type == HELLO_OK {
                    Ok(hello)
                } else {
                    Err(Error::message(format!("unexpected connect reply: {}", hello.r#type)))
                }
            });
        match hello {
            Ok(hello) => {
                if let (Some(device_id), Some(auth)) = (&handshake.device_id, &hello.auth)
                    && let Some(token) = &auth.device_token
                {
                    let scopes = auth
                        .scopes
                        .clone()
                        .unwrap_or_else(|| self.config.scopes.clone());
                    self.device_tokens.store(
                        device_id,
                        DeviceAuthEntry::new(token.clone(), self.config.role.clone(), scopes),
                    );
                }
                self.backoff
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .reset();
                {
                    let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(active) = conn.as_mut()
                        && active.epoch == epoch
                    {
                        active.handshaken = true;
                    }
                }
                *self.hello.write().unwrap_or_else(|e| e.into_inner()) = Some(hello.clone());
                info!(url = %self.config.url, protocol = hello.protocol, "gateway connected");
                let payload = serde_json::to_value(&hello).unwrap_or(Value::Null);
                self.events
                    .publish(&GatewayEvent::new(CONNECTED_EVENT, payload));
                Ok(())
            },
            // Torn down with the client, not refused by the gateway.
            Err(e)
                if self.closed.load(Ordering::SeqCst)
                    || matches!(e, Error::Stopped | Error::ConnectionClosed { .. }) =>
            {
                debug!("connect abandoned");
                Err(CloseInfo::new(close_codes::NORMAL, "client stopped"))
            },
            Err(e) => {
                warn!(error = %e, "gateway handshake failed");
                if handshake.can_fallback_to_shared
                    && let Some(device_id) = &handshake.device_id
                {
                    debug!("dropping cached device token");
                    self.device_tokens.clear(device_id, &self.config.role);
                }
                if e.gateway_code() == Some(error_codes::UNAUTHORIZED)
                    && let Some(session) = &self.session
                    && session.has_refresh_token()
                {
                    let session = Arc::clone(session);
                    tokio::spawn(async move {
                        if let Err(e) = session.refresh().await {
                            debug!(error = %e, "token refresh after handshake failed");
                        }
                    });
                }
                Err(CloseInfo::new(close_codes::CONNECT_FAILED, "connect failed"))
            },
        }
    }

    /// Route one text frame. Returns the nonce of a `connect.challenge`.
    fn handle_text(
        &self,
        text: &str,
        last_seq: &mut Option<u64>,
        outbound: &mpsc::UnboundedSender<Message>,
    ) -> Option<String> {
        let Some(frame) = GatewayFrame::parse(text) else {
            debug!(len = text.len(), "dropping malformed gateway frame");
            return None;
        };
        match frame {
            GatewayFrame::Event(event) => {
                let payload = event.payload.unwrap_or(Value::Null);
                if event.event == CONNECT_CHALLENGE_EVENT {
                    return match serde_json::from_value::<ConnectChallenge>(payload) {
                        Ok(challenge) => Some(challenge.nonce),
                        Err(_) => {
                            debug!("connect challenge without nonce ignored");
                            None
                        },
                    };
                }
                if let Some(seq) = event.seq {
                    if let Some(expected) = (*last_seq).and_then(|last| last.checked_add(1))
                        && seq > expected
                    {
                        warn!(expected, received = seq, "gateway event gap");
                        self.events.publish(&GatewayEvent::new(
                            GAP_EVENT,
                            json!({ "expected": expected, "received": seq }),
                        ));
                    }
                    *last_seq = Some(seq);
                }
                self.events.publish(&GatewayEvent {
                    event: event.event,
                    payload,
                    seq: event.seq,
                });
            },
            GatewayFrame::Response(res) => {
                let outcome = if res.ok {
                    Ok(res.payload.unwrap_or(Value::Null))
                } else {
                    Err(Error::Gateway(res.error.unwrap_or_else(|| {
                        ErrorShape::new(error_codes::UNAVAILABLE, "request failed")
                    })))
                };
                if !self.pending.resolve(&res.id, outcome) {
                    debug!(id = %res.id, "response for unknown request ignored");
                }
            },
            GatewayFrame::Request(req) => {
                debug!(method = %req.method, "rejecting gateway-initiated request");
                let reply = ResponseFrame::err(
                    req.id,
                    ErrorShape::new(
                        error_codes::UNKNOWN_METHOD,
                        format!("unknown method: {}", req.method),
                    ),
                );
                if let Ok(text) = serde_json::to_string(&reply) {
                    let _ = outbound.send(Message::Text(text.into()));
                }
            },
        }
        None
    }

    fn on_close(&self, epoch: u64, close: &CloseInfo, opened: bool) {
        {
            let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            if conn.as_ref().is_some_and(|c| c.epoch == epoch) {
                *conn = None;
                *self.hello.write().unwrap_or_else(|e| e.into_inner()) = None;
            }
        }
        let rejected = self.pending.reject_connection(epoch, || Error::ConnectionClosed {
            code: close.code,
            reason: close.reason.clone(),
        });

        if !opened {
            debug!(reason = %close.reason, "gateway socket failed to open");
            return;
        }
        info!(
            code = close.code,
            reason = %close.reason,
            rejected,
            "gateway disconnected"
        );
        self.events.publish(&GatewayEvent::new(
            DISCONNECTED_EVENT,
            json!({ "code": close.code, "reason": close.reason }),
        ));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, crate::events::EventCategory};

    #[tokio::test]
    async fn request_without_socket_fails_fast() {
        let client = GatewayClient::new(GatewayConfig::default());
        let err = client
            .request("cron.list", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(client.pending_count(), 0);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let client = GatewayClient::new(GatewayConfig::new("ws://127.0.0.1:9"));
        client.stop();
        client.stop();
        assert!(!client.is_connected());
        assert!(client.hello().is_none());
    }

    #[test]
    fn start_outside_runtime_does_not_panic() {
        let client = GatewayClient::new(GatewayConfig::default());
        client.start();
        assert!(!client.is_connected());
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let client = GatewayClient::new(GatewayConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut last = None;
        assert!(client.inner.handle_text("not json", &mut last, &tx).is_none());
        assert!(
            client
                .inner
                .handle_text(r#"{"type":"bogus"}"#, &mut last, &tx)
                .is_none()
        );
    }

    #[test]
    fn challenge_yields_nonce() {
        let client = GatewayClient::new(GatewayConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut last = None;
        let nonce = client.inner.handle_text(
            r#"{"type":"event","event":"connect.challenge","payload":{"nonce":"abc","ts":1}}"#,
            &mut last,
            &tx,
        );
        assert_eq!(nonce.as_deref(), Some("abc"));
    }

    #[test]
    fn server_request_gets_unknown_method() {
        let client = GatewayClient::new(GatewayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut last = None;
        client.inner.handle_text(
            r#"{"type":"req","id":"s1","method":"node.invoke"}"#,
            &mut last,
            &tx,
        );
        let Message::Text(reply) = rx.try_recv().unwrap() else {
            panic!("expected text reply");
        };
        let reply: Value = serde_json::from_str(reply.as_str()).unwrap();
        assert_eq!(reply["id"], "s1");
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["code"], "UNKNOWN_METHOD");
    }

    #[test]
    fn seq_gap_is_published_before_event() {
        let client = GatewayClient::new(GatewayConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = client.events().subscribe_all(move |ev| {
            sink.lock().unwrap().push((ev.event.clone(), ev.payload.clone()));
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut last = None;
        for seq in [1, 2, 5] {
            client.inner.handle_text(
                &format!(r#"{{"type":"event","event":"cron","payload":{{}},"seq":{seq}}}"#),
                &mut last,
                &tx,
            );
        }
        let seen = seen.lock().unwrap();
        let names: Vec<&str> = seen.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["cron", "cron", GAP_EVENT, "cron"]);
        assert_eq!(seen[2].1, json!({ "expected": 3, "received": 5 }));
    }

    #[test]
    fn seq_at_max_does_not_overflow() {
        let client = GatewayClient::new(GatewayConfig::default());
        let gaps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&gaps);
        let _sub = client.events().subscribe(EventCategory::Connection, move |ev| {
            sink.lock().unwrap().push(ev.payload.clone());
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut last = None;
        for seq in [u64::MAX, 1, 3] {
            client.inner.handle_text(
                &format!(r#"{{"type":"event","event":"cron","payload":{{}},"seq":{seq}}}"#),
                &mut last,
                &tx,
            );
        }
        assert_eq!(last, Some(3));
        assert_eq!(*gaps.lock().unwrap(), vec![json!({ "expected": 2, "received": 3 })]);
    }

    #[tokio::test]
    async fn response_resolves_pending_entry() {
        let client = GatewayClient::new(GatewayConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut last = None;
        let ok = client.inner.pending.insert("r1", "health", 1);
        let failed = client.inner.pending.insert("r2", "cron.remove", 1);

        client.inner.handle_text(
            r#"{"type":"res","id":"r2","ok":false,"error":{"code":"NOT_FOUND","message":"job not found"}}"#,
            &mut last,
            &tx,
        );
        client.inner.handle_text(r#"{"type":"res","id":"r1","ok":true}"#, &mut last, &tx);

        assert_eq!(ok.await.unwrap().unwrap(), Value::Null);
        let err = failed.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "job not found");
        assert_eq!(err.gateway_code(), Some("NOT_FOUND"));
    }
}
