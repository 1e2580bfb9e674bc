//! HTTP session credentials and the shared token-refresh policy.
//!
//! At most one refresh runs at a time per [`Session`]. Concurrent callers
//! await the same in-flight future instead of issuing a second network
//! call, and all of them observe the same outcome. A failed refresh clears
//! the stored tokens and broadcasts [`SessionExpired`].

use std::sync::{Arc, Mutex, RwLock};

use {
    futures::future::{BoxFuture, FutureExt, Shared},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
};

use crate::error::{Error, Result};

const EXPIRED_CHANNEL_CAPACITY: usize = 16;

/// Process-wide notification that the session could not be renewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpired {
    pub reason: String,
}

type RefreshFuture = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token", alias = "token", rename = "accessToken")]
    access_token: String,
    #[serde(alias = "refresh_token", rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

pub struct Session {
    http: reqwest::Client,
    refresh_url: String,
    access: RwLock<Option<Secret<String>>>,
    refresh: RwLock<Option<Secret<String>>>,
    inflight: Mutex<Option<RefreshFuture>>,
    expired_tx: broadcast::Sender<SessionExpired>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("refresh_url", &self.refresh_url)
            .field("has_access_token", &self.access_token().is_some())
            .field("has_refresh_token", &self.has_refresh_token())
            .finish()
    }
}

impl Session {
    pub fn new(http: reqwest::Client, refresh_url: impl Into<String>) -> Self {
        let (expired_tx, _) = broadcast::channel(EXPIRED_CHANNEL_CAPACITY);
        Self {
            http,
            refresh_url: refresh_url.into(),
            access: RwLock::new(None),
            refresh: RwLock::new(None),
            inflight: Mutex::new(None),
            expired_tx,
        }
    }

    pub fn with_tokens(self, access: Option<String>, refresh: Option<String>) -> Self {
        self.set_tokens(access, refresh);
        self
    }

    pub fn access_token(&self) -> Option<String> {
        let access = self.access.read().unwrap_or_else(|e| e.into_inner());
        access.as_ref().map(|s| s.expose_secret().clone())
    }

    pub fn has_refresh_token(&self) -> bool {
        let refresh = self.refresh.read().unwrap_or_else(|e| e.into_inner());
        refresh.is_some()
    }

    fn refresh_token(&self) -> Option<String> {
        let refresh = self.refresh.read().unwrap_or_else(|e| e.into_inner());
        refresh.as_ref().map(|s| s.expose_secret().clone())
    }

    /// Replace both tokens. `None` clears the respective token.
    pub fn set_tokens(&self, access: Option<String>, refresh: Option<String>) {
        *self.access.write().unwrap_or_else(|e| e.into_inner()) = access.map(Secret::new);
        *self.refresh.write().unwrap_or_else(|e| e.into_inner()) = refresh.map(Secret::new);
    }

    pub fn clear(&self) {
        self.set_tokens(None, None);
    }

    /// Receive [`SessionExpired`] notifications.
    pub fn subscribe_expired(&self) -> broadcast::Receiver<SessionExpired> {
        self.expired_tx.subscribe()
    }

    fn expire(&self, reason: &str) {
        self.clear();
        warn!(%reason, "session expired");
        let _ = self.expired_tx.send(SessionExpired {
            reason: reason.to_string(),
        });
    }

    /// Renew the access token, joining an in-flight refresh when one exists.
    pub async fn refresh(self: &Arc<Self>) -> Result<()> {
        let fut = {
            let mut slot = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(existing) => {
                    debug!("joining in-flight token refresh");
                    existing.clone()
                },
                None => {
                    // Runs to completion even if every awaiter goes away, and
                    // the slot only holds the join handle.
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let outcome = this.refresh_once().await.map_err(|e| e.to_string());
                        if let Err(reason) = &outcome {
                            this.expire(reason);
                        }
                        *this.inflight.lock().unwrap_or_else(|e| e.into_inner()) = None;
                        outcome
                    });
                    let fut = async move {
                        task.await
                            .unwrap_or_else(|e| Err(format!("token refresh aborted: {e}")))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                },
            }
        };
        fut.await.map_err(Error::Refresh)
    }

    async fn refresh_once(&self) -> Result<()> {
        let refresh_token = self.refresh_token().ok_or(Error::NoRefreshToken)?;
        let resp = self
            .http
            .post(&self.refresh_url)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Refresh(format!("refresh failed: {status}")));
        }
        let body: RefreshResponse = resp.json().await?;
        let next_refresh = body.refresh_token.or(Some(refresh_token));
        self.set_tokens(Some(body.access_token), next_refresh);
        info!("access token refreshed");
        Ok(())
    }
}
