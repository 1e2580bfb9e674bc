//! Connection manager: owns the single [`GatewayClient`] of a process (or
//! test) and starts it on first use.

use std::sync::{Arc, OnceLock};

use gatelink_auth::{DeviceIdentity, DeviceTokenStore, Session};

use crate::{
    client::GatewayClient,
    config::GatewayConfig,
    events::{EventCategory, EventHub, GatewayEvent, Subscription},
};

pub struct Gateway {
    config: GatewayConfig,
    identity: Option<Arc<dyn DeviceIdentity>>,
    device_tokens: Option<Arc<dyn DeviceTokenStore>>,
    session: Option<Arc<Session>>,
    events: EventHub,
    client: OnceLock<GatewayClient>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            identity: None,
            device_tokens: None,
            session: None,
            events: EventHub::new(),
            client: OnceLock::new(),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn DeviceIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_device_tokens(mut self, store: Arc<dyn DeviceTokenStore>) -> Self {
        self.device_tokens = Some(store);
        self
    }

    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// The managed client, created and started on first call. Later calls
    /// return the same client and restart it if it was shut down.
    pub fn client(&self) -> &GatewayClient {
        let client = self.client.get_or_init(|| {
            let mut builder =
                GatewayClient::builder(self.config.clone()).events(self.events.clone());
            if let Some(identity) = &self.identity {
                builder = builder.identity(Arc::clone(identity));
            }
            if let Some(store) = &self.device_tokens {
                builder = builder.device_tokens(Arc::clone(store));
            }
            if let Some(session) = &self.session {
                builder = builder.session(Arc::clone(session));
            }
            builder.build()
        });
        client.start();
        client
    }

    /// Whether the client has been created yet.
    pub fn is_started(&self) -> bool {
        self.client.get().is_some()
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn subscribe<F>(&self, category: EventCategory, listener: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        let subscription = self.events.subscribe(category, listener);
        self.client();
        subscription
    }

    pub fn subscribe_cron_events<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Cron, listener)
    }

    pub fn subscribe_chat_events<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Chat, listener)
    }

    pub fn subscribe_connection_events<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Connection, listener)
    }

    /// Stop the client if one was created. Listeners stay registered.
    pub fn shutdown(&self) {
        if let Some(client) = self.client.get() {
            client.stop();
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribing_creates_one_client() {
        let gateway = Gateway::new(GatewayConfig::new("ws://127.0.0.1:9"));
        assert!(!gateway.is_started());

        let _a = gateway.subscribe_cron_events(|_| {});
        let first = gateway.client().clone();
        let _b = gateway.subscribe_chat_events(|_| {});
        let second = gateway.client().clone();

        assert!(gateway.is_started());
        assert_eq!(gateway.events().listener_count(), 2);
        assert!(first.same_client(&second));
        gateway.shutdown();
    }
}
