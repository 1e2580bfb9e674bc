//! Client for the gateway WebSocket protocol.
//!
//! [`GatewayClient`] keeps one authenticated socket open, multiplexes
//! requests over it and reconnects with backoff. Server-push events are
//! fanned out through an [`EventHub`]; [`Gateway`] is the connection
//! manager that creates the client lazily on first subscription.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
mod handshake;
pub mod manager;
mod pending;

pub use {
    backoff::Backoff,
    client::{GatewayClient, GatewayClientBuilder},
    config::{BackoffConfig, GatewayConfig},
    error::{Error, Result},
    events::{
        CONNECTED_EVENT, DISCONNECTED_EVENT, EventCategory, EventHub, GAP_EVENT, GatewayEvent,
        Listener, Subscription,
    },
    manager::Gateway,
};
