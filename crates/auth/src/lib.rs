//! Credentials for talking to a gateway.
//!
//! - [`identity`]: the device keypair that signs the socket handshake
//! - [`device_tokens`]: per-device bearer tokens issued by the gateway
//! - [`session`]: HTTP access/refresh tokens and the single-flight refresh

pub mod device_tokens;
pub mod error;
pub mod identity;
pub mod session;

pub use {
    device_tokens::{
        DeviceAuthEntry, DeviceTokenStore, FileDeviceTokenStore, MemoryDeviceTokenStore,
    },
    error::{Error, Result},
    identity::{DeviceIdentity, Ed25519Identity},
    session::{Session, SessionExpired},
};
