//! Connect handshake: token selection, device signing, connect params.

use {
    gatelink_auth::{DeviceIdentity, DeviceTokenStore},
    gatelink_protocol::{ClientInfo, ConnectAuth, ConnectParams, DeviceAuthPayload, DeviceInfo},
};

use crate::config::GatewayConfig;

/// Per-attempt handshake bookkeeping, reset on every new socket.
#[derive(Debug, Default)]
pub(crate) struct HandshakeState {
    /// Nonce from `connect.challenge`, if one arrived in time.
    pub nonce: Option<String>,
    /// Guards against sending a second connect request on one socket.
    pub connect_sent: bool,
    /// Device the connect request was signed for.
    pub device_id: Option<String>,
    /// A per-device token was presented while a shared token also exists.
    pub can_fallback_to_shared: bool,
}

/// A connect request ready to send, plus what the response handler needs.
#[derive(Debug)]
pub(crate) struct ConnectPlan {
    pub params: ConnectParams,
    pub device_id: Option<String>,
    pub can_fallback_to_shared: bool,
}

/// Build the `connect` params.
///
/// With a device identity the cached per-device token (if any) wins over
/// the shared token, and a signed `device` block is attached. Without one
/// the request carries only the shared token.
pub(crate) fn plan_connect(
    config: &GatewayConfig,
    identity: Option<&dyn DeviceIdentity>,
    device_tokens: &dyn DeviceTokenStore,
    shared_token: Option<String>,
    nonce: Option<&str>,
    now_ms: u64,
) -> ConnectPlan {
    let stored_token = identity
        .and_then(|id| device_tokens.load(id.device_id(), &config.role))
        .map(|entry| entry.token);
    let can_fallback_to_shared = stored_token.is_some() && shared_token.is_some();
    let auth_token = stored_token.or(shared_token);

    let device = identity.map(|id| {
        let payload = DeviceAuthPayload {
            device_id: id.device_id(),
            client_id: &config.client_id,
            client_mode: &config.mode,
            role: &config.role,
            scopes: &config.scopes,
            signed_at_ms: now_ms,
            token: auth_token.as_deref(),
            nonce,
        }
        .build();
        DeviceInfo {
            id: id.device_id().to_string(),
            public_key: id.public_key().to_string(),
            signature: id.sign(&payload),
            signed_at: now_ms,
            nonce: nonce.map(str::to_string),
        }
    });

    let params = ConnectParams {
        min_protocol: config.min_protocol,
        max_protocol: config.max_protocol,
        client: ClientInfo {
            id: config.client_id.clone(),
            version: config.client_version.clone(),
            platform: config.platform.clone(),
            mode: config.mode.clone(),
            instance_id: config.instance_id.clone(),
        },
        role: config.role.clone(),
        scopes: config.scopes.clone(),
        device,
        caps: Vec::new(),
        auth: auth_token.map(|token| ConnectAuth { token: Some(token) }),
        user_agent: config.user_agent.clone(),
        locale: config.locale.clone(),
    };

    ConnectPlan {
        params,
        device_id: identity.map(|id| id.device_id().to_string()),
        can_fallback_to_shared,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        gatelink_auth::{
            DeviceAuthEntry, Ed25519Identity, MemoryDeviceTokenStore, identity::base64url_decode,
        },
    };

    const NOW: u64 = 1_700_000_000_000;

    fn verify(identity: &Ed25519Identity, payload: &str, signature: &str) -> bool {
        use ed25519_dalek::{Signature, VerifyingKey};
        let public = base64url_decode(identity.public_key()).unwrap();
        let key = VerifyingKey::from_bytes(&public.try_into().unwrap()).unwrap();
        let sig = base64url_decode(signature).unwrap();
        let sig = Signature::from_bytes(&sig.try_into().unwrap());
        key.verify_strict(payload.as_bytes(), &sig).is_ok()
    }

    #[test]
    fn without_identity_only_shared_token_is_sent() {
        let cfg = GatewayConfig::default();
        let tokens = MemoryDeviceTokenStore::new();
        let plan = plan_connect(&cfg, None, &tokens, Some("shared".into()), Some("n"), NOW);

        assert!(plan.params.device.is_none());
        assert!(plan.device_id.is_none());
        assert!(!plan.can_fallback_to_shared);
        assert_eq!(plan.params.auth.unwrap().token.as_deref(), Some("shared"));
    }

    #[test]
    fn no_tokens_omits_auth() {
        let cfg = GatewayConfig::default();
        let tokens = MemoryDeviceTokenStore::new();
        let plan = plan_connect(&cfg, None, &tokens, None, None, NOW);
        assert!(plan.params.auth.is_none());
        assert!(plan.params.caps.is_empty());
    }

    #[test]
    fn device_token_wins_and_enables_fallback() {
        let cfg = GatewayConfig::default();
        let identity = Ed25519Identity::generate();
        let tokens = MemoryDeviceTokenStore::new();
        tokens.store(
            identity.device_id(),
            DeviceAuthEntry::new("device-tok", "operator", vec![]),
        );

        let plan = plan_connect(
            &cfg,
            Some(&identity),
            &tokens,
            Some("shared".into()),
            None,
            NOW,
        );
        assert!(plan.can_fallback_to_shared);
        assert_eq!(plan.params.auth.unwrap().token.as_deref(), Some("device-tok"));
    }

    #[test]
    fn device_token_without_shared_cannot_fall_back() {
        let cfg = GatewayConfig::default();
        let identity = Ed25519Identity::generate();
        let tokens = MemoryDeviceTokenStore::new();
        tokens.store(
            identity.device_id(),
            DeviceAuthEntry::new("device-tok", "operator", vec![]),
        );
        let plan = plan_connect(&cfg, Some(&identity), &tokens, None, None, NOW);
        assert!(!plan.can_fallback_to_shared);
    }

    #[test]
    fn v2_signature_covers_nonce_and_token() {
        let cfg = GatewayConfig::default();
        let identity = Ed25519Identity::generate();
        let tokens = MemoryDeviceTokenStore::new();
        let plan = plan_connect(
            &cfg,
            Some(&identity),
            &tokens,
            Some("shared".into()),
            Some("nonce-1"),
            NOW,
        );
        let device = plan.params.device.unwrap();
        assert_eq!(device.nonce.as_deref(), Some("nonce-1"));
        assert_eq!(device.signed_at, NOW);
        assert_eq!(device.id, identity.device_id());

        let expected = format!(
            "v2|{}|{}|{}|operator|operator.admin|{NOW}|shared|nonce-1",
            identity.device_id(),
            cfg.client_id,
            cfg.mode
        );
        assert!(verify(&identity, &expected, &device.signature));
        assert!(!verify(
            &identity,
            &expected.replace("nonce-1", "nonce-2"),
            &device.signature
        ));
    }

    #[test]
    fn v1_signature_without_nonce() {
        let cfg = GatewayConfig::default();
        let identity = Ed25519Identity::generate();
        let tokens = MemoryDeviceTokenStore::new();
        let plan = plan_connect(&cfg, Some(&identity), &tokens, None, None, NOW);
        let device = plan.params.device.unwrap();
        assert!(device.nonce.is_none());
        let expected = format!(
            "v1|{}|{}|{}|operator|operator.admin|{NOW}|",
            identity.device_id(),
            cfg.client_id,
            cfg.mode
        );
        assert!(verify(&identity, &expected, &device.signature));
    }
}
