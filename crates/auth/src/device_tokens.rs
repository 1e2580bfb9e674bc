//! Cached device bearer tokens, keyed by `(device id, role)`.
//!
//! The gateway issues a device token in `hello-ok`; the next handshake
//! presents it instead of the shared token. When that handshake fails the
//! client clears the entry so the following attempt falls back.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::{
    error::Result,
    identity::{now_ms, write_private_file},
};

const STORE_VERSION: u32 = 1;

/// One cached token for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthEntry {
    pub token: String,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub updated_at_ms: u64,
}

impl DeviceAuthEntry {
    pub fn new(token: impl Into<String>, role: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            token: token.into(),
            role: role.into(),
            scopes,
            updated_at_ms: now_ms(),
        }
    }
}

/// Storage seam for device tokens.
pub trait DeviceTokenStore: Send + Sync {
    fn load(&self, device_id: &str, role: &str) -> Option<DeviceAuthEntry>;
    fn store(&self, device_id: &str, entry: DeviceAuthEntry);
    fn clear(&self, device_id: &str, role: &str);
}

// ── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryDeviceTokenStore {
    entries: Mutex<HashMap<(String, String), DeviceAuthEntry>>,
}

impl MemoryDeviceTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceTokenStore for MemoryDeviceTokenStore {
    fn load(&self, device_id: &str, role: &str) -> Option<DeviceAuthEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(device_id.to_string(), role.to_string()))
            .cloned()
    }

    fn store(&self, device_id: &str, entry: DeviceAuthEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((device_id.to_string(), entry.role.clone()), entry);
    }

    fn clear(&self, device_id: &str, role: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(device_id.to_string(), role.to_string()));
    }
}

// ── File-backed store ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTokens {
    version: u32,
    device_id: String,
    #[serde(default)]
    tokens: HashMap<String, DeviceAuthEntry>,
}

/// JSON file holding the tokens of a single device.
///
/// Entries written for another device id are treated as absent.
pub struct FileDeviceTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDeviceTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Default location inside a state directory.
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("identity").join("device-auth.json"))
    }

    fn read(&self) -> Option<StoredTokens> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ignoring unreadable device token file"
                );
                None
            },
        }
    }

    fn write(&self, stored: &StoredTokens) -> Result<()> {
        write_private_file(&self.path, &serde_json::to_string_pretty(stored)?)
    }
}

impl DeviceTokenStore for FileDeviceTokenStore {
    fn load(&self, device_id: &str, role: &str) -> Option<DeviceAuthEntry> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let stored = self.read()?;
        if stored.device_id != device_id {
            return None;
        }
        stored.tokens.get(role).cloned()
    }

    fn store(&self, device_id: &str, entry: DeviceAuthEntry) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = match self.read() {
            Some(stored) if stored.device_id == device_id => stored,
            _ => StoredTokens {
                version: STORE_VERSION,
                device_id: device_id.to_string(),
                tokens: HashMap::new(),
            },
        };
        stored.tokens.insert(entry.role.clone(), entry);
        if let Err(e) = self.write(&stored) {
            warn!(error = %e, "failed to persist device token");
        }
    }

    fn clear(&self, device_id: &str, role: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut stored) = self.read() else {
            return;
        };
        if stored.device_id != device_id || stored.tokens.remove(role).is_none() {
            return;
        }
        if let Err(e) = self.write(&stored) {
            warn!(error = %e, "failed to persist device token removal");
        }
    }
}
