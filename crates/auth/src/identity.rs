//! Device identity: a stable Ed25519 keypair generated once and persisted.
//!
//! The device id is the lowercase hex SHA-256 of the raw public key, which
//! lets the gateway re-derive and check it from the `publicKey` field.
//! Keys and signatures travel as unpadded base64url.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    base64::Engine,
    ed25519_dalek::{Signer, SigningKey},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tracing::{debug, info},
};

use crate::error::{Error, Result};

const IDENTITY_FILE_VERSION: u32 = 1;

/// Something that can prove possession of a device key.
///
/// Its availability is what gates the signed `device` block of the
/// connect request: a client without an identity connects with the shared
/// token only.
pub trait DeviceIdentity: Send + Sync {
    fn device_id(&self) -> &str;

    /// Unpadded base64url of the raw public key.
    fn public_key(&self) -> &str;

    /// Sign `payload` and return the unpadded base64url signature.
    fn sign(&self, payload: &str) -> String;
}

/// Ed25519 identity backed by `ed25519-dalek`.
pub struct Ed25519Identity {
    signing_key: SigningKey,
    device_id: String,
    public_key: String,
}

impl std::fmt::Debug for Ed25519Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Identity")
            .field("device_id", &self.device_id)
            .field("public_key", &self.public_key)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    version: u32,
    device_id: String,
    public_key: String,
    private_key: String,
    created_at_ms: u64,
}

impl Ed25519Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_raw = signing_key.verifying_key().to_bytes();
        Self {
            device_id: derive_device_id(&public_raw),
            public_key: base64url_encode(&public_raw),
            signing_key,
        }
    }

    /// Load the identity stored at `path`, creating and persisting a new
    /// one when the file does not exist.
    ///
    /// A stored identity whose device id does not match its public key is
    /// repaired in place rather than rejected.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let stored: StoredIdentity = serde_json::from_str(&raw)?;
            let identity = Self::from_stored(&stored)?;
            if identity.device_id != stored.device_id {
                debug!(path = %path.display(), "repairing stored device id");
                identity.persist(path, stored.created_at_ms)?;
            }
            return Ok(identity);
        }

        let identity = Self::generate();
        identity.persist(path, now_ms())?;
        info!(device_id = %identity.device_id, "generated new device identity");
        Ok(identity)
    }

    fn from_stored(stored: &StoredIdentity) -> Result<Self> {
        let private = base64url_decode(&stored.private_key)?;
        let seed = <[u8; 32]>::try_from(private.as_slice())
            .map_err(|_| Error::identity("private key must be 32 bytes"))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    fn persist(&self, path: &Path, created_at_ms: u64) -> Result<()> {
        let stored = StoredIdentity {
            version: IDENTITY_FILE_VERSION,
            device_id: self.device_id.clone(),
            public_key: self.public_key.clone(),
            private_key: base64url_encode(&self.signing_key.to_bytes()),
            created_at_ms,
        };
        write_private_file(path, &serde_json::to_string_pretty(&stored)?)
    }
}

impl DeviceIdentity for Ed25519Identity {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn public_key(&self) -> &str {
        &self.public_key
    }

    fn sign(&self, payload: &str) -> String {
        base64url_encode(&self.signing_key.sign(payload.as_bytes()).to_bytes())
    }
}

/// Default location of the identity file inside a state directory.
pub fn identity_path(state_dir: &Path) -> PathBuf {
    state_dir.join("identity").join("device.json")
}

/// Hex SHA-256 of the raw public key.
pub fn derive_device_id(public_key_raw: &[u8]) -> String {
    format!("{:x}", Sha256::digest(public_key_raw))
}

pub fn base64url_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('=').as_bytes())
        .map_err(|e| Error::identity(format!("invalid base64url: {e}")))
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write `contents` to `path` readable by the owner only.
pub(crate) fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    {
        use std::{
            io::Write,
            os::unix::fs::{OpenOptionsExt, PermissionsExt},
        };
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        // `mode` only applies on creation; tighten a file that already existed.
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        file.write_all(contents.as_bytes())?;
    }
    #[cfg(not(unix))]
    fs::write(path, contents)?;
    Ok(())
}
