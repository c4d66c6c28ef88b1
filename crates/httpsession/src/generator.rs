//! Session identifier generation and validation.
//!
//! Identifiers are self-authenticating: a random nonce followed by a keyed
//! SHA-256 tag over that nonce. Validity is decided from the identifier and
//! the generator key alone; whether a store holds an entry for it is a
//! separate question.

use std::fmt;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use http::request::Parts;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::id::SessionId;

/// Default length in bytes of a freshly generated generator key.
pub const DEFAULT_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 18;
const TAG_LEN: usize = 18;
/// 18 bytes encode to exactly 24 base64 characters without padding.
const ENCODED_PART_LEN: usize = 24;

/// Length of identifiers produced by [`KeyedHashGenerator`].
pub const SESSION_ID_LEN: usize = ENCODED_PART_LEN * 2;

/// Produces fresh session identifiers and checks their well-formedness.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh, unpredictable identifier for this request.
    fn generate(&self, request: &Parts) -> SessionId;

    /// Whether `id` is structurally valid (format and signature only).
    fn is_valid(&self, id: &SessionId) -> bool;
}

/// Return `len` bytes of fresh random key material.
pub fn generate_key(len: usize) -> Vec<u8> {
    let mut key = vec![0u8; len];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Generator producing `nonce || SHA-256(key || nonce)` identifiers.
#[derive(Clone)]
pub struct KeyedHashGenerator {
    key: Vec<u8>,
}

impl KeyedHashGenerator {
    /// Create a generator over the given secret key.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Create a generator with a random key. Identifiers it issues do not
    /// survive a process restart.
    pub fn random() -> Self {
        Self::new(generate_key(DEFAULT_KEY_LEN))
    }

    fn tag(&self, nonce: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update(nonce);
        let digest = hasher.finalize();

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&digest[..TAG_LEN]);
        tag
    }
}

impl fmt::Debug for KeyedHashGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedHashGenerator")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl IdGenerator for KeyedHashGenerator {
    fn generate(&self, request: &Parts) -> SessionId {
        let mut seed = [0u8; 24];
        rand::rng().fill_bytes(&mut seed);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(seed);
        if let Some(addr) = request.extensions.get::<SocketAddr>() {
            hasher.update(addr.to_string().as_bytes());
        }
        hasher.update(request.uri.to_string().as_bytes());
        hasher.update(nanos.to_le_bytes());
        let digest = hasher.finalize();

        let nonce = &digest[..NONCE_LEN];
        let mut id = URL_SAFE_NO_PAD.encode(nonce);
        id.push_str(&URL_SAFE_NO_PAD.encode(self.tag(nonce)));
        SessionId::new(id)
    }

    fn is_valid(&self, id: &SessionId) -> bool {
        let raw = id.as_str();
        if raw.len() != SESSION_ID_LEN || !raw.is_ascii() {
            return false;
        }

        let (nonce, tag) = raw.split_at(ENCODED_PART_LEN);
        let (Ok(nonce), Ok(tag)) = (URL_SAFE_NO_PAD.decode(nonce), URL_SAFE_NO_PAD.decode(tag))
        else {
            return false;
        };
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return false;
        }

        self.tag(&nonce).ct_eq(&tag).into()
    }
}
