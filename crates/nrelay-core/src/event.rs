//! Signed nostr events (NIP-01).
//!
//! Canonical serialization is `[0, pubkey, created_at, kind, tags, content]`
//! encoded as compact JSON; the event id is the lowercase hex SHA-256 of that
//! string and the signature is a BIP-340 Schnorr signature over the id.

use crate::error::{RelayError, RelayResult};
use secp256k1::{schnorr, Keypair, Message, SecretKey, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deletion request (NIP-09).
pub const KIND_DELETION: u16 = 5;

/// Client authentication (NIP-42).
pub const KIND_CLIENT_AUTH: u16 = 22242;

/// A signed nostr event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte lowercase hex SHA-256 of the canonical serialization.
    pub id: String,
    /// 32-byte lowercase hex x-only public key of the author.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// 64-byte lowercase hex Schnorr signature over `id`.
    pub sig: String,
}

/// Unsigned event content, signed into an [`Event`] by [`Event::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl Event {
    /// Canonical serialization used for hashing.
    pub fn serialize(&self) -> RelayResult<String> {
        let serialized = serde_json::to_string(&(
            0,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))?;
        Ok(serialized)
    }

    /// Recompute the id from the event content.
    pub fn compute_id(&self) -> RelayResult<String> {
        let hash = Sha256::digest(self.serialize()?.as_bytes());
        Ok(hex::encode(hash))
    }

    /// Whether the claimed id matches the recomputed one.
    pub fn check_id(&self) -> bool {
        matches!(self.compute_id(), Ok(id) if id == self.id)
    }

    /// Verify the signature over `id` with `pubkey`.
    ///
    /// Returns `Err` when the id, signature or key cannot be decoded at all,
    /// and `Ok(false)` when they decode but the signature does not verify.
    pub fn check_signature(&self) -> RelayResult<bool> {
        let id_bytes = hex::decode(&self.id)?;
        let message = Message::from_digest_slice(&id_bytes)?;

        let sig_bytes = hex::decode(&self.sig)?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)?;

        let pubkey_bytes = hex::decode(&self.pubkey)?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)?;

        Ok(SECP256K1.verify_schnorr(&sig, &message, &pubkey).is_ok())
    }

    /// Sign a template with a 32-byte secret key.
    pub fn sign(template: EventTemplate, secret_key: &[u8; 32]) -> RelayResult<Event> {
        let sk = SecretKey::from_slice(secret_key)
            .map_err(|e| RelayError::InvalidEvent(format!("invalid secret key: {e}")))?;
        let keypair = Keypair::from_secret_key(SECP256K1, &sk);
        let (xonly, _parity) = keypair.x_only_public_key();

        let mut event = Event {
            id: String::new(),
            pubkey: hex::encode(xonly.serialize()),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: String::new(),
        };
        event.id = event.compute_id()?;

        let id_bytes = hex::decode(&event.id)?;
        let message = Message::from_digest_slice(&id_bytes)?;
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&message, &keypair);
        event.sig = hex::encode(sig.serialize());

        Ok(event)
    }

    /// Ephemeral events (20000 <= kind < 30000) are relayed but never stored.
    pub fn is_ephemeral(&self) -> bool {
        (20000..30000).contains(&self.kind)
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }
}
