//! Envelope - the encrypted payload as it travels through the relay.
//!
//! On the wire an envelope is a single base64 string (standard alphabet,
//! padded) of `nonce ‖ ciphertext`. The relay only checks its shape; it never
//! holds the keys to open it.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::ChatError;

/// Nonce size in bytes (XChaCha20-Poly1305 uses 192-bit nonces).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Smallest decoded envelope: a nonce plus the tag of an empty plaintext.
pub const MIN_ENVELOPE_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Decoded `nonce ‖ ciphertext` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Random per-encryption nonce
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD ciphertext including the trailing tag
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Build an envelope from its parts.
    pub fn new(nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// Encode as the base64 wire string.
    pub fn to_base64(&self) -> String {
        let mut raw = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.ciphertext);
        STANDARD.encode(raw)
    }

    /// Decode a base64 wire string, splitting the nonce off the front.
    pub fn from_base64(encoded: &str) -> Result<Self, ChatError> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ChatError::InvalidEnvelope(format!("not base64: {e}")))?;
        if raw.len() < MIN_ENVELOPE_SIZE {
            return Err(ChatError::InvalidEnvelope(format!(
                "{} bytes, need at least {MIN_ENVELOPE_SIZE}",
                raw.len()
            )));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&raw[..NONCE_SIZE]);
        Ok(Self {
            nonce,
            ciphertext: raw[NONCE_SIZE..].to_vec(),
        })
    }

    /// Total decoded size in bytes.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// Always false: an envelope carries at least a nonce.
    pub fn is_empty(&self) -> bool {
        false
    }
}
