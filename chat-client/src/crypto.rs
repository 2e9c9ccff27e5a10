//! Cryptographic primitives for veilchat.
//!
//! This module provides:
//! - X25519 identity key pairs
//! - Sender-authenticated public-key encryption ("box"): X25519 key
//!   agreement, HKDF-SHA256, XChaCha20-Poly1305 with 192-bit nonces
//! - Short public-key fingerprints for out-of-band comparison
//!
//! # Security Notes
//!
//! - The shared secret is symmetric, so the sender and recipient derive the
//!   same box key and either can open what the other sealed
//! - XChaCha20 uses 192-bit nonces (24 bytes), safe for random generation
//! - Non-contributory shared secrets (low-order public keys) are rejected
//! - No forward secrecy: one long-lived key pair per identity

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use chat_types::Envelope;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use chat_types::NONCE_SIZE;

/// Key size for X25519 keys and the derived box key (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Bytes of SHA-256 kept in a fingerprint.
pub const FINGERPRINT_BYTES: usize = 8;

const BOX_SALT: &[u8] = b"veilchat-box-v1";
const BOX_INFO: &[u8] = b"message-encryption";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Envelope could not be split into nonce and ciphertext.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Key text was not valid base64.
    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),

    /// Peer key produced an all-zero shared secret.
    #[error("peer public key is not contributory")]
    WeakPublicKey,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The OS random number generator failed.
    #[error("random generation failed: {0}")]
    Random(String),
}

impl CryptoError {
    /// True for failures opening a received envelope.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed | CryptoError::MalformedEnvelope(_)
        )
    }
}

fn key_array(bytes: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })
}

fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(bytes)
}

/// An X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Wrap raw key bytes, checking the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self(key_array(bytes)?))
    }

    /// Decode a base64 (standard alphabet) key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&raw)
    }

    /// Encode as base64, the form used by the directory and the wire.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Short advisory fingerprint, see [`fingerprint`].
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

/// An X25519 secret key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a fresh random secret key.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(StaticSecret::from(random_bytes::<KEY_SIZE>()?)))
    }

    /// Load a secret key from raw bytes, checking the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self(StaticSecret::from(key_array(bytes)?)))
    }

    /// Export the raw secret bytes (for local storage by the caller).
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*x25519_dalek::PublicKey::from(&self.0).as_bytes())
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// An identity key pair.
#[derive(Clone, Debug)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self::from_secret(SecretKey::generate()?))
    }

    /// Rebuild a key pair from stored secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self::from_secret(SecretKey::from_bytes(bytes)?))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    /// The secret half.
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// The public half.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Seal `plaintext` for `recipient`, returning the base64 wire envelope.
    pub fn seal_for(&self, recipient: &PublicKey, plaintext: &[u8]) -> Result<String, CryptoError> {
        let key = SharedKey::derive(&self.secret, recipient)?;
        Ok(key.seal(plaintext)?.to_base64())
    }

    /// Open a base64 wire envelope sealed by `sender`.
    pub fn open_from(&self, sender: &PublicKey, envelope: &str) -> Result<Vec<u8>, CryptoError> {
        let key = SharedKey::derive(&self.secret, sender)?;
        key.open(&parse_envelope(envelope)?)
    }
}

/// Symmetric box key shared by one pair of identities.
///
/// Derived from the X25519 shared secret via HKDF-SHA256. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Derive the box key between our secret and a peer's public key.
    pub fn derive(ours: &SecretKey, theirs: &PublicKey) -> Result<Self, CryptoError> {
        let shared = ours
            .0
            .diffie_hellman(&x25519_dalek::PublicKey::from(theirs.0));
        if !shared.was_contributory() {
            return Err(CryptoError::WeakPublicKey);
        }

        let hkdf = Hkdf::<Sha256>::new(Some(BOX_SALT), shared.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(BOX_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(key))
    }

    /// Encrypt with a fresh random 192-bit nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let nonce = random_bytes::<NONCE_SIZE>()?;
        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        Ok(Envelope::new(nonce, ciphertext))
    }

    /// Decrypt and authenticate an envelope.
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        cipher
            .decrypt(
                XNonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey([REDACTED])")
    }
}

fn parse_envelope(encoded: &str) -> Result<Envelope, CryptoError> {
    Envelope::from_base64(encoded).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
}

/// Encrypt `plaintext` from the sender to the recipient.
///
/// Returns base64 of `nonce ‖ ciphertext`. Both keys must be 32 bytes.
pub fn encrypt(
    plaintext: &[u8],
    recipient_public_key: &[u8],
    sender_secret_key: &[u8],
) -> Result<String, CryptoError> {
    let recipient = PublicKey::from_bytes(recipient_public_key)?;
    let sender = SecretKey::from_bytes(sender_secret_key)?;
    let key = SharedKey::derive(&sender, &recipient)?;
    Ok(key.seal(plaintext)?.to_base64())
}

/// Decrypt a base64 envelope produced by [`encrypt`].
///
/// Any tampering, wrong key, or malformed input yields an error; it never panics.
pub fn decrypt(
    envelope: &str,
    sender_public_key: &[u8],
    recipient_secret_key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let sender = PublicKey::from_bytes(sender_public_key)?;
    let recipient = SecretKey::from_bytes(recipient_secret_key)?;
    let key = SharedKey::derive(&recipient, &sender)?;
    key.open(&parse_envelope(envelope)?)
}

/// Short, deterministic fingerprint of a public key.
///
/// Base64 of the first 8 bytes of SHA-256 over the key. Advisory only: meant
/// for humans comparing keys out of band, not for authentication.
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    STANDARD.encode(&digest[..FINGERPRINT_BYTES])
}

/// Compute the public key for a 32-byte secret key.
pub fn derive_public_key(secret_key: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    Ok(*SecretKey::from_bytes(secret_key)?.public_key().as_bytes())
}
