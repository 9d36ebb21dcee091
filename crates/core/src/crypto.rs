//! Signing, hashing and symmetric encryption of bundles
//!
//! - Signed bundles are `signature(64) ∥ body` (ed25519 over the body)
//! - Bundle hashes are blake2b-256 over the whole signed bytes
//! - Encrypted payloads are `nonce(24) ∥ ciphertext` (XChaCha20-Poly1305)

use crate::error::{Error, Result};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signature, Signer, Verifier};
use rand::rngs::OsRng;
use rand::RngCore;

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Length of an ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;
/// Length of symmetric keys.
pub const SYMMETRIC_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const KEY_ID_MASK: u64 = (1 << 52) - 1;

type Blake2b256 = Blake2b<U32>;

/// blake2b-256 digest.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake2b256::digest(data));
    out
}

/// Generate a fresh signing key.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Produce `signature ∥ body`.
pub fn sign(signing_key: &SigningKey, body: &[u8]) -> Vec<u8> {
    let signature = signing_key.sign(body);
    let mut out = Vec::with_capacity(SIGNATURE_LEN + body.len());
    out.extend_from_slice(&signature.to_bytes());
    out.extend_from_slice(body);
    out
}

/// Split signed bytes into `(signature, body)`.
pub fn split_signed(signed: &[u8]) -> Result<(&[u8], &[u8])> {
    if signed.len() < SIGNATURE_LEN {
        return Err(Error::InvalidBundle(format!(
            "signed bundle shorter than a signature: {} bytes",
            signed.len()
        )));
    }
    Ok(signed.split_at(SIGNATURE_LEN))
}

/// Parse a 32-byte verify key.
pub fn verifying_key(bytes: &[u8]) -> Result<VerifyingKey> {
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::CryptoError(format!("verify key must be 32 bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| Error::CryptoError(e.to_string()))
}

/// Parse a 32-byte signing key.
pub fn signing_key(bytes: &[u8]) -> Result<SigningKey> {
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::CryptoError(format!("signing key must be 32 bytes, got {}", bytes.len())))?;
    Ok(SigningKey::from_bytes(&raw))
}

/// Check the signature of `signature ∥ body` bytes.
///
/// # Errors
/// Returns `InvalidBundle` when the signature does not verify.
pub fn verify_signed(verify_key: &VerifyingKey, signed: &[u8]) -> Result<()> {
    let (signature, body) = split_signed(signed)?;
    let mut raw = [0u8; SIGNATURE_LEN];
    raw.copy_from_slice(signature);
    verify_key
        .verify(body, &Signature::from_bytes(&raw))
        .map_err(|e| Error::InvalidBundle(format!("bad signature: {e}")))
}

/// Generate a random symmetric key.
pub fn generate_symmetric_key() -> [u8; SYMMETRIC_KEY_LEN] {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// 52-bit identifier of a symmetric key: the leading bytes of its digest.
pub fn key_id(symmetric_key: &[u8]) -> u64 {
    let hash = digest(symmetric_key);
    let mut leading = [0u8; 8];
    leading.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(leading) & KEY_ID_MASK
}

fn cipher(symmetric_key: &[u8]) -> Result<XChaCha20Poly1305> {
    if symmetric_key.len() != SYMMETRIC_KEY_LEN {
        return Err(Error::CryptoError(format!(
            "expecting {SYMMETRIC_KEY_LEN} byte symmetric keys"
        )));
    }
    Ok(XChaCha20Poly1305::new(Key::from_slice(symmetric_key)))
}

/// Encrypt into `nonce ∥ ciphertext`.
pub fn encrypt(symmetric_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let sealed = cipher(symmetric_key)?
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::CryptoError(e.to_string()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Inverse of [`encrypt`].
pub fn decrypt(symmetric_key: &[u8], encrypted: &[u8]) -> Result<Vec<u8>> {
    if encrypted.len() < NONCE_LEN {
        return Err(Error::CryptoError("ciphertext shorter than nonce".to_string()));
    }
    let (nonce, sealed) = encrypted.split_at(NONCE_LEN);
    cipher(symmetric_key)?
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|e| Error::CryptoError(format!("could not decrypt: {e}")))
}
