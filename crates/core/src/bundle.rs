//! Signed bundles
//!
//! A bundle is a batch of changes sealed by a chain's signing key:
//!
//! ```text
//! signature(64) ∥ BundleBuilder
//! ```
//!
//! [`Bundler`] collects changes and seals them; [`BundleWrapper`] parses
//! received bytes and exposes the [`BundleInfo`] used for chain tracking.

use crate::bundle_info::BundleInfo;
use crate::crypto::{self, SigningKey, VerifyingKey};
use crate::error::{Error, Result};
use crate::proto::{BundleBuilder, ChangeBuilder};
use crate::types::{Chain, MuTimestamp, Muid};
use prost::Message;

// =============================================================================
// BundleWrapper
// =============================================================================

/// Parsed view over the bytes of a signed bundle.
#[derive(Debug, Clone)]
pub struct BundleWrapper {
    bytes: Vec<u8>,
    builder: BundleBuilder,
    info: BundleInfo,
}

impl BundleWrapper {
    /// Parse signed bundle bytes.
    ///
    /// # Errors
    /// Returns `InvalidBundle` when the body can't be decoded or the
    /// identity fields disagree with the chain position.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let (_, body) = crypto::split_signed(&bytes)?;
        let builder = BundleBuilder::decode(body)
            .map_err(|e| Error::InvalidBundle(format!("can't decode body: {e}")))?;
        if builder.medallion <= 0 || builder.timestamp <= 0 || builder.chain_start <= 0 {
            return Err(Error::InvalidBundle(
                "bundle lacks timestamp, medallion or chain start".to_string(),
            ));
        }
        let is_start = builder.timestamp == builder.chain_start;
        if is_start && (builder.identity.is_none() || builder.verify_key.is_empty()) {
            return Err(Error::InvalidBundle(
                "chain start must carry identity and verify key".to_string(),
            ));
        }
        if !is_start && (builder.identity.is_some() || !builder.verify_key.is_empty()) {
            return Err(Error::InvalidBundle(
                "only a chain start may carry identity or verify key".to_string(),
            ));
        }
        let info = BundleInfo::from_builder(&builder, crypto::digest(&bytes));
        Ok(Self {
            bytes,
            builder,
            info,
        })
    }

    /// The signed bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the wrapper, returning the signed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The decoded body.
    pub fn builder(&self) -> &BundleBuilder {
        &self.builder
    }

    /// Metadata for chain tracking.
    pub fn info(&self) -> &BundleInfo {
        &self.info
    }

    /// blake2b-256 of the signed bytes.
    pub fn hash(&self) -> [u8; 32] {
        self.info.hash.unwrap_or_default()
    }

    /// Hex form of [`BundleWrapper::hash`].
    pub fn hex_hash(&self) -> String {
        hex::encode(self.hash())
    }

    /// The verify key carried by a chain start.
    pub fn verify_key(&self) -> Result<Option<VerifyingKey>> {
        if self.builder.verify_key.is_empty() {
            return Ok(None);
        }
        crypto::verifying_key(&self.builder.verify_key).map(Some)
    }

    /// Check the signature with the chain's verify key.
    pub fn verify(&self, verify_key: &VerifyingKey) -> Result<()> {
        crypto::verify_signed(verify_key, &self.bytes)
    }

    /// Changes of the bundle, decrypting with `symmetric_key` when needed.
    pub fn changes(&self, symmetric_key: Option<&[u8]>) -> Result<Vec<ChangeBuilder>> {
        match (&self.builder.encrypted, self.builder.key_id) {
            (None, _) => Ok(self.builder.changes.clone()),
            (Some(_), _) if !self.builder.changes.is_empty() => Err(Error::InvalidBundle(
                "did not expect plain changes when using encryption".to_string(),
            )),
            (Some(_), None) => Err(Error::InvalidBundle(
                "encrypted bundle without a key id".to_string(),
            )),
            (Some(encrypted), Some(_)) => {
                let key = symmetric_key.ok_or_else(|| {
                    Error::InvalidBundle("no symmetric key for encrypted bundle".to_string())
                })?;
                let plain = crypto::decrypt(key, encrypted)
                    .map_err(|e| Error::InvalidBundle(e.to_string()))?;
                let inner = BundleBuilder::decode(plain.as_slice())
                    .map_err(|e| Error::InvalidBundle(format!("can't decode payload: {e}")))?;
                Ok(inner.changes)
            }
        }
    }
}

// =============================================================================
// Bundler
// =============================================================================

/// Everything needed to seal a bundle onto a chain.
#[derive(Debug, Clone, Copy)]
pub struct Sealing<'a> {
    /// Chain being extended
    pub chain: Chain,
    /// Timestamp of the new bundle
    pub timestamp: MuTimestamp,
    /// Timestamp of the chain head (0 for a chain start)
    pub previous: MuTimestamp,
    /// Hash of the chain head (none for a chain start)
    pub prior_hash: Option<[u8; 32]>,
    /// Identity recorded by a chain start
    pub identity: &'a str,
    /// Key the chain signs with
    pub signing_key: &'a SigningKey,
    /// Encrypt the changes with this key when set
    pub symmetric_key: Option<&'a [u8]>,
}

/// Collects changes destined for a single bundle.
#[derive(Debug, Clone, Default)]
pub struct Bundler {
    changes: Vec<ChangeBuilder>,
    comment: String,
}

impl Bundler {
    /// Start an empty bundle.
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            changes: Vec::new(),
            comment: comment.into(),
        }
    }

    /// Append a change, returning its muid relative to the sealed bundle.
    pub fn add_change(&mut self, change: ChangeBuilder) -> Muid {
        self.changes.push(change);
        Muid::new(0, 0, self.changes.len() as i32)
    }

    /// Number of changes collected.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Comment that will be attached to the bundle.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Set the comment.
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Sign (and optionally encrypt) the collected changes.
    pub fn seal(self, sealing: Sealing<'_>) -> Result<BundleWrapper> {
        let is_start = sealing.timestamp == sealing.chain.chain_start;
        let mut builder = BundleBuilder {
            timestamp: sealing.timestamp,
            medallion: sealing.chain.medallion,
            chain_start: sealing.chain.chain_start,
            previous: sealing.previous,
            comment: self.comment,
            ..Default::default()
        };
        if is_start {
            builder.identity = Some(sealing.identity.to_string());
            builder.verify_key = sealing.signing_key.verifying_key().to_bytes().to_vec();
        } else {
            let prior = sealing.prior_hash.ok_or_else(|| {
                Error::InvalidOperation("extending a chain requires the prior hash".to_string())
            })?;
            builder.prior_hash = prior.to_vec();
        }
        match sealing.symmetric_key {
            Some(key) => {
                let payload = BundleBuilder {
                    changes: self.changes,
                    ..Default::default()
                };
                builder.key_id = Some(crypto::key_id(key));
                builder.encrypted = Some(crypto::encrypt(key, &payload.encode_to_vec())?);
            }
            None => builder.changes = self.changes,
        }
        let signed = crypto::sign(sealing.signing_key, &builder.encode_to_vec());
        BundleWrapper::new(signed)
    }
}
