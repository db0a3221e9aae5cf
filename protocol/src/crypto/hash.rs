//! # Hashing Utilities
//!
//! BLAKE3 is the only digest in the ledger. Transaction hashes, Merkle nodes,
//! block header hashes, phone hashes and block content identifiers are all
//! BLAKE3 outputs.
//!
//! The [`Hash`] newtype is the 32-byte identifier that flows through every
//! other module. It prints and serializes as a `0x`-prefixed lowercase hex
//! string, which is also how the ledger contract and HTTP clients see it.
//!
//! ## Domain separation
//!
//! Where the same bytes could be hashed for two different purposes (a phone
//! number vs. anything else), [`domain_separated_hash`] uses BLAKE3's
//! `derive_key` mode so the outputs can never collide.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::PHONE_HASH_CONTEXT;

/// Length of every digest in the protocol.
pub const HASH_LENGTH: usize = 32;

/// Errors when parsing a hex-encoded hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashParseError {
    #[error("hash must start with 0x")]
    MissingPrefix,

    #[error("hash must be {expected} hex digits, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("invalid hex in hash: {0}")]
    InvalidHex(String),
}

/// A 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// The all-zero hash. Previous hash of the first block, `curHash` of the
    /// ledger's genesis record, and the Merkle root of an empty block.
    pub const NULL: Hash = Hash([0u8; HASH_LENGTH]);

    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_LENGTH] {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(HashParseError::MissingPrefix)?;
        if digits.len() != HASH_LENGTH * 2 {
            return Err(HashParseError::WrongLength {
                expected: HASH_LENGTH * 2,
                actual: digits.len(),
            });
        }
        let mut bytes = [0u8; HASH_LENGTH];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| HashParseError::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Digest functions
// ---------------------------------------------------------------------------

/// Compute the BLAKE3 hash of the input data.
///
/// ```
/// use purchase_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"purchase");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 in `derive_key` mode, keyed by a context string.
///
/// `domain_separated_hash("a", x)` and `domain_separated_hash("b", x)` never
/// collide, and neither collides with a plain `blake3_hash(x)`.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash several slices as if they were concatenated, without the buffer.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Hash of a user's phone number, the alternative identification channel to
/// an account address.
///
/// An empty phone number maps to [`Hash::NULL`] so that "no phone" has a
/// stable, recognisable encoding inside transactions.
pub fn phone_hash(phone: &str) -> Hash {
    let phone = phone.trim();
    if phone.is_empty() {
        return Hash::NULL;
    }
    Hash(domain_separated_hash(PHONE_HASH_CONTEXT, phone.as_bytes()))
}
