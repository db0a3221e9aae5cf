//! # Digital Signatures
//!
//! Recoverable signatures over 32-byte hashes.
//!
//! Ed25519 has no public-key recovery, so a [`Signature`] carries the
//! signer's public key next to the 64-byte signature. "Recovering" the
//! signer is then: verify the signature against the embedded key, and if it
//! holds, derive the address from that key. A caller comparing the recovered
//! address against an expected one gets the same guarantee as ECDSA
//! `ecrecover`: only the holder of that address's key could have produced it.
//!
//! Wire form: `0x` + hex of `public_key (32) || signature (64)`, 96 bytes.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::hash::Hash;
use super::keys::{Address, Keypair, PublicKey};

/// Length of the encoded envelope.
pub const SIGNATURE_ENVELOPE_LENGTH: usize = 32 + 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature must start with 0x")]
    MissingPrefix,

    #[error("signature must be {SIGNATURE_ENVELOPE_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex in signature: {0}")]
    InvalidHex(String),

    #[error("embedded public key is not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// Signer public key plus Ed25519 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    public_key: PublicKey,
    signature: [u8; 64],
}

impl Signature {
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Address of the embedded key *if* the signature over `hash` is valid.
    ///
    /// Returns `None` for a forged or mismatched signature; never panics.
    pub fn recover(&self, hash: &Hash) -> Option<Address> {
        if self.public_key.verify(hash.as_bytes(), &self.signature) {
            Some(self.public_key.address())
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_ENVELOPE_LENGTH] {
        let mut out = [0u8; SIGNATURE_ENVELOPE_LENGTH];
        out[..32].copy_from_slice(self.public_key.as_bytes());
        out[32..].copy_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != SIGNATURE_ENVELOPE_LENGTH {
            return Err(SignatureError::InvalidLength(bytes.len()));
        }
        let public_key =
            PublicKey::try_from_slice(&bytes[..32]).map_err(|_| SignatureError::InvalidPublicKey)?;
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[32..]);
        Ok(Self {
            public_key,
            signature,
        })
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

/// Sign a 32-byte hash with `keypair`.
pub fn sign_hash(keypair: &Keypair, hash: &Hash) -> Signature {
    Signature {
        public_key: keypair.public_key(),
        signature: keypair.sign(hash.as_bytes()),
    }
}

/// Recover the signer of `hash`. Malformed or forged input yields `None`.
pub fn recover(hash: &Hash, signature: &Signature) -> Option<Address> {
    signature.recover(hash)
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").ok_or(SignatureError::MissingPrefix)?;
        let bytes = hex::decode(digits).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = hex::encode(self.signature);
        write!(
            f,
            "Signature(signer={}, sig={}...{})",
            self.public_key.address(),
            &hex_str[..8],
            &hex_str[120..]
        )
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
