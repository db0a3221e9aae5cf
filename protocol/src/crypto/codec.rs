//! # Canonical Codec
//!
//! Deterministic byte layout for everything that gets hashed. The encoding
//! is independent of serde: JSON and bincode forms may evolve, the canonical
//! form may not (short of bumping [`SCHEMA_VERSION`](crate::config::SCHEMA_VERSION)).
//!
//! ## Layout rules
//!
//! | Value                 | Bytes                                          |
//! |-----------------------|------------------------------------------------|
//! | `u8` / `u16` / `u32` / `u64` | fixed width, little-endian              |
//! | string, byte string   | `u32` LE length, then raw bytes                |
//! | `Hash`, `Address`     | raw fixed-width bytes                          |
//! | big unsigned integer  | `u32` LE length, then minimal LE magnitude     |
//! | list                  | `u32` LE count, then each element              |
//! | optional              | `0x00`, or `0x01` followed by the value        |
//!
//! Fields are appended in declaration order by each type's
//! [`CanonicalEncode`] impl. Every length prefix makes the encoding
//! prefix-free, so two different field tuples never produce the same bytes.

use num_bigint::BigUint;

use super::hash::{blake3_hash, Hash};

/// Types with a canonical byte encoding.
pub trait CanonicalEncode {
    fn encode(&self, enc: &mut CanonicalEncoder);
}

/// Append-only byte buffer implementing the layout rules above.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buf: Vec<u8>,
}

impl CanonicalEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Raw bytes with no length prefix. Only for fixed-width values.
    pub fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.u32(len_u32(bytes.len()));
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.bytes(s.as_bytes())
    }

    /// Minimal little-endian magnitude; zero encodes as an empty byte string.
    pub fn biguint(&mut self, v: &BigUint) -> &mut Self {
        if v.bits() == 0 {
            return self.bytes(&[]);
        }
        self.bytes(&v.to_bytes_le())
    }

    pub fn value<T: CanonicalEncode + ?Sized>(&mut self, v: &T) -> &mut Self {
        v.encode(self);
        self
    }

    pub fn list<T: CanonicalEncode>(&mut self, items: &[T]) -> &mut Self {
        self.u32(len_u32(items.len()));
        for item in items {
            item.encode(self);
        }
        self
    }

    pub fn option<T: CanonicalEncode>(&mut self, v: Option<&T>) -> &mut Self {
        match v {
            None => {
                self.u8(0);
            }
            Some(inner) => {
                self.u8(1);
                inner.encode(self);
            }
        }
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// Collections beyond u32::MAX elements cannot be built inside a block, so
// saturating keeps the function total without a fallible signature.
fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Canonical bytes of a value.
pub fn canonical_bytes<T: CanonicalEncode + ?Sized>(value: &T) -> Vec<u8> {
    let mut enc = CanonicalEncoder::with_capacity(256);
    value.encode(&mut enc);
    enc.into_bytes()
}

/// BLAKE3 of the canonical encoding.
///
/// For transactions the signature is not part of the encoding; for blocks
/// only the header is. See the respective [`CanonicalEncode`] impls.
pub fn hash_full<T: CanonicalEncode + ?Sized>(value: &T) -> Hash {
    Hash::new(blake3_hash(&canonical_bytes(value)))
}

// ---------------------------------------------------------------------------
// Primitive impls
// ---------------------------------------------------------------------------

impl CanonicalEncode for Hash {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.fixed(self.as_bytes());
    }
}

impl CanonicalEncode for String {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.str(self);
    }
}

impl CanonicalEncode for str {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.str(self);
    }
}

impl CanonicalEncode for u64 {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.u64(*self);
    }
}

impl CanonicalEncode for BigUint {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.biguint(self);
    }
}
