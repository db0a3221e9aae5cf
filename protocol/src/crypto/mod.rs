//! # Cryptographic Primitives
//!
//! Everything that gets hashed or signed flows through here:
//!
//! - **codec** - the canonical byte encoding fed to the hash function.
//! - **hash** - the 32-byte [`Hash`] type and BLAKE3 helpers.
//! - **keys** - Ed25519 keypairs and 20-byte addresses.
//! - **signatures** - recoverable signature envelopes over hashes.
//!
//! Nothing in this module implements a primitive. BLAKE3 and Ed25519 come
//! from their audited crates; this layer only fixes byte layouts and types.

pub mod codec;
pub mod hash;
pub mod keys;
pub mod signatures;

pub use codec::{canonical_bytes, hash_full, CanonicalEncode, CanonicalEncoder};
pub use hash::{blake3_hash, blake3_hash_multi, domain_separated_hash, phone_hash, Hash};
pub use keys::{Address, Keypair, PublicKey};
pub use signatures::{recover, sign_hash, Signature};
