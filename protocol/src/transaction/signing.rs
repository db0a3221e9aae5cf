//! Transaction signing.
//!
//! Signing is two pure steps: [`compute_signing_hash`] and
//! [`apply_signature`]. Neither mutates its input, so a remote signer can
//! sit between them. [`sign_transaction`] composes both for a local key.
//!
//! The signer's address is part of the hashed payload. Signing therefore
//! sets `sender` first and hashes afterwards, which binds the signature to
//! the address it claims to come from.

use super::builder::Transaction;
use crate::crypto::codec::hash_full;
use crate::crypto::hash::Hash;
use crate::crypto::keys::{Address, Keypair};
use crate::crypto::signatures::{sign_hash, Signature};

/// The hash a signer signs: `hash_full` of the transaction. The signature
/// field is never encoded, so signed and unsigned copies agree.
pub fn compute_signing_hash(tx: &Transaction) -> Hash {
    hash_full(tx)
}

/// Returns a copy of `tx` carrying `signature`, with `sender` set to `signer`.
///
/// The caller must have produced `signature` over the signing hash of a
/// transaction whose sender was already `signer`, otherwise verification
/// will fail.
pub fn apply_signature(tx: Transaction, signature: Signature, signer: Address) -> Transaction {
    tx.with_signer(Some(signature), signer)
}

/// Sign `tx` with `keypair`. Any previous signature and sender are replaced.
///
/// ```
/// use purchase_protocol::crypto::keys::Keypair;
/// use purchase_protocol::transaction::{sign_transaction, verify_transaction, CancelTransactionBuilder};
///
/// let kp = Keypair::generate();
/// let tx = CancelTransactionBuilder::new(0, "P0001").build();
/// let signed = sign_transaction(&tx, &kp);
/// assert!(verify_transaction(&signed, Some(&kp.address())));
/// ```
pub fn sign_transaction(tx: &Transaction, keypair: &Keypair) -> Transaction {
    let signer = keypair.address();
    let draft = tx.clone().with_signer(None, signer);
    let hash = compute_signing_hash(&draft);
    apply_signature(draft, sign_hash(keypair, &hash), signer)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
