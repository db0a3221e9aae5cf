//! Transaction verification by signature recovery.
//!
//! [`verify_transaction`] recovers the signer from the signing hash and
//! compares it with an expected address. It fails closed on anything
//! malformed.

use super::builder::Transaction;
use super::signing::compute_signing_hash;
use crate::crypto::keys::Address;

/// `true` iff the signature recovers to `address`, or to the transaction's
/// own `sender` when no address is given.
///
/// An unsigned transaction or a forged signature yields `false`; this never
/// panics.
pub fn verify_transaction(tx: &Transaction, address: Option<&Address>) -> bool {
    let Some(signature) = tx.signature() else {
        return false;
    };
    let expected = address.unwrap_or_else(|| tx.sender());
    match signature.recover(&compute_signing_hash(tx)) {
        Some(recovered) => &recovered == expected,
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;
    use crate::crypto::signatures::sign_hash;
    use crate::transaction::builder::{CancelTransactionBuilder, NewTransactionBuilder};
    use crate::transaction::signing::{apply_signature, sign_transaction};
    use crate::transaction::types::{Amount, PurchaseDetails};

    fn purchase() -> Transaction {
        NewTransactionBuilder::new(0, "12345678")
            .timestamp(1_668_044_556)
            .amounts(Amount::from(123u64), Amount::from(100u64))
            .currency("krw")
            .detail(PurchaseDetails::new("PID001", Amount::from(123u64), 300))
            .build()
    }

    #[test]
    fn verify_with_matching_and_wrong_key() {
        let signer1 = Keypair::from_seed(&[11u8; 32]);
        let signer2 = Keypair::from_seed(&[22u8; 32]);
        let tx = sign_transaction(&purchase(), &signer1);

        assert!(!verify_transaction(&tx, Some(&signer2.address())));
        assert!(verify_transaction(&tx, Some(&signer1.address())));
        assert!(verify_transaction(&tx, None));
    }

    #[test]
    fn unsigned_fails_closed() {
        let kp = Keypair::generate();
        assert!(!verify_transaction(&purchase(), None));
        assert!(!verify_transaction(&purchase(), Some(&kp.address())));
    }

    #[test]
    fn sender_swap_breaks_signature() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let signed = sign_transaction(&purchase(), &kp);
        let signature = signed.signature().cloned().unwrap();
        // Claim a different sender while keeping the original signature.
        let forged = apply_signature(signed, signature, other.address());
        assert!(!verify_transaction(&forged, None));
        assert!(!verify_transaction(&forged, Some(&kp.address())));
    }

    #[test]
    fn signature_over_other_transaction_is_rejected() {
        let kp = Keypair::generate();
        let draft = CancelTransactionBuilder::new(1, "x")
            .timestamp(1)
            .sender(kp.address())
            .build();
        let wrong_hash = compute_signing_hash(&purchase());
        let tx = apply_signature(draft, sign_hash(&kp, &wrong_hash), kp.address());
        assert!(!verify_transaction(&tx, None));
        assert!(!verify_transaction(&tx, Some(&kp.address())));
    }
}
