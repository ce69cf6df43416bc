#![forbid(unsafe_code)]
//! # registry
//!
//! Verifier state machine holding the authoritative delegate map root.
//! `record` is the only state-mutating transition and is gated on an inline
//! signature assertion plus the old-value witness assertion; `confirm` is a
//! read-only membership check. Concurrency is optimistic: a competing record
//! that lands first stales every other in-flight witness, and the rejected
//! caller retries with refreshed state. Retry policy belongs to the caller.

use ff::Field;
use order_codec::{fr_to_bytes, order_hash, verify_signature, DelegationOrder, EcdsaSignature};
use pasta_curves::Fp as Fr;
use serde::{Deserialize, Serialize};

use delegate_map::{empty_root_bytes, leaf_for, MapWitness};

pub mod evidence;
pub use error::Rejection;
pub use evidence::{assert_delegation, DelegationEvidence};

pub mod error {
    use thiserror::Error as ThisError;
    pub type Result<T> = core::result::Result<T, Rejection>;

    /// Rejection taxonomy surfaced synchronously to the immediate caller
    #[derive(Debug, Clone, PartialEq, Eq, ThisError)]
    pub enum Rejection {
        /// Unrecoverable without a new, correct signature from the signer
        #[error("signature invalid for delegation order")]
        SignatureInvalid,
        /// Recoverable: refetch the root and regenerate the witness
        #[error("witness stale or inconsistent with current root")]
        WitnessStale,
        /// Duplicate insertion; treat as success-already-achieved
        #[error("order already delegated")]
        AlreadyDelegated,
        /// Must not be treated as proof of authorization
        #[error("order not yet delegated")]
        NotYetDelegated,
        /// Fatal to this operation; never retried with the same identity
        #[error("caller does not match order target")]
        CallerMismatch,
        #[error("internal: {0}")]
        Internal(String),
    }
}

use error::Result;

fn internal(e: anyhow::Error) -> Rejection {
    Rejection::Internal(e.to_string())
}

/// Auditable record of one accepted delegation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedDelegation {
    pub order: DelegationOrder,
    pub order_hash: [u8; 32],
    pub prev_root: [u8; 32],
    pub new_root: [u8; 32],
}

/// Authoritative delegate set state: a single root, evolving only forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateRegistry {
    root: [u8; 32],
    recorded: Vec<RecordedDelegation>,
}

impl Default for DelegateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegateRegistry {
    /// Start at the well-known empty-map root
    pub fn new() -> Self {
        Self { root: empty_root_bytes(), recorded: Vec::new() }
    }

    /// Resume from an externally-fetched committed root
    pub fn with_root(root: [u8; 32]) -> Self {
        Self { root, recorded: Vec::new() }
    }

    /// Current committed root
    pub fn current_root(&self) -> [u8; 32] {
        self.root
    }

    /// Audit log of accepted transitions, oldest first
    pub fn recorded(&self) -> &[RecordedDelegation] {
        &self.recorded
    }

    /// Record a delegation: assert the signature inline, assert the witness
    /// against the current root under the claim "this key holds 0", then
    /// commit the value-1 root. Compare-and-swap semantics: a witness built
    /// against any earlier root fails the old-value assertion outright.
    pub fn record(
        &mut self,
        order: &DelegationOrder,
        witness: &MapWitness,
        sig: &EcdsaSignature,
    ) -> Result<[u8; 32]> {
        if verify_signature(order, sig).is_err() {
            tracing::warn!(slot = witness.index, "record rejected: signature invalid");
            return Err(Rejection::SignatureInvalid);
        }
        let key = order_hash(order);
        if witness.key != key {
            return Err(Rejection::WitnessStale);
        }

        let delegated_leaf = leaf_for(&key).map_err(internal)?;
        let one_root = fr_to_bytes(witness.compute_root_for(delegated_leaf).map_err(internal)?);
        if witness.value != 0 || one_root == self.root {
            return Err(Rejection::AlreadyDelegated);
        }
        let zero_root = fr_to_bytes(witness.compute_root_for(Fr::ZERO).map_err(internal)?);
        if zero_root != self.root {
            tracing::warn!(slot = witness.index, "record rejected: witness stale");
            return Err(Rejection::WitnessStale);
        }

        let prev_root = self.root;
        self.root = one_root;
        self.recorded.push(RecordedDelegation {
            order: *order,
            order_hash: key,
            prev_root,
            new_root: one_root,
        });
        tracing::info!(slot = witness.index, "delegation recorded");
        Ok(one_root)
    }

    /// Confirm a delegation: assert the witness against the current root
    /// under the claim "this key holds 1". Read-only; no state mutation.
    pub fn confirm(&self, order: &DelegationOrder, witness: &MapWitness) -> Result<()> {
        let key = order_hash(order);
        if witness.key != key {
            return Err(Rejection::WitnessStale);
        }
        if witness.value == 0 {
            return Err(Rejection::NotYetDelegated);
        }
        let delegated_leaf = leaf_for(&key).map_err(internal)?;
        let one_root = fr_to_bytes(witness.compute_root_for(delegated_leaf).map_err(internal)?);
        if one_root == self.root {
            return Ok(());
        }
        // Distinguish "never delegated" from a genuinely stale witness
        let zero_root = fr_to_bytes(witness.compute_root_for(Fr::ZERO).map_err(internal)?);
        if zero_root == self.root {
            return Err(Rejection::NotYetDelegated);
        }
        Err(Rejection::WitnessStale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_map::DelegateMap;
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::ecdsa::SigningKey;
    use order_codec::{envelope_digest, SignerPublicKey, TargetAccountId};
    use rand::rngs::OsRng;

    fn signed_order(tag: u64) -> (DelegationOrder, EcdsaSignature) {
        let sk = SigningKey::random(&mut OsRng);
        let signer = SignerPublicKey::from_verifying_key(sk.verifying_key());
        let target = TargetAccountId::new(fr_to_bytes(Fr::from(tag)), tag % 2 == 1).unwrap();
        let order = DelegationOrder { target, signer };
        let sig: k256::ecdsa::Signature = sk.sign_prehash(&envelope_digest(&order)).unwrap();
        (order, EcdsaSignature::from_k256(&sig))
    }

    #[test]
    fn test_record_moves_root_forward() {
        let mut registry = DelegateRegistry::new();
        assert_eq!(registry.current_root(), empty_root_bytes());

        let (order, sig) = signed_order(1);
        let mut map = DelegateMap::new();
        let wit = map.record_candidate(&order_hash(&order)).unwrap().unwrap();

        let root1 = registry.record(&order, &wit, &sig).unwrap();
        assert_ne!(root1, empty_root_bytes());
        assert_eq!(registry.current_root(), root1);
        assert_eq!(registry.current_root(), map.root());
        assert_eq!(registry.recorded().len(), 1);
        assert_eq!(registry.recorded()[0].prev_root, empty_root_bytes());
    }

    #[test]
    fn test_replayed_witness_rejected_as_duplicate() {
        let mut registry = DelegateRegistry::new();
        let (order, sig) = signed_order(2);
        let mut map = DelegateMap::new();
        let wit0 = map.record_candidate(&order_hash(&order)).unwrap().unwrap();

        registry.record(&order, &wit0, &sig).unwrap();
        // Same order, same (now stale) witness: the old-value assertion
        // resolves to the already-committed root
        assert_eq!(
            registry.record(&order, &wit0, &sig),
            Err(Rejection::AlreadyDelegated)
        );
        assert_eq!(registry.recorded().len(), 1);
    }

    #[test]
    fn test_corrupted_signature_rejected() {
        let mut registry = DelegateRegistry::new();
        let (order, sig) = signed_order(3);
        let mut map = DelegateMap::new();
        let wit = map.record_candidate(&order_hash(&order)).unwrap().unwrap();

        let mut bad = sig;
        bad.s[31] ^= 0x01;
        assert_eq!(
            registry.record(&order, &wit, &bad),
            Err(Rejection::SignatureInvalid)
        );
        // The intended transition never happened
        assert_eq!(registry.current_root(), empty_root_bytes());
        assert!(registry.recorded().is_empty());
    }

    #[test]
    fn test_confirm_rejects_old_value_witness() {
        let mut registry = DelegateRegistry::new();
        let (order, sig) = signed_order(4);
        let mut map = DelegateMap::new();
        let wit_before = map.record_candidate(&order_hash(&order)).unwrap().unwrap();

        registry.record(&order, &wit_before, &sig).unwrap();
        // Witness built before the record still claims value 0
        assert_eq!(
            registry.confirm(&order, &wit_before),
            Err(Rejection::NotYetDelegated)
        );
    }

    #[test]
    fn test_confirm_accepts_fresh_witness() {
        let mut registry = DelegateRegistry::new();
        let (order, sig) = signed_order(5);
        let mut map = DelegateMap::new();
        let key = order_hash(&order);
        let wit = map.record_candidate(&key).unwrap().unwrap();
        registry.record(&order, &wit, &sig).unwrap();

        let wit_after = map.query_candidate(&key).unwrap().unwrap();
        assert!(registry.confirm(&order, &wit_after).is_ok());
        // Read-only: the root did not move
        assert_eq!(registry.current_root(), map.root());
    }

    #[test]
    fn test_confirm_never_delegated() {
        let registry = DelegateRegistry::new();
        let (order, _) = signed_order(6);
        let map = DelegateMap::new();
        assert!(map.query_candidate(&order_hash(&order)).unwrap().is_none());

        // A forged value-1 claim over the empty path resolves to "still 0"
        let mut forged = DelegateMap::new()
            .record_candidate(&order_hash(&order))
            .unwrap()
            .unwrap();
        forged.value = 1;
        assert_eq!(
            registry.confirm(&order, &forged),
            Err(Rejection::NotYetDelegated)
        );
    }

    #[test]
    fn test_racing_insert_loses_with_stale_witness() {
        let mut registry = DelegateRegistry::new();
        let (order_a, sig_a) = signed_order(7);
        let (order_b, sig_b) = signed_order(8);

        // Both candidates built against the same (empty) state
        let mut map_a = DelegateMap::new();
        let mut map_b = DelegateMap::new();
        let wit_a = map_a.record_candidate(&order_hash(&order_a)).unwrap().unwrap();
        let wit_b = map_b.record_candidate(&order_hash(&order_b)).unwrap().unwrap();

        registry.record(&order_a, &wit_a, &sig_a).unwrap();
        // The competing record's witness no longer matches the current root
        assert_eq!(
            registry.record(&order_b, &wit_b, &sig_b),
            Err(Rejection::WitnessStale)
        );

        // Full retry: rebuild from refreshed map contents and resubmit
        let mut refreshed = map_a.clone();
        let wit_b2 = refreshed.record_candidate(&order_hash(&order_b)).unwrap().unwrap();
        let root2 = registry.record(&order_b, &wit_b2, &sig_b).unwrap();
        assert_eq!(root2, refreshed.root());
    }

    #[test]
    fn test_mismatched_witness_key_rejected() {
        let mut registry = DelegateRegistry::new();
        let (order_a, sig_a) = signed_order(9);
        let (order_b, _) = signed_order(10);
        let mut map = DelegateMap::new();
        let wit_b = map.record_candidate(&order_hash(&order_b)).unwrap().unwrap();

        // Witness for a different order's key
        assert_eq!(
            registry.record(&order_a, &wit_b, &sig_a),
            Err(Rejection::WitnessStale)
        );
    }

    #[test]
    fn test_monotonic_accumulation() {
        let mut registry = DelegateRegistry::new();
        let mut map = DelegateMap::new();
        let mut orders = Vec::new();
        for tag in 20..25u64 {
            let (order, sig) = signed_order(tag);
            let wit = map.record_candidate(&order_hash(&order)).unwrap().unwrap();
            registry.record(&order, &wit, &sig).unwrap();
            orders.push(order);
        }
        assert_eq!(registry.recorded().len(), 5);
        // Every recorded order still confirms under the final root
        for order in &orders {
            let wit = map.query_candidate(&order_hash(order)).unwrap().unwrap();
            assert!(registry.confirm(order, &wit).is_ok());
        }
    }

    #[test]
    fn test_with_root_resync() {
        let mut registry = DelegateRegistry::new();
        let (order, sig) = signed_order(30);
        let mut map = DelegateMap::new();
        let key = order_hash(&order);
        let wit = map.record_candidate(&key).unwrap().unwrap();
        let root1 = registry.record(&order, &wit, &sig).unwrap();

        // A fresh registry resumed from the committed root confirms too
        let resumed = DelegateRegistry::with_root(root1);
        let wit_after = map.query_candidate(&key).unwrap().unwrap();
        assert!(resumed.confirm(&order, &wit_after).is_ok());
    }
}
