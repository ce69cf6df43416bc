//! Consumer verification paths. Evidence that an order was authorized is a
//! tagged variant: a standalone recomposable proof, or a membership witness
//! against the authoritative map. One dispatch applies the shared
//! caller-identity assertion, then establishes "a valid signature was shown
//! to exist" through whichever strategy the caller chose.

use circuits::{DelegateCore, DelegateProof};
use delegate_map::MapWitness;
use order_codec::{DelegationOrder, TargetAccountId};
use serde::{Deserialize, Serialize};

use crate::error::{Rejection, Result};
use crate::DelegateRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DelegationEvidence {
    /// Standalone proof; the order is the proof's embedded public input.
    /// Generation is the heavy step, done once per order; verification is
    /// cheap and reusable indefinitely.
    Recursive(DelegateProof),
    /// Membership witness against the authoritative state. Cheap to check
    /// but requires an up-to-date root and a freshly built witness.
    Map {
        order: DelegationOrder,
        witness: MapWitness,
    },
}

impl DelegationEvidence {
    /// The order this evidence speaks for
    pub fn order(&self) -> &DelegationOrder {
        match self {
            DelegationEvidence::Recursive(proof) => proof.public_input(),
            DelegationEvidence::Map { order, .. } => order,
        }
    }
}

/// Accept "this caller is authorized via a delegation order" through either
/// strategy. The caller must separately prove control of its identity; here
/// it is asserted equal to the order's target before any evidence check.
pub fn assert_delegation(
    core: &DelegateCore,
    registry: &DelegateRegistry,
    caller: &TargetAccountId,
    evidence: &DelegationEvidence,
) -> Result<()> {
    let order = evidence.order();
    if caller != &order.target {
        return Err(Rejection::CallerMismatch);
    }
    match evidence {
        DelegationEvidence::Recursive(proof) => {
            let ok = core
                .verify_delegate_proof(proof)
                .map_err(|e| Rejection::Internal(e.to_string()))?;
            if !ok {
                return Err(Rejection::SignatureInvalid);
            }
            Ok(())
        }
        DelegationEvidence::Map { order, witness } => registry.confirm(order, witness),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_map::DelegateMap;
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::ecdsa::SigningKey;
    use order_codec::{
        envelope_digest, fr_to_bytes, order_hash, EcdsaSignature, SignerPublicKey,
    };
    use pasta_curves::Fp as Fr;
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
    fn test_both_paths_accept_the_same_delegation() {
        let core = DelegateCore::new().unwrap();
        let mut registry = DelegateRegistry::new();
        let (order, sig) = signed_order(61);
        let key = order_hash(&order);

        // Recursive path
        let proof = core.prove_delegation(&order, &sig).unwrap();
        let recursive = DelegationEvidence::Recursive(proof);
        assert!(assert_delegation(&core, &registry, &order.target, &recursive).is_ok());

        // Map path
        let mut map = DelegateMap::new();
        let wit = map.record_candidate(&key).unwrap().unwrap();
        registry.record(&order, &wit, &sig).unwrap();
        let wit_after = map.query_candidate(&key).unwrap().unwrap();
        let map_evidence = DelegationEvidence::Map { order, witness: wit_after };
        assert!(assert_delegation(&core, &registry, &order.target, &map_evidence).is_ok());
    }

    #[test]
    fn test_caller_mismatch_rejected_regardless_of_validity() {
        let core = DelegateCore::new().unwrap();
        let registry = DelegateRegistry::new();
        let (order, sig) = signed_order(63);
        let (other, _) = signed_order(64);

        let proof = core.prove_delegation(&order, &sig).unwrap();
        let evidence = DelegationEvidence::Recursive(proof);
        // A valid proof presented by the wrong identity is always rejected
        assert_eq!(
            assert_delegation(&core, &registry, &other.target, &evidence),
            Err(Rejection::CallerMismatch)
        );
    }

    #[test]
    fn test_substituted_proof_input_rejected_and_state_untouched() {
        let core = DelegateCore::new().unwrap();
        let registry = DelegateRegistry::new();
        let (order, sig) = signed_order(65);
        let (other, _) = signed_order(66);

        let mut proof = core.prove_delegation(&order, &sig).unwrap();
        proof.order = other;
        let evidence = DelegationEvidence::Recursive(proof);
        let root_before = registry.current_root();
        assert_eq!(
            assert_delegation(&core, &registry, &other.target, &evidence),
            Err(Rejection::SignatureInvalid)
        );
        // A mismatched proof must not corrupt subsequent state reads
        assert_eq!(registry.current_root(), root_before);
    }

    #[test]
    fn test_map_path_not_yet_delegated() {
        let core = DelegateCore::new().unwrap();
        let registry = DelegateRegistry::new();
        let (order, _) = signed_order(67);

        let mut scratch = DelegateMap::new();
        let wit = scratch.record_candidate(&order_hash(&order)).unwrap().unwrap();
        let evidence = DelegationEvidence::Map { order, witness: wit };
        assert_eq!(
            assert_delegation(&core, &registry, &order.target, &evidence),
            Err(Rejection::NotYetDelegated)
        );
    }
}
