#![forbid(unsafe_code)]
//! # order_codec
//! Numan Thabit 2025
//! Canonical framing, hashing, and native signature verification for
//! delegation orders. Exposes the exact bytes an external signer must sign
//! and the exact key used by the authenticated delegate map.

use ff::{Field, FromUniformBytes, PrimeField};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::VerifyingKey;
use k256::EncodedPoint;
use pasta_curves::Fp as Fr;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Fixed domain-separation prefix of the canonical delegation message
pub const ORDER_MESSAGE_PREFIX: &[u8] = b"delegate-mini:order:v1";

/// Textual preamble of the external chain's signing envelope. The envelope is
/// preamble || decimal byte length || message; the signed digest is
/// Keccak-256 over the whole envelope.
pub const SIGNING_ENVELOPE_PREAMBLE: &[u8] = b"\x19Ethereum Signed Message:\n";

/// Domain tags (v1) shared by the native hash mirrors, the delegate map, and
/// the circuits. Tag cells are constrained constant in-circuit.
pub mod delegate_tags {
    pub const TAG_TARGET_V1: u64 = 101;
    pub const TAG_SIGNER_V1: u64 = 102;
    pub const TAG_ORDER_V1: u64 = 103;
    pub const TAG_MSG_V1: u64 = 104;
    pub const TAG_CHAL_V1: u64 = 105;
    pub const TAG_SIG_V1: u64 = 106;
    pub const TAG_BIND_V1: u64 = 107;
    pub const TAG_LEAF_V1: u64 = 111;
    pub const TAG_NODE_V1: u64 = 112;
    pub const TAG_FOLD_V1: u64 = 121;
}

pub type Result<T> = core::result::Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("non-canonical field encoding")]
    NonCanonicalField,
    #[error("signer coordinates are not a valid secp256k1 point")]
    InvalidSignerPoint,
    #[error("signature scalars are out of range")]
    MalformedSignature,
    #[error("signature does not verify for this order")]
    SignatureRejected,
}

/// Chain-2 account being authorized: a compressed Pasta-style public key,
/// `x` in canonical little-endian field encoding plus the y-parity bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAccountId {
    pub x: [u8; 32],
    pub is_odd: bool,
}

impl TargetAccountId {
    /// Validates that `x` is a canonical base field encoding.
    pub fn new(x: [u8; 32], is_odd: bool) -> Result<Self> {
        if fr_from_bytes(&x).is_none() {
            return Err(CodecError::NonCanonicalField);
        }
        Ok(Self { x, is_odd })
    }

    pub fn x_fr(&self) -> Fr {
        // Canonicity was checked at construction
        fr_from_bytes(&self.x).unwrap_or(Fr::ZERO)
    }

    pub fn parity_fr(&self) -> Fr {
        if self.is_odd {
            Fr::ONE
        } else {
            Fr::ZERO
        }
    }
}

/// Chain-1 secp256k1 public key in big-endian affine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerPublicKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl SignerPublicKey {
    /// Validates the coordinates against the curve equation.
    pub fn new(x: [u8; 32], y: [u8; 32]) -> Result<Self> {
        let key = Self { x, y };
        key.to_verifying_key()?;
        Ok(key)
    }

    pub fn from_verifying_key(vk: &VerifyingKey) -> Self {
        let point = vk.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        // Uncompressed SEC1 encoding always carries both coordinates
        x.copy_from_slice(point.x().expect("uncompressed point has x"));
        y.copy_from_slice(point.y().expect("uncompressed point has y"));
        Self { x, y }
    }

    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        let x = k256::FieldBytes::from(self.x);
        let y = k256::FieldBytes::from(self.y);
        let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
        VerifyingKey::from_encoded_point(&point).map_err(|_| CodecError::InvalidSignerPoint)
    }
}

/// Externally produced (r, s) pair over secp256k1, big-endian scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl EcdsaSignature {
    pub fn from_k256(sig: &k256::ecdsa::Signature) -> Self {
        let (r, s) = sig.split_scalars();
        Self {
            r: r.to_bytes().into(),
            s: s.to_bytes().into(),
        }
    }
}

/// Immutable delegation order: `signer` (chain-1) authorizes `target`
/// (chain-2) to act on its behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationOrder {
    pub target: TargetAccountId,
    pub signer: SignerPublicKey,
}

/// Canonical message committed by the signature: fixed prefix, fixed-width
/// target coordinate, explicit parity byte. Signer-agnostic by design; the
/// signature, not the message, ties a specific signer to the order.
pub fn canonical_message(order: &DelegationOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(ORDER_MESSAGE_PREFIX.len() + 33);
    out.extend_from_slice(ORDER_MESSAGE_PREFIX);
    out.extend_from_slice(&order.target.x);
    out.push(order.target.is_odd as u8);
    out
}

/// Wrap a message in the external chain's standard signing envelope.
pub fn signing_envelope(message: &[u8]) -> Vec<u8> {
    let len = message.len().to_string();
    let mut out = Vec::with_capacity(SIGNING_ENVELOPE_PREAMBLE.len() + len.len() + message.len());
    out.extend_from_slice(SIGNING_ENVELOPE_PREAMBLE);
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(message);
    out
}

/// Keccak-256 digest of the enveloped canonical message; this is the exact
/// prehash an external signer signs.
pub fn envelope_digest(order: &DelegationOrder) -> [u8; 32] {
    let envelope = signing_envelope(&canonical_message(order));
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(&envelope));
    out
}

/// Map arbitrary 32 bytes into the field via domain-separated uniform bytes
pub fn to_fr_uniform(bytes: &[u8; 32]) -> Fr {
    use std::io::Read as _;
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"delegate:fr:uniform:v1");
    hasher.update(bytes);
    let mut xof = hasher.finalize_xof();
    let mut wide = [0u8; 64];
    // XOF read from BLAKE3 should never fail with a fixed-size buffer
    xof.read_exact(&mut wide)
        .expect("BLAKE3 XOF read_exact should never fail with fixed-size buffer");
    Fr::from_uniform_bytes(&wide)
}

pub fn fr_to_bytes(v: Fr) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(v.to_repr().as_ref());
    out
}

pub fn fr_from_bytes(bytes: &[u8; 32]) -> Option<Fr> {
    Option::<Fr>::from(Fr::from_repr(*bytes))
}

/// Native Poseidon mirrors of the in-circuit compositions
pub mod poseidon {
    use super::Fr;
    use halo2_gadgets::poseidon::primitives::{self as poseidon_primitives, ConstantLength, P128Pow5T3};

    /// Width-3, rate-2 Poseidon matching the in-circuit chip configuration
    pub fn hash3(tag: u64, a: Fr, b: Fr) -> Fr {
        poseidon_primitives::Hash::<Fr, P128Pow5T3, ConstantLength<3>, 3, 2>::init()
            .hash([Fr::from(tag), a, b])
    }
}

/// Target commitment: H(TAG_TARGET, x, parity)
pub fn target_commitment_fr(target: &TargetAccountId) -> Fr {
    poseidon::hash3(delegate_tags::TAG_TARGET_V1, target.x_fr(), target.parity_fr())
}

/// Signer commitment: H(TAG_SIGNER, x_fm, y_fm) over field-mapped coordinates
pub fn signer_commitment_fr(signer: &SignerPublicKey) -> Fr {
    poseidon::hash3(
        delegate_tags::TAG_SIGNER_V1,
        to_fr_uniform(&signer.x),
        to_fr_uniform(&signer.y),
    )
}

/// The authenticated map key: H(TAG_ORDER, target_commitment, signer_commitment).
/// Deterministic and, under Poseidon collision resistance, effectively
/// injective over distinct (target, signer) pairs.
pub fn order_hash_fr(order: &DelegationOrder) -> Fr {
    poseidon::hash3(
        delegate_tags::TAG_ORDER_V1,
        target_commitment_fr(&order.target),
        signer_commitment_fr(&order.signer),
    )
}

pub fn order_hash(order: &DelegationOrder) -> [u8; 32] {
    fr_to_bytes(order_hash_fr(order))
}

/// Message commitment binding the envelope digest to the target:
/// H(TAG_MSG, target_commitment, msg_fm)
pub fn message_commitment_fr(order: &DelegationOrder) -> Fr {
    let msg_fm = to_fr_uniform(&envelope_digest(order));
    poseidon::hash3(delegate_tags::TAG_MSG_V1, target_commitment_fr(&order.target), msg_fm)
}

/// Signature challenge: H(TAG_CHAL, message_commitment, signer_commitment)
pub fn sig_challenge_fr(order: &DelegationOrder) -> Fr {
    poseidon::hash3(
        delegate_tags::TAG_CHAL_V1,
        message_commitment_fr(order),
        signer_commitment_fr(&order.signer),
    )
}

/// Signature binding commitment exposed as a public instance by the
/// delegation circuit: H(TAG_BIND, challenge, H(TAG_SIG, r_fm, s_fm))
pub fn sig_binding_fr(order: &DelegationOrder, sig: &EcdsaSignature) -> Fr {
    let sig_c = poseidon::hash3(
        delegate_tags::TAG_SIG_V1,
        to_fr_uniform(&sig.r),
        to_fr_uniform(&sig.s),
    );
    poseidon::hash3(delegate_tags::TAG_BIND_V1, sig_challenge_fr(order), sig_c)
}

/// Verify the externally-produced ECDSA signature over the enveloped
/// canonical message, under the order's signer key. This is the assertion
/// the verifier state machine applies inline and the proving core applies
/// before any witness generation.
pub fn verify_signature(order: &DelegationOrder, sig: &EcdsaSignature) -> Result<()> {
    let vk = order.signer.to_verifying_key()?;
    let signature = k256::ecdsa::Signature::from_scalars(sig.r, sig.s)
        .map_err(|_| CodecError::MalformedSignature)?;
    let digest = envelope_digest(order);
    vk.verify_prehash(&digest, &signature)
        .map_err(|_| CodecError::SignatureRejected)
}
