#![forbid(unsafe_code)]
//! # circuits
//! Numan Thabit 2025
//! Zero-knowledge circuits for delegate-mini: the delegation signature
//! circuit, the map record-transition circuit, and the fold binder, with
//! proving/verification cores over Halo2 PLONK (IPA commitments, Pasta).

use anyhow::{anyhow, Result};
use ff::{Field, PrimeField};
use halo2_proofs::circuit::Value;
use halo2_proofs::plonk::{keygen_pk, keygen_vk, verify_proof, ProvingKey, SingleVerifier, VerifyingKey};
use halo2_proofs::poly::ipa::commitment::{IPACommitmentScheme, ParamsIPA};
use halo2_proofs::transcript::{Blake2bRead, Blake2bWrite, Challenge255};
use pasta_curves::{vesta::Affine as G1Affine, Fp as Fr};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::{fs, fs::File};

use delegate_map::{MapWitness, MAP_DEPTH};
use order_codec::{
    envelope_digest, fr_from_bytes, fr_to_bytes, order_hash_fr, sig_binding_fr, to_fr_uniform,
    verify_signature, DelegationOrder, EcdsaSignature,
};

pub mod delegation;
pub mod record;
pub mod recursion;
pub mod sparse_path;

pub use delegation::DelegateSigCircuit;
pub use record::DelegateRecordCircuit;
pub use recursion::{compute_fold_agg, FoldCircuit, FoldCore};
pub use sparse_path::{MapPathCircuit, MapPathConfig};

/// Proving-side configuration, environment-overridable
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Circuit size parameter for the signature circuit
    pub proving_k: u32,
    /// Optional directory for persisted parameters
    pub params_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self { proving_k: 12, params_dir: None }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables
    ///
    /// Supported variables:
    /// - DELEGATE_PROVING_K
    /// - DELEGATE_PARAMS_DIR
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok();
        let proving_k = get("DELEGATE_PROVING_K")
            .and_then(|s| s.parse().ok())
            .unwrap_or(12);
        let params_dir = get("DELEGATE_PARAMS_DIR").map(PathBuf::from);
        Self { proving_k, params_dir }
    }
}

/// Opaque, independently verifiable delegation artifact. The embedded order
/// is the proof's public input; `binding` is the public signature-binding
/// commitment. Round-trippable without loss of verifiability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateProof {
    pub order: DelegationOrder,
    pub binding: [u8; 32],
    pub proof: Vec<u8>,
}

impl DelegateProof {
    pub fn public_input(&self) -> &DelegationOrder {
        &self.order
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Proof-carrying record transition: one 0→1 map update bound to a
/// signature over the same order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordProof {
    pub order: DelegationOrder,
    pub prev_root: [u8; 32],
    pub new_root: [u8; 32],
    pub binding: [u8; 32],
    pub proof: Vec<u8>,
}

impl RecordProof {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn sig_circuit_witnesses(order: &DelegationOrder, sig: &EcdsaSignature) -> DelegateSigCircuit {
    DelegateSigCircuit {
        target_x: Value::known(order.target.x_fr()),
        target_parity: Value::known(order.target.parity_fr()),
        signer_x: Value::known(to_fr_uniform(&order.signer.x)),
        signer_y: Value::known(to_fr_uniform(&order.signer.y)),
        sig_r: Value::known(to_fr_uniform(&sig.r)),
        sig_s: Value::known(to_fr_uniform(&sig.s)),
        msg: Value::known(to_fr_uniform(&envelope_digest(order))),
    }
}

/// Proving/verification core for the delegation signature circuit
pub struct DelegateCore {
    /// Circuit size parameter (security level)
    pub proving_k: u32,
    /// IPA parameters (Pasta/Vesta)
    pub params: ParamsIPA<G1Affine>,
    /// Verifying key for the signature circuit
    pub vk: VerifyingKey<G1Affine>,
    /// Proving key for the signature circuit
    pub pk: ProvingKey<G1Affine>,
}

impl DelegateCore {
    pub fn new() -> Result<Self> {
        Self::with_k(12)
    }

    pub fn with_k(k: u32) -> Result<Self> {
        tracing::debug!(k, "generating delegation circuit keys");
        let params = ParamsIPA::<G1Affine>::new(k);
        let empty = DelegateSigCircuit::unknown();
        let vk = keygen_vk(&params, &empty)?;
        let pk = keygen_pk(&params, vk.clone(), &empty)?;
        Ok(Self { proving_k: k, params, vk, pk })
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        match &config.params_dir {
            Some(dir) => Self::load_or_setup(dir, config.proving_k),
            None => Self::with_k(config.proving_k),
        }
    }

    /// Produce a delegation proof. The externally-supplied signature is
    /// verified natively first; on an invalid signature this is a hard
    /// failure and no artifact exists.
    pub fn prove_delegation(
        &self,
        order: &DelegationOrder,
        sig: &EcdsaSignature,
    ) -> Result<DelegateProof> {
        verify_signature(order, sig).map_err(|e| anyhow!("signature rejected: {e}"))?;

        let order_hash = order_hash_fr(order);
        let binding = sig_binding_fr(order, sig);
        let circuit = sig_circuit_witnesses(order, sig);

        let inst_order = [order_hash];
        let inst_binding = [binding];
        let mut transcript = Blake2bWrite::<Vec<u8>, G1Affine, Challenge255<G1Affine>>::init(vec![]);
        halo2_proofs::plonk::create_proof::<IPACommitmentScheme<G1Affine>, _, _, _, _>(
            &self.params,
            &self.pk,
            &[circuit],
            &[&[&inst_order[..], &inst_binding[..]]],
            OsRng,
            &mut transcript,
        )?;
        Ok(DelegateProof {
            order: *order,
            binding: fr_to_bytes(binding),
            proof: transcript.finalize(),
        })
    }

    /// Verify a delegation proof against its embedded public input. Pure
    /// function over immutable inputs; safe to call freely and concurrently.
    pub fn verify_delegate_proof(&self, proof: &DelegateProof) -> Result<bool> {
        if proof.proof.is_empty() {
            return Ok(false);
        }
        let binding = match fr_from_bytes(&proof.binding) {
            Some(b) => b,
            None => return Ok(false),
        };
        let inst_order = [order_hash_fr(&proof.order)];
        let inst_binding = [binding];
        let mut transcript = Blake2bRead::<Cursor<&[u8]>, G1Affine, Challenge255<G1Affine>>::init(
            Cursor::new(proof.proof.as_slice()),
        );
        let strategy = SingleVerifier::new(&self.params);
        let ok = verify_proof::<IPACommitmentScheme<G1Affine>, _, _, _>(
            &self.params,
            &self.vk,
            strategy,
            &[&[&inst_order[..], &inst_binding[..]]],
            &mut transcript,
        )
        .is_ok();
        Ok(ok)
    }
}

impl DelegateCore {
    /// Save parameters to a directory on disk.
    pub fn save_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut f = File::create(dir.join("delegate_params.bin"))?;
        self.params.write(&mut f)?;
        // VK/PK serialization is not supported; regenerate on load.
        let meta = Self::circuit_metadata(self.proving_k);
        let mut mf = File::create(dir.join("delegate_meta.json"))?;
        mf.write_all(serde_json::to_string_pretty(&meta)?.as_bytes())?;
        Ok(())
    }

    /// Load parameters from a directory; falls back to fresh setup if absent.
    pub fn load_or_setup<P: AsRef<Path>>(dir: P, k: u32) -> Result<Self> {
        let dir = dir.as_ref();
        let params_path = dir.join("delegate_params.bin");
        if params_path.exists() {
            let meta_path = dir.join("delegate_meta.json");
            let meta: Option<CircuitMeta> = if meta_path.exists() {
                let mut s = String::new();
                File::open(&meta_path)?.read_to_string(&mut s)?;
                Some(serde_json::from_str(&s)?)
            } else {
                None
            };

            let mut pf = File::open(&params_path)?;
            let params = ParamsIPA::<G1Affine>::read(&mut pf)?;

            let empty = DelegateSigCircuit::unknown();
            let vk = keygen_vk(&params, &empty)?;
            let pk = keygen_pk(&params, vk.clone(), &empty)?;

            if let Some(m) = meta {
                let cur = Self::circuit_metadata(k);
                if m.circuit_hash != cur.circuit_hash || m.k != k {
                    return Err(anyhow!(
                        "delegate_meta mismatch: stored (k={}, hash={}) != current (k={}, hash={})",
                        m.k,
                        m.circuit_hash,
                        k,
                        cur.circuit_hash
                    ));
                }
            }
            tracing::debug!(?dir, k, "loaded delegation circuit parameters");
            Ok(Self { proving_k: k, params, vk, pk })
        } else {
            let core = Self::with_k(k)?;
            let _ = core.save_to_dir(dir);
            Ok(core)
        }
    }

    fn circuit_metadata(k: u32) -> CircuitMeta {
        // Short hash over key circuit structure choices
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"delegate:sig:v1");
        hasher.update(&[3u8, 2u8]); // poseidon t=3, rate=2
        hasher.update(&k.to_le_bytes());
        for tag in [
            order_codec::delegate_tags::TAG_TARGET_V1,
            order_codec::delegate_tags::TAG_SIGNER_V1,
            order_codec::delegate_tags::TAG_ORDER_V1,
            order_codec::delegate_tags::TAG_MSG_V1,
            order_codec::delegate_tags::TAG_CHAL_V1,
            order_codec::delegate_tags::TAG_SIG_V1,
            order_codec::delegate_tags::TAG_BIND_V1,
        ] {
            hasher.update(&Fr::from(tag).to_repr());
        }
        let hash = hasher.finalize();
        CircuitMeta { version: 1, k, circuit_hash: format!("{}", hash.to_hex()) }
    }
}

/// Circuit metadata for persistence validation
#[derive(Serialize, Deserialize, Clone, Debug)]
struct CircuitMeta {
    version: u32,
    k: u32,
    circuit_hash: String,
}

/// Proving/verification core for the record-transition circuit
pub struct RecordCore {
    pub proving_k: u32,
    pub params: ParamsIPA<G1Affine>,
    pub vk: VerifyingKey<G1Affine>,
    pub pk: ProvingKey<G1Affine>,
}

impl RecordCore {
    pub fn new() -> Result<Self> {
        // Dual depth-16 walk needs more rows than the signature circuit
        Self::with_k(13)
    }

    pub fn with_k(k: u32) -> Result<Self> {
        tracing::debug!(k, "generating record circuit keys");
        let params = ParamsIPA::<G1Affine>::new(k);
        let empty = DelegateRecordCircuit::<MAP_DEPTH>::unknown();
        let vk = keygen_vk(&params, &empty)?;
        let pk = keygen_pk(&params, vk.clone(), &empty)?;
        Ok(Self { proving_k: k, params, vk, pk })
    }

    /// Prove one 0→1 record transition from an old-state witness. The
    /// signature is verified natively first; witness consistency is checked
    /// before the expensive proving step.
    pub fn prove_record(
        &self,
        order: &DelegationOrder,
        sig: &EcdsaSignature,
        witness: &MapWitness,
    ) -> Result<RecordProof> {
        verify_signature(order, sig).map_err(|e| anyhow!("signature rejected: {e}"))?;
        if witness.key != order_codec::order_hash(order) {
            return Err(anyhow!("witness key does not match order hash"));
        }
        if witness.value != 0 {
            return Err(anyhow!("record transition requires an old-state (value 0) witness"));
        }

        let prev_root = witness.compute_root_for(Fr::ZERO)?;
        let new_root = witness.compute_root_for(delegate_map::leaf_for(&witness.key)?)?;
        let order_hash = order_hash_fr(order);
        let binding = sig_binding_fr(order, sig);

        let sig_wit = sig_circuit_witnesses(order, sig);
        let mut siblings = [Value::unknown(); MAP_DEPTH];
        for (i, sib) in witness.siblings.iter().enumerate() {
            let v = fr_from_bytes(sib).ok_or_else(|| anyhow!("non-canonical sibling"))?;
            siblings[i] = Value::known(v);
        }
        let dirs = witness.directions();
        let directions: [Value<Fr>; MAP_DEPTH] =
            core::array::from_fn(|i| Value::known(if dirs[i] { Fr::ONE } else { Fr::ZERO }));

        let circuit = DelegateRecordCircuit::<MAP_DEPTH> {
            root_before: Value::known(prev_root),
            root_after: Value::known(new_root),
            target_x: sig_wit.target_x,
            target_parity: sig_wit.target_parity,
            signer_x: sig_wit.signer_x,
            signer_y: sig_wit.signer_y,
            sig_r: sig_wit.sig_r,
            sig_s: sig_wit.sig_s,
            msg: sig_wit.msg,
            siblings,
            directions,
        };

        let inst_before = [prev_root];
        let inst_after = [new_root];
        let inst_order = [order_hash];
        let inst_binding = [binding];
        let mut transcript = Blake2bWrite::<Vec<u8>, G1Affine, Challenge255<G1Affine>>::init(vec![]);
        halo2_proofs::plonk::create_proof::<IPACommitmentScheme<G1Affine>, _, _, _, _>(
            &self.params,
            &self.pk,
            &[circuit],
            &[&[&inst_before[..], &inst_after[..], &inst_order[..], &inst_binding[..]]],
            OsRng,
            &mut transcript,
        )?;
        Ok(RecordProof {
            order: *order,
            prev_root: fr_to_bytes(prev_root),
            new_root: fr_to_bytes(new_root),
            binding: fr_to_bytes(binding),
            proof: transcript.finalize(),
        })
    }

    /// Verify a record-transition proof against its embedded roots and order
    pub fn verify_record(&self, proof: &RecordProof) -> Result<bool> {
        if proof.proof.is_empty() {
            return Ok(false);
        }
        let (prev, new, binding) = match (
            fr_from_bytes(&proof.prev_root),
            fr_from_bytes(&proof.new_root),
            fr_from_bytes(&proof.binding),
        ) {
            (Some(p), Some(n), Some(b)) => (p, n, b),
            _ => return Ok(false),
        };
        let inst_before = [prev];
        let inst_after = [new];
        let inst_order = [order_hash_fr(&proof.order)];
        let inst_binding = [binding];
        let mut transcript = Blake2bRead::<Cursor<&[u8]>, G1Affine, Challenge255<G1Affine>>::init(
            Cursor::new(proof.proof.as_slice()),
        );
        let strategy = SingleVerifier::new(&self.params);
        let ok = verify_proof::<IPACommitmentScheme<G1Affine>, _, _, _>(
            &self.params,
            &self.vk,
            strategy,
            &[&[&inst_before[..], &inst_after[..], &inst_order[..], &inst_binding[..]]],
            &mut transcript,
        )
        .is_ok();
        Ok(ok)
    }
}
