//! Fold binder circuit: aggregates accepted delegation commitments into a
//! single succinct accumulator, `agg = H(TAG_FOLD, prev, cur)`. Inner proof
//! validity is established before folding (host-side `verify_delegate_proof`);
//! the binder keeps composition into outer checks O(1) on the verifier side.

use anyhow::Result;
use halo2_gadgets::poseidon::{Pow5Chip, Pow5Config};
use halo2_gadgets::poseidon::primitives::P128Pow5T3;
use halo2_proofs::circuit::{Layouter, SimpleFloorPlanner, Value};
use halo2_proofs::plonk::{
    keygen_pk, keygen_vk, verify_proof, Advice, Circuit, Column, ConstraintSystem, Error,
    Instance, ProvingKey, SingleVerifier, VerifyingKey,
};
use halo2_proofs::poly::ipa::commitment::{IPACommitmentScheme, ParamsIPA};
use halo2_proofs::transcript::{Blake2bRead, Blake2bWrite, Challenge255};
use order_codec::delegate_tags::TAG_FOLD_V1;
use order_codec::{fr_from_bytes, fr_to_bytes, poseidon, to_fr_uniform};
use pasta_curves::{vesta::Affine as G1Affine, Fp as Fr};
use rand::rngs::OsRng;
use std::io::Cursor;

use crate::delegation::hash3_tagged;

/// Native fold mirror
pub fn compute_fold_agg(prev: Fr, cur: Fr) -> Fr {
    poseidon::hash3(TAG_FOLD_V1, prev, cur)
}

#[derive(Clone, Debug)]
pub struct FoldConfig {
    pub advice: [Column<Advice>; 6],
    // 0: prev, 1: cur, 2: agg
    pub instance: [Column<Instance>; 3],
    pub poseidon: Pow5Config<Fr, 3, 2>,
}

#[derive(Clone, Debug)]
pub struct FoldCircuit {
    pub prev: Value<Fr>,
    pub cur: Value<Fr>,
}

impl Circuit<Fr> for FoldCircuit {
    type Config = FoldConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self { prev: Value::unknown(), cur: Value::unknown() }
    }

    fn configure(meta: &mut ConstraintSystem<Fr>) -> Self::Config {
        let advice = [
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
        ];
        for a in &advice {
            meta.enable_equality(*a);
        }
        let instance = [
            meta.instance_column(),
            meta.instance_column(),
            meta.instance_column(),
        ];
        for i in &instance {
            meta.enable_equality(*i);
        }
        let rc_a = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let rc_b = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        meta.enable_constant(rc_b[0]);
        let poseidon = Pow5Chip::<Fr, 3, 2>::configure::<P128Pow5T3>(
            meta,
            [advice[0], advice[1], advice[2]],
            advice[3],
            rc_a,
            rc_b,
        );
        FoldConfig { advice, instance, poseidon }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<Fr>,
    ) -> Result<(), Error> {
        let prev = layouter.assign_region(
            || "prev",
            |mut region| region.assign_advice(|| "prev", config.advice[0], 0, || self.prev),
        )?;
        let cur = layouter.assign_region(
            || "cur",
            |mut region| region.assign_advice(|| "cur", config.advice[1], 0, || self.cur),
        )?;
        let agg = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "fold"),
            TAG_FOLD_V1,
            prev.clone(),
            cur.clone(),
        )?;
        layouter.constrain_instance(prev.cell(), config.instance[0], 0)?;
        layouter.constrain_instance(cur.cell(), config.instance[1], 0)?;
        layouter.constrain_instance(agg.cell(), config.instance[2], 0)?;
        Ok(())
    }
}

/// Proving/verification core for the fold binder
#[derive(Clone)]
pub struct FoldCore {
    pub proving_k: u32,
    pub params: ParamsIPA<G1Affine>,
    pub vk: VerifyingKey<G1Affine>,
    pub pk: ProvingKey<G1Affine>,
}

impl FoldCore {
    pub fn new() -> Result<Self> {
        Self::with_k(12)
    }

    pub fn with_k(k: u32) -> Result<Self> {
        let params = ParamsIPA::<G1Affine>::new(k);
        let empty = FoldCircuit { prev: Value::unknown(), cur: Value::unknown() };
        let vk = keygen_vk(&params, &empty)?;
        let pk = keygen_pk(&params, vk.clone(), &empty)?;
        Ok(Self { proving_k: k, params, vk, pk })
    }

    fn to_fr(bytes: &[u8; 32]) -> Fr {
        fr_from_bytes(bytes).unwrap_or_else(|| to_fr_uniform(bytes))
    }

    /// Prove one fold step; returns (proof bytes, aggregated commitment)
    pub fn prove_fold(
        &self,
        prev_commitment: &[u8; 32],
        current_commitment: &[u8; 32],
    ) -> Result<(Vec<u8>, [u8; 32])> {
        let prev = Self::to_fr(prev_commitment);
        let cur = Self::to_fr(current_commitment);
        let agg = compute_fold_agg(prev, cur);

        let circuit = FoldCircuit { prev: Value::known(prev), cur: Value::known(cur) };
        let inst_prev = [prev];
        let inst_cur = [cur];
        let inst_agg = [agg];
        let mut transcript = Blake2bWrite::<Vec<u8>, G1Affine, Challenge255<G1Affine>>::init(vec![]);
        halo2_proofs::plonk::create_proof::<IPACommitmentScheme<G1Affine>, _, _, _, _>(
            &self.params,
            &self.pk,
            &[circuit],
            &[&[&inst_prev[..], &inst_cur[..], &inst_agg[..]]],
            OsRng,
            &mut transcript,
        )?;
        Ok((transcript.finalize(), fr_to_bytes(agg)))
    }

    /// Verify one fold step against its three public commitments
    pub fn verify_fold(
        &self,
        proof: &[u8],
        prev_commitment: &[u8; 32],
        current_commitment: &[u8; 32],
        aggregated_commitment: &[u8; 32],
    ) -> Result<bool> {
        if proof.is_empty() {
            return Ok(false);
        }
        let inst_prev = [Self::to_fr(prev_commitment)];
        let inst_cur = [Self::to_fr(current_commitment)];
        let inst_agg = [Self::to_fr(aggregated_commitment)];
        let mut transcript =
            Blake2bRead::<Cursor<&[u8]>, G1Affine, Challenge255<G1Affine>>::init(Cursor::new(proof));
        let strategy = SingleVerifier::new(&self.params);
        let ok = verify_proof::<IPACommitmentScheme<G1Affine>, _, _, _>(
            &self.params,
            &self.vk,
            strategy,
            &[&[&inst_prev[..], &inst_cur[..], &inst_agg[..]]],
            &mut transcript,
        )
        .is_ok();
        Ok(ok)
    }

    /// Fold many commitments left to right; returns the last step's proof
    /// and the final accumulator.
    pub fn fold_many(&self, commitments: &[[u8; 32]]) -> Result<(Vec<u8>, [u8; 32])> {
        if commitments.is_empty() {
            return Ok((Vec::new(), [0u8; 32]));
        }
        let mut agg = commitments[0];
        let mut last_proof: Vec<u8> = Vec::new();
        for cur in commitments.iter().skip(1) {
            let (proof, new_agg) = self.prove_fold(&agg, cur)?;
            last_proof = proof;
            agg = new_agg;
        }
        Ok((last_proof, agg))
    }
}
