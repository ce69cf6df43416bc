//! Delegation signature circuit: binds an externally-verified secp256k1
//! signature to a delegation order through Poseidon commitments and exposes
//! the order hash and signature binding as public instances.
//!
//! Foreign-curve discipline: the ECDSA equation itself is checked natively by
//! the proving host before any witness is assigned; the circuit carries the
//! Poseidon binding of the signature scalars to the order and its enveloped
//! message digest. Secp256k1 group arithmetic is abstracted as field-mapped
//! digests, with the host as the source of curve-level validity.

use ff::Field;
use halo2_gadgets::poseidon::primitives::{ConstantLength, P128Pow5T3};
use halo2_gadgets::poseidon::{Hash as PoseidonHash, Pow5Chip, Pow5Config};
use halo2_proofs::circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value};
use halo2_proofs::plonk::{
    Advice, Circuit, Column, ConstraintSystem, Error, Expression, Instance, Selector,
};
use halo2_proofs::poly::Rotation;
use order_codec::delegate_tags::{
    TAG_BIND_V1, TAG_CHAL_V1, TAG_MSG_V1, TAG_ORDER_V1, TAG_SIG_V1, TAG_SIGNER_V1, TAG_TARGET_V1,
};
use pasta_curves::Fp as Fr;

/// One tagged Poseidon hash H(tag, a, b) with the tag cell constrained
/// constant. Shared by the delegation and record circuits.
pub(crate) fn hash3_tagged(
    poseidon: &Pow5Config<Fr, 3, 2>,
    tag_col: Column<Advice>,
    mut layouter: impl Layouter<Fr>,
    tag: u64,
    a: AssignedCell<Fr, Fr>,
    b: AssignedCell<Fr, Fr>,
) -> Result<AssignedCell<Fr, Fr>, Error> {
    let chip = Pow5Chip::<Fr, 3, 2>::construct(poseidon.clone());
    let h = PoseidonHash::<Fr, Pow5Chip<Fr, 3, 2>, P128Pow5T3, ConstantLength<3>, 3, 2>::init(
        chip,
        layouter.namespace(|| "poseidon init"),
    )?;
    let tag_cell = layouter.assign_region(
        || "tag",
        |mut region| {
            let c = region.assign_advice(|| "tag", tag_col, 0, || Value::known(Fr::from(tag)))?;
            region.constrain_constant(c.cell(), Fr::from(tag))?;
            Ok(c)
        },
    )?;
    h.hash(layouter.namespace(|| "hash(tag, a, b)"), [tag_cell, a, b])
}

#[derive(Clone, Debug)]
pub struct DelegateSigConfig {
    pub advice: [Column<Advice>; 6],
    pub selector: Selector,
    pub instance: [Column<Instance>; 2], // 0: order hash, 1: signature binding
    pub poseidon: Pow5Config<Fr, 3, 2>,
}

/// Circuit witnesses: the order's target, field-mapped signer coordinates,
/// field-mapped signature scalars, and the field-mapped envelope digest.
#[derive(Clone, Debug)]
pub struct DelegateSigCircuit {
    pub target_x: Value<Fr>,
    pub target_parity: Value<Fr>,
    pub signer_x: Value<Fr>,
    pub signer_y: Value<Fr>,
    pub sig_r: Value<Fr>,
    pub sig_s: Value<Fr>,
    pub msg: Value<Fr>,
}

impl DelegateSigCircuit {
    pub fn unknown() -> Self {
        Self {
            target_x: Value::unknown(),
            target_parity: Value::unknown(),
            signer_x: Value::unknown(),
            signer_y: Value::unknown(),
            sig_r: Value::unknown(),
            sig_s: Value::unknown(),
            msg: Value::unknown(),
        }
    }
}

impl Circuit<Fr> for DelegateSigCircuit {
    type Config = DelegateSigConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self::unknown()
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
        let selector = meta.selector();
        let instance = [meta.instance_column(), meta.instance_column()];
        for a in &advice {
            meta.enable_equality(*a);
        }
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

        // Target parity is a bit
        meta.create_gate("parity boolean", |meta| {
            let s = meta.query_selector(selector);
            let p = meta.query_advice(advice[5], Rotation::cur());
            vec![s * p.clone() * (p - Expression::Constant(Fr::ONE))]
        });

        DelegateSigConfig { advice, selector, instance, poseidon }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<Fr>,
    ) -> Result<(), Error> {
        // Assign witnesses; parity lands in the booleanity-gated row
        let target_x = layouter.assign_region(
            || "target_x",
            |mut region| {
                region.assign_advice(|| "target_x", config.advice[0], 0, || self.target_x)
            },
        )?;
        let parity = layouter.assign_region(
            || "target_parity",
            |mut region| {
                config.selector.enable(&mut region, 0)?;
                region.assign_advice(|| "parity", config.advice[5], 0, || self.target_parity)
            },
        )?;
        let signer_x = layouter.assign_region(
            || "signer_x",
            |mut region| {
                region.assign_advice(|| "signer_x", config.advice[0], 0, || self.signer_x)
            },
        )?;
        let signer_y = layouter.assign_region(
            || "signer_y",
            |mut region| {
                region.assign_advice(|| "signer_y", config.advice[1], 0, || self.signer_y)
            },
        )?;
        let sig_r = layouter.assign_region(
            || "sig_r",
            |mut region| region.assign_advice(|| "sig_r", config.advice[0], 0, || self.sig_r),
        )?;
        let sig_s = layouter.assign_region(
            || "sig_s",
            |mut region| region.assign_advice(|| "sig_s", config.advice[1], 0, || self.sig_s),
        )?;
        let msg = layouter.assign_region(
            || "msg",
            |mut region| region.assign_advice(|| "msg", config.advice[2], 0, || self.msg),
        )?;

        // t_c = H(TAG_TARGET, target_x, parity)
        let t_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "target commitment"),
            TAG_TARGET_V1,
            target_x,
            parity,
        )?;
        // s_c = H(TAG_SIGNER, signer_x, signer_y)
        let s_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "signer commitment"),
            TAG_SIGNER_V1,
            signer_x,
            signer_y,
        )?;
        // order_hash = H(TAG_ORDER, t_c, s_c)
        let order_hash = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "order hash"),
            TAG_ORDER_V1,
            t_c.clone(),
            s_c.clone(),
        )?;
        // msg_c = H(TAG_MSG, t_c, msg)
        let msg_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "message commitment"),
            TAG_MSG_V1,
            t_c,
            msg,
        )?;
        // chal = H(TAG_CHAL, msg_c, s_c)
        let chal = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "challenge"),
            TAG_CHAL_V1,
            msg_c,
            s_c,
        )?;
        // sig_c = H(TAG_SIG, r, s)
        let sig_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "signature commitment"),
            TAG_SIG_V1,
            sig_r,
            sig_s,
        )?;
        // binding = H(TAG_BIND, chal, sig_c)
        let binding = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "binding"),
            TAG_BIND_V1,
            chal,
            sig_c,
        )?;

        layouter.constrain_instance(order_hash.cell(), config.instance[0], 0)?;
        layouter.constrain_instance(binding.cell(), config.instance[1], 0)?;
        Ok(())
    }
}
