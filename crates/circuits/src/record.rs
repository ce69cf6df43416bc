//! Record transition circuit: proves one 0→1 update of the delegate map
//! tied to a signature binding over the same order. Walks the old path from
//! the constant zero leaf and the new path from H(TAG_LEAF, order_hash, 1)
//! over the same siblings, and exposes (root_before, root_after, order_hash,
//! binding) as public instances.

use ff::Field;
use halo2_gadgets::poseidon::{Pow5Chip, Pow5Config};
use halo2_gadgets::poseidon::primitives::P128Pow5T3;
use halo2_proofs::circuit::{Layouter, SimpleFloorPlanner, Value};
use halo2_proofs::plonk::{
    Advice, Circuit, Column, ConstraintSystem, Error, Expression, Instance, Selector,
};
use halo2_proofs::poly::Rotation;
use order_codec::delegate_tags::{
    TAG_BIND_V1, TAG_CHAL_V1, TAG_LEAF_V1, TAG_MSG_V1, TAG_ORDER_V1, TAG_SIG_V1, TAG_SIGNER_V1,
    TAG_TARGET_V1,
};
use pasta_curves::Fp as Fr;

use crate::delegation::hash3_tagged;
use crate::sparse_path::MapPathConfig;

#[derive(Clone, Debug)]
pub struct DelegateRecordConfig {
    pub advice: [Column<Advice>; 6],
    pub selector: Selector,
    // 0: root before, 1: root after, 2: order hash, 3: signature binding
    pub instance: [Column<Instance>; 4],
    pub poseidon: Pow5Config<Fr, 3, 2>,
    pub path: MapPathConfig,
}

#[derive(Clone, Debug)]
pub struct DelegateRecordCircuit<const DEPTH: usize> {
    pub root_before: Value<Fr>,
    pub root_after: Value<Fr>,
    pub target_x: Value<Fr>,
    pub target_parity: Value<Fr>,
    pub signer_x: Value<Fr>,
    pub signer_y: Value<Fr>,
    pub sig_r: Value<Fr>,
    pub sig_s: Value<Fr>,
    pub msg: Value<Fr>,
    pub siblings: [Value<Fr>; DEPTH],
    pub directions: [Value<Fr>; DEPTH],
}

impl<const DEPTH: usize> DelegateRecordCircuit<DEPTH> {
    pub fn unknown() -> Self {
        Self {
            root_before: Value::unknown(),
            root_after: Value::unknown(),
            target_x: Value::unknown(),
            target_parity: Value::unknown(),
            signer_x: Value::unknown(),
            signer_y: Value::unknown(),
            sig_r: Value::unknown(),
            sig_s: Value::unknown(),
            msg: Value::unknown(),
            siblings: [Value::unknown(); DEPTH],
            directions: [Value::unknown(); DEPTH],
        }
    }
}

impl<const DEPTH: usize> Circuit<Fr> for DelegateRecordCircuit<DEPTH> {
    type Config = DelegateRecordConfig;
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
        let instance = [
            meta.instance_column(),
            meta.instance_column(),
            meta.instance_column(),
            meta.instance_column(),
        ];
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

        let path = MapPathConfig::configure(meta);

        meta.create_gate("parity boolean", |meta| {
            let s = meta.query_selector(selector);
            let p = meta.query_advice(advice[5], Rotation::cur());
            vec![s * p.clone() * (p - Expression::Constant(Fr::ONE))]
        });

        DelegateRecordConfig { advice, selector, instance, poseidon, path }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<Fr>,
    ) -> Result<(), Error> {
        // Claimed roots
        let root_before = layouter.assign_region(
            || "root before",
            |mut region| {
                region.assign_advice(|| "root_before", config.advice[0], 0, || self.root_before)
            },
        )?;
        let root_after = layouter.assign_region(
            || "root after",
            |mut region| {
                region.assign_advice(|| "root_after", config.advice[1], 0, || self.root_after)
            },
        )?;

        // Order witnesses; parity lands in the booleanity-gated row
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

        // Order hash chain
        let t_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "target commitment"),
            TAG_TARGET_V1,
            target_x,
            parity,
        )?;
        let s_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "signer commitment"),
            TAG_SIGNER_V1,
            signer_x,
            signer_y,
        )?;
        let order_hash = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "order hash"),
            TAG_ORDER_V1,
            t_c.clone(),
            s_c.clone(),
        )?;

        // New leaf: H(TAG_LEAF, order_hash, 1)
        let one_cell = layouter.assign_region(
            || "one",
            |mut region| {
                let c = region.assign_advice(
                    || "one",
                    config.advice[4],
                    0,
                    || Value::known(Fr::ONE),
                )?;
                region.constrain_constant(c.cell(), Fr::ONE)?;
                Ok(c)
            },
        )?;
        let leaf_new = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "new leaf"),
            TAG_LEAF_V1,
            order_hash.clone(),
            one_cell,
        )?;

        // Old leaf is the empty-slot commitment (zero)
        let leaf_old = layouter.assign_region(
            || "zero leaf",
            |mut region| {
                let c = region.assign_advice(
                    || "zero",
                    config.advice[4],
                    0,
                    || Value::known(Fr::ZERO),
                )?;
                region.constrain_constant(c.cell(), Fr::ZERO)?;
                Ok(c)
            },
        )?;

        // Walk both paths over the same siblings and directions
        let computed_before = config.path.walk(
            layouter.namespace(|| "walk old"),
            leaf_old,
            &self.siblings,
            &self.directions,
        )?;
        let computed_after = config.path.walk(
            layouter.namespace(|| "walk new"),
            leaf_new,
            &self.siblings,
            &self.directions,
        )?;
        layouter.assign_region(
            || "enforce roots",
            |mut region| {
                region.constrain_equal(root_before.cell(), computed_before.cell())?;
                region.constrain_equal(root_after.cell(), computed_after.cell())?;
                Ok(())
            },
        )?;

        // Signature binding chain
        let msg_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "message commitment"),
            TAG_MSG_V1,
            t_c,
            msg,
        )?;
        let chal = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "challenge"),
            TAG_CHAL_V1,
            msg_c,
            s_c,
        )?;
        let sig_c = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "signature commitment"),
            TAG_SIG_V1,
            sig_r,
            sig_s,
        )?;
        let binding = hash3_tagged(
            &config.poseidon,
            config.advice[4],
            layouter.namespace(|| "binding"),
            TAG_BIND_V1,
            chal,
            sig_c,
        )?;

        layouter.constrain_instance(root_before.cell(), config.instance[0], 0)?;
        layouter.constrain_instance(root_after.cell(), config.instance[1], 0)?;
        layouter.constrain_instance(order_hash.cell(), config.instance[2], 0)?;
        layouter.constrain_instance(binding.cell(), config.instance[3], 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_map::{empty_root, leaf_for, DelegateMap, MAP_DEPTH};
    use halo2_proofs::dev::MockProver;
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::ecdsa::SigningKey;
    use order_codec::{
        envelope_digest, fr_from_bytes, order_hash, order_hash_fr, sig_binding_fr, to_fr_uniform,
        DelegationOrder, EcdsaSignature, SignerPublicKey, TargetAccountId,
    };
    use order_codec::fr_to_bytes;
    use rand::rngs::OsRng;

    fn signed_order() -> (DelegationOrder, EcdsaSignature) {
        let sk = SigningKey::random(&mut OsRng);
        let signer = SignerPublicKey::from_verifying_key(sk.verifying_key());
        let target = TargetAccountId::new(fr_to_bytes(Fr::from(33u64)), false).unwrap();
        let order = DelegationOrder { target, signer };
        let sig: k256::ecdsa::Signature = sk.sign_prehash(&envelope_digest(&order)).unwrap();
        (order, EcdsaSignature::from_k256(&sig))
    }

    #[test]
    fn test_record_circuit_full_transition() {
        let (order, sig) = signed_order();
        let key = order_hash(&order);

        let mut map = DelegateMap::new();
        let wit = map.record_candidate(&key).unwrap().unwrap();
        let root_after = fr_from_bytes(&map.root()).unwrap();

        let circuit = DelegateRecordCircuit::<MAP_DEPTH> {
            root_before: Value::known(empty_root()),
            root_after: Value::known(root_after),
            target_x: Value::known(order.target.x_fr()),
            target_parity: Value::known(order.target.parity_fr()),
            signer_x: Value::known(to_fr_uniform(&order.signer.x)),
            signer_y: Value::known(to_fr_uniform(&order.signer.y)),
            sig_r: Value::known(to_fr_uniform(&sig.r)),
            sig_s: Value::known(to_fr_uniform(&sig.s)),
            msg: Value::known(to_fr_uniform(&envelope_digest(&order))),
            siblings: core::array::from_fn(|i| {
                Value::known(fr_from_bytes(&wit.siblings[i]).unwrap())
            }),
            directions: core::array::from_fn(|i| {
                Value::known(if wit.directions()[i] { Fr::ONE } else { Fr::ZERO })
            }),
        };

        let instances = vec![
            vec![empty_root()],
            vec![root_after],
            vec![order_hash_fr(&order)],
            vec![sig_binding_fr(&order, &sig)],
        ];
        let prover = MockProver::run(13, &circuit, instances).unwrap();
        assert_eq!(prover.verify(), Ok(()));

        // Cross-check the circuit's leaf relation against the native map
        assert_eq!(
            fr_to_bytes(wit.compute_root_for(leaf_for(&key).unwrap()).unwrap()),
            map.root()
        );
    }

    #[test]
    fn test_record_circuit_wrong_after_root_fails() {
        let (order, sig) = signed_order();
        let key = order_hash(&order);

        let mut map = DelegateMap::new();
        let wit = map.record_candidate(&key).unwrap().unwrap();
        let root_after = fr_from_bytes(&map.root()).unwrap();
        let bad_after = root_after + Fr::ONE;

        let circuit = DelegateRecordCircuit::<MAP_DEPTH> {
            root_before: Value::known(empty_root()),
            root_after: Value::known(bad_after),
            target_x: Value::known(order.target.x_fr()),
            target_parity: Value::known(order.target.parity_fr()),
            signer_x: Value::known(to_fr_uniform(&order.signer.x)),
            signer_y: Value::known(to_fr_uniform(&order.signer.y)),
            sig_r: Value::known(to_fr_uniform(&sig.r)),
            sig_s: Value::known(to_fr_uniform(&sig.s)),
            msg: Value::known(to_fr_uniform(&envelope_digest(&order))),
            siblings: core::array::from_fn(|i| {
                Value::known(fr_from_bytes(&wit.siblings[i]).unwrap())
            }),
            directions: core::array::from_fn(|i| {
                Value::known(if wit.directions()[i] { Fr::ONE } else { Fr::ZERO })
            }),
        };

        let instances = vec![
            vec![empty_root()],
            vec![bad_after],
            vec![order_hash_fr(&order)],
            vec![sig_binding_fr(&order, &sig)],
        ];
        let prover = MockProver::run(13, &circuit, instances).unwrap();
        assert!(prover.verify().is_err());
    }
}
