//! Sparse map path gadgets (halo2): direction selection and Poseidon level
//! hashing for membership and root-update checks over the delegate map.
//! Numan Thabit 2025

use ff::Field;
use halo2_gadgets::poseidon::primitives::{ConstantLength, P128Pow5T3};
use halo2_gadgets::poseidon::{Hash as PoseidonHash, Pow5Chip, Pow5Config};
use halo2_proofs::circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value};
use halo2_proofs::plonk::{
    Advice, Circuit, Column, ConstraintSystem, Error, Expression, Instance, Selector,
};
use halo2_proofs::poly::Rotation;
use order_codec::delegate_tags::TAG_NODE_V1;
use pasta_curves::Fp as Fr;

/// Poseidon-based 2-ary sparse map path over Fr, depth fixed by the caller.
#[derive(Clone, Debug)]
pub struct MapPathConfig {
    pub advice: [Column<Advice>; 6],
    pub selector: Selector,
    pub poseidon: Pow5Config<Fr, 3, 2>,
}

impl MapPathConfig {
    pub fn configure(meta: &mut ConstraintSystem<Fr>) -> Self {
        let advice = [
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
        ];
        let selector = meta.selector();
        for a in &advice {
            meta.enable_equality(*a);
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

        // dir boolean; left = (1-d)*cur + d*sib; right = d*cur + (1-d)*sib
        meta.create_gate("path_level_select", |meta| {
            let s = meta.query_selector(selector);
            let cur = meta.query_advice(advice[0], Rotation::cur());
            let sib = meta.query_advice(advice[1], Rotation::cur());
            let left = meta.query_advice(advice[2], Rotation::cur());
            let right = meta.query_advice(advice[3], Rotation::cur());
            let dir = meta.query_advice(advice[5], Rotation::cur());
            let one = Expression::Constant(Fr::ONE);
            vec![
                s.clone() * dir.clone() * (dir.clone() - one.clone()),
                s.clone()
                    * (left
                        - ((one.clone() - dir.clone()) * cur.clone() + dir.clone() * sib.clone())),
                s * (right - (dir.clone() * cur + (one - dir) * sib)),
            ]
        });

        Self { advice, selector, poseidon }
    }

    /// Order (cur, sibling) into (left, right) child positions per the
    /// direction bit, in one gate-enabled row. dir = 1 means the current
    /// node is the right child.
    pub fn select_level(
        &self,
        mut layouter: impl Layouter<Fr>,
        cur: &AssignedCell<Fr, Fr>,
        sibling: Value<Fr>,
        direction: Value<Fr>,
    ) -> Result<(AssignedCell<Fr, Fr>, AssignedCell<Fr, Fr>), Error> {
        layouter.assign_region(
            || "path level select",
            |mut region| {
                self.selector.enable(&mut region, 0)?;
                let cur_row =
                    region.assign_advice(|| "cur", self.advice[0], 0, || cur.value().copied())?;
                region.constrain_equal(cur_row.cell(), cur.cell())?;
                region.assign_advice(|| "sib", self.advice[1], 0, || sibling)?;
                region.assign_advice(|| "dir", self.advice[5], 0, || direction)?;
                let left = region.assign_advice(|| "left", self.advice[2], 0, || {
                    direction
                        .zip(cur.value())
                        .zip(sibling)
                        .map(|((d, c), s)| (Fr::ONE - d) * *c + d * s)
                })?;
                let right = region.assign_advice(|| "right", self.advice[3], 0, || {
                    direction
                        .zip(cur.value())
                        .zip(sibling)
                        .map(|((d, c), s)| d * *c + (Fr::ONE - d) * s)
                })?;
                Ok((left, right))
            },
        )
    }

    /// One hash level: H(TAG_NODE, left, right)
    pub fn hash_level(
        &self,
        mut layouter: impl Layouter<Fr>,
        left: AssignedCell<Fr, Fr>,
        right: AssignedCell<Fr, Fr>,
    ) -> Result<AssignedCell<Fr, Fr>, Error> {
        let chip = Pow5Chip::<Fr, 3, 2>::construct(self.poseidon.clone());
        let h = PoseidonHash::<Fr, Pow5Chip<Fr, 3, 2>, P128Pow5T3, ConstantLength<3>, 3, 2>::init(
            chip,
            layouter.namespace(|| "poseidon level"),
        )?;
        let tag_cell = layouter.assign_region(
            || "node tag",
            |mut region| {
                let c = region.assign_advice(
                    || "tag",
                    self.advice[4],
                    0,
                    || Value::known(Fr::from(TAG_NODE_V1)),
                )?;
                region.constrain_constant(c.cell(), Fr::from(TAG_NODE_V1))?;
                Ok(c)
            },
        )?;
        h.hash(layouter.namespace(|| "hash(tag, left, right)"), [tag_cell, left, right])
    }

    /// Walk a fixed-depth path from a leaf cell to the implied root.
    pub fn walk(
        &self,
        mut layouter: impl Layouter<Fr>,
        leaf: AssignedCell<Fr, Fr>,
        siblings: &[Value<Fr>],
        directions: &[Value<Fr>],
    ) -> Result<AssignedCell<Fr, Fr>, Error> {
        let mut cur = leaf;
        for (i, (sib, dir)) in siblings.iter().zip(directions.iter()).enumerate() {
            let (left, right) = self.select_level(
                layouter.namespace(|| format!("select {i}")),
                &cur,
                *sib,
                *dir,
            )?;
            cur = self.hash_level(layouter.namespace(|| format!("hash {i}")), left, right)?;
        }
        Ok(cur)
    }
}

/// Membership circuit: verifies a path of fixed DEPTH and exposes the
/// resulting root as the single public instance.
#[derive(Clone, Debug)]
pub struct MapPathCircuitConfig {
    pub path: MapPathConfig,
    pub instance_root: Column<Instance>,
}

#[derive(Clone, Debug)]
pub struct MapPathCircuit<const DEPTH: usize> {
    pub leaf: Value<Fr>,
    pub siblings: [Value<Fr>; DEPTH],
    pub directions: [Value<Fr>; DEPTH],
}

impl<const DEPTH: usize> Circuit<Fr> for MapPathCircuit<DEPTH> {
    type Config = MapPathCircuitConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self {
            leaf: Value::unknown(),
            siblings: [Value::unknown(); DEPTH],
            directions: [Value::unknown(); DEPTH],
        }
    }

    fn configure(meta: &mut ConstraintSystem<Fr>) -> Self::Config {
        let path = MapPathConfig::configure(meta);
        let instance_root = meta.instance_column();
        meta.enable_equality(instance_root);
        MapPathCircuitConfig { path, instance_root }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<Fr>,
    ) -> Result<(), Error> {
        let leaf = layouter.assign_region(
            || "leaf",
            |mut region| region.assign_advice(|| "leaf", config.path.advice[0], 0, || self.leaf),
        )?;
        let root = config.path.walk(
            layouter.namespace(|| "walk"),
            leaf,
            &self.siblings,
            &self.directions,
        )?;
        layouter.constrain_instance(root.cell(), config.instance_root, 0)?;
        Ok(())
    }
}
