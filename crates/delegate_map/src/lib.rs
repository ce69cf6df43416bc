#![forbid(unsafe_code)]
//! # delegate_map
//!
//! Local mirror of the authenticated delegate set: a fixed-depth sparse
//! Poseidon Merkle map from order hashes to a one-bit delegated flag, with
//! membership witnesses suitable for proving 0→1 transitions. The
//! authoritative root lives in the verifier state machine; keeping this
//! mirror synchronized with it is the caller's responsibility.

use anyhow::{anyhow, bail, Result};
use ff::Field;
use order_codec::delegate_tags::{TAG_LEAF_V1, TAG_NODE_V1};
use order_codec::{fr_from_bytes, fr_to_bytes, poseidon};
use pasta_curves::Fp as Fr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed depth of the sparse map. Slot indices are the low 16 bits of the
/// order hash's canonical encoding.
pub const MAP_DEPTH: usize = 16;

/// Parent hash of two nodes: H(TAG_NODE, left, right)
pub fn node_hash(left: Fr, right: Fr) -> Fr {
    poseidon::hash3(TAG_NODE_V1, left, right)
}

/// Committed leaf for a delegated key: H(TAG_LEAF, key, 1). Binding the full
/// key into the leaf keeps distinct keys distinguishable under the truncated
/// slot index. Never-touched slots commit the zero field element.
pub fn leaf_for(key: &[u8; 32]) -> Result<Fr> {
    let key_fr = fr_from_bytes(key).ok_or_else(|| anyhow!("non-canonical map key"))?;
    Ok(poseidon::hash3(TAG_LEAF_V1, key_fr, Fr::ONE))
}

/// Slot index derived from the low bits of the key encoding
pub fn slot_index(key: &[u8; 32]) -> u16 {
    u16::from_le_bytes([key[0], key[1]])
}

/// Empty-subtree hash per level, leaf level first (length MAP_DEPTH + 1)
pub fn empty_subtree_defaults() -> Vec<Fr> {
    let mut defaults = Vec::with_capacity(MAP_DEPTH + 1);
    defaults.push(Fr::ZERO);
    for level in 0..MAP_DEPTH {
        let d = defaults[level];
        defaults.push(node_hash(d, d));
    }
    defaults
}

/// The well-known root of the empty map
pub fn empty_root() -> Fr {
    empty_subtree_defaults()[MAP_DEPTH]
}

pub fn empty_root_bytes() -> [u8; 32] {
    fr_to_bytes(empty_root())
}

/// Merkle authentication path for one slot, tied to the root it was
/// generated against. `value` is the one-bit claim at generation time;
/// `siblings` are bottom-up canonical field encodings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapWitness {
    pub key: [u8; 32],
    pub index: u16,
    pub value: u8,
    pub siblings: Vec<[u8; 32]>,
}

impl MapWitness {
    /// Recompute the root implied by placing `leaf` at this witness's slot.
    pub fn compute_root_for(&self, leaf: Fr) -> Result<Fr> {
        if self.siblings.len() != MAP_DEPTH {
            bail!("witness has {} siblings, expected {}", self.siblings.len(), MAP_DEPTH);
        }
        let mut acc = leaf;
        for (level, sib) in self.siblings.iter().enumerate() {
            let sib = fr_from_bytes(sib).ok_or_else(|| anyhow!("non-canonical sibling"))?;
            acc = if (self.index >> level) & 1 == 0 {
                node_hash(acc, sib)
            } else {
                node_hash(sib, acc)
            };
        }
        Ok(acc)
    }

    /// The leaf this witness claims: zero for value 0, H(TAG_LEAF, key, 1)
    /// for value 1.
    pub fn claimed_leaf(&self) -> Result<Fr> {
        match self.value {
            0 => Ok(Fr::ZERO),
            1 => leaf_for(&self.key),
            v => bail!("witness value {v} is not a bit"),
        }
    }

    /// Root implied by the embedded claim
    pub fn compute_root(&self) -> Result<Fr> {
        self.compute_root_for(self.claimed_leaf()?)
    }

    /// Verify the embedded claim against an expected root
    pub fn verify(&self, expected_root: &[u8; 32]) -> bool {
        match self.compute_root() {
            Ok(root) => &fr_to_bytes(root) == expected_root,
            Err(_) => false,
        }
    }

    /// Path directions, leaf level first: false = this node is a left child
    pub fn directions(&self) -> [bool; MAP_DEPTH] {
        let mut dirs = [false; MAP_DEPTH];
        for (level, d) in dirs.iter_mut().enumerate() {
            *d = (self.index >> level) & 1 == 1;
        }
        dirs
    }
}

/// Sparse delegate map mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateMap {
    /// Delegated slots: index -> order hash committed at that slot
    slots: BTreeMap<u16, [u8; 32]>,
    /// Cached root
    root: [u8; 32],
}

impl Default for DelegateMap {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegateMap {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            root: empty_root_bytes(),
        }
    }

    /// Current root commitment
    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// Number of delegated keys
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Delegated flag for a key; 0 for unseen keys
    pub fn get(&self, key: &[u8; 32]) -> bool {
        self.slots.get(&slot_index(key)) == Some(key)
    }

    /// Idempotence-guarded insertion into the local mirror. Returns `None`
    /// when the key is already delegated (skip before incurring proof cost);
    /// otherwise returns a witness describing the old state (value 0),
    /// suitable for proving the upcoming 0→1 transition, and flips the
    /// mirror's slot to 1. The authoritative root moves only through the
    /// verifier state machine.
    pub fn record_candidate(&mut self, key: &[u8; 32]) -> Result<Option<MapWitness>> {
        let index = slot_index(key);
        match self.slots.get(&index) {
            Some(existing) if existing == key => return Ok(None),
            Some(_) => bail!("slot {index} already occupied by a different key"),
            None => {}
        }
        // Witness against the pre-insert state
        let siblings = self.path_siblings(index);
        let witness = MapWitness {
            key: *key,
            index,
            value: 0,
            siblings,
        };
        self.slots.insert(index, *key);
        self.recompute_root();
        Ok(Some(witness))
    }

    /// Membership witness for a delegated key, or `None` when the key's flag
    /// is still 0.
    pub fn query_candidate(&self, key: &[u8; 32]) -> Result<Option<MapWitness>> {
        if !self.get(key) {
            return Ok(None);
        }
        let index = slot_index(key);
        Ok(Some(MapWitness {
            key: *key,
            index,
            value: 1,
            siblings: self.path_siblings(index),
        }))
    }

    fn path_siblings(&self, index: u16) -> Vec<[u8; 32]> {
        let defaults = empty_subtree_defaults();
        (0..MAP_DEPTH)
            .map(|level| {
                let node_idx = (u32::from(index) >> level) ^ 1;
                fr_to_bytes(self.subtree(level, node_idx, &defaults))
            })
            .collect()
    }

    /// Hash of the subtree of height `level` whose leftmost leaf is
    /// `idx << level`. Short-circuits to the cached default when no
    /// delegated slot falls in range.
    fn subtree(&self, level: usize, idx: u32, defaults: &[Fr]) -> Fr {
        let lo = idx << level;
        let hi = lo + (1u32 << level) - 1;
        let lo16 = lo as u16;
        let hi16 = hi.min(u32::from(u16::MAX)) as u16;
        if self.slots.range(lo16..=hi16).next().is_none() {
            return defaults[level];
        }
        if level == 0 {
            // Occupied leaf; leaf_for only fails on non-canonical keys, which
            // cannot be stored (order hashes are canonical by construction)
            return self
                .slots
                .get(&lo16)
                .and_then(|key| leaf_for(key).ok())
                .unwrap_or(defaults[0]);
        }
        node_hash(
            self.subtree(level - 1, idx << 1, defaults),
            self.subtree(level - 1, (idx << 1) | 1, defaults),
        )
    }

    fn recompute_root(&mut self) {
        let defaults = empty_subtree_defaults();
        self.root = fr_to_bytes(self.subtree(MAP_DEPTH, 0, &defaults));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> [u8; 32] {
        fr_to_bytes(Fr::from(n))
    }

    #[test]
    fn test_empty_root_constant() {
        let map = DelegateMap::new();
        assert_eq!(map.root(), empty_root_bytes());
        assert_eq!(empty_root_bytes(), empty_root_bytes());
        assert!(map.is_empty());
    }

    #[test]
    fn test_record_candidate_and_witness() {
        let mut map = DelegateMap::new();
        let k = key(42);
        assert!(!map.get(&k));

        let wit = map.record_candidate(&k).unwrap().expect("fresh key");
        assert_eq!(wit.value, 0);
        assert_eq!(wit.key, k);
        // Old-state witness recomputes the pre-insert (empty) root
        assert!(wit.verify(&empty_root_bytes()));
        // Same path with the delegated leaf recomputes the post-insert root
        let new_root = wit.compute_root_for(leaf_for(&k).unwrap()).unwrap();
        assert_eq!(fr_to_bytes(new_root), map.root());
        assert!(map.get(&k));
    }

    #[test]
    fn test_idempotence_guard() {
        let mut map = DelegateMap::new();
        let k = key(7);
        assert!(map.record_candidate(&k).unwrap().is_some());
        // Second attempt without an intervening reset returns absent
        assert!(map.record_candidate(&k).unwrap().is_none());
    }

    #[test]
    fn test_query_candidate() {
        let mut map = DelegateMap::new();
        let k = key(9);
        assert!(map.query_candidate(&k).unwrap().is_none());
        map.record_candidate(&k).unwrap();
        let wit = map.query_candidate(&k).unwrap().expect("delegated key");
        assert_eq!(wit.value, 1);
        assert!(wit.verify(&map.root()));
    }

    #[test]
    fn test_monotonic_root_progression() {
        let mut map = DelegateMap::new();
        let mut last = map.root();
        for n in 1..=5u64 {
            map.record_candidate(&key(n)).unwrap();
            assert_ne!(map.root(), last);
            last = map.root();
        }
        // Every recorded key stays delegated
        for n in 1..=5u64 {
            assert!(map.get(&key(n)));
        }
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_witness_stale_after_unrelated_insert() {
        let mut map = DelegateMap::new();
        let a = key(100);
        let b = key(200);
        map.record_candidate(&a).unwrap();
        let wit_a = map.query_candidate(&a).unwrap().unwrap();
        assert!(wit_a.verify(&map.root()));
        map.record_candidate(&b).unwrap();
        // The unrelated insert moved the root; the old witness is stale
        assert!(!wit_a.verify(&map.root()));
        // A refreshed witness verifies again
        let fresh = map.query_candidate(&a).unwrap().unwrap();
        assert!(fresh.verify(&map.root()));
    }

    #[test]
    fn test_slot_conflict_is_error() {
        let mut map = DelegateMap::new();
        // Two distinct keys sharing the low 16 bits land in the same slot
        let a = key(3);
        let b = key(3 + (1u64 << 32));
        assert_eq!(slot_index(&a), slot_index(&b));
        map.record_candidate(&a).unwrap();
        assert!(map.record_candidate(&b).is_err());
        assert!(!map.get(&b));
    }

    #[test]
    fn test_witness_rejects_wrong_length() {
        let wit = MapWitness {
            key: key(1),
            index: 0,
            value: 0,
            siblings: vec![[0u8; 32]; MAP_DEPTH - 1],
        };
        assert!(wit.compute_root().is_err());
    }
}
