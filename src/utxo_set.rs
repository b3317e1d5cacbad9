//! UTXO set: the authoritative index of unspent outputs.
//!
//! Two indices are kept in lockstep under one lock: the primary
//! `(txid, vout) → UTXO` map and a secondary `script → outpoints` map used
//! for address queries and coin selection. Spent outputs stay in the primary
//! index (flagged) until the spending block is finalized and `prune_spent`
//! drops them; they leave the secondary index immediately so balances and
//! selection never see them.

use crate::types::{Hash256, OutPoint, DUST_THRESHOLD, UTXO};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum UtxoError {
    #[error("UTXO not found")]
    NotFound,

    #[error("UTXO already spent")]
    AlreadySpent,

    #[error("UTXO already exists")]
    Duplicate,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },
}

/// Result of largest-first coin selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub utxos: Vec<UTXO>,
    pub total: u64,
    /// Change after amount + fee. A sub-dust delta is absorbed into the fee
    /// and reported as zero here.
    pub change: u64,
}

#[derive(Default)]
struct Indexes {
    by_outpoint: HashMap<OutPoint, UTXO>,
    by_script: HashMap<Vec<u8>, BTreeSet<OutPoint>>,
}

pub struct UtxoSet {
    inner: RwLock<Indexes>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indexes::default()),
        }
    }

    pub fn add(&self, utxo: UTXO) -> Result<(), UtxoError> {
        let mut inner = self.inner.write();
        if inner.by_outpoint.contains_key(&utxo.outpoint) {
            return Err(UtxoError::Duplicate);
        }
        inner
            .by_script
            .entry(utxo.script_pubkey.clone())
            .or_default()
            .insert(utxo.outpoint.clone());
        inner.by_outpoint.insert(utxo.outpoint.clone(), utxo);
        Ok(())
    }

    /// Mark an output spent and return it. The entry leaves the secondary
    /// index immediately; the primary entry survives (flagged) until pruned.
    pub fn spend(&self, txid: &Hash256, vout: u32) -> Result<UTXO, UtxoError> {
        let outpoint = OutPoint::new(*txid, vout);
        let mut inner = self.inner.write();

        let utxo = inner
            .by_outpoint
            .get_mut(&outpoint)
            .ok_or(UtxoError::NotFound)?;
        if utxo.spent {
            return Err(UtxoError::AlreadySpent);
        }
        utxo.spent = true;
        let spent = utxo.clone();

        if let Some(set) = inner.by_script.get_mut(&spent.script_pubkey) {
            set.remove(&outpoint);
            if set.is_empty() {
                inner.by_script.remove(&spent.script_pubkey);
            }
        }
        Ok(spent)
    }

    pub fn get(&self, txid: &Hash256, vout: u32) -> Option<UTXO> {
        self.inner
            .read()
            .by_outpoint
            .get(&OutPoint::new(*txid, vout))
            .cloned()
    }

    /// Unspent outputs locked by `script`, largest value first.
    pub fn utxos_of(&self, script: &[u8]) -> Vec<UTXO> {
        let inner = self.inner.read();
        let mut utxos: Vec<UTXO> = inner
            .by_script
            .get(script)
            .into_iter()
            .flatten()
            .filter_map(|op| inner.by_outpoint.get(op))
            .filter(|u| !u.spent)
            .cloned()
            .collect();
        utxos.sort_by(|a, b| b.value.cmp(&a.value));
        utxos
    }

    pub fn balance(&self, script: &[u8]) -> u64 {
        self.utxos_of(script).iter().map(|u| u.value).sum()
    }

    /// Outputs locked by `script` including spent-but-unpruned ones, for
    /// listings that ask for spent history.
    pub fn snapshot_with_spent(&self, script: &[u8]) -> Vec<UTXO> {
        let inner = self.inner.read();
        inner
            .by_outpoint
            .values()
            .filter(|u| u.script_pubkey == script)
            .cloned()
            .collect()
    }

    /// Largest-first greedy selection covering `amount + estimated_fee`.
    pub fn select(
        &self,
        script: &[u8],
        amount: u64,
        estimated_fee: u64,
    ) -> Result<Selection, UtxoError> {
        let candidates = self.utxos_of(script);
        let available: u64 = candidates.iter().map(|u| u.value).sum();
        let required = amount + estimated_fee;

        if available < required {
            return Err(UtxoError::InsufficientFunds {
                required,
                available,
            });
        }

        let mut picked = Vec::new();
        let mut total = 0u64;
        for utxo in candidates {
            total += utxo.value;
            picked.push(utxo);
            if total >= required {
                break;
            }
        }

        let raw_change = total - required;
        // A change output at or below dust is not worth an output slot
        let change = if raw_change <= DUST_THRESHOLD && raw_change > 0 {
            0
        } else {
            raw_change
        };

        Ok(Selection {
            utxos: picked,
            total,
            change,
        })
    }

    /// Drop spent entries created at or below `height`.
    pub fn prune_spent(&self, height: u64) -> usize {
        let mut inner = self.inner.write();
        let before = inner.by_outpoint.len();
        inner
            .by_outpoint
            .retain(|_, u| !(u.spent && u.block_height <= height));
        before - inner.by_outpoint.len()
    }

    pub fn unspent_count(&self) -> usize {
        self.inner
            .read()
            .by_outpoint
            .values()
            .filter(|u| !u.spent)
            .count()
    }

    /// Snapshot of every unspent output, ordered by outpoint for stable
    /// set hashing and snapshot sync.
    pub fn snapshot(&self) -> Vec<UTXO> {
        let inner = self.inner.read();
        let mut utxos: Vec<UTXO> = inner
            .by_outpoint
            .values()
            .filter(|u| !u.spent)
            .cloned()
            .collect();
        utxos.sort_by(|a, b| {
            (&a.outpoint.txid, a.outpoint.vout).cmp(&(&b.outpoint.txid, b.outpoint.vout))
        });
        utxos
    }

    /// Hash of the full unspent set for snapshot verification.
    pub fn set_hash(&self) -> Hash256 {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        for utxo in self.snapshot() {
            hasher.update(utxo.outpoint.txid);
            hasher.update(utxo.outpoint.vout.to_le_bytes());
            hasher.update(utxo.value.to_le_bytes());
            hasher.update(&utxo.script_pubkey);
        }
        hasher.finalize().into()
    }
}

impl Default for UtxoSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(txid_byte: u8, vout: u32, value: u64, script: &[u8]) -> UTXO {
        UTXO {
            outpoint: OutPoint::new([txid_byte; 32], vout),
            value,
            script_pubkey: script.to_vec(),
            block_height: 1,
            spent: false,
        }
    }

    #[test]
    fn add_spend_lifecycle() {
        let set = UtxoSet::new();
        set.add(utxo(1, 0, 5_000, b"alice")).unwrap();

        assert_eq!(set.balance(b"alice"), 5_000);

        let spent = set.spend(&[1u8; 32], 0).unwrap();
        assert!(spent.spent);
        assert_eq!(set.balance(b"alice"), 0);

        // Second spend is a double spend, not a missing entry
        assert_eq!(set.spend(&[1u8; 32], 0), Err(UtxoError::AlreadySpent));
        // Primary index still serves the spent output until pruning
        assert!(set.get(&[1u8; 32], 0).unwrap().spent);

        assert_eq!(set.prune_spent(1), 1);
        assert!(set.get(&[1u8; 32], 0).is_none());
    }

    #[test]
    fn duplicate_add_rejected() {
        let set = UtxoSet::new();
        set.add(utxo(1, 0, 1_000, b"alice")).unwrap();
        assert_eq!(set.add(utxo(1, 0, 1_000, b"alice")), Err(UtxoError::Duplicate));
    }

    #[test]
    fn selection_is_largest_first() {
        let set = UtxoSet::new();
        set.add(utxo(1, 0, 1_000, b"miner")).unwrap();
        set.add(utxo(2, 0, 50_000, b"miner")).unwrap();
        set.add(utxo(3, 0, 10_000, b"miner")).unwrap();

        let selection = set.select(b"miner", 55_000, 100).unwrap();
        assert_eq!(selection.utxos[0].value, 50_000);
        assert_eq!(selection.utxos[1].value, 10_000);
        assert_eq!(selection.total, 60_000);
        assert_eq!(selection.change, 60_000 - 55_000 - 100);
    }

    #[test]
    fn selection_insufficient_funds() {
        let set = UtxoSet::new();
        set.add(utxo(1, 0, 1_000, b"alice")).unwrap();

        let err = set.select(b"alice", 2_000, 50).unwrap_err();
        assert_eq!(
            err,
            UtxoError::InsufficientFunds {
                required: 2_050,
                available: 1_000
            }
        );
    }

    #[test]
    fn exact_selection_has_zero_change() {
        let set = UtxoSet::new();
        set.add(utxo(1, 0, 2_050, b"alice")).unwrap();

        let selection = set.select(b"alice", 2_000, 50).unwrap();
        assert_eq!(selection.change, 0);
    }

    #[test]
    fn sub_dust_change_absorbed_into_fee() {
        let set = UtxoSet::new();
        set.add(utxo(1, 0, 2_050 + DUST_THRESHOLD - 1, b"alice"))
            .unwrap();

        let selection = set.select(b"alice", 2_000, 50).unwrap();
        // Raw change of DUST_THRESHOLD - 1 is absorbed
        assert_eq!(selection.change, 0);
        assert_eq!(selection.total, 2_050 + DUST_THRESHOLD - 1);
    }

    #[test]
    fn set_hash_tracks_content() {
        let set = UtxoSet::new();
        set.add(utxo(1, 0, 1_000, b"alice")).unwrap();
        let h1 = set.set_hash();

        set.add(utxo(2, 0, 2_000, b"bob")).unwrap();
        let h2 = set.set_hash();
        assert_ne!(h1, h2);

        set.spend(&[2u8; 32], 0).unwrap();
        assert_eq!(set.set_hash(), h1);
    }
}
