use std::collections::HashMap;

use bevy::prelude::*;

use super::data::{BlockMeta, BlockRecord, BlockStatus, TxGeometry};

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv_extend(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= *byte as u64;
        *hash = hash.wrapping_mul(FNV_PRIME);
    }
}

fn compute_content_hash(meta: &BlockMeta, geometry: &TxGeometry) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    fnv_extend(&mut hash, meta.hash.as_bytes());
    fnv_extend(&mut hash, &meta.height.to_le_bytes());
    fnv_extend(&mut hash, &meta.size.to_le_bytes());
    fnv_extend(&mut hash, &meta.fee.to_bits().to_le_bytes());
    fnv_extend(&mut hash, &meta.output_total.to_bits().to_le_bytes());
    fnv_extend(&mut hash, &meta.time.to_le_bytes());
    fnv_extend(&mut hash, &meta.nonce.to_le_bytes());
    fnv_extend(&mut hash, &meta.tx_count.to_le_bytes());
    for value in &geometry.offsets {
        fnv_extend(&mut hash, &value.to_bits().to_le_bytes());
    }
    for value in &geometry.scales {
        fnv_extend(&mut hash, &value.to_bits().to_le_bytes());
    }
    for value in &geometry.spent_ratios {
        fnv_extend(&mut hash, &value.to_bits().to_le_bytes());
    }
    hash
}

struct StoredBlock {
    record: BlockRecord,
    content_hash: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StoreUpdate {
    /// A placeholder (or absent slot) became Loaded.
    Promoted,
    /// The height was already Loaded with identical content.
    Unchanged,
    /// The height was already Loaded but the arriving content differs.
    /// Still a no-op for the store; callers treat it as a reorg hint.
    Divergent,
}

/// Height-keyed cache of block records. Single-writer: only the stream
/// window systems mutate it, everything else reads snapshots.
#[derive(Resource, Default)]
pub struct BlockStore {
    records: HashMap<u64, StoredBlock>,
}

impl BlockStore {
    pub fn get(&self, height: u64) -> Option<&BlockRecord> {
        self.records.get(&height).map(|stored| &stored.record)
    }

    pub fn contains(&self, height: u64) -> bool {
        self.records.contains_key(&height)
    }

    pub fn is_loaded(&self, height: u64) -> bool {
        self.get(height).map(BlockRecord::is_loaded).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts a position-only Pending record. Returns false (and leaves the
    /// existing record alone) when the height is already present.
    pub fn seed_placeholder(&mut self, height: u64, position: Vec2) -> bool {
        if self.records.contains_key(&height) {
            return false;
        }
        self.records.insert(
            height,
            StoredBlock {
                record: BlockRecord::placeholder(height, position),
                content_hash: 0,
            },
        );
        true
    }

    /// Merges a resolved block. Placeholders are promoted; an absent height
    /// is inserted directly as Loaded. A second arrival for an already
    /// Loaded height never mutates anything.
    pub fn promote(
        &mut self,
        height: u64,
        position: Vec2,
        meta: BlockMeta,
        geometry: TxGeometry,
    ) -> StoreUpdate {
        let content_hash = compute_content_hash(&meta, &geometry);

        if let Some(stored) = self.records.get_mut(&height) {
            if stored.record.is_loaded() {
                return if stored.content_hash == content_hash {
                    StoreUpdate::Unchanged
                } else {
                    StoreUpdate::Divergent
                };
            }

            stored.record.status = BlockStatus::Loaded;
            stored.record.meta = Some(meta);
            stored.record.geometry = Some(geometry);
            stored.content_hash = content_hash;
            return StoreUpdate::Promoted;
        }

        self.records.insert(
            height,
            StoredBlock {
                record: BlockRecord {
                    height,
                    position,
                    status: BlockStatus::Loaded,
                    meta: Some(meta),
                    geometry: Some(geometry),
                },
                content_hash,
            },
        );
        StoreUpdate::Promoted
    }

    pub fn remove(&mut self, height: u64) -> bool {
        self.records.remove(&height).is_some()
    }

    pub fn heights(&self) -> impl Iterator<Item = u64> + '_ {
        self.records.keys().copied()
    }

    pub fn loaded(&self) -> impl Iterator<Item = &BlockRecord> {
        self.records
            .values()
            .map(|stored| &stored.record)
            .filter(|record| record.is_loaded())
    }
}

/// One promoted block queued for the write-through sidecar.
#[derive(Debug, Clone)]
pub struct QueuedGeometryPayload {
    pub height: u64,
    pub hash: String,
    pub bytes: Vec<u8>,
}

#[derive(Resource, Default)]
pub struct GeometryPayloadQueue {
    pending: Vec<QueuedGeometryPayload>,
}

impl GeometryPayloadQueue {
    pub fn enqueue(&mut self, payload: QueuedGeometryPayload) {
        self.pending.push(payload);
    }

    pub fn take_all(&mut self) -> Vec<QueuedGeometryPayload> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{RawBlock, TxRecord};

    fn meta_at(height: u64, fee: f64) -> BlockMeta {
        BlockMeta::from_raw(&RawBlock {
            hash: format!("{:064x}", height),
            height,
            size: 100,
            fee,
            output_total: 50.0,
            time: 1_600_000_000 + height,
            nonce: 1,
            bits: 0x1700_0000,
            version: 1,
            merkle_root: "0".repeat(64),
            txs: vec![TxRecord {
                index: 0,
                value: 1.0,
                spent_ratio: 0.0,
            }],
        })
    }

    fn geometry() -> TxGeometry {
        TxGeometry {
            offsets: vec![0.0, 0.0],
            scales: vec![1.0],
            values: vec![1.0],
            spent_ratios: vec![0.0],
            tx_indexes: vec![0],
        }
    }

    #[test]
    fn placeholder_promotes_once() {
        let mut store = BlockStore::default();
        assert!(store.seed_placeholder(5, Vec2::ZERO));
        assert!(!store.seed_placeholder(5, Vec2::ONE));
        assert!(!store.is_loaded(5));

        let update = store.promote(5, Vec2::ZERO, meta_at(5, 0.1), geometry());
        assert_eq!(update, StoreUpdate::Promoted);
        assert!(store.is_loaded(5));
    }

    #[test]
    fn re_merge_of_identical_content_is_a_noop() {
        let mut store = BlockStore::default();
        store.promote(9, Vec2::ZERO, meta_at(9, 0.1), geometry());

        let update = store.promote(9, Vec2::ZERO, meta_at(9, 0.1), geometry());
        assert_eq!(update, StoreUpdate::Unchanged);

        let record = store.get(9).expect("record");
        assert!(record.is_loaded());
        assert_eq!(record.meta.as_ref().map(|m| m.height), Some(9));
    }

    #[test]
    fn divergent_re_merge_is_reported_but_not_applied() {
        let mut store = BlockStore::default();
        store.promote(9, Vec2::ZERO, meta_at(9, 0.1), geometry());

        let update = store.promote(9, Vec2::ZERO, meta_at(9, 0.9), geometry());
        assert_eq!(update, StoreUpdate::Divergent);

        let fee = store
            .get(9)
            .and_then(|record| record.meta.as_ref())
            .map(|meta| meta.fee)
            .expect("fee");
        assert!((fee - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn seeding_never_downgrades_a_loaded_record() {
        let mut store = BlockStore::default();
        store.promote(3, Vec2::ZERO, meta_at(3, 0.1), geometry());
        assert!(!store.seed_placeholder(3, Vec2::ZERO));
        assert!(store.is_loaded(3));
    }

    #[test]
    fn heights_reflect_removal() {
        let mut store = BlockStore::default();
        for height in [1_u64, 2, 3] {
            store.seed_placeholder(height, Vec2::ZERO);
        }
        assert!(store.remove(2));
        assert!(!store.remove(2));

        let mut heights: Vec<u64> = store.heights().collect();
        heights.sort_unstable();
        assert_eq!(heights, vec![1, 3]);
    }
}
