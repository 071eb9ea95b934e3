use crate::block::{TxGeometry, TX_BUFFER_CAPACITY};
use crate::chain::TxRecord;
use crate::config::SpiralConfig;

/// Golden angle in radians; gives the evenest sunflower packing.
const PACKING_ANGLE: f32 = 2.399_963;

/// Fraction of the block plane the transaction crystal may occupy.
const PLANE_USAGE: f32 = 0.9;

const MIN_SCALE: f32 = 0.05;
const MAX_SCALE: f32 = 6.0;

/// Derives the per-transaction geometry buffers for one block: a Vogel
/// spiral packs transactions across the block plane oldest-first, scale
/// grows with the logarithm of the carried value, and spent ratios pass
/// through for shading. Pure and deterministic; inputs beyond
/// [`TX_BUFFER_CAPACITY`] are truncated.
pub fn derive_geometry(txs: &[TxRecord], config: &SpiralConfig) -> TxGeometry {
    let count = txs.len().min(TX_BUFFER_CAPACITY);

    let mut geometry = TxGeometry {
        offsets: Vec::with_capacity(count * 2),
        scales: Vec::with_capacity(count),
        values: Vec::with_capacity(count),
        spent_ratios: Vec::with_capacity(count),
        tx_indexes: Vec::with_capacity(count),
    };

    if count == 0 {
        return geometry;
    }

    let usable_radius = config.plane_size * 0.5 * PLANE_USAGE;
    let spacing = usable_radius / (count as f32).sqrt();

    for (slot, tx) in txs.iter().take(count).enumerate() {
        let ring = spacing * (slot as f32).sqrt();
        let angle = slot as f32 * PACKING_ANGLE;

        geometry.offsets.push(angle.cos() * ring);
        geometry.offsets.push(angle.sin() * ring);
        geometry.scales.push(value_scale(tx.value));
        geometry.values.push(tx.value);
        geometry.spent_ratios.push(tx.spent_ratio.clamp(0.0, 1.0));
        geometry.tx_indexes.push(tx.index);
    }

    geometry
}

fn value_scale(value: f32) -> f32 {
    (1.0 + value.max(0.0)).ln().clamp(MIN_SCALE, MAX_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txs(count: usize) -> Vec<TxRecord> {
        (0..count)
            .map(|index| TxRecord {
                index: index as u32,
                value: index as f32 * 0.01,
                spent_ratio: (index % 10) as f32 / 10.0,
            })
            .collect()
    }

    #[test]
    fn buffers_share_one_length_and_respect_capacity() {
        let geometry = derive_geometry(&txs(TX_BUFFER_CAPACITY + 500), &SpiralConfig::default());
        assert_eq!(geometry.tx_count(), TX_BUFFER_CAPACITY);
        assert!(geometry.is_consistent());
    }

    #[test]
    fn offsets_stay_inside_the_plane() {
        let config = SpiralConfig::default();
        let geometry = derive_geometry(&txs(3_000), &config);
        let half_plane = config.plane_size * 0.5;

        for pair in geometry.offsets.chunks_exact(2) {
            let distance = (pair[0] * pair[0] + pair[1] * pair[1]).sqrt();
            assert!(distance <= half_plane, "offset {} escapes plane", distance);
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let config = SpiralConfig::default();
        assert_eq!(
            derive_geometry(&txs(100), &config),
            derive_geometry(&txs(100), &config)
        );
    }

    #[test]
    fn empty_block_yields_empty_buffers() {
        let geometry = derive_geometry(&[], &SpiralConfig::default());
        assert_eq!(geometry.tx_count(), 0);
        assert!(geometry.is_consistent());
    }
}
