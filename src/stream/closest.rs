use bevy::prelude::*;

use crate::block::{BlockRecord, BlockStore};
use crate::camera::ExplorerCamera;
use crate::config::StreamConfig;

/// Fired when the observer settles over a different block. Gated by
/// hysteresis so hovering on the boundary between two blocks does not spam
/// collaborators.
#[derive(Event, Debug, Clone)]
pub struct ClosestBlockChanged {
    pub height: u64,
    pub hash: String,
    pub position: Vec2,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClosestBlockInfo {
    pub height: u64,
    pub hash: String,
    pub position: Vec2,
    pub distance_sq: f32,
}

/// Current nearest Loaded block, re-evaluated every frame independently of
/// the window pass cadence.
#[derive(Resource)]
pub struct ClosestBlock {
    pub current: Option<ClosestBlockInfo>,
    ready_for_update: bool,
}

impl Default for ClosestBlock {
    fn default() -> Self {
        Self {
            current: None,
            ready_for_update: true,
        }
    }
}

pub fn track_closest_block(
    camera_query: Query<&Transform, With<ExplorerCamera>>,
    store: Res<BlockStore>,
    stream: Res<StreamConfig>,
    mut closest: ResMut<ClosestBlock>,
    mut events: EventWriter<ClosestBlockChanged>,
) {
    let Ok(camera_transform) = camera_query.get_single() else {
        return;
    };

    let observer = Vec2::new(
        camera_transform.translation.x,
        camera_transform.translation.z,
    );

    if let Some(event) = evaluate_closest(
        &mut closest,
        observer,
        camera_transform.translation.y,
        store.loaded(),
        &stream,
    ) {
        debug!("closest block changed to height {}", event.height);
        events.send(event);
    }
}

/// Core of the tracker, separated from the ECS plumbing. Emits a change
/// event only when the closest identity differs from the last emission, the
/// observer is inside the engagement distance, and the hysteresis flag is
/// armed. The flag re-arms on identity change (or disengage) and clears on
/// emission.
fn evaluate_closest<'a>(
    closest: &mut ClosestBlock,
    observer: Vec2,
    altitude: f32,
    loaded: impl Iterator<Item = &'a BlockRecord>,
    stream: &StreamConfig,
) -> Option<ClosestBlockChanged> {
    if altitude >= stream.tracker_disengage_altitude {
        closest.current = None;
        closest.ready_for_update = true;
        return None;
    }

    let previous = closest.current.take();

    let mut best: Option<ClosestBlockInfo> = None;
    for record in loaded {
        let distance_sq = record.position.distance_squared(observer);
        if best
            .as_ref()
            .map_or(true, |info| distance_sq < info.distance_sq)
        {
            let hash = record
                .meta
                .as_ref()
                .map(|meta| meta.hash.clone())
                .unwrap_or_default();
            best = Some(ClosestBlockInfo {
                height: record.height,
                hash,
                position: record.position,
                distance_sq,
            });
        }
    }

    let Some(best) = best else {
        closest.current = previous;
        return None;
    };
    closest.current = Some(best.clone());

    let Some(previous) = previous else {
        // First fix after a cold start or disengage; nothing to compare
        // against yet.
        return None;
    };

    if previous.height != best.height {
        closest.ready_for_update = true;
    }

    if best.distance_sq < stream.engagement_distance_sq && closest.ready_for_update {
        closest.ready_for_update = false;
        return Some(ClosestBlockChanged {
            height: best.height,
            hash: best.hash,
            position: best.position,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockMeta, TxGeometry};
    use crate::chain::{RawBlock, TxRecord};

    fn loaded_record(height: u64, position: Vec2) -> BlockRecord {
        let raw = RawBlock {
            hash: format!("{:064x}", height),
            height,
            size: 100,
            fee: 0.001,
            output_total: 1.0,
            time: 0,
            nonce: 0,
            bits: 0,
            version: 1,
            merkle_root: "0".repeat(64),
            txs: vec![TxRecord {
                index: 0,
                value: 1.0,
                spent_ratio: 0.0,
            }],
        };
        BlockRecord {
            height,
            position,
            status: crate::block::BlockStatus::Loaded,
            meta: Some(BlockMeta::from_raw(&raw)),
            geometry: Some(TxGeometry::default()),
        }
    }

    fn stream() -> StreamConfig {
        StreamConfig::default()
    }

    #[test]
    fn first_fix_is_silent_second_frame_emits() {
        let records = [loaded_record(1, Vec2::ZERO), loaded_record(2, Vec2::new(600.0, 0.0))];
        let mut closest = ClosestBlock::default();

        let first = evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        assert!(first.is_none());
        assert_eq!(closest.current.as_ref().map(|c| c.height), Some(1));

        let second = evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        assert_eq!(second.map(|e| e.height), Some(1));
    }

    #[test]
    fn hysteresis_blocks_repeat_emissions_for_the_same_block() {
        let records = [loaded_record(1, Vec2::ZERO)];
        let mut closest = ClosestBlock::default();

        evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        let emitted = evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        assert!(emitted.is_some());

        for _ in 0..5 {
            let again =
                evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
            assert!(again.is_none());
        }
    }

    #[test]
    fn identity_change_rearms_the_flag() {
        let records = [loaded_record(1, Vec2::ZERO), loaded_record(2, Vec2::new(400.0, 0.0))];
        let mut closest = ClosestBlock::default();

        evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        assert!(
            evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream()).is_some()
        );

        // Drift over to block 2: one frame to spot the change, which
        // re-arms, and the event fires the same frame.
        let moved = Vec2::new(400.0, 0.0);
        let event = evaluate_closest(&mut closest, moved, 100.0, records.iter(), &stream());
        assert_eq!(event.map(|e| e.height), Some(2));
    }

    #[test]
    fn distant_closest_does_not_emit() {
        // Block sits ~1000 units out; squared distance is far beyond the
        // engagement threshold.
        let records = [loaded_record(1, Vec2::new(1_000.0, 0.0))];
        let mut closest = ClosestBlock::default();

        evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        let emitted = evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        assert!(emitted.is_none());
        assert_eq!(closest.current.as_ref().map(|c| c.height), Some(1));
    }

    #[test]
    fn disengage_altitude_clears_and_rearms() {
        let records = [loaded_record(1, Vec2::ZERO)];
        let mut closest = ClosestBlock::default();

        evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());

        let high = evaluate_closest(&mut closest, Vec2::ZERO, 5_000.0, records.iter(), &stream());
        assert!(high.is_none());
        assert!(closest.current.is_none());

        // Descending again: first fix silent, then the re-armed flag lets
        // the event through.
        evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        let event = evaluate_closest(&mut closest, Vec2::ZERO, 100.0, records.iter(), &stream());
        assert_eq!(event.map(|e| e.height), Some(1));
    }
}
