use bevy::prelude::*;

use crate::block::{
    BlockMeta, BlockStore, GeometryPayload, GeometryPayloadQueue, QueuedGeometryPayload,
    StoreUpdate, TxGeometry,
};
use crate::camera::ExplorerCamera;
use crate::chain::ChainHandle;
use crate::config::{SpiralConfig, StreamConfig};
use crate::spiral::BlockPositions;

use super::gateway::{ComputeGateway, ResolvedBlock};
use super::ledger::{BaseGeometrySet, RequestLedger};

/// Teleport-style navigation: bypasses the movement threshold and makes the
/// given height the window center on the next pass.
#[derive(Event, Debug, Clone, Copy)]
pub struct JumpToHeight {
    pub height: u64,
}

/// Fired whenever a pass re-centers the window on a new closest height.
#[derive(Event, Debug, Clone, Copy)]
pub struct WindowChanged {
    pub closest_height: u64,
}

/// Fired once per height when its placement-only placeholder is seeded, so
/// layout collaborators can place something before full data streams in.
#[derive(Event, Debug, Clone, Copy)]
pub struct BlockSeeded {
    pub height: u64,
    pub position: Vec2,
}

/// Mutable state of the windowed streaming controller. Passes never
/// overlap: `pass_active` latches when a batch dispatches and releases when
/// its result merges (or the batch times out).
#[derive(Resource, Debug)]
pub struct StreamWindow {
    pub closest_height: u64,
    pub last_load_pos: Option<Vec2>,
    pub generation: u64,
    pub pass_active: bool,
}

impl StreamWindow {
    pub fn starting_at(closest_height: u64) -> Self {
        Self {
            closest_height,
            last_load_pos: None,
            generation: 0,
            pass_active: false,
        }
    }
}

/// Entry point of a window pass: decides whether the observer moved enough
/// (or jumped), re-centers the window, evicts, seeds placeholders, and
/// dispatches the batch request.
pub fn trigger_stream_pass(
    mut window: ResMut<StreamWindow>,
    mut jumps: EventReader<JumpToHeight>,
    camera_query: Query<&Transform, With<ExplorerCamera>>,
    positions: Res<BlockPositions>,
    mut store: ResMut<BlockStore>,
    mut base_geometry: ResMut<BaseGeometrySet>,
    mut gateway: ResMut<ComputeGateway>,
    chain: Res<ChainHandle>,
    spiral: Res<SpiralConfig>,
    stream: Res<StreamConfig>,
    time: Res<Time>,
    mut seeded_events: EventWriter<BlockSeeded>,
    mut window_events: EventWriter<WindowChanged>,
) {
    let Ok(camera_transform) = camera_query.get_single() else {
        return;
    };

    // New triggers are ignored until the in-flight pass completes. A jump
    // arriving now is dropped with it; the next keypress lands normally.
    let jump = jumps.read().last().map(|jump| jump.height);
    if window.pass_active {
        return;
    }

    if jump.is_none() && camera_transform.translation.y > stream.disengage_altitude {
        return;
    }

    let observer = Vec2::new(
        camera_transform.translation.x,
        camera_transform.translation.z,
    );

    let moved = movement_exceeds_threshold(window.last_load_pos, observer, stream.movement_threshold);
    if jump.is_none() && !moved {
        return;
    }

    window.last_load_pos = Some(observer);

    let previous_closest = window.closest_height;
    let closest = match jump {
        Some(height) => height.min(positions.max_height()),
        None => local_closest_search(
            &positions,
            window.closest_height,
            observer,
            stream.local_search_radius,
        ),
    };
    window.closest_height = closest;

    for height in evict_stale_records(&mut store, closest, stream.eviction_radius) {
        info!("dropped block data at height {}", height);
    }

    for height in base_geometry.evict_outside(closest, stream.base_geometry_radius) {
        debug!("dropped base geometry at height {}", height);
    }

    for height in window_heights(closest, stream.stream_radius, positions.max_height()) {
        let Some(position) = positions.get(height) else {
            continue;
        };
        store.seed_placeholder(height, position);
        if base_geometry.insert(height) {
            seeded_events.send(BlockSeeded { height, position });
        }
    }

    window.generation = window.generation.wrapping_add(1);
    window.pass_active = true;
    gateway.spawn_batch(
        time.elapsed_seconds(),
        chain.0.clone(),
        spiral.clone(),
        positions.max_height(),
        closest,
        window.generation,
    );

    if closest != previous_closest || jump.is_some() {
        window_events.send(WindowChanged {
            closest_height: closest,
        });
    }
}

/// Merges a finished batch, then backfills the innermost heights the batch
/// left unresolved with ledger-guarded single jobs. Completing the batch is
/// what ends the pass.
pub fn merge_batch_results(
    mut gateway: ResMut<ComputeGateway>,
    mut window: ResMut<StreamWindow>,
    mut store: ResMut<BlockStore>,
    positions: Res<BlockPositions>,
    mut ledger: ResMut<RequestLedger>,
    chain: Res<ChainHandle>,
    spiral: Res<SpiralConfig>,
    stream: Res<StreamConfig>,
    mut payloads: ResMut<GeometryPayloadQueue>,
    time: Res<Time>,
) {
    let Some(result) = gateway.poll_batch() else {
        return;
    };

    for (height, error) in &result.failures {
        warn!("batch slot for height {} failed: {}", height, error);
    }

    let closest = window.closest_height;
    for resolved in result.resolved {
        merge_resolved(
            resolved,
            closest,
            result.generation,
            &stream,
            &positions,
            &mut store,
            &mut payloads,
        );
    }

    let now = time.elapsed_seconds();
    for height in single_dispatch_heights(closest, stream.single_dispatch_radius, positions.max_height())
    {
        if store.is_loaded(height) {
            continue;
        }
        if !ledger.try_acquire(height) {
            continue;
        }
        gateway.spawn_block(
            now,
            chain.0.clone(),
            spiral.clone(),
            height,
            closest,
            window.generation,
        );
    }

    window.pass_active = false;
}

/// Drains finished single-height jobs, releasing their ledger slot whether
/// they succeeded or not.
pub fn merge_block_results(
    mut gateway: ResMut<ComputeGateway>,
    mut ledger: ResMut<RequestLedger>,
    window: Res<StreamWindow>,
    mut store: ResMut<BlockStore>,
    positions: Res<BlockPositions>,
    stream: Res<StreamConfig>,
    mut payloads: ResMut<GeometryPayloadQueue>,
) {
    for result in gateway.poll_blocks() {
        ledger.release(result.height);

        match result.outcome {
            Ok(resolved) => merge_resolved(
                resolved,
                window.closest_height,
                result.generation,
                &stream,
                &positions,
                &mut store,
                &mut payloads,
            ),
            Err(error) => {
                warn!("background job for height {} failed: {}", result.height, error);
            }
        }
    }
}

/// Force-releases jobs that outlived the timeout. Dropping the task handle
/// cancels it, so a late completion cannot merge.
pub fn expire_stalled_jobs(
    mut gateway: ResMut<ComputeGateway>,
    mut ledger: ResMut<RequestLedger>,
    mut window: ResMut<StreamWindow>,
    stream: Res<StreamConfig>,
    time: Res<Time>,
) {
    let now = time.elapsed_seconds();
    let (batch_expired, expired_heights) = gateway.expire_stalled(now, stream.job_timeout_secs);

    if batch_expired {
        warn!(
            "batch request stalled past {}s; cancelling pass",
            stream.job_timeout_secs
        );
        window.pass_active = false;
    }

    for height in expired_heights {
        warn!(
            "job for height {} stalled past {}s; releasing its slot",
            height, stream.job_timeout_secs
        );
        ledger.release(height);
    }
}

/// Staleness-guarded merge of one resolved block. Results for heights the
/// window has since moved away from are logged and discarded, never
/// written.
fn merge_resolved(
    resolved: ResolvedBlock,
    closest: u64,
    generation: u64,
    stream: &StreamConfig,
    positions: &BlockPositions,
    store: &mut BlockStore,
    payloads: &mut GeometryPayloadQueue,
) {
    let height = resolved.height;

    if height.abs_diff(closest) > stream.merge_radius {
        debug!(
            "window moved too far from height {} (pass {}); discarding result",
            height, generation
        );
        return;
    }

    let Some(position) = positions.get(height) else {
        return;
    };

    match store.promote(height, position, resolved.meta.clone(), resolved.geometry.clone()) {
        StoreUpdate::Promoted => {
            debug!("loaded block at height {}", height);
            enqueue_payload(height, resolved.meta, resolved.geometry, payloads);
        }
        StoreUpdate::Unchanged => {}
        StoreUpdate::Divergent => {
            warn!(
                "conflicting data arrived for already-loaded height {}; keeping cached record",
                height
            );
        }
    }
}

fn enqueue_payload(
    height: u64,
    meta: BlockMeta,
    geometry: TxGeometry,
    payloads: &mut GeometryPayloadQueue,
) {
    let hash = meta.hash.clone();
    match GeometryPayload::new(meta, geometry).to_bytes() {
        Ok(bytes) => payloads.enqueue(QueuedGeometryPayload {
            height,
            hash,
            bytes,
        }),
        Err(error) => warn!("failed to encode payload for height {}: {:?}", height, error),
    }
}

/// Per-axis movement check against the last pass position. The first call
/// of a session always reports movement.
pub fn movement_exceeds_threshold(last: Option<Vec2>, current: Vec2, threshold: f32) -> bool {
    match last {
        None => true,
        Some(last) => {
            (current.x - last.x).abs() > threshold || (current.y - last.y).abs() > threshold
        }
    }
}

/// Drops every record outside `closest ± radius`, returning the evicted
/// heights for logging.
pub fn evict_stale_records(store: &mut BlockStore, closest: u64, radius: u64) -> Vec<u64> {
    let evicted: Vec<u64> = store
        .heights()
        .filter(|height| height.abs_diff(closest) > radius)
        .collect();
    for height in &evicted {
        store.remove(*height);
    }
    evicted
}

/// Cheap nearest-height refinement: spiral locality means the true closest
/// height drifts only a few slots between passes, so scanning `± radius`
/// around the previous center is enough.
pub fn local_closest_search(
    positions: &BlockPositions,
    previous_closest: u64,
    observer: Vec2,
    radius: u64,
) -> u64 {
    let start = previous_closest.saturating_sub(radius);
    let end = (previous_closest + radius).min(positions.max_height());

    let mut closest = previous_closest;
    let mut closest_dist = f32::MAX;

    for height in start..=end {
        let Some(dist) = positions.distance_sq(height, observer) else {
            continue;
        };
        if dist < closest_dist {
            closest_dist = dist;
            closest = height;
        }
    }

    closest
}

/// Heights seeded with placeholders each pass: the center, then pairs
/// stepping outward to the stream radius, clamped to `[0, max_height]`.
pub fn window_heights(closest: u64, stream_radius: u64, max_height: u64) -> Vec<u64> {
    let mut heights = Vec::with_capacity(stream_radius as usize * 2 + 1);
    if closest <= max_height {
        heights.push(closest);
    }

    for step in 1..=stream_radius {
        let next = closest + step;
        if next <= max_height {
            heights.push(next);
        }
        if let Some(prev) = closest.checked_sub(step) {
            heights.push(prev);
        }
    }

    heights
}

/// Innermost heights worth a dedicated job when the batch misses them.
/// Mirrors the batch arm: the center plus `radius - 1` either side.
pub fn single_dispatch_heights(closest: u64, radius: u64, max_height: u64) -> Vec<u64> {
    let mut heights = Vec::new();
    if closest <= max_height {
        heights.push(closest);
    }

    for step in 1..radius.max(1) {
        let next = closest + step;
        if next <= max_height {
            heights.push(next);
        }
        if let Some(prev) = closest.checked_sub(step) {
            heights.push(prev);
        }
    }

    heights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{RawBlock, TxRecord};

    fn positions() -> BlockPositions {
        BlockPositions::compute(500_000, &SpiralConfig::default())
    }

    fn resolved_at(height: u64) -> ResolvedBlock {
        let raw = RawBlock {
            hash: format!("{:064x}", height),
            height,
            size: 300,
            fee: 0.01,
            output_total: 12.0,
            time: 1_600_000_000,
            nonce: 0,
            bits: 0x1700_0000,
            version: 1,
            merkle_root: "0".repeat(64),
            txs: vec![TxRecord {
                index: 0,
                value: 2.0,
                spent_ratio: 0.5,
            }],
        };
        ResolvedBlock {
            height,
            meta: BlockMeta::from_raw(&raw),
            geometry: crate::geometry::derive_geometry(&raw.txs, &SpiralConfig::default()),
        }
    }

    #[test]
    fn local_search_finds_the_true_nearest_slot() {
        let index = positions();
        let target = index.get(1_003).unwrap();

        let found = local_closest_search(&index, 1_000, target, 5);
        assert_eq!(found, 1_003);
    }

    #[test]
    fn local_search_clamps_at_chain_edges() {
        let index = positions();
        let at_genesis = local_closest_search(&index, 2, index.get(0).unwrap(), 5);
        assert_eq!(at_genesis, 0);

        let tip = index.max_height();
        let at_tip = local_closest_search(&index, tip - 2, index.get(tip).unwrap(), 5);
        assert_eq!(at_tip, tip);
    }

    #[test]
    fn window_heights_cover_the_stream_radius() {
        let heights = window_heights(250_000, 24, 500_000);
        assert_eq!(heights.len(), 49);
        for height in 249_976..=250_024 {
            assert!(heights.contains(&height));
        }
    }

    #[test]
    fn window_heights_clamp_at_genesis() {
        let heights = window_heights(3, 24, 500_000);
        assert!(heights.contains(&0));
        assert!(!heights.iter().any(|&h| h > 27));
        assert_eq!(heights.len(), 28);
    }

    #[test]
    fn single_dispatch_matches_the_batch_arm() {
        let heights = single_dispatch_heights(1_000, 5, 500_000);
        assert_eq!(heights.len(), 9);
        for height in 996..=1_004 {
            assert!(heights.contains(&height));
        }
    }

    #[test]
    fn sub_threshold_movement_is_a_noop_trigger() {
        let threshold = StreamConfig::default().movement_threshold;
        let last = Some(Vec2::new(1_000.0, 1_000.0));

        assert!(!movement_exceeds_threshold(
            last,
            Vec2::new(1_400.0, 1_200.0),
            threshold
        ));
        assert!(movement_exceeds_threshold(
            last,
            Vec2::new(1_501.0, 1_000.0),
            threshold
        ));
        assert!(movement_exceeds_threshold(
            last,
            Vec2::new(1_000.0, 400.0),
            threshold
        ));
        assert!(movement_exceeds_threshold(None, Vec2::ZERO, threshold));
    }

    #[test]
    fn surviving_heights_form_a_subset_of_the_eviction_window() {
        let index = positions();
        let stream = StreamConfig::default();
        let mut store = BlockStore::default();

        // Seed a full window around 1_000, then re-center far away at
        // 2_000 the way a jump pass would.
        for height in window_heights(1_000, stream.stream_radius, index.max_height()) {
            store.seed_placeholder(height, index.get(height).unwrap());
        }
        for height in window_heights(2_000, stream.stream_radius, index.max_height()) {
            store.seed_placeholder(height, index.get(height).unwrap());
        }

        let evicted = evict_stale_records(&mut store, 2_000, stream.eviction_radius);
        assert_eq!(evicted.len(), 49);

        for height in store.heights() {
            assert!(
                height.abs_diff(2_000) <= stream.eviction_radius,
                "height {} survived outside the window",
                height
            );
        }
    }

    #[test]
    fn stale_results_never_reach_the_store() {
        let index = positions();
        let stream = StreamConfig::default();
        let mut store = BlockStore::default();
        let mut payloads = GeometryPayloadQueue::default();

        // Result for height 250_000 arriving after a jump to height 10.
        merge_resolved(
            resolved_at(250_000),
            10,
            7,
            &stream,
            &index,
            &mut store,
            &mut payloads,
        );

        assert!(store.is_empty());
        assert!(payloads.is_empty());
    }

    #[test]
    fn in_window_results_promote_and_feed_the_sidecar() {
        let index = positions();
        let stream = StreamConfig::default();
        let mut store = BlockStore::default();
        let mut payloads = GeometryPayloadQueue::default();

        store.seed_placeholder(250_000, index.get(250_000).unwrap());
        merge_resolved(
            resolved_at(250_000),
            250_003,
            7,
            &stream,
            &index,
            &mut store,
            &mut payloads,
        );

        assert!(store.is_loaded(250_000));
        assert!(!payloads.is_empty());
    }

    #[test]
    fn duplicate_merge_does_not_requeue_the_sidecar() {
        let index = positions();
        let stream = StreamConfig::default();
        let mut store = BlockStore::default();
        let mut payloads = GeometryPayloadQueue::default();

        merge_resolved(
            resolved_at(250_000),
            250_000,
            7,
            &stream,
            &index,
            &mut store,
            &mut payloads,
        );
        let first_batch = payloads.take_all();
        assert_eq!(first_batch.len(), 1);

        merge_resolved(
            resolved_at(250_000),
            250_000,
            8,
            &stream,
            &index,
            &mut store,
            &mut payloads,
        );
        assert!(payloads.is_empty());
    }
}
