use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::*;
use bevy::tasks::{AsyncComputeTaskPool, Task};
use futures_lite::future;

use crate::block::{BlockMeta, TxGeometry};
use crate::chain::{ChainError, ChainSource};
use crate::config::SpiralConfig;
use crate::geometry::derive_geometry;

/// Slots in one batch request; the closest height plus four either side.
pub const BATCH_CAPACITY: usize = 9;

const BATCH_ARM: u64 = (BATCH_CAPACITY as u64 - 1) / 2;

/// One height fully resolved off the main loop.
#[derive(Debug)]
pub struct ResolvedBlock {
    pub height: u64,
    pub meta: BlockMeta,
    pub geometry: TxGeometry,
}

/// Outcome of a batch request. Heights the backend could not resolve show
/// up in `failures`; the window simply retries them while they stay
/// relevant.
#[derive(Debug)]
pub struct BatchResult {
    pub origin_height: u64,
    pub generation: u64,
    pub resolved: Vec<ResolvedBlock>,
    pub failures: Vec<(u64, ChainError)>,
}

#[derive(Debug)]
pub struct BlockResult {
    pub height: u64,
    pub origin_height: u64,
    pub generation: u64,
    pub outcome: Result<ResolvedBlock, ChainError>,
}

struct InFlight<T> {
    spawned_at: f32,
    task: Task<T>,
}

/// Dispatches block resolution onto the async compute pool and hands
/// finished results back to the main loop. Tasks receive owned copies of
/// everything they need and never touch shared engine state; dropping a
/// task cancels it.
#[derive(Resource, Default)]
pub struct ComputeGateway {
    batch: Option<InFlight<BatchResult>>,
    blocks: HashMap<u64, InFlight<BlockResult>>,
}

impl ComputeGateway {
    pub fn batch_in_flight(&self) -> bool {
        self.batch.is_some()
    }

    pub fn blocks_in_flight(&self) -> usize {
        self.blocks.len()
    }

    pub fn spawn_batch(
        &mut self,
        now: f32,
        chain: Arc<dyn ChainSource>,
        spiral: SpiralConfig,
        max_height: u64,
        closest_height: u64,
        generation: u64,
    ) {
        let task = AsyncComputeTaskPool::get().spawn(async move {
            let mut resolved = Vec::with_capacity(BATCH_CAPACITY);
            let mut failures = Vec::new();

            for height in batch_heights(closest_height, max_height) {
                match resolve_height(chain.as_ref(), &spiral, height) {
                    Ok(block) => resolved.push(block),
                    Err(error) => failures.push((height, error)),
                }
            }

            BatchResult {
                origin_height: closest_height,
                generation,
                resolved,
                failures,
            }
        });

        self.batch = Some(InFlight {
            spawned_at: now,
            task,
        });
    }

    pub fn spawn_block(
        &mut self,
        now: f32,
        chain: Arc<dyn ChainSource>,
        spiral: SpiralConfig,
        height: u64,
        closest_height: u64,
        generation: u64,
    ) {
        let task = AsyncComputeTaskPool::get().spawn(async move {
            BlockResult {
                height,
                origin_height: closest_height,
                generation,
                outcome: resolve_height(chain.as_ref(), &spiral, height),
            }
        });

        self.blocks.insert(
            height,
            InFlight {
                spawned_at: now,
                task,
            },
        );
    }

    /// Non-blocking: returns the batch result if it finished since the last
    /// poll, clearing the slot.
    pub fn poll_batch(&mut self) -> Option<BatchResult> {
        let in_flight = self.batch.as_mut()?;
        let finished = future::block_on(future::poll_once(&mut in_flight.task));
        if finished.is_some() {
            self.batch = None;
        }
        finished
    }

    /// Non-blocking: drains every finished single-height task.
    pub fn poll_blocks(&mut self) -> Vec<BlockResult> {
        let mut finished = Vec::new();
        self.blocks.retain(|_, in_flight| {
            match future::block_on(future::poll_once(&mut in_flight.task)) {
                Some(result) => {
                    finished.push(result);
                    false
                }
                None => true,
            }
        });
        finished
    }

    /// Cancels tasks that have been running longer than `timeout` by
    /// dropping their handles. Returns whether the batch slot was cancelled
    /// and which single heights were.
    pub fn expire_stalled(&mut self, now: f32, timeout: f32) -> (bool, Vec<u64>) {
        let batch_expired = match &self.batch {
            Some(in_flight) if now - in_flight.spawned_at > timeout => {
                self.batch = None;
                true
            }
            _ => false,
        };

        let mut expired = Vec::new();
        self.blocks.retain(|height, in_flight| {
            if now - in_flight.spawned_at > timeout {
                expired.push(*height);
                false
            } else {
                true
            }
        });

        (batch_expired, expired)
    }
}

/// Candidate heights for one batch: the closest height first, then pairs
/// stepping outward, clamped to `[0, max_height]`.
pub fn batch_heights(closest: u64, max_height: u64) -> Vec<u64> {
    let mut heights = Vec::with_capacity(BATCH_CAPACITY);
    heights.push(closest.min(max_height));

    for step in 1..=BATCH_ARM {
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

fn resolve_height(
    chain: &dyn ChainSource,
    spiral: &SpiralConfig,
    height: u64,
) -> Result<ResolvedBlock, ChainError> {
    let hash = chain.hash_at_height(height)?;
    let raw = chain.block_by_hash(&hash)?;
    Ok(ResolvedBlock {
        height,
        meta: BlockMeta::from_raw(&raw),
        geometry: derive_geometry(&raw.txs, spiral),
    })
}
