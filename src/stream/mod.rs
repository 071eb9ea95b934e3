use bevy::prelude::*;

use crate::block::{BlockStore, GeometryPayloadQueue};
use crate::loading::AppState;

pub mod closest;
pub mod gateway;
pub mod ledger;
pub mod window;

pub use closest::{ClosestBlock, ClosestBlockChanged};
pub use gateway::{ComputeGateway, BATCH_CAPACITY};
pub use ledger::{BaseGeometrySet, RequestLedger};
pub use window::{BlockSeeded, JumpToHeight, StreamWindow, WindowChanged};

/// Windowed block streaming: window passes, background resolution, staleness
/// guarded merges, and per-frame closest-block tracking.
pub struct StreamPlugin;

impl Plugin for StreamPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<BlockStore>()
            .init_resource::<GeometryPayloadQueue>()
            .init_resource::<RequestLedger>()
            .init_resource::<BaseGeometrySet>()
            .init_resource::<ComputeGateway>()
            .init_resource::<ClosestBlock>()
            .add_event::<JumpToHeight>()
            .add_event::<WindowChanged>()
            .add_event::<BlockSeeded>()
            .add_event::<ClosestBlockChanged>()
            .add_systems(
                Update,
                (
                    window::trigger_stream_pass,
                    window::merge_batch_results,
                    window::merge_block_results,
                    window::expire_stalled_jobs,
                    closest::track_closest_block,
                )
                    .chain()
                    .run_if(in_state(AppState::Exploring)),
            );
    }
}
