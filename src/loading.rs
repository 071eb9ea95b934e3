use bevy::prelude::*;

use crate::chain::ChainHandle;
use crate::config::SpiralConfig;
use crate::spiral::BlockPositions;
use crate::stream::StreamWindow;

/// App states for startup and exploration flow
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, States)]
pub enum AppState {
    #[default]
    Loading,
    Syncing,
    Exploring,
}

/// Tracks the current phase of chain synchronization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncPhase {
    FetchingTip,
    ComputingSpiral,
    Complete,
}

impl SyncPhase {
    pub fn description(&self) -> &str {
        match self {
            SyncPhase::FetchingTip => "Fetching chain tip...",
            SyncPhase::ComputingSpiral => "Laying blocks out along the spiral...",
            SyncPhase::Complete => "Chain ready!",
        }
    }
}

/// Resource tracking sync progress
#[derive(Resource)]
pub struct SyncProgress {
    pub current_phase: SyncPhase,
    pub tip_height: Option<u64>,
    pub phase_start_time: f32,
    pub total_start_time: f32,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            current_phase: SyncPhase::FetchingTip,
            tip_height: None,
            phase_start_time: 0.0,
            total_start_time: 0.0,
        }
    }
}

impl SyncProgress {
    pub fn is_complete(&self) -> bool {
        self.current_phase == SyncPhase::Complete
    }

    pub fn advance_phase(&mut self, new_phase: SyncPhase, time: f32) {
        info!(
            "Sync phase: {:?} -> {:?} ({})",
            self.current_phase,
            new_phase,
            new_phase.description()
        );
        self.current_phase = new_phase;
        self.phase_start_time = time;
    }
}

/// Plugin for managing startup states
pub struct LoadingPlugin;

impl Plugin for LoadingPlugin {
    fn build(&self, app: &mut App) {
        app.init_state::<AppState>()
            .init_resource::<SyncProgress>()
            .add_systems(OnEnter(AppState::Loading), setup_loading)
            .add_systems(Update, fetch_chain_tip.run_if(in_state(AppState::Loading)))
            .add_systems(OnEnter(AppState::Syncing), build_position_index)
            .add_systems(Update, update_syncing.run_if(in_state(AppState::Syncing)))
            .add_systems(OnEnter(AppState::Exploring), setup_exploration);
    }
}

fn setup_loading(mut progress: ResMut<SyncProgress>, time: Res<Time>) {
    progress.total_start_time = time.elapsed_seconds();
    progress.phase_start_time = time.elapsed_seconds();
    info!("Entering loading state");
}

/// The tip is fetched once per session and only ever grows, so a transient
/// backend failure just retries on the next frame.
fn fetch_chain_tip(
    chain: Res<ChainHandle>,
    mut progress: ResMut<SyncProgress>,
    mut next_state: ResMut<NextState<AppState>>,
    time: Res<Time>,
) {
    if progress.tip_height.is_some() {
        return;
    }

    match chain.0.latest_height() {
        Ok(height) => {
            info!("Chain tip at height {}", height);
            progress.tip_height = Some(height);
            progress.advance_phase(SyncPhase::ComputingSpiral, time.elapsed_seconds());
            next_state.set(AppState::Syncing);
        }
        Err(error) => {
            warn!("Failed to fetch chain tip: {} (retrying)", error);
        }
    }
}

fn build_position_index(
    mut commands: Commands,
    mut progress: ResMut<SyncProgress>,
    spiral: Res<SpiralConfig>,
    time: Res<Time>,
) {
    let Some(tip) = progress.tip_height else {
        warn!("Entered syncing without a chain tip");
        return;
    };

    let positions = BlockPositions::compute(tip, &spiral);
    info!("Computed spiral placement for {} blocks", tip + 1);

    commands.insert_resource(positions);
    commands.insert_resource(StreamWindow::starting_at(tip));

    progress.advance_phase(SyncPhase::Complete, time.elapsed_seconds());
}

fn update_syncing(progress: Res<SyncProgress>, mut next_state: ResMut<NextState<AppState>>) {
    if progress.is_complete() {
        next_state.set(AppState::Exploring);
    }
}

fn setup_exploration(progress: Res<SyncProgress>, time: Res<Time>) {
    info!(
        "Exploring chain (startup took {:.2}s)",
        time.elapsed_seconds() - progress.total_start_time
    );
}
