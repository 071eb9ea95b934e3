use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Baseline tuning values. Everything here can be overridden from
/// `chainspire.json` next to the binary.
pub mod defaults {
    // Spiral layout
    pub const PLANE_SIZE: f32 = 500.0;
    pub const PLANE_MARGIN: f32 = 100.0;
    pub const PLANE_OFFSET_MULTIPLIER: f32 = 1080.0;
    pub const COILS: f32 = 100.0;
    pub const RADIUS: f32 = 1_000_000.0;

    // Streaming window (all radii in height units)
    pub const STREAM_RADIUS: u64 = 24;
    pub const EVICTION_RADIUS: u64 = 25;
    pub const BASE_GEOMETRY_RADIUS: u64 = 100;
    pub const MERGE_RADIUS: u64 = 10;
    pub const SINGLE_DISPATCH_RADIUS: u64 = 5;
    pub const LOCAL_SEARCH_RADIUS: u64 = 5;
    pub const MOVEMENT_THRESHOLD: f32 = 500.0;
    pub const STREAM_DISENGAGE_ALTITUDE: f32 = 20_000.0;
    pub const JOB_TIMEOUT_SECS: f32 = 30.0;

    // Closest-block tracking
    pub const TRACKER_DISENGAGE_ALTITUDE: f32 = 2_000.0;
    pub const ENGAGEMENT_DISTANCE_SQ: f32 = 300_000.0;

    // Synthetic chain
    pub const CHAIN_SEED: u64 = 0x00c0ffee;
    pub const CHAIN_TIP_HEIGHT: u64 = 500_000;
    pub const GENESIS_TIME: u64 = 1_231_006_505;
    pub const BLOCK_INTERVAL_SECS: u64 = 600;
    pub const MAX_TXS_PER_BLOCK: u32 = 1_200;
}

/// Parameters of the deterministic outward spiral blocks are placed on.
#[derive(Resource, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpiralConfig {
    pub plane_size: f32,
    pub plane_margin: f32,
    pub plane_offset_multiplier: f32,
    pub coils: f32,
    pub radius: f32,
}

impl Default for SpiralConfig {
    fn default() -> Self {
        use defaults::*;

        Self {
            plane_size: PLANE_SIZE,
            plane_margin: PLANE_MARGIN,
            plane_offset_multiplier: PLANE_OFFSET_MULTIPLIER,
            coils: COILS,
            radius: RADIUS,
        }
    }
}

/// Streaming window behaviour: how far out we load, evict, and merge, and
/// when the observer has moved far enough to warrant a new pass.
#[derive(Resource, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub stream_radius: u64,
    pub eviction_radius: u64,
    pub base_geometry_radius: u64,
    pub merge_radius: u64,
    pub single_dispatch_radius: u64,
    pub local_search_radius: u64,
    pub movement_threshold: f32,
    pub disengage_altitude: f32,
    pub job_timeout_secs: f32,
    pub tracker_disengage_altitude: f32,
    pub engagement_distance_sq: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        use defaults::*;

        Self {
            stream_radius: STREAM_RADIUS,
            eviction_radius: EVICTION_RADIUS,
            base_geometry_radius: BASE_GEOMETRY_RADIUS,
            merge_radius: MERGE_RADIUS,
            single_dispatch_radius: SINGLE_DISPATCH_RADIUS,
            local_search_radius: LOCAL_SEARCH_RADIUS,
            movement_threshold: MOVEMENT_THRESHOLD,
            disengage_altitude: STREAM_DISENGAGE_ALTITUDE,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            tracker_disengage_altitude: TRACKER_DISENGAGE_ALTITUDE,
            engagement_distance_sq: ENGAGEMENT_DISTANCE_SQ,
        }
    }
}

/// Synthetic chain source parameters.
#[derive(Resource, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChainConfig {
    pub seed: u64,
    pub tip_height: u64,
    pub genesis_time: u64,
    pub block_interval_secs: u64,
    pub max_txs_per_block: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        use defaults::*;

        Self {
            seed: CHAIN_SEED,
            tip_height: CHAIN_TIP_HEIGHT,
            genesis_time: GENESIS_TIME,
            block_interval_secs: BLOCK_INTERVAL_SECS,
            max_txs_per_block: MAX_TXS_PER_BLOCK,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChainspireConfig {
    pub spiral: SpiralConfig,
    pub stream: StreamConfig,
    pub chain: ChainConfig,
}

impl ChainspireConfig {
    /// Loads the config file if present, falling back to defaults. A file
    /// that exists but fails to parse is reported and ignored rather than
    /// aborting startup.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }

        match File::open(path) {
            Ok(file) => match serde_json::from_reader(BufReader::new(file)) {
                Ok(config) => {
                    info!("Loaded config from {:?}", path);
                    config
                }
                Err(error) => {
                    warn!("Failed to parse {:?}: {} (using defaults)", path, error);
                    Self::default()
                }
            },
            Err(error) => {
                warn!("Failed to open {:?}: {} (using defaults)", path, error);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_override_keeps_remaining_defaults() {
        let parsed: ChainspireConfig =
            serde_json::from_str(r#"{"stream": {"eviction_radius": 40}}"#).expect("parse config");

        assert_eq!(parsed.stream.eviction_radius, 40);
        assert_eq!(parsed.stream.stream_radius, defaults::STREAM_RADIUS);
        assert_eq!(parsed.spiral, SpiralConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ChainspireConfig::load_or_default("definitely/not/here.json");
        assert_eq!(config, ChainspireConfig::default());
    }
}
