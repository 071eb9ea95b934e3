use std::sync::Arc;

use bevy::prelude::*;
use bevy::window::PresentMode;

mod block;
mod camera;
mod chain;
mod config;
mod geometry;
mod input;
mod loading;
mod sidecar;
mod spiral;
mod stream;

use camera::CameraPlugin;
use chain::{ChainHandle, SyntheticChain};
use config::ChainspireConfig;
use input::InputPlugin;
use loading::LoadingPlugin;
use sidecar::{DiskGeometrySidecar, GeometrySidecarPlugin, SidecarConfig};
use stream::StreamPlugin;

const CONFIG_PATH: &str = "chainspire.json";
const SIDECAR_DIR_ENV: &str = "CHAINSPIRE_SIDECAR_DIR";

fn main() {
    let config = ChainspireConfig::load_or_default(CONFIG_PATH);
    let chain = ChainHandle(Arc::new(SyntheticChain::new(config.chain.clone())));

    let sidecar_dir = std::env::var(SIDECAR_DIR_ENV)
        .ok()
        .filter(|dir| !dir.trim().is_empty());
    let sidecar_config = SidecarConfig {
        enabled: sidecar_dir.is_some(),
    };
    let sidecar_root = sidecar_dir.unwrap_or_else(|| "geometry_cache".into());

    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Chainspire".into(),
                resolution: (1280., 720.).into(),
                present_mode: PresentMode::AutoVsync,
                ..default()
            }),
            ..default()
        }))
        .insert_resource(config.spiral.clone())
        .insert_resource(config.stream.clone())
        .insert_resource(chain)
        .add_plugins((
            LoadingPlugin, // Add loading first to manage states
            CameraPlugin,
            InputPlugin,
            StreamPlugin,
            GeometrySidecarPlugin::new(DiskGeometrySidecar::new(sidecar_root), sidecar_config),
        ))
        .run();
}
