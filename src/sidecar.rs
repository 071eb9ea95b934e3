use std::fs::{create_dir_all, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bevy::prelude::*;

use crate::block::{GeometryPayloadQueue, QueuedGeometryPayload};

pub fn payload_filename(height: u64, hash: &str) -> String {
    let short = &hash[..hash.len().min(12)];
    format!("block_{}_{}.bin", height, short)
}

/// Write-through side channel for promoted block geometry. The engine only
/// ever writes into it and never waits on it; a broken sidecar costs a log
/// line, not a window pass.
pub trait GeometrySidecar: Send + Sync + 'static {
    fn persist(&mut self, payload: &QueuedGeometryPayload) -> io::Result<()>;
}

#[derive(Default, Clone)]
pub struct DiskGeometrySidecar {
    root: PathBuf,
}

impl DiskGeometrySidecar {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl GeometrySidecar for DiskGeometrySidecar {
    fn persist(&mut self, payload: &QueuedGeometryPayload) -> io::Result<()> {
        create_dir_all(&self.root)?;
        let path = self
            .root
            .join(payload_filename(payload.height, &payload.hash));
        let mut file = File::create(path)?;
        file.write_all(&payload.bytes)
    }
}

#[derive(Resource, Clone)]
pub struct SidecarConfig {
    pub enabled: bool,
}

#[derive(Resource)]
pub struct SidecarHandler<T: GeometrySidecar> {
    handler: T,
}

impl<T: GeometrySidecar> SidecarHandler<T> {
    pub fn new(handler: T) -> Self {
        Self { handler }
    }

    pub fn handler_mut(&mut self) -> &mut T {
        &mut self.handler
    }
}

pub fn flush_queue_to_sidecar<T: GeometrySidecar>(
    mut queue: ResMut<GeometryPayloadQueue>,
    mut handler: ResMut<SidecarHandler<T>>,
    config: Option<Res<SidecarConfig>>,
) {
    if let Some(config) = config {
        if !config.enabled {
            queue.take_all();
            return;
        }
    }

    for payload in queue.take_all() {
        if let Err(error) = handler.handler_mut().persist(&payload) {
            warn!(
                "Failed to persist geometry for height {}: {}",
                payload.height, error
            );
        }
    }
}

pub struct GeometrySidecarPlugin<T: GeometrySidecar + Clone> {
    handler: T,
    config: SidecarConfig,
}

impl<T: GeometrySidecar + Clone> GeometrySidecarPlugin<T> {
    pub fn new(handler: T, config: SidecarConfig) -> Self {
        Self { handler, config }
    }
}

impl<T: GeometrySidecar + Clone> Plugin for GeometrySidecarPlugin<T> {
    fn build(&self, app: &mut App) {
        app.insert_resource(SidecarHandler::new(self.handler.clone()))
            .insert_resource(self.config.clone())
            .add_systems(Update, flush_queue_to_sidecar::<T>);
    }
}
