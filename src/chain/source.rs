use std::fmt;
use std::sync::Arc;

use bevy::prelude::*;

/// Errors surfaced by a chain backend. None of these are fatal to the
/// streaming engine: a failed height is skipped for the current window pass
/// and naturally retried while it stays in-window.
#[derive(Debug, Clone)]
pub enum ChainError {
    /// A hash or height could not be resolved.
    Lookup(String),
    /// The backend itself was not reachable.
    Unavailable(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Lookup(detail) => write!(f, "lookup failed: {}", detail),
            ChainError::Unavailable(detail) => write!(f, "chain source unavailable: {}", detail),
        }
    }
}

impl std::error::Error for ChainError {}

pub type ChainResult<T> = Result<T, ChainError>;

/// One transaction as the backend reports it, reduced to the fields the
/// geometry derivation consumes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TxRecord {
    pub index: u32,
    pub value: f32,
    pub spent_ratio: f32,
}

/// A full block record as fetched from the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct RawBlock {
    pub hash: String,
    pub height: u64,
    pub size: u32,
    pub fee: f64,
    pub output_total: f64,
    pub time: u64,
    pub nonce: u32,
    pub bits: u32,
    pub version: u32,
    pub merkle_root: String,
    pub txs: Vec<TxRecord>,
}

/// Contract with the ledger data source. Implementations must be shareable
/// with background compute tasks, hence the Send + Sync bound. No retry
/// policy lives here; the windowing loop re-requests missing heights on its
/// own cadence.
pub trait ChainSource: Send + Sync + 'static {
    fn latest_height(&self) -> ChainResult<u64>;
    fn hash_at_height(&self, height: u64) -> ChainResult<String>;
    fn block_by_hash(&self, hash: &str) -> ChainResult<RawBlock>;
}

/// Shared handle handed to background tasks.
#[derive(Resource, Clone)]
pub struct ChainHandle(pub Arc<dyn ChainSource>);
