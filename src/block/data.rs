use bevy::prelude::*;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::chain::RawBlock;

/// Fixed capacity of the per-block transaction buffers. Blocks with more
/// transactions than this are truncated at geometry-derivation time.
pub const TX_BUFFER_CAPACITY: usize = 4000;

const GEOMETRY_PAYLOAD_MAGIC: [u8; 4] = *b"CSGE";
pub const GEOMETRY_PAYLOAD_VERSION: u8 = 1;

/// healthRatio = fee / outputTotal * scale; 0 reads as perfectly healthy.
const HEALTH_RATIO_SCALE: f64 = 2000.0;

#[derive(Debug)]
pub enum GeometryPayloadError {
    InvalidMagic,
    UnsupportedVersion(u8),
    UnexpectedEof,
    Encode(String),
    Decode(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockStatus {
    #[default]
    Pending,
    Loaded,
}

/// Scalar metadata for one block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
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
    pub tx_count: u32,
    pub health_ratio: f64,
}

impl BlockMeta {
    pub fn from_raw(raw: &RawBlock) -> Self {
        let health_ratio = if raw.output_total > 0.0 {
            raw.fee / raw.output_total * HEALTH_RATIO_SCALE
        } else {
            0.0
        };

        Self {
            hash: raw.hash.clone(),
            height: raw.height,
            size: raw.size,
            fee: raw.fee,
            output_total: raw.output_total,
            time: raw.time,
            nonce: raw.nonce,
            bits: raw.bits,
            version: raw.version,
            merkle_root: raw.merkle_root.clone(),
            tx_count: raw.txs.len() as u32,
            health_ratio,
        }
    }
}

/// Per-transaction geometry buffers for one block: in-plane offsets
/// (interleaved x/z), scales, raw values, and spent ratios. All arrays
/// share one length, bounded by [`TX_BUFFER_CAPACITY`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TxGeometry {
    pub offsets: Vec<f32>,
    pub scales: Vec<f32>,
    pub values: Vec<f32>,
    pub spent_ratios: Vec<f32>,
    pub tx_indexes: Vec<u32>,
}

impl TxGeometry {
    #[inline]
    pub fn tx_count(&self) -> usize {
        self.scales.len()
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.scales.len();
        self.offsets.len() == n * 2
            && self.values.len() == n
            && self.spent_ratios.len() == n
            && self.tx_indexes.len() == n
    }
}

/// One cached block. Created as a position-only placeholder the first time
/// its height enters the stream window, promoted to Loaded when a background
/// job result merges.
#[derive(Clone, Debug)]
pub struct BlockRecord {
    pub height: u64,
    pub position: Vec2,
    pub status: BlockStatus,
    pub meta: Option<BlockMeta>,
    pub geometry: Option<TxGeometry>,
}

impl BlockRecord {
    pub fn placeholder(height: u64, position: Vec2) -> Self {
        Self {
            height,
            position,
            status: BlockStatus::Pending,
            meta: None,
            geometry: None,
        }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.status == BlockStatus::Loaded
    }
}

#[derive(Serialize, Deserialize)]
struct GeometryPayloadBody {
    height: u64,
    meta: BlockMeta,
    geometry: TxGeometry,
}

/// Compact on-disk form of a loaded block, used by the write-through
/// sidecar: a 5-byte header (magic + version) followed by a gzipped bincode
/// body. The engine only ever writes these.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryPayload {
    pub height: u64,
    pub meta: BlockMeta,
    pub geometry: TxGeometry,
}

impl GeometryPayload {
    pub fn new(meta: BlockMeta, geometry: TxGeometry) -> Self {
        Self {
            height: meta.height,
            meta,
            geometry,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, GeometryPayloadError> {
        let body = GeometryPayloadBody {
            height: self.height,
            meta: self.meta.clone(),
            geometry: self.geometry.clone(),
        };

        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&GEOMETRY_PAYLOAD_MAGIC);
        bytes.push(GEOMETRY_PAYLOAD_VERSION);

        let mut encoder = GzEncoder::new(bytes, Compression::default());
        bincode::serialize_into(&mut encoder, &body)
            .map_err(|error| GeometryPayloadError::Encode(error.to_string()))?;
        encoder
            .finish()
            .map_err(|error| GeometryPayloadError::Encode(error.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GeometryPayloadError> {
        if bytes.len() < 5 {
            return Err(GeometryPayloadError::UnexpectedEof);
        }
        if bytes[..4] != GEOMETRY_PAYLOAD_MAGIC {
            return Err(GeometryPayloadError::InvalidMagic);
        }
        let version = bytes[4];
        if version != GEOMETRY_PAYLOAD_VERSION {
            return Err(GeometryPayloadError::UnsupportedVersion(version));
        }

        let decoder = GzDecoder::new(&bytes[5..]);
        let body: GeometryPayloadBody = bincode::deserialize_from(decoder)
            .map_err(|error| GeometryPayloadError::Decode(error.to_string()))?;

        Ok(Self {
            height: body.height,
            meta: body.meta,
            geometry: body.geometry,
        })
    }
}
