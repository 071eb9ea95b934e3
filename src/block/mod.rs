pub mod data;
pub mod store;

pub use data::{
    BlockMeta, BlockRecord, BlockStatus, GeometryPayload, GeometryPayloadError, TxGeometry,
    GEOMETRY_PAYLOAD_VERSION, TX_BUFFER_CAPACITY,
};
pub use store::{BlockStore, GeometryPayloadQueue, QueuedGeometryPayload, StoreUpdate};
