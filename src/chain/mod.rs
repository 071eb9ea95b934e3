pub mod source;
pub mod synthetic;

pub use source::{ChainError, ChainHandle, ChainSource, RawBlock, TxRecord};
pub use synthetic::SyntheticChain;
