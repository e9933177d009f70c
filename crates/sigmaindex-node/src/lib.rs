//! sigmaindex-node — node fetcher, simulated regtest node, and index loop.

pub mod builder;
pub mod fetcher;
pub mod index_loop;
pub mod simulated;

pub use builder::IndexerBuilder;
pub use fetcher::{block_from_json, NodeFetcher, NodeRpcClient};
pub use index_loop::{IndexLoop, IndexLoopEvent};
pub use simulated::SimulatedChain;
