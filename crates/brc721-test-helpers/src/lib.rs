//! Test helpers for the brc721 indexer.
//!
//! - `chain`: verbose transactions and linked blocks, an in-memory store,
//!   and [`MockNode`] serving blocks through the `NodeClient` seam.
//! - `payload`: signer keys, signatures and BRC721 payload JSON.
//! - `scheduler`: [`RecordingScheduler`], which keeps scheduled jobs for
//!   inspection instead of delivering them.
//!
//! Typical flow:
//! ```ignore
//! let collection = create_inscription_tx(txid(1), &create_collection_payload());
//! let blocks = create_chain(800_000, vec![vec![create_coinbase_tx(txid(100)), collection]]);
//! let node = MockNode::with_blocks(blocks.clone());
//! let mut indexer = Indexer::new(node, create_store(), RecordingScheduler::default());
//! ```

pub mod chain;
pub mod payload;
pub mod scheduler;

pub use chain::*;
pub use payload::*;
pub use scheduler::RecordingScheduler;
