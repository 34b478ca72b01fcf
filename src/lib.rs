//! Chain-tip polling and candidate block submission for a Bitcoin node.
//!
//! The node's state is ingested into an append-only snapshot store. The
//! submission loop reads the latest snapshot, builds an 80-byte header around
//! a candidate nonce and merkle root, and submits it with `submitblock`.

pub mod backoff;
pub mod config;
pub mod database;
pub mod error;
pub mod header;
pub mod ingest;
pub mod models;
pub mod oracle;
pub mod rpc;
pub mod submission;

pub use error::{Error, Result};
