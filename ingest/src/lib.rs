//! Bulk ingest of label blocks into key-value storage.
//!
//! Dense voxel buffers are compressed by a bounded pool of encoder
//! tasks and streamed to a writer task that commits them in atomic
//! batches. Reads come back through ranged scans over the sortable
//! block-key layout.

mod config;
mod error;
mod ingestor;
mod model;

pub use config::Config;
pub use error::{Error, Result};
pub use ingestor::{BlockIngestor, BlockWrite, KV_WRITE_SIZE};
pub use model::DataContext;
