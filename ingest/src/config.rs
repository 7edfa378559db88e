//! Configuration options for block ingest.

/// Configuration for a [`BlockIngestor`](crate::BlockIngestor).
#[derive(Debug, Clone)]
pub struct Config {
    /// Depth of the channel between encoder tasks and the writer task.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 1_000,
        }
    }
}
