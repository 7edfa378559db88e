pub mod geometry;
pub mod locks;
pub mod runtime;
pub mod storage;

pub use geometry::{BCoord, Bounds, Point3d, Rle};
pub use locks::WriteLockRegistry;
pub use runtime::Runtime;
pub use storage::{KeyValueStore, Record, StorageError, StorageResult, WriteBatch};

/// Identifies a version node in the enclosing version graph. Opaque to
/// this layer; used only for keying and lock scoping.
pub type VersionId = u64;
