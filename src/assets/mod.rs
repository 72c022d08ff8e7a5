//! Asset side of the migration
//!
//! - [`hash`]: content checks for cached source files
//! - [`prepare`]: turn snapshot descriptors into verified local files
//! - [`storage`]: destination storage endpoints
//! - [`queue`]: durable pending-upload queue

pub mod hash;
pub mod prepare;
pub mod queue;
pub mod storage;

pub use hash::{ContentAddressedStore, LocalAssetStatus};
pub use prepare::{AssetPreparer, AssetSlot, PrepareError, PreparedAsset};
pub use queue::{AssetKey, AssetTransferQueue, DrainReport, QueueError};
pub use storage::{StorageClient, StorageError, UploadPool};
