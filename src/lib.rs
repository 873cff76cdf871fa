pub mod config;
pub mod conflict;
pub mod data_store;
pub mod errors;
pub mod item_type;
pub mod mapping;
pub mod memory_storage;
#[cfg(feature = "rocksdb")]
pub mod rocks_storage;
pub mod status;
pub mod storage;
pub mod value;

// Re-export key types for easier access
pub use config::MappingConfig;
pub use conflict::resolution::{ConflictPolicy, ConflictResolver, Resolution};
pub use data_store::item_id::{CommitId, DbId, ItemId};
pub use data_store::mapped_item::MappedItem;
pub use errors::{Result, SpineDbError, SpineDbError as Error};
pub use item_type::ItemType;
pub use mapping::{prelude, DatabaseMapping, FetchReport};
pub use memory_storage::MemoryStorage;
#[cfg(feature = "rocksdb")]
pub use rocks_storage::RocksStorage;
pub use status::Status;
pub use storage::{Storage, StorageMutation};
pub use value::{Record, Value};
