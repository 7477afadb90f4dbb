pub mod error;
pub mod export;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod queries;
pub mod store;

pub use error::StoreError;
pub use export::{batch_csv_bytes, write_batch_csv};
pub use memory::{FailPoint, InventorySnapshot, MemoryStore};
pub use pool::create_pool;
pub use postgres::PgStore;
pub use store::{CatalogStore, InventoryStore, InventoryTx};
