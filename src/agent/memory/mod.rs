pub mod embeddings;
pub mod hygiene;
pub mod indexer;
pub mod memory_db;
pub mod memory_store;
pub mod quality;
pub mod remember;

pub use indexer::MemoryIndexer;
pub use memory_db::MemoryDB;
pub use memory_store::MemoryStore;
