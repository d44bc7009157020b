//! Persistence layer: checkpoint stores for conversation threads.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use traits::CheckpointStore;
