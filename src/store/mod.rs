//! Persistence layer for user profiles and their analysis history.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlProfileStore;
pub use memory::InMemoryProfileStore;
pub use traits::ProfileStore;
