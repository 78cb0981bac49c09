pub mod database;
pub mod error;
pub mod memory;
pub mod schema;
pub mod status_store;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryStatusStore;
pub use status_store::{SqliteStatusStore, StatusStore};
pub use users::{UserRepo, UserRow};
