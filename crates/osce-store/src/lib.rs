pub mod cases;
pub mod database;
pub mod error;
pub mod memory;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod traits;

pub use cases::CaseLibrary;
pub use database::Database;
pub use error::StoreError;
pub use memory::{InMemoryCaseStore, InMemorySessionStore};
pub use sessions::SessionRepo;
pub use traits::{CaseStore, SessionStore};
