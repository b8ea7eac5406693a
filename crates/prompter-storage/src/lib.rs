//! Context storage backends and the contract they implement.
//!
//! The engine talks to storage exclusively through [`ContextStorage`];
//! backends decide layout, concurrency guarantees, and which slice of the
//! turn history is preloaded on connect (see [`Subscript`]).

pub mod contract;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod subscript;

pub use contract::{ContextStorage, FieldName, MainInfo};
pub use error::{Result, StorageError};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use subscript::{Subscript, SubscriptConfig};
