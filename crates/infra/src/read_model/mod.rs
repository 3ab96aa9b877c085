//! Read model storage abstractions.

pub mod query;
pub mod store;

pub use query::{Pagination, ReadModelQuery};
pub use store::{InMemoryReadModelStore, ReadModelError, ReadModelStore};
