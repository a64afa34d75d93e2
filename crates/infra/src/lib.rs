//! Infrastructure layer: storage adapters and the record services built on them.

pub mod services;
pub mod store;

pub use services::{CrmService, ServiceError, ServiceResult};
pub use store::{CrmStore, InMemoryStore, PostgresStore};
