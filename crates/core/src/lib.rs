//! `forgecrm-core`: ids, error types and the record trait shared by every crate.
//!
//! No IO lives here.

pub mod email;
pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult, StoreError};
pub use id::{ApiKeyId, CustomerId, LeadId, TaskId, TicketId, UserId};
