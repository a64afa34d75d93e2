//! Storage boundary for CRM records.
//!
//! Every store hides soft-deleted rows: `find_*` returns `None` and `list_*`
//! skips them. Listings take the [`ListScope`] derived from the policy table so
//! the filter is applied where the rows are read.
//!
//! Updates are conditional. `update_*(current, updated)` writes `updated` only
//! while the stored row still matches `current`, the version the update was
//! computed from; otherwise nothing is written and `ConditionFailed` is
//! returned. A concurrent conversion, completion or close therefore cannot be
//! overwritten by a stale copy.

use chrono::{DateTime, Utc};

use forgecrm_auth::{ApiKeyStore, ListScope, UserStore};
use forgecrm_core::{CustomerId, LeadId, StoreError, TaskId, TicketId};
use forgecrm_crm::{Customer, Lead, LeadDraft, NewCustomer, NewTask, NewTicket, Task, Ticket};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[async_trait::async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert_lead(&self, lead: LeadDraft) -> Result<Lead, StoreError>;

    async fn find_lead(&self, id: LeadId) -> Result<Option<Lead>, StoreError>;

    async fn list_leads(&self, scope: ListScope) -> Result<Vec<Lead>, StoreError>;

    /// Persist `updated` if the lead still matches `current`. Fails with
    /// `NotFound` if it is gone.
    async fn update_lead(&self, current: &Lead, updated: &Lead) -> Result<Lead, StoreError>;

    async fn soft_delete_lead(&self, id: LeadId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Insert `customer` and mark the lead converted into it, atomically.
    ///
    /// The lead is flipped only if it is not converted yet; otherwise nothing
    /// is written and `ConditionFailed` is returned.
    async fn convert_lead(
        &self,
        id: LeadId,
        customer: NewCustomer,
        at: DateTime<Utc>,
    ) -> Result<Customer, StoreError>;
}

#[async_trait::async_trait]
pub trait CustomerStore: Send + Sync {
    async fn insert_customer(&self, customer: NewCustomer) -> Result<Customer, StoreError>;

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError>;

    async fn list_customers(&self) -> Result<Vec<Customer>, StoreError>;

    async fn update_customer(&self, current: &Customer, updated: &Customer) -> Result<Customer, StoreError>;

    async fn soft_delete_customer(&self, id: CustomerId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, ticket: NewTicket) -> Result<Ticket, StoreError>;

    async fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError>;

    async fn list_tickets(&self, scope: ListScope) -> Result<Vec<Ticket>, StoreError>;

    async fn update_ticket(&self, current: &Ticket, updated: &Ticket) -> Result<Ticket, StoreError>;

    async fn soft_delete_ticket(&self, id: TicketId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    async fn list_tasks(&self, scope: ListScope) -> Result<Vec<Task>, StoreError>;

    async fn update_task(&self, current: &Task, updated: &Task) -> Result<Task, StoreError>;

    async fn soft_delete_task(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Everything the services and the credential verifier need from storage.
pub trait CrmStore:
    UserStore + ApiKeyStore + LeadStore + CustomerStore + TicketStore + TaskStore
{
}

impl<T> CrmStore for T where
    T: UserStore + ApiKeyStore + LeadStore + CustomerStore + TicketStore + TaskStore + ?Sized
{
}
