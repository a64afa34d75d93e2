use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use forgecrm_auth::{ApiKey, ApiKeyStore, ListScope, NewApiKey, NewUser, User, UserStore};
use forgecrm_core::{ApiKeyId, CustomerId, Entity, LeadId, StoreError, TaskId, TicketId, UserId};
use forgecrm_crm::{
    Customer, Lead, LeadDraft, LeadStatus, NewCustomer, NewTask, NewTicket, Task, Ticket,
};

use super::{CustomerStore, LeadStore, TaskStore, TicketStore};

#[derive(Debug, Default)]
struct Counters {
    user: u64,
    api_key: u64,
    lead: u64,
    customer: u64,
    ticket: u64,
    task: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Default)]
struct State {
    ids: Counters,
    users: BTreeMap<UserId, User>,
    api_keys: BTreeMap<ApiKeyId, ApiKey>,
    leads: BTreeMap<LeadId, Lead>,
    customers: BTreeMap<CustomerId, Customer>,
    tickets: BTreeMap<TicketId, Ticket>,
    tasks: BTreeMap<TaskId, Task>,
}

impl State {
    fn add_customer(&mut self, new: NewCustomer, at: DateTime<Utc>) -> Customer {
        let customer = Customer {
            id: CustomerId::new(next(&mut self.ids.customer)),
            contact: new.contact,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        };
        self.customers.insert(customer.id, customer.clone());
        customer
    }
}

/// In-memory store for every record type.
///
/// Intended for tests/dev. A single lock guards all tables, so multi-record
/// writes such as lead conversion are atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }
}

fn live<V: Entity + Clone>(table: &BTreeMap<V::Id, V>, id: V::Id) -> Option<V> {
    table.get(&id).filter(|v| !v.is_deleted()).cloned()
}

/// Replace a live record, keyed by its own id, provided the stored copy
/// still passes `unchanged`.
fn replace<V: Entity + Clone>(
    table: &mut BTreeMap<V::Id, V>,
    updated: &V,
    unchanged: impl FnOnce(&V) -> bool,
) -> Result<V, StoreError> {
    let id = updated.id();
    let slot = match table.get_mut(&id) {
        Some(slot) if !slot.is_deleted() => slot,
        _ => return Err(StoreError::NotFound),
    };
    if !unchanged(slot) {
        return Err(StoreError::ConditionFailed(format!(
            "record {id} changed since it was read"
        )));
    }
    *slot = updated.clone();
    Ok(updated.clone())
}

/// Stamp `deleted_at` on a live record.
fn mark_deleted<K: Ord + Copy, V>(
    table: &mut BTreeMap<K, V>,
    key: K,
    deleted_at: impl FnOnce(&mut V) -> &mut Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let record = table.get_mut(&key).ok_or(StoreError::NotFound)?;
    let slot = deleted_at(record);
    if slot.is_some() {
        return Err(StoreError::NotFound);
    }
    *slot = Some(at);
    Ok(())
}

#[async_trait::async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut state = self.write()?;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation(format!(
                "users.email '{}' already exists",
                user.email
            )));
        }
        let user = User {
            id: UserId::new(next(&mut state.ids.user)),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(live(&self.read()?.users, id))
    }

    async fn list_users(&self, scope: ListScope) -> Result<Vec<User>, StoreError> {
        Ok(self
            .read()?
            .users
            .values()
            .filter(|u| scope.admits(Some(u.id), None))
            .cloned()
            .collect())
    }

    async fn update_user(&self, current: &User, updated: &User) -> Result<User, StoreError> {
        let mut state = self.write()?;
        let slot = state.users.get_mut(&updated.id).ok_or(StoreError::NotFound)?;
        if !slot.same_account(current) {
            return Err(StoreError::ConditionFailed(format!(
                "user {} changed since it was read",
                updated.id
            )));
        }
        *slot = User {
            last_login_at: slot.last_login_at,
            ..updated.clone()
        };
        Ok(slot.clone())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let user = state.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.last_login_at = Some(at);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn insert_api_key(&self, key: NewApiKey) -> Result<ApiKey, StoreError> {
        let mut state = self.write()?;
        if state.api_keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::UniqueViolation("api_keys.key_hash".to_string()));
        }
        let key = ApiKey {
            id: ApiKeyId::new(next(&mut state.ids.api_key)),
            user_id: key.user_id,
            name: key.name,
            prefix: key.prefix,
            key_hash: key.key_hash,
            is_active: true,
            expires_at: key.expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };
        state.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn find_api_key(&self, id: ApiKeyId) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.read()?.api_keys.get(&id).cloned())
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self
            .read()?
            .api_keys
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self
            .read()?
            .api_keys
            .values()
            .rev()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn touch_api_key(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let key = state.api_keys.get_mut(&id).ok_or(StoreError::NotFound)?;
        key.last_used_at = Some(at);
        Ok(())
    }

    async fn revoke_api_key(&self, id: ApiKeyId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let key = state.api_keys.get_mut(&id).ok_or(StoreError::NotFound)?;
        key.is_active = false;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeadStore for InMemoryStore {
    async fn insert_lead(&self, lead: LeadDraft) -> Result<Lead, StoreError> {
        let mut state = self.write()?;
        let now = Utc::now();
        let lead = Lead {
            id: LeadId::new(next(&mut state.ids.lead)),
            owner_id: lead.owner_id,
            contact: lead.contact,
            source: lead.source,
            notes: lead.notes,
            status: lead.status,
            customer_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.leads.insert(lead.id, lead.clone());
        Ok(lead)
    }

    async fn find_lead(&self, id: LeadId) -> Result<Option<Lead>, StoreError> {
        Ok(live(&self.read()?.leads, id))
    }

    async fn list_leads(&self, scope: ListScope) -> Result<Vec<Lead>, StoreError> {
        Ok(self
            .read()?
            .leads
            .values()
            .filter(|l| !l.is_deleted() && scope.admits(Some(l.owner_id), None))
            .cloned()
            .collect())
    }

    async fn update_lead(&self, current: &Lead, updated: &Lead) -> Result<Lead, StoreError> {
        let mut state = self.write()?;
        replace(&mut state.leads, updated, |stored| stored == current)
    }

    async fn soft_delete_lead(&self, id: LeadId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        mark_deleted(&mut state.leads, id, |l| &mut l.deleted_at, at)
    }

    async fn convert_lead(
        &self,
        id: LeadId,
        customer: NewCustomer,
        at: DateTime<Utc>,
    ) -> Result<Customer, StoreError> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let status = match state.leads.get(&id) {
            Some(lead) if !lead.is_deleted() => lead.status,
            _ => return Err(StoreError::NotFound),
        };
        if status == LeadStatus::Converted {
            return Err(StoreError::ConditionFailed(format!(
                "lead {id} is already converted"
            )));
        }

        let customer = state.add_customer(customer, at);
        let lead = state.leads.get_mut(&id).ok_or(StoreError::NotFound)?;
        *lead = lead
            .converted_into(customer.id, at)
            .map_err(|e| StoreError::ConditionFailed(e.to_string()))?;
        Ok(customer)
    }
}

#[async_trait::async_trait]
impl CustomerStore for InMemoryStore {
    async fn insert_customer(&self, customer: NewCustomer) -> Result<Customer, StoreError> {
        Ok(self.write()?.add_customer(customer, Utc::now()))
    }

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(live(&self.read()?.customers, id))
    }

    async fn list_customers(&self) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .read()?
            .customers
            .values()
            .filter(|c| !c.is_deleted())
            .cloned()
            .collect())
    }

    async fn update_customer(&self, current: &Customer, updated: &Customer) -> Result<Customer, StoreError> {
        let mut state = self.write()?;
        replace(&mut state.customers, updated, |stored| stored == current)
    }

    async fn soft_delete_customer(&self, id: CustomerId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        mark_deleted(&mut state.customers, id, |c| &mut c.deleted_at, at)
    }
}

#[async_trait::async_trait]
impl TicketStore for InMemoryStore {
    async fn insert_ticket(&self, ticket: NewTicket) -> Result<Ticket, StoreError> {
        let mut state = self.write()?;
        let now = Utc::now();
        let ticket = Ticket {
            id: TicketId::new(next(&mut state.ids.ticket)),
            customer_id: ticket.customer_id,
            assigned_to: ticket.assigned_to,
            subject: ticket.subject,
            description: ticket.description,
            priority: ticket.priority.unwrap_or_default(),
            status: Default::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(live(&self.read()?.tickets, id))
    }

    async fn list_tickets(&self, scope: ListScope) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .read()?
            .tickets
            .values()
            .filter(|t| !t.is_deleted() && scope.admits(None, t.assigned_to))
            .cloned()
            .collect())
    }

    async fn update_ticket(&self, current: &Ticket, updated: &Ticket) -> Result<Ticket, StoreError> {
        let mut state = self.write()?;
        replace(&mut state.tickets, updated, |stored| stored == current)
    }

    async fn soft_delete_ticket(&self, id: TicketId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        mark_deleted(&mut state.tickets, id, |t| &mut t.deleted_at, at)
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let mut state = self.write()?;
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(next(&mut state.ids.task)),
            title: task.title,
            description: task.description,
            assigned_to: task.assigned_to,
            lead_id: task.lead_id,
            customer_id: task.customer_id,
            due_at: task.due_at,
            status: task.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(live(&self.read()?.tasks, id))
    }

    async fn list_tasks(&self, scope: ListScope) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .read()?
            .tasks
            .values()
            .filter(|t| !t.is_deleted() && scope.admits(None, Some(t.assigned_to)))
            .cloned()
            .collect())
    }

    async fn update_task(&self, current: &Task, updated: &Task) -> Result<Task, StoreError> {
        let mut state = self.write()?;
        replace(&mut state.tasks, updated, |stored| stored == current)
    }

    async fn soft_delete_task(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        mark_deleted(&mut state.tasks, id, |t| &mut t.deleted_at, at)
    }
}
