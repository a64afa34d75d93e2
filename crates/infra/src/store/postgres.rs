//! Postgres-backed store.
//!
//! Expects the following tables (schema management lives outside this crate):
//!
//! | Table | Columns |
//! |-------|---------|
//! | `users` | `id BIGSERIAL`, `email TEXT UNIQUE`, `password_hash`, `first_name`, `last_name`, `role TEXT`, `is_active BOOL`, `last_login_at`, `created_at` |
//! | `api_keys` | `id BIGSERIAL`, `user_id`, `name`, `prefix`, `key_hash TEXT UNIQUE`, `is_active`, `expires_at`, `last_used_at`, `created_at` |
//! | `leads` | `id BIGSERIAL`, `owner_id`, contact columns, `source`, `notes`, `status TEXT`, `customer_id`, `created_at`, `updated_at`, `deleted_at` |
//! | `customers` | `id BIGSERIAL`, contact columns, `created_at`, `updated_at`, `deleted_at` |
//! | `tickets` | `id BIGSERIAL`, `customer_id`, `assigned_to`, `subject`, `description`, `priority TEXT`, `status TEXT`, timestamps, `deleted_at` |
//! | `tasks` | `id BIGSERIAL`, `title`, `description`, `assigned_to`, `lead_id`, `customer_id`, `due_at`, `status TEXT`, timestamps, `deleted_at` |
//!
//! Contact columns are `first_name`, `last_name`, `email`, `phone`, `company`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (other) | any other | `Backend` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Backend` |
//!
//! Updates are optimistic: the `WHERE` clause repeats the status and
//! `updated_at` the caller read (the account fields, for users). Zero rows on
//! a live record means it changed underneath and yields `ConditionFailed`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use forgecrm_auth::{ApiKey, ApiKeyStore, ListScope, NewApiKey, NewUser, Role, User, UserStore};
use forgecrm_core::{ApiKeyId, CustomerId, LeadId, StoreError, TaskId, TicketId, UserId};
use forgecrm_crm::{
    Contact, Customer, Lead, LeadDraft, LeadStatus, NewCustomer, NewTask, NewTicket, Task, Ticket,
    TicketPriority, TicketStatus,
};
use forgecrm_crm::TaskStatus;

use super::{CustomerStore, LeadStore, TaskStore, TicketStore};

/// Postgres-backed store for every record type.
///
/// `Send + Sync`; all operations go through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping and id conversion
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => StoreError::UniqueViolation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

fn db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::backend(format!("id {id} exceeds BIGINT range")))
}

fn opt_db_id(id: Option<u64>) -> Result<Option<i64>, StoreError> {
    id.map(db_id).transpose()
}

fn column_id(row: &PgRow, column: &str) -> Result<u64, sqlx::Error> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn opt_column_id(row: &PgRow, column: &str) -> Result<Option<u64>, sqlx::Error> {
    let value: Option<i64> = row.try_get(column)?;
    value
        .map(u64::try_from)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn column_parse<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: core::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: String = row.try_get(column)?;
    value.parse::<T>().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Column equality a list scope translates to.
enum Filter {
    All,
    Eq(i64),
    /// The scope cannot match any row of this table.
    Nothing,
}

impl Filter {
    fn owner(scope: ListScope) -> Result<Self, StoreError> {
        Ok(match scope {
            ListScope::All => Filter::All,
            ListScope::OwnedBy(id) => Filter::Eq(db_id(id.get())?),
            ListScope::AssignedTo(_) => Filter::Nothing,
        })
    }

    fn assignee(scope: ListScope) -> Result<Self, StoreError> {
        Ok(match scope {
            ListScope::All => Filter::All,
            ListScope::AssignedTo(id) => Filter::Eq(db_id(id.get())?),
            ListScope::OwnedBy(_) => Filter::Nothing,
        })
    }

    fn value(&self) -> Option<i64> {
        match self {
            Filter::Eq(id) => Some(*id),
            Filter::All | Filter::Nothing => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────────────────────────────────────

struct UserRow(User);

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow(User {
            id: UserId::new(column_id(row, "id")?),
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            role: column_parse::<Role>(row, "role")?,
            is_active: row.try_get("is_active")?,
            last_login_at: row.try_get("last_login_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct ApiKeyRow(ApiKey);

impl<'r> FromRow<'r, PgRow> for ApiKeyRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ApiKeyRow(ApiKey {
            id: ApiKeyId::new(column_id(row, "id")?),
            user_id: UserId::new(column_id(row, "user_id")?),
            name: row.try_get("name")?,
            prefix: row.try_get("prefix")?,
            key_hash: row.try_get("key_hash")?,
            is_active: row.try_get("is_active")?,
            expires_at: row.try_get("expires_at")?,
            last_used_at: row.try_get("last_used_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

fn contact_from_row(row: &PgRow) -> Result<Contact, sqlx::Error> {
    Ok(Contact {
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        company: row.try_get("company")?,
    })
}

struct LeadRow(Lead);

impl<'r> FromRow<'r, PgRow> for LeadRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LeadRow(Lead {
            id: LeadId::new(column_id(row, "id")?),
            owner_id: UserId::new(column_id(row, "owner_id")?),
            contact: contact_from_row(row)?,
            source: row.try_get("source")?,
            notes: row.try_get("notes")?,
            status: column_parse::<LeadStatus>(row, "status")?,
            customer_id: opt_column_id(row, "customer_id")?.map(CustomerId::new),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        }))
    }
}

struct CustomerRow(Customer);

impl<'r> FromRow<'r, PgRow> for CustomerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CustomerRow(Customer {
            id: CustomerId::new(column_id(row, "id")?),
            contact: contact_from_row(row)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        }))
    }
}

struct TicketRow(Ticket);

impl<'r> FromRow<'r, PgRow> for TicketRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TicketRow(Ticket {
            id: TicketId::new(column_id(row, "id")?),
            customer_id: CustomerId::new(column_id(row, "customer_id")?),
            assigned_to: opt_column_id(row, "assigned_to")?.map(UserId::new),
            subject: row.try_get("subject")?,
            description: row.try_get("description")?,
            priority: column_parse::<TicketPriority>(row, "priority")?,
            status: column_parse::<TicketStatus>(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        }))
    }
}

struct TaskRow(Task);

impl<'r> FromRow<'r, PgRow> for TaskRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TaskRow(Task {
            id: TaskId::new(column_id(row, "id")?),
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            assigned_to: UserId::new(column_id(row, "assigned_to")?),
            lead_id: opt_column_id(row, "lead_id")?.map(LeadId::new),
            customer_id: opt_column_id(row, "customer_id")?.map(CustomerId::new),
            due_at: row.try_get("due_at")?,
            status: column_parse::<TaskStatus>(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        }))
    }
}

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, role, is_active, last_login_at, created_at";
const API_KEY_COLUMNS: &str =
    "id, user_id, name, prefix, key_hash, is_active, expires_at, last_used_at, created_at";
const LEAD_COLUMNS: &str = "id, owner_id, first_name, last_name, email, phone, company, source, notes, status, customer_id, created_at, updated_at, deleted_at";
const CUSTOMER_COLUMNS: &str =
    "id, first_name, last_name, email, phone, company, created_at, updated_at, deleted_at";
const TICKET_COLUMNS: &str = "id, customer_id, assigned_to, subject, description, priority, status, created_at, updated_at, deleted_at";
const TASK_COLUMNS: &str = "id, title, description, assigned_to, lead_id, customer_id, due_at, status, created_at, updated_at, deleted_at";

// ─────────────────────────────────────────────────────────────────────────────
// Users & API keys
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl UserStore for PostgresStore {
    #[instrument(skip(self, user), fields(email = %user.email), err)]
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (email, password_hash, first_name, last_name, role, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, TRUE, NOW()) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(row.0)
    }

    #[instrument(skip(self), err)]
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self, scope: ListScope) -> Result<Vec<User>, StoreError> {
        let filter = Filter::owner(scope)?;
        if matches!(filter, Filter::Nothing) {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE ($1::bigint IS NULL OR id = $1) ORDER BY id"
        ))
        .bind(filter.value())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, current, updated), fields(user_id = %updated.id), err)]
    async fn update_user(&self, current: &User, updated: &User) -> Result<User, StoreError> {
        let id = db_id(updated.id.get())?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET password_hash = $2, first_name = $3, last_name = $4, role = $5, is_active = $6 \
             WHERE id = $1 AND password_hash = $7 AND first_name = $8 AND last_name = $9 \
             AND role = $10 AND is_active = $11 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&updated.password_hash)
        .bind(&updated.first_name)
        .bind(&updated.last_name)
        .bind(updated.role.as_str())
        .bind(updated.is_active)
        .bind(&current.password_hash)
        .bind(&current.first_name)
        .bind(&current.last_name)
        .bind(current.role.as_str())
        .bind(current.is_active)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;
        match row {
            Some(row) => Ok(row.0),
            None => Err(missed_update(&self.pool, "users", id).await),
        }
    }

    #[instrument(skip(self, email), err)]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(db_id(id.get())?)
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_login", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ApiKeyStore for PostgresStore {
    #[instrument(skip(self, key), fields(user_id = %key.user_id, prefix = %key.prefix), err)]
    async fn insert_api_key(&self, key: NewApiKey) -> Result<ApiKey, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "INSERT INTO api_keys (user_id, name, prefix, key_hash, is_active, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, TRUE, $5, NOW()) RETURNING {API_KEY_COLUMNS}"
        ))
        .bind(db_id(key.user_id.get())?)
        .bind(&key.name)
        .bind(&key.prefix)
        .bind(&key.key_hash)
        .bind(key.expires_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_api_key", e))?;
        Ok(row.0)
    }

    #[instrument(skip(self), err)]
    async fn find_api_key(&self, id: ApiKeyId) -> Result<Option<ApiKey>, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_api_key", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip_all, err)]
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_api_key_by_hash", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKey>, StoreError> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY id DESC"
        ))
        .bind(db_id(user_id.get())?)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_api_keys", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn touch_api_key(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(db_id(id.get())?)
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("touch_api_key", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn revoke_api_key(&self, id: ApiKeyId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE id = $1")
            .bind(db_id(id.get())?)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke_api_key", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Leads, customers, tickets, tasks
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl LeadStore for PostgresStore {
    #[instrument(skip(self, lead), fields(owner_id = %lead.owner_id), err)]
    async fn insert_lead(&self, lead: LeadDraft) -> Result<Lead, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "INSERT INTO leads (owner_id, first_name, last_name, email, phone, company, source, notes, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW()) RETURNING {LEAD_COLUMNS}"
        ))
        .bind(db_id(lead.owner_id.get())?)
        .bind(&lead.contact.first_name)
        .bind(&lead.contact.last_name)
        .bind(&lead.contact.email)
        .bind(&lead.contact.phone)
        .bind(&lead.contact.company)
        .bind(&lead.source)
        .bind(&lead.notes)
        .bind(lead.status.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_lead", e))?;
        Ok(row.0)
    }

    #[instrument(skip(self), err)]
    async fn find_lead(&self, id: LeadId) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_lead", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_leads(&self, scope: ListScope) -> Result<Vec<Lead>, StoreError> {
        let filter = Filter::owner(scope)?;
        if matches!(filter, Filter::Nothing) {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads \
             WHERE deleted_at IS NULL AND ($1::bigint IS NULL OR owner_id = $1) ORDER BY id"
        ))
        .bind(filter.value())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_leads", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, current, lead), fields(lead_id = %lead.id), err)]
    async fn update_lead(&self, current: &Lead, lead: &Lead) -> Result<Lead, StoreError> {
        let id = db_id(lead.id.get())?;
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "UPDATE leads SET owner_id = $2, first_name = $3, last_name = $4, email = $5, phone = $6, \
             company = $7, source = $8, notes = $9, status = $10, updated_at = $11 \
             WHERE id = $1 AND deleted_at IS NULL AND status = $12 AND updated_at = $13 \
             RETURNING {LEAD_COLUMNS}"
        ))
        .bind(id)
        .bind(db_id(lead.owner_id.get())?)
        .bind(&lead.contact.first_name)
        .bind(&lead.contact.last_name)
        .bind(&lead.contact.email)
        .bind(&lead.contact.phone)
        .bind(&lead.contact.company)
        .bind(&lead.source)
        .bind(&lead.notes)
        .bind(lead.status.as_str())
        .bind(lead.updated_at)
        .bind(current.status.as_str())
        .bind(current.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_lead", e))?;
        match row {
            Some(row) => Ok(row.0),
            None => Err(missed_update(&self.pool, "leads", id).await),
        }
    }

    #[instrument(skip(self), err)]
    async fn soft_delete_lead(&self, id: LeadId, at: DateTime<Utc>) -> Result<(), StoreError> {
        soft_delete(&self.pool, "leads", id.get(), at).await
    }

    /// Insert the customer and flip the lead inside one transaction.
    ///
    /// The flip is conditional on the lead not being converted yet; when it
    /// matches zero rows the transaction is rolled back.
    #[instrument(skip(self, customer), err)]
    async fn convert_lead(
        &self,
        id: LeadId,
        customer: NewCustomer,
        at: DateTime<Utc>,
    ) -> Result<Customer, StoreError> {
        let lead_id = db_id(id.get())?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query_as::<_, CustomerRow>(&format!(
            "INSERT INTO customers (first_name, last_name, email, phone, company, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING {CUSTOMER_COLUMNS}"
        ))
        .bind(&customer.contact.first_name)
        .bind(&customer.contact.last_name)
        .bind(&customer.contact.email)
        .bind(&customer.contact.phone)
        .bind(&customer.contact.company)
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_customer", e))?;
        let created = row.0;

        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = 'converted', customer_id = $2, updated_at = $3
            WHERE id = $1 AND status <> 'converted' AND deleted_at IS NULL
            "#,
        )
        .bind(lead_id)
        .bind(db_id(created.id.get())?)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("convert_lead", e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::ConditionFailed(format!(
                "lead {id} is already converted or gone"
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(created)
    }
}

#[async_trait::async_trait]
impl CustomerStore for PostgresStore {
    #[instrument(skip(self, customer), err)]
    async fn insert_customer(&self, customer: NewCustomer) -> Result<Customer, StoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(&format!(
            "INSERT INTO customers (first_name, last_name, email, phone, company, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) RETURNING {CUSTOMER_COLUMNS}"
        ))
        .bind(&customer.contact.first_name)
        .bind(&customer.contact.last_name)
        .bind(&customer.contact.email)
        .bind(&customer.contact.phone)
        .bind(&customer.contact.company)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_customer", e))?;
        Ok(row.0)
    }

    #[instrument(skip(self), err)]
    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_customer", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query_as::<_, CustomerRow>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE deleted_at IS NULL ORDER BY id"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_customers", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, current, customer), fields(customer_id = %customer.id), err)]
    async fn update_customer(&self, current: &Customer, customer: &Customer) -> Result<Customer, StoreError> {
        let id = db_id(customer.id.get())?;
        let row = sqlx::query_as::<_, CustomerRow>(&format!(
            "UPDATE customers SET first_name = $2, last_name = $3, email = $4, phone = $5, company = $6, \
             updated_at = $7 WHERE id = $1 AND deleted_at IS NULL AND updated_at = $8 \
             RETURNING {CUSTOMER_COLUMNS}"
        ))
        .bind(id)
        .bind(&customer.contact.first_name)
        .bind(&customer.contact.last_name)
        .bind(&customer.contact.email)
        .bind(&customer.contact.phone)
        .bind(&customer.contact.company)
        .bind(customer.updated_at)
        .bind(current.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_customer", e))?;
        match row {
            Some(row) => Ok(row.0),
            None => Err(missed_update(&self.pool, "customers", id).await),
        }
    }

    #[instrument(skip(self), err)]
    async fn soft_delete_customer(&self, id: CustomerId, at: DateTime<Utc>) -> Result<(), StoreError> {
        soft_delete(&self.pool, "customers", id.get(), at).await
    }
}

#[async_trait::async_trait]
impl TicketStore for PostgresStore {
    #[instrument(skip(self, ticket), fields(customer_id = %ticket.customer_id), err)]
    async fn insert_ticket(&self, ticket: NewTicket) -> Result<Ticket, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "INSERT INTO tickets (customer_id, assigned_to, subject, description, priority, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW()) RETURNING {TICKET_COLUMNS}"
        ))
        .bind(db_id(ticket.customer_id.get())?)
        .bind(opt_db_id(ticket.assigned_to.map(UserId::get))?)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(ticket.priority.unwrap_or_default().as_str())
        .bind(TicketStatus::default().as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_ticket", e))?;
        Ok(row.0)
    }

    #[instrument(skip(self), err)]
    async fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_ticket", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_tickets(&self, scope: ListScope) -> Result<Vec<Ticket>, StoreError> {
        let filter = Filter::assignee(scope)?;
        if matches!(filter, Filter::Nothing) {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE deleted_at IS NULL AND ($1::bigint IS NULL OR assigned_to = $1) ORDER BY id"
        ))
        .bind(filter.value())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_tickets", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, current, ticket), fields(ticket_id = %ticket.id), err)]
    async fn update_ticket(&self, current: &Ticket, ticket: &Ticket) -> Result<Ticket, StoreError> {
        let id = db_id(ticket.id.get())?;
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE tickets SET assigned_to = $2, subject = $3, description = $4, priority = $5, \
             status = $6, updated_at = $7 \
             WHERE id = $1 AND deleted_at IS NULL AND status = $8 AND updated_at = $9 \
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(id)
        .bind(opt_db_id(ticket.assigned_to.map(UserId::get))?)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(ticket.priority.as_str())
        .bind(ticket.status.as_str())
        .bind(ticket.updated_at)
        .bind(current.status.as_str())
        .bind(current.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_ticket", e))?;
        match row {
            Some(row) => Ok(row.0),
            None => Err(missed_update(&self.pool, "tickets", id).await),
        }
    }

    #[instrument(skip(self), err)]
    async fn soft_delete_ticket(&self, id: TicketId, at: DateTime<Utc>) -> Result<(), StoreError> {
        soft_delete(&self.pool, "tickets", id.get(), at).await
    }
}

#[async_trait::async_trait]
impl TaskStore for PostgresStore {
    #[instrument(skip(self, task), fields(assigned_to = %task.assigned_to), err)]
    async fn insert_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO tasks (title, description, assigned_to, lead_id, customer_id, due_at, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) RETURNING {TASK_COLUMNS}"
        ))
        .bind(&task.title)
        .bind(&task.description)
        .bind(db_id(task.assigned_to.get())?)
        .bind(opt_db_id(task.lead_id.map(LeadId::get))?)
        .bind(opt_db_id(task.customer_id.map(CustomerId::get))?)
        .bind(task.due_at)
        .bind(task.status.unwrap_or_default().as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_task", e))?;
        Ok(row.0)
    }

    #[instrument(skip(self), err)]
    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_task", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_tasks(&self, scope: ListScope) -> Result<Vec<Task>, StoreError> {
        let filter = Filter::assignee(scope)?;
        if matches!(filter, Filter::Nothing) {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE deleted_at IS NULL AND ($1::bigint IS NULL OR assigned_to = $1) ORDER BY id"
        ))
        .bind(filter.value())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_tasks", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, current, task), fields(task_id = %task.id), err)]
    async fn update_task(&self, current: &Task, task: &Task) -> Result<Task, StoreError> {
        let id = db_id(task.id.get())?;
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET title = $2, description = $3, assigned_to = $4, lead_id = $5, customer_id = $6, \
             due_at = $7, status = $8, updated_at = $9 \
             WHERE id = $1 AND deleted_at IS NULL AND status = $10 AND updated_at = $11 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(db_id(task.assigned_to.get())?)
        .bind(opt_db_id(task.lead_id.map(LeadId::get))?)
        .bind(opt_db_id(task.customer_id.map(CustomerId::get))?)
        .bind(task.due_at)
        .bind(task.status.as_str())
        .bind(task.updated_at)
        .bind(current.status.as_str())
        .bind(current.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_task", e))?;
        match row {
            Some(row) => Ok(row.0),
            None => Err(missed_update(&self.pool, "tasks", id).await),
        }
    }

    #[instrument(skip(self), err)]
    async fn soft_delete_task(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError> {
        soft_delete(&self.pool, "tasks", id.get(), at).await
    }
}

/// Stamp `deleted_at` on a live row of `table`.
async fn soft_delete(pool: &PgPool, table: &'static str, id: u64, at: DateTime<Utc>) -> Result<(), StoreError> {
    let result = sqlx::query(&format!(
        "UPDATE {table} SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(db_id(id)?)
    .bind(at)
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("soft_delete", e))?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Account for a conditional update that matched no rows: the record is
/// gone (`NotFound`) or changed after it was read (`ConditionFailed`).
async fn missed_update(pool: &PgPool, table: &'static str, id: i64) -> StoreError {
    let live = if table == "users" { "TRUE" } else { "deleted_at IS NULL" };
    let exists = sqlx::query_scalar::<_, bool>(&format!(
        "SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1 AND {live})"
    ))
    .bind(id)
    .fetch_one(pool)
    .await;
    match exists {
        Ok(true) => StoreError::ConditionFailed(format!("{table} row {id} changed since it was read")),
        Ok(false) => StoreError::NotFound,
        Err(e) => map_sqlx_error("missed_update", e),
    }
}
