//! Customers: created directly or by converting a lead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecrm_core::{CustomerId, DomainResult, Entity};

use crate::contact::{Contact, ContactPatch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: CustomerId,
    #[serde(flatten)]
    pub contact: Contact,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn apply_update(&self, patch: &ContactPatch, now: DateTime<Utc>) -> DomainResult<Customer> {
        Ok(Customer {
            contact: self.contact.patched(patch)?,
            updated_at: now,
            ..self.clone()
        })
    }
}

impl Entity for Customer {
    type Id = CustomerId;

    fn id(&self) -> CustomerId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct NewCustomer {
    #[serde(flatten)]
    pub contact: Contact,
}

impl NewCustomer {
    pub fn validated(self) -> DomainResult<Self> {
        Ok(Self {
            contact: self.contact.validated()?,
        })
    }
}

impl From<Contact> for NewCustomer {
    fn from(contact: Contact) -> Self {
        Self { contact }
    }
}
