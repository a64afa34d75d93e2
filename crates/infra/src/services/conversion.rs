//! Lead → Customer conversion.
//!
//! ```text
//! load lead (missing or soft-deleted → NotFound)
//!   ↓
//! authorize lead.convert (owner or admin)
//!   ↓
//! LeadStatus::convert (already converted → AlreadyConverted)
//!   ↓
//! merge contact fields, non-empty override wins
//!   ↓
//! store.convert_lead: insert customer + conditional status flip, one transaction
//! ```
//!
//! The status check above is advisory; two concurrent conversions can both
//! pass it. The store's conditional flip decides the race and the loser gets
//! `AlreadyConverted` with nothing written.

use chrono::Utc;
use tracing::instrument;

use forgecrm_auth::{Actor, Operation, ResourceType, Target, authorize};
use forgecrm_core::{DomainError, LeadId, StoreError};
use forgecrm_crm::{ContactPatch, Customer, NewCustomer};

use super::{CrmService, ServiceResult};
use crate::store::CrmStore;

impl<S: CrmStore + ?Sized> CrmService<S> {
    #[instrument(skip(self, actor, overrides), fields(actor = %actor), err(level = "debug"))]
    pub async fn convert_lead_to_customer(
        &self,
        actor: &Actor,
        lead_id: LeadId,
        overrides: &ContactPatch,
    ) -> ServiceResult<Customer> {
        let lead = self.load_lead(lead_id).await?;
        authorize(
            actor,
            ResourceType::Lead,
            Operation::Convert,
            &Target::Lead { owner_id: lead.owner_id },
        )?;
        lead.status.convert()?;

        let customer = NewCustomer::from(lead.contact.merged_with(overrides)?);
        let created = match self.store.convert_lead(lead_id, customer, Utc::now()).await {
            Ok(created) => created,
            Err(StoreError::ConditionFailed(reason)) => {
                tracing::debug!(lead_id = %lead_id, reason = %reason, "lost conversion race");
                return Err(DomainError::AlreadyConverted.into());
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(lead_id = %lead_id, customer_id = %created.id, "lead converted");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use forgecrm_auth::{AuthzError, Role};
    use forgecrm_crm::{LeadStatus, NewLead};

    use super::*;
    use crate::services::ServiceError;
    use crate::services::fixtures::{actor, contact, service};

    fn new_lead() -> NewLead {
        NewLead {
            contact: contact("Jane", Some("Acme")),
            ..NewLead::default()
        }
    }

    #[tokio::test]
    async fn override_wins_and_lead_points_at_the_customer() {
        let svc = service();
        let alice = actor(&svc, "alice@example.com", Role::Sales).await;
        let lead = svc.create_lead(&alice, new_lead()).await.unwrap();

        let overrides = ContactPatch {
            company: Some("Acme Corp".to_string()),
            ..ContactPatch::default()
        };
        let customer = svc
            .convert_lead_to_customer(&alice, lead.id, &overrides)
            .await
            .unwrap();

        assert_eq!(customer.contact.company.as_deref(), Some("Acme Corp"));
        assert_eq!(customer.contact.first_name, "Jane");
        assert_eq!(customer.contact.email.as_deref(), Some("jane@example.com"));
        assert_eq!(customer.contact.phone.as_deref(), Some("555-0100"));

        let converted = svc.get_lead(&alice, lead.id).await.unwrap();
        assert_eq!(converted.status, LeadStatus::Converted);
        assert_eq!(converted.customer_id, Some(customer.id));
    }

    #[tokio::test]
    async fn converting_twice_yields_one_customer() {
        let svc = service();
        let alice = actor(&svc, "alice@example.com", Role::Sales).await;
        let lead = svc.create_lead(&alice, new_lead()).await.unwrap();

        svc.convert_lead_to_customer(&alice, lead.id, &ContactPatch::default())
            .await
            .unwrap();
        assert!(matches!(
            svc.convert_lead_to_customer(&alice, lead.id, &ContactPatch::default()).await,
            Err(ServiceError::Domain(DomainError::AlreadyConverted))
        ));
        assert_eq!(svc.list_customers(&alice).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_conversions_yield_one_customer() {
        let svc = Arc::new(service());
        let alice = actor(&svc, "alice@example.com", Role::Sales).await;
        let lead = svc.create_lead(&alice, new_lead()).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let svc = Arc::clone(&svc);
                tokio::spawn(async move {
                    svc.convert_lead_to_customer(&alice, lead.id, &ContactPatch::default())
                        .await
                })
            })
            .collect();

        let mut converted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => converted += 1,
                Err(ServiceError::Domain(DomainError::AlreadyConverted)) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((converted, rejected), (1, 1));
        assert_eq!(svc.list_customers(&alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_the_owner_or_admin_converts() {
        let svc = service();
        let admin = actor(&svc, "admin@example.com", Role::Admin).await;
        let alice = actor(&svc, "alice@example.com", Role::Sales).await;
        let bob = actor(&svc, "bob@example.com", Role::Sales).await;
        let sam = actor(&svc, "sam@example.com", Role::Support).await;
        let lead = svc.create_lead(&alice, new_lead()).await.unwrap();

        assert!(matches!(
            svc.convert_lead_to_customer(&bob, lead.id, &ContactPatch::default()).await,
            Err(ServiceError::Authz(AuthzError::Forbidden(_)))
        ));
        assert!(matches!(
            svc.convert_lead_to_customer(&sam, lead.id, &ContactPatch::default()).await,
            Err(ServiceError::Authz(AuthzError::NotFound))
        ));
        assert!(svc
            .convert_lead_to_customer(&admin, lead.id, &ContactPatch::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn missing_lead_is_not_found() {
        let svc = service();
        let admin = actor(&svc, "admin@example.com", Role::Admin).await;
        let err = svc
            .convert_lead_to_customer(&admin, LeadId::new(404), &ContactPatch::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
