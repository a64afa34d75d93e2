use chrono::Utc;
use tracing::instrument;

use forgecrm_auth::{Actor, Operation, ResourceType, Target, authorize, list_scope};
use forgecrm_core::{CustomerId, DomainError};
use forgecrm_crm::{ContactPatch, Customer, NewCustomer};

use super::{CrmService, ServiceResult, settle};
use crate::store::CrmStore;

impl<S: CrmStore + ?Sized> CrmService<S> {
    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn list_customers(&self, actor: &Actor) -> ServiceResult<Vec<Customer>> {
        list_scope(actor, ResourceType::Customer)?;
        Ok(self.store.list_customers().await?)
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn get_customer(&self, actor: &Actor, id: CustomerId) -> ServiceResult<Customer> {
        let customer = self.load_customer(id).await?;
        authorize(actor, ResourceType::Customer, Operation::Get, &Target::Customer)?;
        Ok(customer)
    }

    #[instrument(skip(self, actor, customer), fields(actor = %actor), err(level = "debug"))]
    pub async fn create_customer(&self, actor: &Actor, customer: NewCustomer) -> ServiceResult<Customer> {
        authorize(actor, ResourceType::Customer, Operation::Create, &Target::Customer)?;
        let created = self.store.insert_customer(customer.validated()?).await?;
        tracing::info!(customer_id = %created.id, "customer created");
        Ok(created)
    }

    #[instrument(skip(self, actor, patch), fields(actor = %actor), err(level = "debug"))]
    pub async fn update_customer(
        &self,
        actor: &Actor,
        id: CustomerId,
        patch: &ContactPatch,
    ) -> ServiceResult<Customer> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let customer = self.load_customer(id).await?;
            authorize(actor, ResourceType::Customer, Operation::Update, &Target::Customer)?;
            let updated = customer.apply_update(patch, Utc::now())?;
            if let Some(done) = settle(self.store.update_customer(&customer, &updated).await, attempt, "customer") {
                return done;
            }
        }
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn delete_customer(&self, actor: &Actor, id: CustomerId) -> ServiceResult<()> {
        self.load_customer(id).await?;
        authorize(actor, ResourceType::Customer, Operation::Delete, &Target::Customer)?;
        self.store.soft_delete_customer(id, Utc::now()).await?;
        tracing::info!(customer_id = %id, "customer deleted");
        Ok(())
    }

    pub(super) async fn load_customer(&self, id: CustomerId) -> ServiceResult<Customer> {
        Ok(self
            .store
            .find_customer(id)
            .await?
            .ok_or(DomainError::NotFound)?)
    }
}

#[cfg(test)]
mod tests {
    use forgecrm_auth::{AuthzError, Role};

    use super::*;
    use crate::services::ServiceError;
    use crate::services::fixtures::{actor, contact, service};

    #[tokio::test]
    async fn sales_manages_customers_but_cannot_delete() {
        let svc = service();
        let alice = actor(&svc, "alice@example.com", Role::Sales).await;
        let created = svc
            .create_customer(&alice, NewCustomer::from(contact("Jane", Some("Acme"))))
            .await
            .unwrap();

        let patch = ContactPatch {
            company: Some("Acme Corp".to_string()),
            ..ContactPatch::default()
        };
        let updated = svc.update_customer(&alice, created.id, &patch).await.unwrap();
        assert_eq!(updated.contact.company.as_deref(), Some("Acme Corp"));

        assert!(matches!(
            svc.delete_customer(&alice, created.id).await,
            Err(ServiceError::Authz(AuthzError::Forbidden(_)))
        ));
    }

    #[tokio::test]
    async fn support_reads_but_cannot_create() {
        let svc = service();
        let admin = actor(&svc, "admin@example.com", Role::Admin).await;
        let sam = actor(&svc, "sam@example.com", Role::Support).await;
        let created = svc
            .create_customer(&admin, NewCustomer::from(contact("Jane", None)))
            .await
            .unwrap();

        assert_eq!(svc.get_customer(&sam, created.id).await.unwrap(), created);
        assert!(matches!(
            svc.create_customer(&sam, NewCustomer::from(contact("Joe", None))).await,
            Err(ServiceError::Authz(AuthzError::Forbidden(_)))
        ));
    }

    #[tokio::test]
    async fn customer_role_sees_no_customers() {
        let svc = service();
        let admin = actor(&svc, "admin@example.com", Role::Admin).await;
        let carol = actor(&svc, "carol@example.com", Role::Customer).await;
        let created = svc
            .create_customer(&admin, NewCustomer::from(contact("Jane", None)))
            .await
            .unwrap();

        assert!(svc.get_customer(&carol, created.id).await.unwrap_err().is_not_found());
        assert!(matches!(
            svc.list_customers(&carol).await,
            Err(ServiceError::Authz(AuthzError::Forbidden(_)))
        ));
    }

    #[tokio::test]
    async fn admin_soft_deletes_customers() {
        let svc = service();
        let admin = actor(&svc, "admin@example.com", Role::Admin).await;
        let created = svc
            .create_customer(&admin, NewCustomer::from(contact("Jane", None)))
            .await
            .unwrap();

        svc.delete_customer(&admin, created.id).await.unwrap();
        assert!(svc.list_customers(&admin).await.unwrap().is_empty());
        assert!(svc.delete_customer(&admin, created.id).await.unwrap_err().is_not_found());
    }
}
