use chrono::Utc;
use tracing::instrument;

use forgecrm_auth::{Actor, Operation, ResourceType, Target, authorize, list_scope};
use forgecrm_core::{DomainError, LeadId};
use forgecrm_crm::{Lead, LeadPatch, NewLead};

use super::{CrmService, ServiceResult, settle};
use crate::store::CrmStore;

impl<S: CrmStore + ?Sized> CrmService<S> {
    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn list_leads(&self, actor: &Actor) -> ServiceResult<Vec<Lead>> {
        let scope = list_scope(actor, ResourceType::Lead)?;
        Ok(self.store.list_leads(scope).await?)
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn get_lead(&self, actor: &Actor, id: LeadId) -> ServiceResult<Lead> {
        let lead = self.load_lead(id).await?;
        authorize(
            actor,
            ResourceType::Lead,
            Operation::Get,
            &Target::Lead { owner_id: lead.owner_id },
        )?;
        Ok(lead)
    }

    /// Create a lead. Without an explicit owner the lead belongs to the actor.
    #[instrument(skip(self, actor, lead), fields(actor = %actor), err(level = "debug"))]
    pub async fn create_lead(&self, actor: &Actor, lead: NewLead) -> ServiceResult<Lead> {
        authorize(
            actor,
            ResourceType::Lead,
            Operation::Create,
            &Target::NewLead { owner_id: lead.owner_id },
        )?;

        let owner_id = lead.owner_id.unwrap_or(actor.id);
        let draft = lead.into_draft(owner_id)?;
        self.active_user(owner_id, "owner_id").await?;

        let created = self.store.insert_lead(draft).await?;
        tracing::info!(lead_id = %created.id, owner_id = %created.owner_id, "lead created");
        Ok(created)
    }

    /// Update a lead. Reassigning the owner is checked as if the lead were
    /// created for the new owner.
    #[instrument(skip(self, actor, patch), fields(actor = %actor), err(level = "debug"))]
    pub async fn update_lead(&self, actor: &Actor, id: LeadId, patch: &LeadPatch) -> ServiceResult<Lead> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let lead = self.load_lead(id).await?;
            authorize(
                actor,
                ResourceType::Lead,
                Operation::Update,
                &Target::Lead { owner_id: lead.owner_id },
            )?;

            let updated = lead.apply_update(patch, Utc::now())?;
            if updated.owner_id != lead.owner_id {
                authorize(
                    actor,
                    ResourceType::Lead,
                    Operation::Create,
                    &Target::NewLead { owner_id: Some(updated.owner_id) },
                )?;
                self.active_user(updated.owner_id, "owner_id").await?;
            }

            if let Some(done) = settle(self.store.update_lead(&lead, &updated).await, attempt, "lead") {
                return done;
            }
        }
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn delete_lead(&self, actor: &Actor, id: LeadId) -> ServiceResult<()> {
        let lead = self.load_lead(id).await?;
        authorize(
            actor,
            ResourceType::Lead,
            Operation::Delete,
            &Target::Lead { owner_id: lead.owner_id },
        )?;
        self.store.soft_delete_lead(id, Utc::now()).await?;
        tracing::info!(lead_id = %id, "lead deleted");
        Ok(())
    }

    pub(super) async fn load_lead(&self, id: LeadId) -> ServiceResult<Lead> {
        Ok(self.store.find_lead(id).await?.ok_or(DomainError::NotFound)?)
    }
}
