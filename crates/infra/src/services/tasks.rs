use chrono::Utc;
use tracing::instrument;

use forgecrm_auth::{Actor, Operation, ResourceType, Target, authorize, list_scope};
use forgecrm_core::{CustomerId, DomainError, LeadId, TaskId};
use forgecrm_crm::{NewTask, Task, TaskPatch};

use super::{CrmService, ServiceResult, settle};
use crate::store::CrmStore;

impl<S: CrmStore + ?Sized> CrmService<S> {
    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn list_tasks(&self, actor: &Actor) -> ServiceResult<Vec<Task>> {
        let scope = list_scope(actor, ResourceType::Task)?;
        Ok(self.store.list_tasks(scope).await?)
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn get_task(&self, actor: &Actor, id: TaskId) -> ServiceResult<Task> {
        let task = self.load_task(id).await?;
        authorize(
            actor,
            ResourceType::Task,
            Operation::Get,
            &Target::Task { assigned_to: task.assigned_to },
        )?;
        Ok(task)
    }

    #[instrument(skip(self, actor, task), fields(actor = %actor), err(level = "debug"))]
    pub async fn create_task(&self, actor: &Actor, task: NewTask) -> ServiceResult<Task> {
        authorize(
            actor,
            ResourceType::Task,
            Operation::Create,
            &Target::Task { assigned_to: task.assigned_to },
        )?;

        let task = task.validated()?;
        self.active_user(task.assigned_to, "assigned_to").await?;
        self.linked_records(task.lead_id, task.customer_id).await?;

        let created = self.store.insert_task(task).await?;
        tracing::info!(task_id = %created.id, assigned_to = %created.assigned_to, "task created");
        Ok(created)
    }

    /// Update a task. A completed task rejects every update.
    #[instrument(skip(self, actor, patch), fields(actor = %actor), err(level = "debug"))]
    pub async fn update_task(&self, actor: &Actor, id: TaskId, patch: &TaskPatch) -> ServiceResult<Task> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let task = self.load_task(id).await?;
            authorize(
                actor,
                ResourceType::Task,
                Operation::Update,
                &Target::Task { assigned_to: task.assigned_to },
            )?;

            let updated = task.apply_update(patch, Utc::now())?;
            if updated.assigned_to != task.assigned_to {
                self.active_user(updated.assigned_to, "assigned_to").await?;
            }
            let lead_id = updated.lead_id.filter(|_| updated.lead_id != task.lead_id);
            let customer_id = updated.customer_id.filter(|_| updated.customer_id != task.customer_id);
            self.linked_records(lead_id, customer_id).await?;

            if let Some(done) = settle(self.store.update_task(&task, &updated).await, attempt, "task") {
                return done;
            }
        }
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn delete_task(&self, actor: &Actor, id: TaskId) -> ServiceResult<()> {
        let task = self.load_task(id).await?;
        authorize(
            actor,
            ResourceType::Task,
            Operation::Delete,
            &Target::Task { assigned_to: task.assigned_to },
        )?;
        self.store.soft_delete_task(id, Utc::now()).await?;
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> ServiceResult<Task> {
        Ok(self.store.find_task(id).await?.ok_or(DomainError::NotFound)?)
    }

    async fn linked_records(&self, lead_id: Option<LeadId>, customer_id: Option<CustomerId>) -> ServiceResult<()> {
        if let Some(id) = lead_id {
            if self.store.find_lead(id).await?.is_none() {
                return Err(DomainError::validation("lead_id must reference an existing lead").into());
            }
        }
        if let Some(id) = customer_id {
            if self.store.find_customer(id).await?.is_none() {
                return Err(DomainError::validation("customer_id must reference an existing customer").into());
            }
        }
        Ok(())
    }
}
