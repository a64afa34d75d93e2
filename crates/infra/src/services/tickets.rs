use chrono::Utc;
use tracing::instrument;

use forgecrm_auth::{Actor, Operation, ResourceType, Target, authorize, list_scope};
use forgecrm_core::{CustomerId, DomainError, TicketId, UserId};
use forgecrm_crm::{NewTicket, Ticket, TicketPatch};

use super::{CrmService, ServiceResult, settle};
use crate::store::CrmStore;

impl<S: CrmStore + ?Sized> CrmService<S> {
    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn list_tickets(&self, actor: &Actor) -> ServiceResult<Vec<Ticket>> {
        let scope = list_scope(actor, ResourceType::Ticket)?;
        Ok(self.store.list_tickets(scope).await?)
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn get_ticket(&self, actor: &Actor, id: TicketId) -> ServiceResult<Ticket> {
        let ticket = self.load_ticket(id).await?;
        authorize(
            actor,
            ResourceType::Ticket,
            Operation::Get,
            &Target::Ticket { assigned_to: ticket.assigned_to },
        )?;
        Ok(ticket)
    }

    #[instrument(skip(self, actor, ticket), fields(actor = %actor), err(level = "debug"))]
    pub async fn create_ticket(&self, actor: &Actor, ticket: NewTicket) -> ServiceResult<Ticket> {
        authorize(
            actor,
            ResourceType::Ticket,
            Operation::Create,
            &Target::Ticket { assigned_to: ticket.assigned_to },
        )?;

        let ticket = ticket.validated()?;
        self.existing_customer(ticket.customer_id).await?;
        if let Some(assignee) = ticket.assigned_to {
            self.ticket_assignee(assignee).await?;
        }

        let created = self.store.insert_ticket(ticket).await?;
        tracing::info!(ticket_id = %created.id, customer_id = %created.customer_id, "ticket created");
        Ok(created)
    }

    /// Update a ticket. A closed ticket keeps its status but its other fields
    /// stay editable.
    #[instrument(skip(self, actor, patch), fields(actor = %actor), err(level = "debug"))]
    pub async fn update_ticket(&self, actor: &Actor, id: TicketId, patch: &TicketPatch) -> ServiceResult<Ticket> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let ticket = self.load_ticket(id).await?;
            authorize(
                actor,
                ResourceType::Ticket,
                Operation::Update,
                &Target::Ticket { assigned_to: ticket.assigned_to },
            )?;

            let updated = ticket.apply_update(patch, Utc::now())?;
            match updated.assigned_to {
                Some(assignee) if updated.assigned_to != ticket.assigned_to => {
                    self.ticket_assignee(assignee).await?;
                }
                _ => {}
            }

            if let Some(done) = settle(self.store.update_ticket(&ticket, &updated).await, attempt, "ticket") {
                return done;
            }
        }
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn delete_ticket(&self, actor: &Actor, id: TicketId) -> ServiceResult<()> {
        let ticket = self.load_ticket(id).await?;
        authorize(
            actor,
            ResourceType::Ticket,
            Operation::Delete,
            &Target::Ticket { assigned_to: ticket.assigned_to },
        )?;
        self.store.soft_delete_ticket(id, Utc::now()).await?;
        tracing::info!(ticket_id = %id, "ticket deleted");
        Ok(())
    }

    async fn load_ticket(&self, id: TicketId) -> ServiceResult<Ticket> {
        Ok(self.store.find_ticket(id).await?.ok_or(DomainError::NotFound)?)
    }

    async fn existing_customer(&self, id: CustomerId) -> ServiceResult<()> {
        match self.store.find_customer(id).await? {
            Some(_) => Ok(()),
            None => Err(DomainError::validation("customer_id must reference an existing customer").into()),
        }
    }

    /// Tickets may only be assigned to active support staff or admins.
    async fn ticket_assignee(&self, id: UserId) -> ServiceResult<()> {
        let user = self.active_user(id, "assigned_to").await?;
        if !user.role.can_take_tickets() {
            return Err(DomainError::validation(format!(
                "tickets cannot be assigned to a {} user",
                user.role
            ))
            .into());
        }
        Ok(())
    }
}
