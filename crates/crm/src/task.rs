//! Tasks, optionally linked to a lead or a customer.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecrm_core::{CustomerId, DomainError, DomainResult, Entity, LeadId, TaskId, UserId};

use crate::contact::{optional, required};

/// Task status lifecycle. A completed task is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn transition(self, requested: TaskStatus) -> DomainResult<TaskStatus> {
        self.ensure_mutable()?;
        Ok(requested)
    }

    fn ensure_mutable(self) -> DomainResult<()> {
        match self {
            TaskStatus::Completed => Err(DomainError::transition("cannot modify completed task")),
            _ => Ok(()),
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown task status '{s}'")))
    }
}

/// A task may point at a lead or a customer, never both.
pub fn ensure_single_link(lead_id: Option<LeadId>, customer_id: Option<CustomerId>) -> DomainResult<()> {
    if lead_id.is_some() && customer_id.is_some() {
        return Err(DomainError::ConflictingLink);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: UserId,
    pub lead_id: Option<LeadId>,
    pub customer_id: Option<CustomerId>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Apply `patch`. A completed task rejects every update, even an empty one.
    pub fn apply_update(&self, patch: &TaskPatch, now: DateTime<Utc>) -> DomainResult<Task> {
        self.status.ensure_mutable()?;

        let status = match patch.status {
            Some(requested) => self.status.transition(requested)?,
            None => self.status,
        };
        let lead_id = patch.lead_id.unwrap_or(self.lead_id);
        let customer_id = patch.customer_id.unwrap_or(self.customer_id);
        ensure_single_link(lead_id, customer_id)?;

        let title = match &patch.title {
            Some(title) => required("title", title)?,
            None => self.title.clone(),
        };

        Ok(Task {
            title,
            description: patch
                .description
                .clone()
                .map_or_else(|| self.description.clone(), |v| optional(Some(v))),
            assigned_to: patch.assigned_to.unwrap_or(self.assigned_to),
            lead_id,
            customer_id,
            due_at: patch.due_at.unwrap_or(self.due_at),
            status,
            updated_at: now,
            ..self.clone()
        })
    }
}

impl Entity for Task {
    type Id = TaskId;

    fn id(&self) -> TaskId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub assigned_to: UserId,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl NewTask {
    pub fn validated(self) -> DomainResult<Self> {
        ensure_single_link(self.lead_id, self.customer_id)?;
        Ok(Self {
            title: required("title", &self.title)?,
            description: optional(self.description),
            status: Some(self.status.unwrap_or_default()),
            ..self
        })
    }
}

/// Partial update. The doubled options let a caller clear a link or due date
/// with `Some(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assigned_to: Option<UserId>,
    pub lead_id: Option<Option<LeadId>>,
    pub customer_id: Option<Option<CustomerId>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub status: Option<TaskStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task(status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(1),
            title: "Call back".to_string(),
            description: None,
            assigned_to: UserId::new(10),
            lead_id: Some(LeadId::new(4)),
            customer_id: None,
            due_at: None,
            status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn any_patch() -> impl Strategy<Value = TaskPatch> {
        (
            proptest::option::of("[a-z ]{0,12}"),
            proptest::option::of(prop::sample::select(TaskStatus::ALL.to_vec())),
            proptest::option::of(proptest::option::of(1u64..50)),
            proptest::option::of(1u64..50),
        )
            .prop_map(|(title, status, customer, assignee)| TaskPatch {
                title,
                status,
                customer_id: customer.map(|c| c.map(CustomerId::new)),
                assigned_to: assignee.map(UserId::new),
                ..TaskPatch::default()
            })
    }

    #[test]
    fn linking_both_lead_and_customer_conflicts() {
        let err = task(TaskStatus::Pending)
            .apply_update(
                &TaskPatch {
                    customer_id: Some(Some(CustomerId::new(2))),
                    ..TaskPatch::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, DomainError::ConflictingLink);

        let moved = task(TaskStatus::Pending)
            .apply_update(
                &TaskPatch {
                    lead_id: Some(None),
                    customer_id: Some(Some(CustomerId::new(2))),
                    ..TaskPatch::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(moved.lead_id, None);
        assert_eq!(moved.customer_id, Some(CustomerId::new(2)));
    }

    #[test]
    fn new_task_with_two_links_is_rejected() {
        let new = NewTask {
            title: "Follow up".to_string(),
            description: None,
            assigned_to: UserId::new(1),
            lead_id: Some(LeadId::new(1)),
            customer_id: Some(CustomerId::new(1)),
            due_at: None,
            status: None,
        };
        assert_eq!(new.validated(), Err(DomainError::ConflictingLink));
    }

    #[test]
    fn completing_then_editing_fails() {
        let done = task(TaskStatus::InProgress)
            .apply_update(
                &TaskPatch {
                    status: Some(TaskStatus::Completed),
                    ..TaskPatch::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(
            done.apply_update(&TaskPatch::default(), Utc::now()),
            Err(DomainError::transition("cannot modify completed task"))
        );
    }

    #[test]
    fn cancelled_task_can_be_revived() {
        let revived = task(TaskStatus::Cancelled)
            .apply_update(
                &TaskPatch {
                    status: Some(TaskStatus::Pending),
                    ..TaskPatch::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(revived.status, TaskStatus::Pending);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn completed_rejects_every_update(patch in any_patch()) {
            let done = task(TaskStatus::Completed);
            prop_assert_eq!(
                done.apply_update(&patch, Utc::now()),
                Err(DomainError::transition("cannot modify completed task"))
            );
        }
    }
}
