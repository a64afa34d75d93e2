//! Support tickets.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecrm_core::{CustomerId, DomainError, DomainResult, Entity, TicketId, UserId};

use crate::contact::{optional, required};

/// Ticket status lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn transition(self, requested: TicketStatus) -> DomainResult<TicketStatus> {
        match self {
            TicketStatus::Closed => Err(DomainError::transition("cannot reopen closed ticket")),
            _ => Ok(requested),
        }
    }
}

impl core::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown ticket status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub const ALL: [TicketPriority; 4] = [
        TicketPriority::Low,
        TicketPriority::Medium,
        TicketPriority::High,
        TicketPriority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for TicketPriority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketPriority::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown ticket priority '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub id: TicketId,
    pub customer_id: CustomerId,
    pub assigned_to: Option<UserId>,
    pub subject: String,
    pub description: Option<String>,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Apply `patch`. Only the status is frozen once closed; the other fields
    /// stay editable.
    pub fn apply_update(&self, patch: &TicketPatch, now: DateTime<Utc>) -> DomainResult<Ticket> {
        let status = match patch.status {
            Some(requested) => self.status.transition(requested)?,
            None => self.status,
        };
        let subject = match &patch.subject {
            Some(subject) => required("subject", subject)?,
            None => self.subject.clone(),
        };

        Ok(Ticket {
            assigned_to: patch.assigned_to.unwrap_or(self.assigned_to),
            subject,
            description: patch
                .description
                .clone()
                .map_or_else(|| self.description.clone(), |v| optional(Some(v))),
            priority: patch.priority.unwrap_or(self.priority),
            status,
            updated_at: now,
            ..self.clone()
        })
    }
}

impl Entity for Ticket {
    type Id = TicketId;

    fn id(&self) -> TicketId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewTicket {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub assigned_to: Option<UserId>,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
}

impl NewTicket {
    pub fn validated(self) -> DomainResult<Self> {
        Ok(Self {
            subject: required("subject", &self.subject)?,
            description: optional(self.description),
            priority: Some(self.priority.unwrap_or_default()),
            ..self
        })
    }
}

/// Partial update. `assigned_to: Some(None)` unassigns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TicketPatch {
    pub assigned_to: Option<Option<UserId>>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TicketPriority>,
    pub status: Option<TicketStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ticket(status: TicketStatus) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: TicketId::new(7),
            customer_id: CustomerId::new(1),
            assigned_to: Some(UserId::new(20)),
            subject: "Printer on fire".to_string(),
            description: None,
            priority: TicketPriority::High,
            status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn closed_ticket_keeps_other_fields_editable() {
        let t = ticket(TicketStatus::Closed);
        let updated = t
            .apply_update(
                &TicketPatch {
                    description: Some("post-mortem attached".to_string()),
                    priority: Some(TicketPriority::Low),
                    ..TicketPatch::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(updated.status, TicketStatus::Closed);
        assert_eq!(updated.priority, TicketPriority::Low);
    }

    #[test]
    fn reopening_closed_ticket_fails_with_message() {
        let err = ticket(TicketStatus::Closed)
            .apply_update(
                &TicketPatch {
                    status: Some(TicketStatus::Open),
                    ..TicketPatch::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, DomainError::transition("cannot reopen closed ticket"));
    }

    #[test]
    fn status_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&TicketStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!("in_progress".parse::<TicketStatus>().unwrap(), TicketStatus::InProgress);
    }

    #[test]
    fn new_ticket_defaults_priority_and_requires_subject() {
        let new = NewTicket {
            customer_id: CustomerId::new(1),
            assigned_to: None,
            subject: "  Broken login ".to_string(),
            description: Some(" ".to_string()),
            priority: None,
        }
        .validated()
        .unwrap();
        assert_eq!(new.subject, "Broken login");
        assert_eq!(new.description, None);
        assert_eq!(new.priority, Some(TicketPriority::Medium));

        let blank = NewTicket {
            subject: " ".to_string(),
            ..new
        };
        assert!(blank.validated().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn closed_rejects_every_transition(requested in prop::sample::select(TicketStatus::ALL.to_vec())) {
            prop_assert_eq!(
                TicketStatus::Closed.transition(requested),
                Err(DomainError::transition("cannot reopen closed ticket"))
            );
        }

        #[test]
        fn open_states_accept_every_transition(
            from in prop::sample::select(TicketStatus::ALL[..3].to_vec()),
            requested in prop::sample::select(TicketStatus::ALL.to_vec()),
        ) {
            prop_assert_eq!(from.transition(requested), Ok(requested));
        }
    }
}
