//! Sales leads and their status lifecycle.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecrm_core::{CustomerId, DomainError, DomainResult, Entity, LeadId, UserId};

use crate::contact::{Contact, ContactPatch, optional};

/// Lead status lifecycle.
///
/// Everything but `Converted` may be set freely; `Converted` is reached only
/// through [`LeadStatus::convert`] and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Unqualified,
    Converted,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 5] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Qualified,
        LeadStatus::Unqualified,
        LeadStatus::Converted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Unqualified => "unqualified",
            LeadStatus::Converted => "converted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Converted)
    }

    /// A status change requested through an ordinary update.
    pub fn transition(self, requested: LeadStatus) -> DomainResult<LeadStatus> {
        if self.is_terminal() {
            return Err(DomainError::transition("cannot change status of a converted lead"));
        }
        if requested == LeadStatus::Converted {
            return Err(DomainError::transition(
                "leads are converted through the conversion operation",
            ));
        }
        Ok(requested)
    }

    /// Precondition of lead → customer conversion.
    pub fn convert(self) -> DomainResult<LeadStatus> {
        if self.is_terminal() {
            return Err(DomainError::AlreadyConverted);
        }
        Ok(LeadStatus::Converted)
    }
}

impl core::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown lead status '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lead {
    pub id: LeadId,
    pub owner_id: UserId,
    #[serde(flatten)]
    pub contact: Contact,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub status: LeadStatus,
    pub customer_id: Option<CustomerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Lead {
    /// Validate `patch` against this lead and return the updated record.
    ///
    /// `self` is left untouched; on error nothing changes.
    pub fn apply_update(&self, patch: &LeadPatch, now: DateTime<Utc>) -> DomainResult<Lead> {
        let status = match patch.status {
            Some(requested) => self.status.transition(requested)?,
            None => self.status,
        };

        Ok(Lead {
            owner_id: patch.owner_id.unwrap_or(self.owner_id),
            contact: self.contact.patched(&patch.contact)?,
            source: patch.source.clone().map_or_else(|| self.source.clone(), |v| optional(Some(v))),
            notes: patch.notes.clone().map_or_else(|| self.notes.clone(), |v| optional(Some(v))),
            status,
            updated_at: now,
            ..self.clone()
        })
    }

    /// The lead as it looks once converted into `customer_id`.
    pub fn converted_into(&self, customer_id: CustomerId, now: DateTime<Utc>) -> DomainResult<Lead> {
        Ok(Lead {
            status: self.status.convert()?,
            customer_id: Some(customer_id),
            updated_at: now,
            ..self.clone()
        })
    }
}

impl Entity for Lead {
    type Id = LeadId;

    fn id(&self) -> LeadId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Create payload. The owner may be omitted; the caller resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct NewLead {
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(flatten)]
    pub contact: Contact,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<LeadStatus>,
}

impl NewLead {
    /// Validate and bind the resolved owner.
    pub fn into_draft(self, owner_id: UserId) -> DomainResult<LeadDraft> {
        let status = self.status.unwrap_or_default();
        if status == LeadStatus::Converted {
            return Err(DomainError::validation("a lead cannot be created as converted"));
        }
        Ok(LeadDraft {
            owner_id,
            contact: self.contact.validated()?,
            source: optional(self.source),
            notes: optional(self.notes),
            status,
        })
    }
}

/// A validated lead ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadDraft {
    pub owner_id: UserId,
    pub contact: Contact,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub status: LeadStatus,
}

/// Partial update. `None` leaves a field as it is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeadPatch {
    pub owner_id: Option<UserId>,
    pub contact: ContactPatch,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub status: Option<LeadStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lead(status: LeadStatus) -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId::new(1),
            owner_id: UserId::new(10),
            contact: Contact {
                first_name: "Jane".to_string(),
                last_name: "Doe".to_string(),
                email: Some("jane@example.com".to_string()),
                phone: None,
                company: Some("Acme".to_string()),
            },
            source: Some("web".to_string()),
            notes: None,
            status,
            customer_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn any_status() -> impl Strategy<Value = LeadStatus> {
        prop::sample::select(LeadStatus::ALL.to_vec())
    }

    #[test]
    fn open_statuses_move_freely() {
        let l = lead(LeadStatus::New);
        let patch = LeadPatch {
            status: Some(LeadStatus::Qualified),
            ..LeadPatch::default()
        };
        let updated = l.apply_update(&patch, Utc::now()).unwrap();
        assert_eq!(updated.status, LeadStatus::Qualified);

        let back = updated
            .apply_update(
                &LeadPatch {
                    status: Some(LeadStatus::New),
                    ..LeadPatch::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(back.status, LeadStatus::New);
    }

    #[test]
    fn converting_twice_reports_already_converted() {
        let l = lead(LeadStatus::Qualified);
        let converted = l.converted_into(CustomerId::new(5), Utc::now()).unwrap();
        assert_eq!(converted.status, LeadStatus::Converted);
        assert_eq!(converted.customer_id, Some(CustomerId::new(5)));

        assert_eq!(
            converted.converted_into(CustomerId::new(6), Utc::now()),
            Err(DomainError::AlreadyConverted)
        );
    }

    #[test]
    fn cannot_be_created_as_converted() {
        let new = NewLead {
            contact: lead(LeadStatus::New).contact,
            status: Some(LeadStatus::Converted),
            ..NewLead::default()
        };
        assert!(matches!(
            new.into_draft(UserId::new(1)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn failed_update_leaves_lead_untouched() {
        let l = lead(LeadStatus::Converted);
        let before = l.clone();
        let patch = LeadPatch {
            status: Some(LeadStatus::New),
            notes: Some("retry".to_string()),
            ..LeadPatch::default()
        };
        assert!(l.apply_update(&patch, Utc::now()).is_err());
        assert_eq!(l, before);
    }

    #[test]
    fn parses_lowercase_names() {
        assert_eq!("qualified".parse::<LeadStatus>().unwrap(), LeadStatus::Qualified);
        assert!("Qualified".parse::<LeadStatus>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn converted_only_reachable_through_convert(from in any_status()) {
            let result = from.transition(LeadStatus::Converted);
            prop_assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
        }

        #[test]
        fn converted_is_terminal_for_updates(requested in any_status()) {
            prop_assert!(LeadStatus::Converted.transition(requested).is_err());
        }

        #[test]
        fn convert_succeeds_exactly_when_not_yet_converted(from in any_status()) {
            let result = from.convert();
            if from == LeadStatus::Converted {
                prop_assert_eq!(result, Err(DomainError::AlreadyConverted));
            } else {
                prop_assert_eq!(result, Ok(LeadStatus::Converted));
            }
        }
    }
}
