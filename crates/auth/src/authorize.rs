use serde::Serialize;
use thiserror::Error;

use forgecrm_core::UserId;

use crate::{Actor, Operation, Permission, ResourceType, Role};

// ─────────────────────────────────────────────────────────────────────────────
// Targets & decisions
// ─────────────────────────────────────────────────────────────────────────────

/// The per-record facts the ownership predicates look at.
///
/// Callers build this from the loaded record (or the create payload) before
/// asking for a decision; the evaluator never touches storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// No specific record: listings, and creates without ownership fields.
    None,
    /// A lead about to be created; `owner_id` is the owner the caller asked for.
    NewLead { owner_id: Option<UserId> },
    Lead { owner_id: UserId },
    Customer,
    Ticket { assigned_to: Option<UserId> },
    Task { assigned_to: UserId },
    User { id: UserId },
    ApiKey { owner_id: UserId },
}

impl Target {
    fn owner(&self) -> Option<UserId> {
        match self {
            Target::NewLead { owner_id } => *owner_id,
            Target::Lead { owner_id } | Target::ApiKey { owner_id } => Some(*owner_id),
            _ => None,
        }
    }

    fn assignee(&self) -> Option<UserId> {
        match self {
            Target::Ticket { assigned_to } => *assigned_to,
            Target::Task { assigned_to } => Some(*assigned_to),
            _ => None,
        }
    }

    fn user(&self) -> Option<UserId> {
        match self {
            Target::User { id } => Some(*id),
            _ => None,
        }
    }
}

/// Why a request was refused (as opposed to hidden).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Forbidden,
    /// Admin created a lead without naming its owner.
    LeadOwnerRequired,
    SelfDeletionForbidden,
    /// The operation does not exist for this resource (e.g. converting a ticket).
    UnsupportedOperation,
}

/// Outcome of a policy evaluation. Every input yields exactly one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(DenyReason),
    /// The actor must not learn whether the record exists.
    NotFound,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self, permission: Permission) -> Result<(), AuthzError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::NotFound => Err(AuthzError::NotFound),
            Decision::Deny(DenyReason::Forbidden) => {
                Err(AuthzError::Forbidden(permission.to_string()))
            }
            Decision::Deny(DenyReason::LeadOwnerRequired) => Err(AuthzError::LeadOwnerRequired),
            Decision::Deny(DenyReason::SelfDeletionForbidden) => {
                Err(AuthzError::SelfDeletionForbidden)
            }
            Decision::Deny(DenyReason::UnsupportedOperation) => {
                Err(AuthzError::UnsupportedOperation(permission.to_string()))
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: '{0}' not permitted")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("owner_id is required when an admin creates a lead")]
    LeadOwnerRequired,

    #[error("users cannot delete their own account")]
    SelfDeletionForbidden,

    #[error("unsupported operation '{0}'")]
    UnsupportedOperation(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy table
// ─────────────────────────────────────────────────────────────────────────────

/// What to answer when an ownership predicate fails.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mismatch {
    /// Answer `NotFound`: the record's existence is not revealed.
    Hide,
    Forbid,
}

/// One cell of the policy table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Allow,
    Forbid,
    /// The role never sees any record of this type.
    Hidden,
    /// Allowed when the record's owner is the actor.
    Owner(Mismatch),
    /// Allowed when the record is assigned to the actor.
    Assignee,
    /// Allowed on the actor's own user record only.
    OwnProfile,
    /// Lead creation where an omitted owner means "me"; naming someone else is refused.
    OwnerDefaultsToSelf,
    /// Lead creation where the owner must be named explicitly.
    ExplicitOwner,
}

/// The rules for one `(role, resource)` pair, one per operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRow {
    pub list: Rule,
    pub get: Rule,
    pub create: Rule,
    pub update: Rule,
    pub delete: Rule,
    pub convert: Rule,
}

impl RuleRow {
    const fn uniform(rule: Rule) -> Self {
        Self {
            list: rule,
            get: rule,
            create: rule,
            update: rule,
            delete: rule,
            convert: rule,
        }
    }

    pub fn rule(&self, operation: Operation) -> Rule {
        match operation {
            Operation::List => self.list,
            Operation::Get => self.get,
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
            Operation::Convert => self.convert,
        }
    }
}

use Rule::{Allow, Assignee, ExplicitOwner, Forbid, Hidden, OwnProfile, Owner, OwnerDefaultsToSelf};

const ALLOW_ALL: RuleRow = RuleRow::uniform(Allow);
const HIDDEN: RuleRow = RuleRow::uniform(Hidden);

const OWN_PROFILE: RuleRow = RuleRow {
    list: Forbid,
    get: OwnProfile,
    create: Forbid,
    update: OwnProfile,
    delete: Forbid,
    convert: Forbid,
};

const OWN_API_KEYS: RuleRow = RuleRow {
    list: Allow,
    get: Owner(Mismatch::Forbid),
    create: Owner(Mismatch::Forbid),
    update: Forbid,
    delete: Owner(Mismatch::Forbid),
    convert: Forbid,
};

const ASSIGNED_TASKS: RuleRow = RuleRow {
    list: Allow,
    get: Assignee,
    create: Allow,
    update: Assignee,
    delete: Forbid,
    convert: Forbid,
};

/// The policy table: `(role, resource) -> rules per operation`.
///
/// Exhaustive over both enums. The global rules in [`evaluate`] (unsupported
/// `convert`, self-deletion) run before this table is consulted.
pub fn rule_for(role: Role, resource: ResourceType) -> RuleRow {
    match (role, resource) {
        (Role::Admin, ResourceType::Lead) => RuleRow {
            create: ExplicitOwner,
            ..ALLOW_ALL
        },
        (Role::Admin, _) => ALLOW_ALL,

        (Role::Sales, ResourceType::Lead) => RuleRow {
            list: Allow,
            get: Owner(Mismatch::Hide),
            create: OwnerDefaultsToSelf,
            update: Owner(Mismatch::Hide),
            delete: Owner(Mismatch::Hide),
            convert: Owner(Mismatch::Forbid),
        },
        (Role::Sales, ResourceType::Customer) => RuleRow {
            delete: Forbid,
            ..ALLOW_ALL
        },
        (Role::Sales, ResourceType::Ticket) => HIDDEN,

        (Role::Support, ResourceType::Lead) => HIDDEN,
        (Role::Support, ResourceType::Customer) => RuleRow {
            list: Allow,
            get: Allow,
            create: Forbid,
            update: Allow,
            delete: Forbid,
            convert: Forbid,
        },
        (Role::Support, ResourceType::Ticket) => RuleRow {
            list: Allow,
            get: Assignee,
            create: Allow,
            update: Assignee,
            delete: Forbid,
            convert: Forbid,
        },

        (Role::Sales | Role::Support, ResourceType::Task) => ASSIGNED_TASKS,
        (Role::Sales | Role::Support, ResourceType::ApiKey) => OWN_API_KEYS,

        (_, ResourceType::User) => OWN_PROFILE,
        (Role::Customer, _) => HIDDEN,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluation
// ─────────────────────────────────────────────────────────────────────────────

/// Decide whether `actor` may perform `operation` on `resource` for `target`.
///
/// - No IO
/// - No panics
/// - Total: every input combination yields exactly one decision
pub fn evaluate(
    actor: &Actor,
    resource: ResourceType,
    operation: Operation,
    target: &Target,
) -> Decision {
    if operation == Operation::Convert && resource != ResourceType::Lead {
        return Decision::Deny(DenyReason::UnsupportedOperation);
    }

    if resource == ResourceType::User
        && operation == Operation::Delete
        && target.user() == Some(actor.id)
    {
        return Decision::Deny(DenyReason::SelfDeletionForbidden);
    }

    let rule = rule_for(actor.role, resource).rule(operation);
    apply_rule(rule, actor, operation, target)
}

fn apply_rule(rule: Rule, actor: &Actor, operation: Operation, target: &Target) -> Decision {
    let forbidden = Decision::Deny(DenyReason::Forbidden);
    match rule {
        Rule::Allow => Decision::Allow,
        Rule::Forbid => forbidden,
        Rule::Hidden if operation.is_record_level() => Decision::NotFound,
        Rule::Hidden => forbidden,
        Rule::Owner(mismatch) => {
            if target.owner() == Some(actor.id) {
                Decision::Allow
            } else {
                match mismatch {
                    Mismatch::Hide => Decision::NotFound,
                    Mismatch::Forbid => forbidden,
                }
            }
        }
        Rule::Assignee if target.assignee() == Some(actor.id) => Decision::Allow,
        Rule::Assignee => forbidden,
        Rule::OwnProfile if target.user() == Some(actor.id) => Decision::Allow,
        Rule::OwnProfile => forbidden,
        Rule::OwnerDefaultsToSelf => match target.owner() {
            None => Decision::Allow,
            Some(owner) if owner == actor.id => Decision::Allow,
            Some(_) => forbidden,
        },
        Rule::ExplicitOwner if target.owner().is_some() => Decision::Allow,
        Rule::ExplicitOwner => Decision::Deny(DenyReason::LeadOwnerRequired),
    }
}

/// Evaluate and convert the decision into a `Result` for `?`-style callers.
pub fn authorize(
    actor: &Actor,
    resource: ResourceType,
    operation: Operation,
    target: &Target,
) -> Result<(), AuthzError> {
    let permission = Permission::new(resource, operation);
    let decision = evaluate(actor, resource, operation, target);
    if !decision.is_allowed() {
        tracing::debug!(
            actor_id = %actor.id,
            role = %actor.role,
            permission = %permission,
            decision = ?decision,
            "authorization denied"
        );
    }
    decision.into_result(permission)
}

/// Filter a listing query must apply for an actor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "user_id", rename_all = "snake_case")]
pub enum ListScope {
    All,
    OwnedBy(UserId),
    AssignedTo(UserId),
}

impl ListScope {
    /// Whether a record with the given owner/assignee belongs in the listing.
    pub fn admits(&self, owner: Option<UserId>, assignee: Option<UserId>) -> bool {
        match self {
            ListScope::All => true,
            ListScope::OwnedBy(id) => owner == Some(*id),
            ListScope::AssignedTo(id) => assignee == Some(*id),
        }
    }
}

/// Derive the listing filter from the table, so a listing never shows a
/// record the same actor could not fetch individually.
pub fn list_scope(actor: &Actor, resource: ResourceType) -> Result<ListScope, AuthzError> {
    authorize(actor, resource, Operation::List, &Target::None)?;

    let row = rule_for(actor.role, resource);
    match row.get {
        Rule::Allow | Rule::ExplicitOwner | Rule::OwnerDefaultsToSelf => Ok(ListScope::All),
        Rule::Owner(_) | Rule::OwnProfile => Ok(ListScope::OwnedBy(actor.id)),
        Rule::Assignee => Ok(ListScope::AssignedTo(actor.id)),
        Rule::Forbid | Rule::Hidden => Err(AuthzError::Forbidden(
            Permission::new(resource, Operation::List).to_string(),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
///
/// This structure provides transparent, debuggable information about why
/// a request was allowed or denied.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    /// The permission that was being checked, e.g. `"lead.update"`.
    pub permission: String,

    pub granted: bool,

    pub decision: Decision,

    /// The table cell that produced the decision.
    pub rule: Rule,

    pub actor: Actor,

    /// Human-readable reason for the decision.
    pub reason: String,

    pub suggestions: Vec<String>,
}

/// Explain why an authorization decision was made (or would be made).
pub fn explain(
    actor: &Actor,
    resource: ResourceType,
    operation: Operation,
    target: &Target,
) -> AuthorizationExplanation {
    let permission = Permission::new(resource, operation);
    let rule = rule_for(actor.role, resource).rule(operation);
    let decision = evaluate(actor, resource, operation, target);

    let (reason, suggestions) = match decision {
        Decision::Allow => (
            match rule {
                Rule::Allow | Rule::ExplicitOwner => {
                    format!("role '{}' is granted '{}'", actor.role, permission)
                }
                Rule::Owner(_) | Rule::OwnerDefaultsToSelf => {
                    format!("actor {} owns the record", actor.id)
                }
                Rule::Assignee => format!("record is assigned to actor {}", actor.id),
                Rule::OwnProfile => "actor is acting on their own profile".to_string(),
                Rule::Forbid | Rule::Hidden => format!("rule {rule:?} does not grant access"),
            },
            Vec::new(),
        ),
        Decision::NotFound => (
            format!(
                "role '{}' cannot see this {} record; existence is not disclosed",
                actor.role,
                resource.as_str()
            ),
            Vec::new(),
        ),
        Decision::Deny(DenyReason::SelfDeletionForbidden) => (
            "an actor may never delete their own user record".to_string(),
            vec!["Ask another administrator to delete this account".to_string()],
        ),
        Decision::Deny(DenyReason::UnsupportedOperation) => (
            format!("'{}' is not an operation on {} records", operation.as_str(), resource.as_str()),
            Vec::new(),
        ),
        Decision::Deny(DenyReason::LeadOwnerRequired) => (
            "admins must name the owner when creating a lead".to_string(),
            vec!["Provide owner_id in the request".to_string()],
        ),
        Decision::Deny(DenyReason::Forbidden) => {
            let mut suggestions = Vec::new();
            match rule {
                Rule::Owner(_) | Rule::OwnerDefaultsToSelf => {
                    suggestions.push("Only the record owner or an admin may do this".to_string())
                }
                Rule::Assignee => suggestions
                    .push("Assign the record to this actor, or act as an admin".to_string()),
                Rule::OwnProfile => {
                    suggestions.push("Non-admin roles may only act on their own profile".to_string())
                }
                _ => {
                    let granting: Vec<&str> = Role::ALL
                        .iter()
                        .filter(|r| rule_for(**r, resource).rule(operation) != Rule::Forbid)
                        .filter(|r| rule_for(**r, resource).rule(operation) != Rule::Hidden)
                        .map(|r| r.as_str())
                        .collect();
                    suggestions.push(format!("Roles that may '{}': {:?}", permission, granting));
                }
            }
            (
                format!("role '{}' is not permitted '{}' on this record", actor.role, permission),
                suggestions,
            )
        }
    };

    AuthorizationExplanation {
        permission: permission.to_string(),
        granted: decision.is_allowed(),
        decision,
        rule,
        actor: *actor,
        reason,
        suggestions,
    }
}

/// One cell of the policy matrix (for audit/display).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PolicyCell {
    pub role: Role,
    pub resource: ResourceType,
    pub operation: Operation,
    pub rule: Rule,
}

/// Every `(role, resource, operation)` cell of the policy table.
pub fn policy_matrix() -> Vec<PolicyCell> {
    let mut cells = Vec::with_capacity(Role::ALL.len() * ResourceType::ALL.len() * Operation::ALL.len());
    for role in Role::ALL {
        for resource in ResourceType::ALL {
            let row = rule_for(role, resource);
            for operation in Operation::ALL {
                cells.push(PolicyCell {
                    role,
                    resource,
                    operation,
                    rule: row.rule(operation),
                });
            }
        }
    }
    cells
}
