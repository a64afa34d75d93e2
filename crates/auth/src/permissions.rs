use serde::{Deserialize, Serialize};

/// Kind of record an operation targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    User,
    Lead,
    Customer,
    Ticket,
    Task,
    ApiKey,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::User,
        ResourceType::Lead,
        ResourceType::Customer,
        ResourceType::Ticket,
        ResourceType::Task,
        ResourceType::ApiKey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::User => "user",
            ResourceType::Lead => "lead",
            ResourceType::Customer => "customer",
            ResourceType::Ticket => "ticket",
            ResourceType::Task => "task",
            ResourceType::ApiKey => "api_key",
        }
    }
}

/// Operation requested on a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
    /// Lead → customer conversion. Meaningless on any other resource.
    Convert,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::Convert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Convert => "convert",
        }
    }

    /// Operations addressed at one existing record (as opposed to a collection).
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            Operation::Get | Operation::Update | Operation::Delete | Operation::Convert
        )
    }
}

/// A `(resource, operation)` pair, rendered as `"lead.update"` in logs and
/// audit output.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: ResourceType,
    pub operation: Operation,
}

impl Permission {
    pub fn new(resource: ResourceType, operation: Operation) -> Self {
        Self {
            resource,
            operation,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.resource.as_str(), self.operation.as_str())
    }
}
