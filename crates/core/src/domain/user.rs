use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Operator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "staff" | "user" => Ok(Self::Staff),
            "operator" => Ok(Self::Operator),
            "admin" => Ok(Self::Admin),
            other => Err(DomainError::InvariantViolation(format!("unknown role `{other}`"))),
        }
    }
}

/// A user as known to the directory. Also used as the acting identity for
/// approvals, passed explicitly into every transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub division: String,
    pub role: Role,
    pub job_title: String,
    pub phone: Option<String>,
}

pub type ActorProfile = UserProfile;

impl UserProfile {
    pub fn is_manager(&self) -> bool {
        matches!(normalize_key(&self.job_title).as_str(), "manager" | "manajer")
    }

    pub fn same_division(&self, division: &str) -> bool {
        normalize_key(&self.division) == normalize_key(division)
    }

    pub fn approver_ref(&self) -> ApproverRef {
        ApproverRef { uid: self.id.clone(), name: self.name.clone(), contact: self.phone.clone() }
    }
}

/// The approver recorded against a stage: who it was routed to, or who decided it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverRef {
    pub uid: UserId,
    pub name: String,
    pub contact: Option<String>,
}

pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
