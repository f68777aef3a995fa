use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Role carried in the caller's access token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Rider => "rider",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rider" | "user" => Ok(Role::Rider),
            "driver" => Ok(Role::Driver),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The authenticated caller. Authentication happens upstream; services only
/// authorize against this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Driver or admin role, regardless of trip ownership.
    pub fn can_drive(&self) -> bool {
        matches!(self.role, Role::Driver | Role::Admin)
    }

    /// True when the caller is `owner_id` or an admin.
    pub fn owns_or_admin(&self, owner_id: Uuid) -> bool {
        self.id == owner_id || self.is_admin()
    }
}
