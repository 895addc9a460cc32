use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::entity::Author;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Moderator,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Moderator => write!(f, "moderator"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The party performing an operation, as resolved by the host.
pub trait Identity {
    fn is_anonymous(&self) -> bool;
    fn has_role(&self, role: Role) -> bool;
    fn author(&self) -> Author;
}

/// Plain identity record built from request data.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Option<i64>,
    pub name: Option<String>,
    pub ip: String,
    pub roles: BTreeSet<Role>,
}

impl Caller {
    pub fn anonymous(ip: &str) -> Self {
        Self {
            user_id: None,
            name: None,
            ip: ip.to_string(),
            roles: BTreeSet::new(),
        }
    }

    pub fn user(id: i64, name: &str) -> Self {
        Self {
            user_id: Some(id).filter(|id| *id > 0),
            name: Some(name.to_string()),
            ip: "127.0.0.1".to_string(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }
}

impl Identity for Caller {
    fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    // Admins can do everything moderators can.
    fn has_role(&self, role: Role) -> bool {
        if self.is_anonymous() {
            return false;
        }
        match role {
            Role::Moderator => {
                self.roles.contains(&Role::Moderator) || self.roles.contains(&Role::Admin)
            }
            Role::Admin => self.roles.contains(&Role::Admin),
        }
    }

    fn author(&self) -> Author {
        match self.user_id {
            Some(id) => Author {
                id,
                name: self.name.clone().unwrap_or_else(|| format!("user-{}", id)),
            },
            None => Author {
                id: 0,
                name: self.ip.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedAction {
    NewThread,
    NewReply,
}

/// Anti-abuse pre-check (CAPTCHA or similar) owned by the host.
pub trait AntiAbuseGate {
    fn permits(&self, who: &dyn Identity, action: GatedAction) -> bool;
}

/// Gate that lets everything through.
pub struct OpenGate;

impl AntiAbuseGate for OpenGate {
    fn permits(&self, _who: &dyn Identity, _action: GatedAction) -> bool {
        true
    }
}
