use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Fixed role set shared by the gateway, the BaaS user metadata and the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Superadmin,
    Admin,
    Manager,
    Analyst,
    User,
    Viewer,
    Volunteer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Analyst => "analyst",
            Role::User => "user",
            Role::Viewer => "viewer",
            Role::Volunteer => "volunteer",
        }
    }

    pub fn is_admin_or_above(&self) -> bool { matches!(self, Role::Admin | Role::Superadmin) }

    pub fn is_manager_or_above(&self) -> bool { self.is_admin_or_above() || *self == Role::Manager }

    pub fn is_analyst_or_above(&self) -> bool { self.is_manager_or_above() || *self == Role::Analyst }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

/// The resolved, authenticated user held by the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub is_super_admin: bool,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub constituency: Option<String>,
    #[serde(default, alias = "avatar_url")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: AccountStatus,
}

impl Identity {
    pub fn is_active(&self) -> bool { self.status == AccountStatus::Active }
}

/// The gateway serializes primary keys as integers; the BaaS uses UUID strings.
pub(crate) fn id_from_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {}", other))),
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_profile_shape_deserializes() {
        let v = serde_json::json!({
            "id": 42,
            "name": "District Manager",
            "email": "manager@tvk.com",
            "role": "manager",
            "permissions": null,
            "avatar_url": "https://cdn/x.png",
            "constituency": "Coimbatore South"
        });
        let id: Identity = serde_json::from_value(v).unwrap();
        assert_eq!(id.id, "42");
        assert_eq!(id.role, Role::Manager);
        assert!(id.permissions.is_empty());
        assert_eq!(id.avatar.as_deref(), Some("https://cdn/x.png"));
        assert_eq!(id.status, AccountStatus::Active);
        assert!(id.is_active());
    }

    #[test]
    fn role_hierarchy() {
        assert!(Role::Superadmin.is_admin_or_above());
        assert!(!Role::Manager.is_admin_or_above());
        assert!(Role::Manager.is_manager_or_above());
        assert!(Role::Analyst.is_analyst_or_above());
        assert!(!Role::Volunteer.is_analyst_or_above());
        assert!(!Role::Viewer.is_analyst_or_above());
    }
}
