use super::principal::{Identity, Role};

/// Sentinel permission entry meaning "everything is granted".
pub const WILDCARD: &str = "*";

/// Decide whether `identity` holds `permission`.
///
/// Rules are ordered and short-circuit: no identity denies; super-admin flag,
/// admin/superadmin role and a wildcard entry each allow everything before any
/// membership test runs.
pub fn evaluate(identity: Option<&Identity>, permission: &str) -> bool {
    let Some(id) = identity else { return false; };
    if id.is_super_admin {
        return true;
    }
    if id.role.is_admin_or_above() {
        return true;
    }
    if id.permissions.iter().any(|p| p == WILDCARD) {
        return true;
    }
    id.permissions.iter().any(|p| p == permission)
}

/// Field workers are a closed role set; permissions play no part.
pub fn is_field_worker(identity: Option<&Identity>) -> bool {
    matches!(identity.map(|i| i.role), Some(Role::Volunteer) | Some(Role::User))
}
