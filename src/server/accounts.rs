use argon2::{Algorithm, Argon2, Params, Version};
use parking_lot::RwLock;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::identity::{mock_accounts, Identity, Role};

struct Account {
    identity: Identity,
    password_hash: String,
}

/// Development accounts with argon2 password hashes.
pub struct AccountBook {
    accounts: RwLock<Vec<Account>>,
}

/// Low-cost parameters: these hashes guard local fixtures, not real users.
fn hasher() -> AppResult<Argon2<'static>> {
    let params = Params::new(4096, 1, 1, None).map_err(|e| AppError::internal("argon2_params", e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AppError::internal("salt", e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AppError::internal("salt", e.to_string()))?;
    let phc = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash_password", e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

impl AccountBook {
    /// The mock accounts, with their development passwords hashed.
    pub fn seeded() -> AppResult<Self> {
        let mut accounts = Vec::new();
        for a in mock_accounts() {
            let mut identity = a.identity.clone();
            identity.organization_id = Some(crate::seed::ORGANIZATION_ID.to_string());
            accounts.push(Account { identity, password_hash: hash_password(a.password)? });
        }
        Ok(Self { accounts: RwLock::new(accounts) })
    }

    /// Identity for a matching email/password of an active account.
    pub fn authenticate(&self, email: &str, password: &str) -> Option<Identity> {
        let email = email.trim();
        let accounts = self.accounts.read();
        let acct = accounts.iter().find(|a| a.identity.email.eq_ignore_ascii_case(email))?;
        if !acct.identity.is_active() || !verify_password(&acct.password_hash, password) {
            return None;
        }
        Some(acct.identity.clone())
    }

    pub fn get(&self, user_id: &str) -> Option<Identity> {
        self.accounts.read().iter().find(|a| a.identity.id == user_id).map(|a| a.identity.clone())
    }

    pub fn list(&self) -> Vec<Identity> { self.accounts.read().iter().map(|a| a.identity.clone()).collect() }

    /// Administrative role change; clients see it on their next identity lookup.
    pub fn grant(&self, user_id: &str, role: Role, permissions: &[&str]) -> AppResult<Identity> {
        let mut accounts = self.accounts.write();
        let acct = accounts
            .iter_mut()
            .find(|a| a.identity.id == user_id)
            .ok_or_else(|| AppError::not_found("user_not_found", "User not found"))?;
        acct.identity.role = role;
        acct.identity.permissions = permissions.iter().map(|p| p.to_string()).collect();
        Ok(acct.identity.clone())
    }

    /// Apply the self-editable profile fields. Role, permissions and email are not editable here.
    pub fn update_profile(&self, user_id: &str, updates: &Map<String, Value>) -> AppResult<Identity> {
        let mut accounts = self.accounts.write();
        let acct = accounts
            .iter_mut()
            .find(|a| a.identity.id == user_id)
            .ok_or_else(|| AppError::not_found("user_not_found", "User not found"))?;
        for (k, v) in updates {
            let text = match v {
                Value::Null => None,
                Value::String(s) => Some(s.trim().to_string()),
                other => return Err(AppError::user("invalid_field", format!("{}: expected a string, got {}", k, other))),
            };
            match k.as_str() {
                "name" => match text {
                    Some(n) if !n.is_empty() => acct.identity.name = n,
                    _ => return Err(AppError::user("name_required", "name: This field may not be blank.")),
                },
                "avatar" | "avatar_url" => acct.identity.avatar = text,
                "ward" => acct.identity.ward = text,
                "constituency" => acct.identity.constituency = text,
                "role" | "permissions" | "email" | "is_super_admin" | "status" => {
                    return Err(AppError::forbidden("read_only_field", format!("{} cannot be changed through the profile", k)));
                }
                _ => {}
            }
        }
        Ok(acct.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn seeded_accounts_verify_against_hashes() {
        let book = AccountBook::seeded().unwrap();
        let id = book.authenticate("ANALYST@tvk.com", "analyst123").unwrap();
        assert_eq!(id.role, Role::Analyst);
        assert!(book.authenticate("analyst@tvk.com", "analyst124").is_none());
        assert!(book.authenticate("nobody@tvk.com", "analyst123").is_none());
        assert_eq!(book.list().len(), 5);
    }

    #[test]
    fn profile_updates_are_limited() {
        let book = AccountBook::seeded().unwrap();
        let mut m = Map::new();
        m.insert("name".into(), Value::String("Ward Worker".into()));
        m.insert("ward".into(), Value::String("Ward 7".into()));
        let id = book.update_profile("4", &m).unwrap();
        assert_eq!(id.name, "Ward Worker");
        assert_eq!(book.get("4").unwrap().ward.as_deref(), Some("Ward 7"));

        let mut bad = Map::new();
        bad.insert("role".into(), Value::String("admin".into()));
        assert!(matches!(book.update_profile("4", &bad), Err(AppError::Forbidden { .. })));
        assert!(matches!(book.update_profile("99", &Map::new()), Err(AppError::NotFound { .. })));
    }
}
