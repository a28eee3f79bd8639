use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::principal::{AccountStatus, Identity, Role};
use crate::config::{AuthBackendKind, Config};
use crate::error::{AppError, AppResult};
use crate::router::{read_error, read_json};
use crate::tprintln;

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub remember_me: bool,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into(), remember_me: true }
    }

    /// Client-side checks that run before any network call.
    pub fn validate(&self) -> AppResult<()> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(AppError::user("email_required", "Email is required"));
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(AppError::user("email_invalid", "Please enter a valid email address"));
        }
        if self.password.is_empty() {
            return Err(AppError::user("password_required", "Password is required"));
        }
        Ok(())
    }
}

/// Short-lived access token plus the optional longer-lived refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// One auth implementation, chosen by configuration.
pub enum AuthBackend {
    Mock(MockBackend),
    Rest(RestBackend),
    Baas(BaasBackend),
}

impl AuthBackend {
    pub fn from_config(cfg: &Config, client: reqwest::Client) -> Self {
        match cfg.auth_backend {
            AuthBackendKind::Mock => AuthBackend::Mock(MockBackend),
            AuthBackendKind::Rest => AuthBackend::Rest(RestBackend::new(cfg.api_base(), client)),
            AuthBackendKind::Baas => AuthBackend::Baas(BaasBackend::new(cfg.baas_base(), &cfg.baas_anon_key, client)),
        }
    }

    pub fn kind(&self) -> AuthBackendKind {
        match self {
            AuthBackend::Mock(_) => AuthBackendKind::Mock,
            AuthBackend::Rest(_) => AuthBackendKind::Rest,
            AuthBackend::Baas(_) => AuthBackendKind::Baas,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<CredentialPair> {
        match self {
            AuthBackend::Mock(m) => m.login(email, password),
            AuthBackend::Rest(r) => r.login(email, password).await,
            AuthBackend::Baas(b) => b.login(email, password).await,
        }
    }

    pub async fn resolve_identity(&self, access: &str) -> AppResult<Identity> {
        match self {
            AuthBackend::Mock(m) => m.resolve_identity(access),
            AuthBackend::Rest(r) => r.resolve_identity(access).await,
            AuthBackend::Baas(b) => b.resolve_identity(access).await,
        }
    }

    pub async fn refresh(&self, refresh: &str) -> AppResult<CredentialPair> {
        match self {
            AuthBackend::Mock(_) => Err(AppError::auth("refresh_unsupported", "mock sessions cannot be refreshed")),
            AuthBackend::Rest(r) => r.refresh(refresh).await,
            AuthBackend::Baas(b) => b.refresh(refresh).await,
        }
    }

    pub async fn logout(&self, creds: &CredentialPair) -> AppResult<()> {
        match self {
            AuthBackend::Mock(_) => Ok(()),
            AuthBackend::Rest(r) => r.logout(creds).await,
            AuthBackend::Baas(b) => b.logout(creds).await,
        }
    }
}

// --- Mock ---------------------------------------------------------------

pub struct MockAccount {
    pub identity: Identity,
    pub password: &'static str,
}

fn mock(id: &str, email: &str, password: &'static str, name: &str, role: Role, perms: &[&str], ward: Option<&str>, constituency: &str) -> MockAccount {
    MockAccount {
        identity: Identity {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            role,
            permissions: perms.iter().map(|p| p.to_string()).collect(),
            is_super_admin: false,
            organization_id: None,
            tenant_id: None,
            ward: ward.map(str::to_string),
            constituency: Some(constituency.into()),
            avatar: None,
            status: AccountStatus::Active,
        },
        password,
    }
}

static MOCK_ACCOUNTS: Lazy<Vec<MockAccount>> = Lazy::new(|| {
    vec![
        mock("1", "admin@tvk.com", "admin123", "TVK Admin", Role::Admin, &["*"], None, "Chennai Central"),
        mock("2", "manager@tvk.com", "manager123", "District Manager", Role::Manager, &["analytics:view", "data:manage", "reports:view"], None, "Coimbatore South"),
        mock("3", "analyst@tvk.com", "analyst123", "Data Analyst", Role::Analyst, &["analytics:view", "data:view", "reports:view"], None, "Madurai West"),
        mock("4", "user@tvk.com", "user123", "Field Worker", Role::User, &["data:view", "data:submit"], Some("Ward 42"), "Chennai Central"),
        mock("5", "volunteer@tvk.com", "volunteer123", "Campaign Volunteer", Role::Volunteer, &["data:view"], None, "Salem North"),
    ]
});

/// Development accounts known to the mock backend and seeded into the local backend.
pub fn mock_accounts() -> &'static [MockAccount] { &MOCK_ACCOUNTS }

const MOCK_TOKEN_PREFIX: &str = "mock:";

/// Frontend-only authentication against the fixed development accounts.
pub struct MockBackend;

impl MockBackend {
    fn login(&self, email: &str, password: &str) -> AppResult<CredentialPair> {
        let acct = MOCK_ACCOUNTS
            .iter()
            .find(|a| a.identity.email.eq_ignore_ascii_case(email.trim()) && a.password == password)
            .ok_or_else(|| AppError::auth("invalid_credentials", "Invalid email or password"))?;
        tprintln!("auth.mock.login user={} role={}", acct.identity.email, acct.identity.role);
        Ok(CredentialPair { access: format!("{}{}", MOCK_TOKEN_PREFIX, acct.identity.id), refresh: None })
    }

    fn resolve_identity(&self, access: &str) -> AppResult<Identity> {
        let id = access
            .strip_prefix(MOCK_TOKEN_PREFIX)
            .ok_or_else(|| AppError::auth("invalid_token", "not a mock session token"))?;
        MOCK_ACCOUNTS
            .iter()
            .find(|a| a.identity.id == id)
            .map(|a| a.identity.clone())
            .ok_or_else(|| AppError::auth("invalid_token", "unknown mock user"))
    }
}

// --- REST gateway -------------------------------------------------------

#[derive(Deserialize)]
struct GatewayTokens {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// JWT auth served by the REST gateway under `/api/auth/`.
pub struct RestBackend {
    base: String,
    client: reqwest::Client,
}

impl RestBackend {
    pub fn new(base: &str, client: reqwest::Client) -> Self {
        Self { base: base.trim_end_matches('/').to_string(), client }
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base, path) }

    async fn login(&self, email: &str, password: &str) -> AppResult<CredentialPair> {
        let resp = self.client
            .post(self.url("/api/auth/login/"))
            .json(&serde_json::json!({"email": email.trim(), "password": password}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }
        let t: GatewayTokens = read_json(resp).await?;
        Ok(CredentialPair { access: t.access, refresh: t.refresh })
    }

    async fn resolve_identity(&self, access: &str) -> AppResult<Identity> {
        let resp = self.client.get(self.url("/api/auth/profile/")).bearer_auth(access).send().await?;
        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }
        read_json(resp).await
    }

    async fn refresh(&self, refresh: &str) -> AppResult<CredentialPair> {
        let resp = self.client
            .post(self.url("/api/auth/refresh/"))
            .json(&serde_json::json!({"refresh": refresh}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }
        let t: GatewayTokens = read_json(resp).await?;
        // Without rotation the gateway only returns a new access token.
        Ok(CredentialPair { access: t.access, refresh: t.refresh.or_else(|| Some(refresh.to_string())) })
    }

    async fn logout(&self, creds: &CredentialPair) -> AppResult<()> {
        let Some(refresh) = creds.refresh.as_deref() else { return Ok(()); };
        let resp = self.client
            .post(self.url("/api/auth/logout/"))
            .bearer_auth(&creds.access)
            .json(&serde_json::json!({"refresh": refresh}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }
        Ok(())
    }
}

// --- Managed BaaS -------------------------------------------------------

#[derive(Deserialize)]
struct BaasTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct BaasUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Map<String, serde_json::Value>,
}

impl BaasUser {
    /// Role and organization live in user metadata so row policies can read them from the JWT.
    fn into_identity(self) -> AppResult<Identity> {
        let meta = &self.user_metadata;
        let s = |k: &str| meta.get(k).and_then(|v| v.as_str()).map(str::to_string);
        let email = self.email.or_else(|| s("email")).unwrap_or_default();
        let role = match meta.get("role") {
            Some(v) => serde_json::from_value::<Role>(v.clone())
                .map_err(|_| AppError::auth("unknown_role", format!("unrecognised role {}", v)))?,
            None => Role::User,
        };
        let status = meta
            .get("status")
            .and_then(|v| serde_json::from_value::<AccountStatus>(v.clone()).ok())
            .unwrap_or_default();
        let permissions = meta
            .get("permissions")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|p| p.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let name = s("name")
            .or_else(|| s("full_name"))
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        Ok(Identity {
            id: self.id,
            name,
            email,
            role,
            permissions,
            is_super_admin: meta.get("is_super_admin").and_then(|v| v.as_bool()).unwrap_or(false),
            organization_id: s("organization_id"),
            tenant_id: s("tenant_id"),
            ward: s("ward"),
            constituency: s("constituency"),
            avatar: s("avatar_url"),
            status,
        })
    }
}

/// Hosted auth (`/auth/v1`) of the managed backend.
pub struct BaasBackend {
    base: String,
    anon_key: String,
    client: reqwest::Client,
}

impl BaasBackend {
    pub fn new(base: &str, anon_key: &str, client: reqwest::Client) -> Self {
        Self { base: base.trim_end_matches('/').to_string(), anon_key: anon_key.to_string(), client }
    }

    async fn token_grant(&self, grant: &str, body: serde_json::Value) -> AppResult<CredentialPair> {
        let resp = self.client
            .post(format!("{}/auth/v1/token", self.base))
            .query(&[("grant_type", grant)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }
        let t: BaasTokens = read_json(resp).await?;
        Ok(CredentialPair { access: t.access_token, refresh: t.refresh_token })
    }

    async fn login(&self, email: &str, password: &str) -> AppResult<CredentialPair> {
        self.token_grant("password", serde_json::json!({"email": email.trim(), "password": password})).await
    }

    async fn refresh(&self, refresh: &str) -> AppResult<CredentialPair> {
        self.token_grant("refresh_token", serde_json::json!({"refresh_token": refresh})).await
    }

    async fn resolve_identity(&self, access: &str) -> AppResult<Identity> {
        let resp = self.client
            .get(format!("{}/auth/v1/user", self.base))
            .header("apikey", &self.anon_key)
            .bearer_auth(access)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }
        let user: BaasUser = read_json(resp).await?;
        debug!(target: "pulse::auth", "baas user resolved id={}", user.id);
        user.into_identity()
    }

    async fn logout(&self, creds: &CredentialPair) -> AppResult<()> {
        let resp = self.client
            .post(format!("{}/auth/v1/logout", self.base))
            .header("apikey", &self.anon_key)
            .bearer_auth(&creds.access)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_validation() {
        assert!(LoginRequest::new("admin@tvk.com", "admin123").validate().is_ok());
        assert!(matches!(LoginRequest::new("  ", "x").validate(), Err(AppError::UserInput { .. })));
        assert!(matches!(LoginRequest::new("admin", "x").validate(), Err(AppError::UserInput { .. })));
        assert!(matches!(LoginRequest::new("admin@tvk.com", "").validate(), Err(AppError::UserInput { .. })));
    }

    #[test]
    fn mock_login_and_resolve() {
        let m = MockBackend;
        let creds = m.login("Manager@TVK.com", "manager123").unwrap();
        assert_eq!(creds.access, "mock:2");
        assert_eq!(creds.refresh, None);
        let id = m.resolve_identity(&creds.access).unwrap();
        assert_eq!(id.role, Role::Manager);
        assert_eq!(id.email, "manager@tvk.com");

        assert!(m.login("admin@tvk.com", "wrongpass").unwrap_err().is_auth());
        assert!(m.resolve_identity("mock:99").is_err());
        assert!(m.resolve_identity("eyJhbGciOi").is_err());
    }

    #[test]
    fn baas_metadata_maps_to_identity() {
        let user: BaasUser = serde_json::from_value(serde_json::json!({
            "id": "5f0c6a1e-1111-2222-3333-444455556666",
            "email": "analyst@tvk.com",
            "user_metadata": {
                "full_name": "Data Analyst",
                "role": "analyst",
                "organization_id": "11111111-1111-1111-1111-111111111111",
                "permissions": ["analytics:view", 3]
            }
        })).unwrap();
        let id = user.into_identity().unwrap();
        assert_eq!(id.name, "Data Analyst");
        assert_eq!(id.role, Role::Analyst);
        assert_eq!(id.permissions, vec!["analytics:view".to_string()]);
        assert_eq!(id.organization_id.as_deref(), Some("11111111-1111-1111-1111-111111111111"));
    }

    #[test]
    fn baas_unknown_role_is_rejected() {
        let user: BaasUser = serde_json::from_value(serde_json::json!({
            "id": "u1", "email": "x@y.z", "user_metadata": {"role": "emperor"}
        })).unwrap();
        assert!(user.into_identity().is_err());
    }
}
