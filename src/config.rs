//! Environment-driven configuration shared by the library and the binaries.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_AUTOSAVE_SECS: u64 = 30;

/// Which auth implementation backs the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBackendKind {
    Mock,
    Rest,
    Baas,
}

impl FromStr for AuthBackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(AuthBackendKind::Mock),
            "rest" | "django" | "gateway" => Ok(AuthBackendKind::Rest),
            "baas" | "supabase" => Ok(AuthBackendKind::Baas),
            other => Err(AppError::user("invalid_auth_backend", format!("unknown auth backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway base URL; resource paths are appended as `/api/...`.
    pub api_url: String,
    /// BaaS project URL (`/rest/v1`, `/auth/v1`, `/realtime/v1` live under it).
    /// Falls back to `api_url` when unset, which is how the local backend is served.
    pub baas_url: Option<String>,
    pub baas_anon_key: String,
    pub auth_backend: AuthBackendKind,
    /// Directory holding the persisted key/value state of CLI sessions.
    pub state_dir: PathBuf,
    pub http_port: u16,
    pub autosave_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            baas_url: None,
            baas_anon_key: "local-anon-key".to_string(),
            auth_backend: AuthBackendKind::Rest,
            state_dir: PathBuf::from(".pulse"),
            http_port: DEFAULT_HTTP_PORT,
            autosave_interval: Duration::from_secs(DEFAULT_AUTOSAVE_SECS),
        }
    }
}

impl Config {
    /// Read `PULSE_*` variables, keeping defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, AppError> {
        let mut cfg = Config::default();
        if let Ok(v) = std::env::var("PULSE_API_URL") { cfg.api_url = v; }
        if let Ok(v) = std::env::var("PULSE_BAAS_URL") { if !v.trim().is_empty() { cfg.baas_url = Some(v); } }
        if let Ok(v) = std::env::var("PULSE_BAAS_ANON_KEY") { cfg.baas_anon_key = v; }
        if let Ok(v) = std::env::var("PULSE_AUTH_BACKEND") { cfg.auth_backend = v.parse()?; }
        if let Ok(v) = std::env::var("PULSE_STATE_DIR") { cfg.state_dir = PathBuf::from(v); }
        if let Ok(v) = std::env::var("PULSE_HTTP_PORT") {
            match v.parse::<u16>() {
                Ok(p) => cfg.http_port = p,
                Err(_) => tracing::warn!(target: "pulse::config", "ignoring invalid PULSE_HTTP_PORT='{}'", v),
            }
        }
        if let Ok(v) = std::env::var("PULSE_AUTOSAVE_SECS") {
            match v.parse::<u64>() {
                Ok(s) if s > 0 => cfg.autosave_interval = Duration::from_secs(s),
                _ => tracing::warn!(target: "pulse::config", "ignoring invalid PULSE_AUTOSAVE_SECS='{}'", v),
            }
        }
        Ok(cfg)
    }

    /// Config pointing both surfaces at one base URL (the local backend serves both).
    pub fn local(base: &str, auth_backend: AuthBackendKind) -> Self {
        Self { api_url: base.trim_end_matches('/').to_string(), auth_backend, ..Default::default() }
    }

    pub fn baas_base(&self) -> &str {
        self.baas_url.as_deref().unwrap_or(&self.api_url).trim_end_matches('/')
    }

    pub fn api_base(&self) -> &str { self.api_url.trim_end_matches('/') }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("mock".parse::<AuthBackendKind>().unwrap(), AuthBackendKind::Mock);
        assert_eq!(" Django ".parse::<AuthBackendKind>().unwrap(), AuthBackendKind::Rest);
        assert_eq!("supabase".parse::<AuthBackendKind>().unwrap(), AuthBackendKind::Baas);
        assert!("ldap".parse::<AuthBackendKind>().is_err());
    }

    #[test]
    fn baas_falls_back_to_api_url() {
        let cfg = Config::local("http://127.0.0.1:9999/", AuthBackendKind::Rest);
        assert_eq!(cfg.api_base(), "http://127.0.0.1:9999");
        assert_eq!(cfg.baas_base(), "http://127.0.0.1:9999");
        let cfg2 = Config { baas_url: Some("https://x.supabase.co/".into()), ..cfg };
        assert_eq!(cfg2.baas_base(), "https://x.supabase.co");
    }
}
