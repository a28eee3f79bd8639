use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::RwLock;

use crate::tprintln;

/// Opaque 256-bit token, base64url without padding.
fn gen_token() -> String {
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

#[derive(Debug, Clone)]
struct AccessGrant {
    user_id: String,
    expires_at: Instant,
}

/// Access/refresh tokens issued by the local backend. Both surfaces share
/// one issuer, so a gateway token also works against the table API.
pub struct TokenIssuer {
    pub access_ttl: Duration,
    access: RwLock<HashMap<String, AccessGrant>>,
    /// refresh token -> user id
    refresh: RwLock<HashMap<String, String>>,
    exchanges: AtomicUsize,
}

impl Default for TokenIssuer {
    fn default() -> Self { Self::new(Duration::from_secs(15 * 60)) }
}

impl TokenIssuer {
    pub fn new(access_ttl: Duration) -> Self {
        Self {
            access_ttl,
            access: RwLock::new(HashMap::new()),
            refresh: RwLock::new(HashMap::new()),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// Issues a new access token and drops every expired grant.
    pub fn issue_access(&self, user_id: &str) -> String {
        let token = gen_token();
        let now = Instant::now();
        let grant = AccessGrant { user_id: user_id.to_string(), expires_at: now + self.access_ttl };
        let mut access = self.access.write();
        access.retain(|_, g| g.expires_at > now);
        access.insert(token.clone(), grant);
        token
    }

    /// New access + refresh pair.
    pub fn issue(&self, user_id: &str) -> (String, String) {
        let access = self.issue_access(user_id);
        let refresh = gen_token();
        self.refresh.write().insert(refresh.clone(), user_id.to_string());
        tprintln!("tokens.issue user={} ttl_secs={}", user_id, self.access_ttl.as_secs());
        (access, refresh)
    }

    /// User id behind a live access token. Expired grants are dropped on sight.
    pub fn validate_access(&self, token: &str) -> Option<String> {
        let now = Instant::now();
        let found = self.access.read().get(token).cloned();
        match found {
            Some(g) if g.expires_at > now => Some(g.user_id),
            Some(_) => {
                self.access.write().remove(token);
                None
            }
            None => None,
        }
    }

    /// Exchange a refresh token for a new access token. With `rotate` the
    /// refresh token is consumed and a replacement is returned.
    pub fn exchange(&self, refresh: &str, rotate: bool) -> Option<(String, Option<String>)> {
        let user_id = if rotate {
            self.refresh.write().remove(refresh)?
        } else {
            self.refresh.read().get(refresh).cloned()?
        };
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if rotate {
            let (access, next) = self.issue(&user_id);
            Some((access, Some(next)))
        } else {
            Some((self.issue_access(&user_id), None))
        }
    }

    /// Successful refresh exchanges since start.
    pub fn exchange_count(&self) -> usize { self.exchanges.load(Ordering::SeqCst) }

    /// Live access grants.
    pub fn access_len(&self) -> usize { self.access.read().len() }

    pub fn revoke_refresh(&self, refresh: &str) -> bool { self.refresh.write().remove(refresh).is_some() }

    /// Sign a user out everywhere.
    pub fn revoke_user(&self, user_id: &str) {
        self.refresh.write().retain(|_, u| u != user_id);
        self.access.write().retain(|_, g| g.user_id != user_id);
    }

    /// Invalidate every access token while keeping refresh tokens usable.
    pub fn expire_access(&self) {
        let n = {
            let mut m = self.access.write();
            let n = m.len();
            m.clear();
            n
        };
        tprintln!("tokens.expire_access dropped={}", n);
    }

    pub fn revoke_all(&self) {
        self.access.write().clear();
        self.refresh.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_validate_and_expire() {
        let t = TokenIssuer::default();
        let (a, r) = t.issue("4");
        assert_ne!(a, r);
        assert_eq!(t.validate_access(&a).as_deref(), Some("4"));
        t.expire_access();
        assert!(t.validate_access(&a).is_none());
        let (a2, same) = t.exchange(&r, false).unwrap();
        assert!(same.is_none());
        assert_eq!(t.validate_access(&a2).as_deref(), Some("4"));
    }

    #[test]
    fn rotation_consumes_the_old_refresh() {
        let t = TokenIssuer::default();
        let (_, r) = t.issue("1");
        let (_, next) = t.exchange(&r, true).unwrap();
        assert!(t.exchange(&r, true).is_none());
        assert!(t.exchange(&next.unwrap(), true).is_some());
    }

    #[test]
    fn zero_ttl_tokens_are_dead_on_arrival() {
        let t = TokenIssuer::new(Duration::ZERO);
        let a = t.issue_access("2");
        assert!(t.validate_access(&a).is_none());
    }

    #[test]
    fn expired_grants_are_pruned_on_issue() {
        let t = TokenIssuer::new(Duration::ZERO);
        for _ in 0..5 {
            t.issue_access("2");
        }
        // every earlier grant was already expired when the next one was issued
        assert_eq!(t.access_len(), 1);
    }

    #[test]
    fn exchanges_are_counted() {
        let t = TokenIssuer::default();
        let (_, r) = t.issue("4");
        assert_eq!(t.exchange_count(), 0);
        assert!(t.exchange("unknown", false).is_none());
        t.exchange(&r, false);
        t.exchange(&r, false);
        assert_eq!(t.exchange_count(), 2);
    }

    #[test]
    fn revoke_user_drops_both_kinds() {
        let t = TokenIssuer::default();
        let (a, r) = t.issue("3");
        let (b, _) = t.issue("5");
        t.revoke_user("3");
        assert!(t.validate_access(&a).is_none());
        assert!(t.exchange(&r, false).is_none());
        assert!(t.validate_access(&b).is_some());
    }
}
