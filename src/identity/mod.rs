//! Identity, permissions and the client session state machine.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod authorizer;

pub use principal::{AccountStatus, Identity, Role};
pub(crate) use principal::id_from_string_or_number;
pub use session::{SessionState, SessionStore};
pub use provider::{
    mock_accounts, AuthBackend, BaasBackend, CredentialPair, LoginRequest, MockAccount, MockBackend, RestBackend,
};
pub use authorizer::{evaluate, is_field_worker, WILDCARD};
