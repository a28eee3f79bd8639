pub mod error;
pub mod config;
pub mod storage;
pub mod identity;
pub mod model;
pub mod router;
pub mod survey;
pub mod autosave;
pub mod seed;
pub mod server;
pub mod cli;

// Debug printing helper: prints in tests and debug builds, absent otherwise.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, keep the format checks but emit nothing.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}

pub use config::Config;
pub use error::{AppError, AppResult};
pub use identity::{Identity, LoginRequest, Role, SessionState, SessionStore};
pub use router::DataRouter;
