//! Authentication state and navigation protection.
//!
//! - [`SessionManager`] owns the persisted bearer token
//! - [`RouteGuard`] decides, synchronously and before any fetch, whether a
//!   page may be entered

mod guard;
mod manager;

pub use guard::{Access, AuthPolicy, Route, RouteGuard};
pub use manager::{SessionEvent, SessionManager, SessionToken, TOKEN_KEY};
