//! Analysis backend access.
//!
//! - [`gateway`] - HTTP transport, token attachment and failure classification
//! - [`types`] - wire shapes of the records the backend returns

mod gateway;
mod types;

pub use gateway::{ApiResponse, GatewayError, GatewaySetupError, RequestGateway};
pub use types::{
    Analysis, AnalysisCreate, Comment, DashboardStats, LoginCredentials, RegisterData, Sentiment,
    User,
};
pub(crate) use types::TokenResponse;

/// Default page for `GET /analyses`.
pub const DEFAULT_SKIP: u32 = 0;
pub const DEFAULT_LIMIT: u32 = 50;
