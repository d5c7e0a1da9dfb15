use std::fmt;

use serde::Deserialize;

use super::SessionManager;

/// Whether data pages demand a signed-in session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPolicy {
    #[default]
    Required,
    /// Every page is reachable without signing in.
    Optional,
}

/// Navigation targets known to the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    NewAnalysis,
    History,
    Settings,
    AnalysisDetail(i64),
}

impl Route {
    /// Pages that read analysis data.
    pub fn reads_data(self) -> bool {
        matches!(
            self,
            Route::Dashboard | Route::NewAnalysis | Route::History | Route::AnalysisDetail(_)
        )
    }

    pub fn requires_auth(self, policy: AuthPolicy) -> bool {
        policy == AuthPolicy::Required && self.reads_data()
    }

    pub fn path(self) -> String {
        match self {
            Route::Login => "/login".to_string(),
            Route::Register => "/register".to_string(),
            Route::Dashboard => "/".to_string(),
            Route::NewAnalysis => "/new".to_string(),
            Route::History => "/history".to_string(),
            Route::Settings => "/settings".to_string(),
            Route::AnalysisDetail(id) => format!("/analysis/{id}"),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Outcome of a navigation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    RedirectTo(Route),
}

/// Decides reachability before a page fetches anything.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    session: SessionManager,
    policy: AuthPolicy,
}

impl RouteGuard {
    /// Entry point unauthenticated users are sent to.
    pub const LOGIN: Route = Route::Login;

    pub fn new(session: SessionManager, policy: AuthPolicy) -> Self {
        Self { session, policy }
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    pub fn can_enter(&self, route_requires_auth: bool) -> Access {
        if route_requires_auth && !self.session.is_authenticated() {
            Access::RedirectTo(Self::LOGIN)
        } else {
            Access::Allow
        }
    }

    pub fn check(&self, route: Route) -> Access {
        let access = self.can_enter(route.requires_auth(self.policy));
        if let Access::RedirectTo(target) = access {
            tracing::debug!(route = %route, redirect = %target, "Navigation blocked");
        }
        access
    }
}
