//! Top-level composition of session, gateway, cache, guard and theme.
//!
//! Every backend operation the front end performs goes through
//! [`Dashboard`]. It checks the route guard before any request, reads
//! through the shared [`ResultCache`], invalidates after mutations, and is
//! the single place where an `Unauthorized` classification ends the session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::api::{
    Analysis, AnalysisCreate, DashboardStats, GatewayError, LoginCredentials, RegisterData,
    RequestGateway, TokenResponse, User, DEFAULT_LIMIT, DEFAULT_SKIP,
};
use crate::cache::{CacheKey, CacheState, CachedResource, ResultCache};
use crate::config::Config;
use crate::session::{Access, Route, RouteGuard, SessionManager, SessionToken};
use crate::storage::Database;
use crate::theme::{SystemColorScheme, ThemeController};
use crate::util::{validate_post_url, PostUrlError, SubmissionForm};

/// Collection name for analysis records in cache keys.
pub const ANALYSES: &str = "analyses";
/// Collection name for the signed-in user.
pub const USER: &str = "user";

// ============================================================================
// Error Types
// ============================================================================

/// What callers of [`Dashboard`] see when an operation fails.
///
/// `Gateway` never carries `Unauthorized`; that becomes `SignInRequired`.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Sign in required")]
    SignInRequired { redirect: Route },

    #[error(transparent)]
    Invalid(#[from] PostUrlError),

    #[error(transparent)]
    Gateway(GatewayError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

// ============================================================================
// Cached values
// ============================================================================

/// Backend records as they sit in the cache.
#[derive(Debug, Clone)]
pub enum Resource {
    Analyses(Arc<Vec<Analysis>>),
    Analysis(Arc<Analysis>),
    User(Arc<User>),
}

impl Resource {
    fn into_analyses(self) -> Option<Arc<Vec<Analysis>>> {
        match self {
            Resource::Analyses(list) => Some(list),
            _ => None,
        }
    }

    fn into_analysis(self) -> Option<Arc<Analysis>> {
        match self {
            Resource::Analysis(analysis) => Some(analysis),
            _ => None,
        }
    }

    fn into_user(self) -> Option<Arc<User>> {
        match self {
            Resource::User(user) => Some(user),
            _ => None,
        }
    }
}

/// A value read through the cache, with how current it is.
///
/// `error` is set when a refresh failed and `value` is the last good copy.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub value: T,
    pub state: CacheState,
    pub fetched_at: Option<DateTime<Utc>>,
    pub error: Option<GatewayError>,
}

impl<T> Loaded<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loaded<U> {
        Loaded {
            value: f(self.value),
            state: self.state,
            fetched_at: self.fetched_at,
            error: self.error,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.state == CacheState::Fresh
    }
}

// ============================================================================
// Dashboard
// ============================================================================

#[derive(Clone)]
pub struct Dashboard {
    session: SessionManager,
    gateway: RequestGateway,
    cache: ResultCache<Resource>,
    guard: RouteGuard,
    theme: ThemeController,
    /// Serializes sign-in, sign-out and the sign-out triggered by
    /// concurrent `Unauthorized` results.
    session_change: Arc<Mutex<()>>,
}

impl Dashboard {
    pub fn new(
        session: SessionManager,
        gateway: RequestGateway,
        cache: ResultCache<Resource>,
        guard: RouteGuard,
        theme: ThemeController,
    ) -> Self {
        Self {
            session,
            gateway,
            cache,
            guard,
            theme,
            session_change: Arc::new(Mutex::new(())),
        }
    }

    /// Wire every component from `config` over the state database.
    pub async fn open(
        config: &Config,
        db: &Database,
        system: SystemColorScheme,
    ) -> anyhow::Result<Self> {
        let session = SessionManager::load(db).await?;
        let gateway = RequestGateway::new(
            &config.api_base_url,
            session.clone(),
            config.request_timeout(),
        )?;
        let cache = ResultCache::new(config.cache_ttl(), config.cache_capacity);
        let guard = RouteGuard::new(session.clone(), config.auth);
        let theme = ThemeController::load(db, system).await?;
        Ok(Self::new(session, gateway, cache, guard, theme))
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn cache(&self) -> &ResultCache<Resource> {
        &self.cache
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn theme(&self) -> &ThemeController {
        &self.theme
    }

    // ------------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------------

    /// Exchange credentials for a token and start a session.
    ///
    /// Cached data from any previous account is dropped.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(), DashboardError> {
        let response = self
            .gateway
            .post_json("/auth/login", credentials)
            .await
            .map_err(rejected_credentials)?;
        let token: TokenResponse = response.json().map_err(DashboardError::Gateway)?;

        let _change = self.session_change.lock().await;
        self.session
            .set_token(SessionToken::new(token.access_token))
            .await?;
        self.cache.clear();
        tracing::info!(email = %credentials.email, "Signed in");
        Ok(())
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, data: &RegisterData) -> Result<User, DashboardError> {
        let response = self
            .gateway
            .post_json("/auth/register", data)
            .await
            .map_err(rejected_credentials)?;
        let user: User = response.json().map_err(DashboardError::Gateway)?;
        tracing::info!(user_id = user.id, "Registered account");
        Ok(user)
    }

    pub async fn logout(&self) -> Result<(), DashboardError> {
        let _change = self.session_change.lock().await;
        self.session.clear().await?;
        self.cache.clear();
        Ok(())
    }

    pub async fn current_user(&self) -> Result<Loaded<Arc<User>>, DashboardError> {
        if !self.session.is_authenticated() {
            return Err(DashboardError::SignInRequired {
                redirect: RouteGuard::LOGIN,
            });
        }

        let key = CacheKey::named(USER, "me");
        let gateway = self.gateway.clone();
        let resource = self
            .cache
            .get(&key, move || async move {
                let user: User = gateway.get("/auth/me", &[]).await?.json()?;
                Ok::<_, GatewayError>(Resource::User(Arc::new(user)))
            })
            .await;
        self.settle(&key, resource, Resource::into_user).await
    }

    // ------------------------------------------------------------------------
    // Analyses
    // ------------------------------------------------------------------------

    /// One page of past analyses, newest first as the backend orders them.
    pub async fn analyses(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Loaded<Arc<Vec<Analysis>>>, DashboardError> {
        self.enter(Route::History)?;

        let key = if skip == DEFAULT_SKIP && limit == DEFAULT_LIMIT {
            CacheKey::list(ANALYSES)
        } else {
            CacheKey::list_page(ANALYSES, skip, limit)
        };
        let gateway = self.gateway.clone();
        let resource = self
            .cache
            .get(&key, move || async move {
                let query = [("skip", skip.to_string()), ("limit", limit.to_string())];
                let list: Vec<Analysis> = gateway.get("/analyses", &query).await?.json()?;
                Ok::<_, GatewayError>(Resource::Analyses(Arc::new(list)))
            })
            .await;
        self.settle(&key, resource, Resource::into_analyses).await
    }

    pub async fn analysis(&self, id: i64) -> Result<Loaded<Arc<Analysis>>, DashboardError> {
        self.enter(Route::AnalysisDetail(id))?;

        let key = CacheKey::item(ANALYSES, id);
        let gateway = self.gateway.clone();
        let resource = self
            .cache
            .get(&key, move || async move {
                let analysis: Analysis = gateway.get(&format!("/analyses/{id}"), &[]).await?.json()?;
                Ok::<_, GatewayError>(Resource::Analysis(Arc::new(analysis)))
            })
            .await;
        self.settle(&key, resource, Resource::into_analysis).await
    }

    /// Validate `raw_url` and start an analysis job.
    ///
    /// Nothing is sent for an invalid URL. On success the listing is
    /// invalidated before this returns, so the next read refetches it.
    pub async fn submit(&self, raw_url: &str) -> Result<Arc<Analysis>, DashboardError> {
        let url = validate_post_url(raw_url)?;
        self.enter(Route::NewAnalysis)?;

        let body = AnalysisCreate {
            post_url: url.into_string(),
        };
        let result = self.gateway.post_json("/analyses", &body).await;
        let response = match result {
            Ok(response) => response,
            Err(err) => return Err(self.handle_failure(err).await),
        };
        let analysis: Analysis = match response.json() {
            Ok(analysis) => analysis,
            Err(err) => return Err(self.handle_failure(err).await),
        };

        let analysis = Arc::new(analysis);
        self.cache.put(
            &CacheKey::item(ANALYSES, analysis.id),
            Resource::Analysis(Arc::clone(&analysis)),
        );
        self.cache.invalidate(&CacheKey::list(ANALYSES).to_string());
        tracing::info!(analysis_id = analysis.id, "Analysis created");
        Ok(analysis)
    }

    /// Submit the URL held by `form`, marking it pending for the duration.
    ///
    /// A successful submission clears the form; a failed one keeps the input
    /// so it can be corrected or resent.
    pub async fn submit_form(
        &self,
        form: &mut SubmissionForm,
    ) -> Result<Arc<Analysis>, DashboardError> {
        if form.is_pending() {
            return Err(DashboardError::Gateway(GatewayError::Unknown(
                "a submission is already running".to_string(),
            )));
        }
        let Some(url) = form.begin_submit() else {
            return Err(DashboardError::Invalid(
                form.warning().unwrap_or(PostUrlError::Missing),
            ));
        };

        let result = self.submit(url.as_str()).await;
        form.finish_submit(result.is_ok());
        result
    }

    /// Totals over the default page of analyses.
    pub async fn stats(&self) -> Result<Loaded<DashboardStats>, DashboardError> {
        self.enter(Route::Dashboard)?;
        let loaded = self.analyses(DEFAULT_SKIP, DEFAULT_LIMIT).await?;
        Ok(loaded.map(|list| DashboardStats::from_analyses(&list)))
    }

    // ------------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------------

    fn enter(&self, route: Route) -> Result<(), DashboardError> {
        match self.guard.check(route) {
            Access::Allow => Ok(()),
            Access::RedirectTo(redirect) => Err(DashboardError::SignInRequired { redirect }),
        }
    }

    /// Turn a gateway failure into what the caller sees.
    ///
    /// `Unauthorized` clears the session the request was sent under (once,
    /// however many requests fail together), drops every cached response and
    /// redirects to sign-in. A rejection of an earlier session leaves a newer
    /// one alone.
    pub async fn handle_failure(&self, err: GatewayError) -> DashboardError {
        let GatewayError::Unauthorized { detail, generation } = err else {
            return DashboardError::Gateway(err);
        };

        let _change = self.session_change.lock().await;
        match self.session.clear_if_current(generation).await {
            Ok(true) => {
                tracing::warn!(detail = ?detail, "Session rejected by server, signing out");
                self.cache.clear();
            }
            Ok(false) if self.session.is_authenticated() => {
                tracing::debug!(detail = ?detail, "Rejected token belongs to a previous session");
                return DashboardError::Gateway(GatewayError::Unavailable(
                    "session changed during the request".to_string(),
                ));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clear stored session");
                self.cache.clear();
            }
        }
        DashboardError::SignInRequired {
            redirect: RouteGuard::LOGIN,
        }
    }

    async fn settle<T>(
        &self,
        key: &CacheKey,
        resource: CachedResource<Resource>,
        extract: fn(Resource) -> Option<T>,
    ) -> Result<Loaded<T>, DashboardError> {
        if let Some(err @ GatewayError::Unauthorized { .. }) = resource.error {
            return Err(self.handle_failure(err).await);
        }

        match resource.value.and_then(extract) {
            Some(value) => {
                if let Some(err) = &resource.error {
                    tracing::debug!(key = %key, error = %err, "Serving cached value after failed refresh");
                }
                Ok(Loaded {
                    value,
                    state: resource.state,
                    fetched_at: resource.fetched_at,
                    error: resource.error,
                })
            }
            None => Err(match resource.error {
                Some(err) => self.handle_failure(err).await,
                None => DashboardError::Gateway(GatewayError::Unknown(format!(
                    "no value cached for {key}"
                ))),
            }),
        }
    }
}

/// Auth endpoints answer bad credentials with 401; there is no session to
/// expire, so show the server's message instead.
fn rejected_credentials(err: GatewayError) -> DashboardError {
    match err {
        GatewayError::Unauthorized { detail, .. } => DashboardError::Gateway(GatewayError::Validation {
            status: 401,
            detail: detail.unwrap_or_else(|| "Incorrect email or password".to_string()),
        }),
        other => DashboardError::Gateway(other),
    }
}

// ============================================================================
// Tests
// ============================================================================
