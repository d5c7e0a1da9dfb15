use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;

use crate::preferences::{PersistentPreference, PreferenceValue};
use crate::storage::Database;

/// Preference key holding the bearer token.
pub const TOKEN_KEY: &str = "session.token";

// ============================================================================
// SessionToken
// ============================================================================

/// Bearer token issued by `POST /auth/login`.
///
/// Debug output is redacted so the token never reaches logs.
pub struct SessionToken(SecretString);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for SessionToken {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

impl PreferenceValue for SessionToken {
    fn encode(&self) -> String {
        self.expose().to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        (!raw.is_empty()).then(|| Self::new(raw))
    }
}

// ============================================================================
// SessionManager
// ============================================================================

/// Session transitions, broadcast to anyone holding [`SessionManager::events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
}

/// Owns the authentication token.
///
/// Token presence is the only client-side authorization signal; validity is
/// decided by the backend, whose `Unauthorized` responses lead to [`clear`].
///
/// [`clear`]: SessionManager::clear
#[derive(Clone)]
pub struct SessionManager {
    token: PersistentPreference<SessionToken>,
    /// Bumped after every sign-in and sign-out.
    generation: Arc<AtomicU64>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Restore the session persisted in `db`, if any.
    pub async fn load(db: &Database) -> Result<Self> {
        let token: PersistentPreference<SessionToken> =
            PersistentPreference::load(db, TOKEN_KEY).await?;
        let (events, _) = broadcast::channel(16);
        if token.is_set() {
            tracing::debug!("Restored persisted session");
        }
        Ok(Self {
            token,
            generation: Arc::new(AtomicU64::new(0)),
            events,
        })
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.token.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_set()
    }

    /// Identifies the current session. Read it before the token so a
    /// request is never attributed to a session newer than its token.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store a new token. Persisted before this returns.
    pub async fn set_token(&self, token: SessionToken) -> Result<()> {
        self.token.set(token).await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Session started");
        let _ = self.events.send(SessionEvent::SignedIn);
        Ok(())
    }

    /// Forget the token. Persisted before this returns.
    pub async fn clear(&self) -> Result<()> {
        self.token.clear().await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Session cleared");
        let _ = self.events.send(SessionEvent::SignedOut);
        Ok(())
    }

    /// Clear the session only while it is still the one `generation` names.
    ///
    /// Returns `false` when there is no session or a different one has
    /// started since.
    pub async fn clear_if_current(&self, generation: u64) -> Result<bool> {
        if !self.is_authenticated() || self.generation() != generation {
            return Ok(false);
        }
        self.clear().await?;
        Ok(true)
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_session() -> (Database, SessionManager) {
        let db = Database::open(":memory:").await.unwrap();
        let session = SessionManager::load(&db).await.unwrap();
        (db, session)
    }

    #[tokio::test]
    async fn test_new_session_is_anonymous() {
        let (_db, session) = test_session().await;
        assert!(!session.is_authenticated());
        assert!(session.token().is_none());
    }

    #[tokio::test]
    async fn test_set_token_persists_across_reload() {
        let (db, session) = test_session().await;
        session.set_token(SessionToken::new("tok-1")).await.unwrap();
        assert!(session.is_authenticated());

        let restored = SessionManager::load(&db).await.unwrap();
        assert!(restored.is_authenticated());
        assert_eq!(restored.token().unwrap().expose(), "tok-1");
    }

    #[tokio::test]
    async fn test_clear_persists_across_reload() {
        let (db, session) = test_session().await;
        session.set_token(SessionToken::new("tok-1")).await.unwrap();
        session.clear().await.unwrap();
        assert!(!session.is_authenticated());

        let restored = SessionManager::load(&db).await.unwrap();
        assert!(!restored.is_authenticated());
    }

    #[tokio::test]
    async fn test_events_follow_transitions() {
        let (_db, session) = test_session().await;
        let mut events = session.events();

        session.set_token(SessionToken::new("tok")).await.unwrap();
        session.clear().await.unwrap();

        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_if_current_spares_newer_session() {
        let (_db, session) = test_session().await;
        session.set_token(SessionToken::new("old")).await.unwrap();
        let old = session.generation();

        session.set_token(SessionToken::new("new")).await.unwrap();
        assert!(!session.clear_if_current(old).await.unwrap());
        assert_eq!(session.token().unwrap().expose(), "new");

        let current = session.generation();
        assert!(session.clear_if_current(current).await.unwrap());
        assert!(!session.is_authenticated());
        assert!(!session.clear_if_current(session.generation()).await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_stored_token_is_ignored() {
        let db = Database::open(":memory:").await.unwrap();
        db.set_preference(TOKEN_KEY, "   ").await.unwrap();

        let session = SessionManager::load(&db).await.unwrap();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = SessionToken::new("super-secret");
        let debug_output = format!("{:?}", token);
        assert!(!debug_output.contains("super-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
