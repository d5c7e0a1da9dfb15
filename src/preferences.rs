//! Typed, persisted client settings.
//!
//! A [`PersistentPreference`] owns one key in the `user_preferences` table.
//! Reads are served from memory; writes go to the store first and only then
//! replace the in-memory value, so a reload always observes what the last
//! successful write reported.
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;

use crate::storage::Database;

// ============================================================================
// PreferenceValue
// ============================================================================

/// Conversion between a setting and its stored string form.
pub trait PreferenceValue: Sized {
    fn encode(&self) -> String;

    /// Parse a stored value. `None` means the stored text is unusable and the
    /// preference is treated as unset.
    fn decode(raw: &str) -> Option<Self>;
}

impl PreferenceValue for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

// ============================================================================
// PersistentPreference
// ============================================================================

/// One persisted setting. Cloning shares the same in-memory slot.
pub struct PersistentPreference<T> {
    key: &'static str,
    db: Database,
    current: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for PersistentPreference<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            db: self.db.clone(),
            current: Arc::clone(&self.current),
        }
    }
}

impl<T> fmt::Debug for PersistentPreference<T> {
    // Values may be secrets; only the key is shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentPreference")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<T: PreferenceValue + Clone> PersistentPreference<T> {
    /// Load the stored value for `key`.
    ///
    /// A value that fails to decode is logged and treated as unset; it is
    /// left in the store until the next write replaces it.
    pub async fn load(db: &Database, key: &'static str) -> Result<Self> {
        let raw = db.get_preference(key).await?;
        let value = match raw.as_deref() {
            Some(raw) => {
                let decoded = T::decode(raw);
                if decoded.is_none() {
                    tracing::warn!(key = key, "Ignoring unreadable stored preference");
                }
                decoded
            }
            None => None,
        };

        Ok(Self {
            key,
            db: db.clone(),
            current: Arc::new(RwLock::new(value)),
        })
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Current value, if set.
    pub fn get(&self) -> Option<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Persist `value`, then make it current.
    pub async fn set(&self, value: T) -> Result<()> {
        self.db.set_preference(self.key, &value.encode()).await?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }

    /// Remove the stored value, then unset it in memory.
    pub async fn clear(&self) -> Result<()> {
        self.db.delete_preference(self.key).await?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Size {
        Small,
        Large,
    }

    impl PreferenceValue for Size {
        fn encode(&self) -> String {
            match self {
                Size::Small => "small".to_string(),
                Size::Large => "large".to_string(),
            }
        }

        fn decode(raw: &str) -> Option<Self> {
            match raw {
                "small" => Some(Size::Small),
                "large" => Some(Size::Large),
                _ => None,
            }
        }
    }

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_unset() {
        let db = test_db().await;
        let pref = PersistentPreference::<Size>::load(&db, "size").await.unwrap();
        assert_eq!(pref.get(), None);
        assert!(!pref.is_set());
    }

    #[tokio::test]
    async fn test_set_is_visible_after_reload() {
        let db = test_db().await;
        let pref = PersistentPreference::<Size>::load(&db, "size").await.unwrap();
        pref.set(Size::Large).await.unwrap();
        assert_eq!(pref.get(), Some(Size::Large));

        let reloaded = PersistentPreference::<Size>::load(&db, "size").await.unwrap();
        assert_eq!(reloaded.get(), Some(Size::Large));
    }

    #[tokio::test]
    async fn test_clear_removes_stored_value() {
        let db = test_db().await;
        let pref = PersistentPreference::<Size>::load(&db, "size").await.unwrap();
        pref.set(Size::Small).await.unwrap();
        pref.clear().await.unwrap();
        assert_eq!(pref.get(), None);

        let reloaded = PersistentPreference::<Size>::load(&db, "size").await.unwrap();
        assert_eq!(reloaded.get(), None);
    }

    #[tokio::test]
    async fn test_undecodable_value_treated_as_unset() {
        let db = test_db().await;
        db.set_preference("size", "enormous").await.unwrap();

        let pref = PersistentPreference::<Size>::load(&db, "size").await.unwrap();
        assert_eq!(pref.get(), None);
    }

    #[tokio::test]
    async fn test_clones_share_value() {
        let db = test_db().await;
        let pref = PersistentPreference::<String>::load(&db, "name").await.unwrap();
        let other = pref.clone();

        pref.set("alice".to_string()).await.unwrap();
        assert_eq!(other.get().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_debug_hides_value() {
        let db = test_db().await;
        let pref = PersistentPreference::<String>::load(&db, "secret").await.unwrap();
        pref.set("hunter2".to_string()).await.unwrap();

        let debug_output = format!("{:?}", pref);
        assert!(debug_output.contains("secret"));
        assert!(!debug_output.contains("hunter2"));
    }
}
