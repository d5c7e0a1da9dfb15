use anyhow::{Context, Result};

use super::schema::Database;

impl Database {
    // ========================================================================
    // User Preferences Operations
    // ========================================================================

    /// Stored value for `key` (`session.token`, `theme`), if any.
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM user_preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read preference '{key}'"))
    }

    /// Insert or replace the value for `key`, stamping `updated_at`.
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store preference '{key}'"))?;

        Ok(())
    }

    /// Remove a preference. Returns `true` if a row was deleted.
    pub async fn delete_preference(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove preference '{key}'"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_preference_missing() {
        let db = test_db().await;
        let value = db.get_preference("nonexistent.key").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_set_and_get_preference() {
        let db = test_db().await;
        db.set_preference("theme", "dark").await.unwrap();

        let value = db.get_preference("theme").await.unwrap();
        assert_eq!(value, Some("dark".to_string()));
    }

    #[tokio::test]
    async fn test_set_preference_upsert() {
        let db = test_db().await;
        db.set_preference("theme", "dark").await.unwrap();
        db.set_preference("theme", "light").await.unwrap();

        let value = db.get_preference("theme").await.unwrap();
        assert_eq!(value, Some("light".to_string()));
    }

    #[tokio::test]
    async fn test_delete_preference() {
        let db = test_db().await;
        db.set_preference("session.token", "abc").await.unwrap();

        assert!(db.delete_preference("session.token").await.unwrap());
        assert_eq!(db.get_preference("session.token").await.unwrap(), None);

        // Deleting again is a no-op
        assert!(!db.delete_preference("session.token").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let db = test_db().await;
        db.set_preference("session.token", "abc").await.unwrap();
        db.set_preference("theme", "system").await.unwrap();

        db.delete_preference("session.token").await.unwrap();
        assert_eq!(
            db.get_preference("theme").await.unwrap().as_deref(),
            Some("system")
        );
    }
}
