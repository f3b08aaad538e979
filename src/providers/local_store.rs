//! Local `SQLite` storage for provider keys

use rusqlite::OptionalExtension;
use secrecy::SecretString;

use super::CredentialStore;
use crate::db::DbPool;
use crate::{Error, Result};

/// Provider keys persisted in the local database
pub struct LocalKeyStore {
    db: DbPool,
}

impl LocalKeyStore {
    /// Create a new local key store backed by the given pool
    #[must_use]
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<crate::db::DbConn> {
        self.db.get().map_err(|e| Error::Database(e.to_string()))
    }
}

impl CredentialStore for LocalKeyStore {
    fn get(&self, provider: &str) -> Result<Option<SecretString>> {
        let key = self
            .conn()?
            .query_row(
                "SELECT api_key FROM provider_keys WHERE provider = ?1",
                [provider],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(key.map(SecretString::from))
    }

    fn set(&self, provider: &str, api_key: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO provider_keys (provider, api_key, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(provider) DO UPDATE SET
                api_key = excluded.api_key,
                updated_at = excluded.updated_at",
            [provider, api_key],
        )?;
        tracing::info!(provider, "stored provider key");
        Ok(())
    }

    fn remove(&self, provider: &str) -> Result<()> {
        let removed = self
            .conn()?
            .execute("DELETE FROM provider_keys WHERE provider = ?1", [provider])?;
        if removed > 0 {
            tracing::info!(provider, "removed provider key");
        }
        Ok(())
    }

    fn list_configured(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT provider FROM provider_keys ORDER BY provider")?;
        let providers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn test_db() -> DbPool {
        crate::db::init_memory().unwrap()
    }

    #[test]
    fn set_and_get_key() {
        let store = LocalKeyStore::new(test_db());
        store.set("elevenlabs", "xi-test").unwrap();
        let key = store.get("elevenlabs").unwrap();
        assert_eq!(key.unwrap().expose_secret(), "xi-test");
    }

    #[test]
    fn set_replaces_existing_key() {
        let store = LocalKeyStore::new(test_db());
        store.set("openai", "old").unwrap();
        store.set("openai", "new").unwrap();
        assert_eq!(store.get("openai").unwrap().unwrap().expose_secret(), "new");
    }

    #[test]
    fn remove_key() {
        let store = LocalKeyStore::new(test_db());
        store.set("openai", "sk-openai-test").unwrap();
        store.remove("openai").unwrap();
        assert!(store.get("openai").unwrap().is_none());
        assert!(!store.contains("openai"));
    }

    #[test]
    fn list_configured_providers() {
        let store = LocalKeyStore::new(test_db());
        store.set("google", "g-test").unwrap();
        store.set("deepgram", "dg-test").unwrap();
        assert_eq!(
            store.list_configured().unwrap(),
            vec!["deepgram".to_string(), "google".to_string()]
        );
    }
}
