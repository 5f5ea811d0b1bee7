//! Client state repository
//!
//! A small key-value surface over the state database. Two keys matter to the
//! rest of the crate: `speech_enabled` (persisted `"true"`/`"false"`, unset
//! means enabled) and `user_id` (minted once, then stable).

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

use super::StorePool;
use crate::{Error, Result};

/// Key for the persisted speech preference
pub const KEY_SPEECH_ENABLED: &str = "speech_enabled";

/// Key for the persistent user identity token
pub const KEY_USER_ID: &str = "user_id";

/// A stored state entry
#[derive(Debug, Clone)]
pub struct StateEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Client state repository
#[derive(Clone)]
pub struct StateRepo {
    pool: StorePool,
}

impl StateRepo {
    /// Create a new state repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    /// Get a raw state value
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let value = conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .ok();

        Ok(value)
    }

    /// Get a state entry with its last-updated timestamp
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn entry(&self, key: &str) -> Result<Option<StateEntry>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let entry = conn
            .query_row(
                "SELECT key, value, updated_at FROM client_state WHERE key = ?1",
                [key],
                |row| {
                    Ok(StateEntry {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        updated_at: parse_datetime(&row.get::<_, String>(2)?),
                    })
                },
            )
            .ok();

        Ok(entry)
    }

    /// Set a state value, creating or replacing it
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO client_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value, &now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Read the speech preference
    ///
    /// Unset defaults to enabled; only a stored `"false"` disables speech,
    /// matching the original client's reading of its persisted flag.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn speech_enabled(&self) -> Result<bool> {
        Ok(self
            .get(KEY_SPEECH_ENABLED)?
            .is_none_or(|v| v != "false"))
    }

    /// Persist the speech preference
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_speech_enabled(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "true" } else { "false" };
        self.set(KEY_SPEECH_ENABLED, value)?;
        tracing::debug!(enabled, "speech preference persisted");
        Ok(())
    }

    /// Get the persistent user identity, minting one on first use
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn user_id(&self) -> Result<String> {
        if let Some(id) = self.get(KEY_USER_ID)? {
            return Ok(id);
        }

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let id = format!("user_{token}");

        self.set(KEY_USER_ID, &id)?;
        tracing::info!(user_id = %id, "minted user identity");
        Ok(id)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init_memory;

    fn setup() -> StateRepo {
        let pool = init_memory().unwrap();
        StateRepo::new(pool)
    }

    #[test]
    fn test_get_unset_key() {
        let repo = setup();
        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_set_then_get() {
        let repo = setup();
        repo.set("greeting", "hello").unwrap();
        assert_eq!(repo.get("greeting").unwrap().as_deref(), Some("hello"));

        // Replace
        repo.set("greeting", "goodbye").unwrap();
        assert_eq!(repo.get("greeting").unwrap().as_deref(), Some("goodbye"));
    }

    #[test]
    fn test_speech_defaults_true() {
        let repo = setup();
        assert!(repo.speech_enabled().unwrap());
    }

    #[test]
    fn test_speech_toggle_persists() {
        let repo = setup();

        repo.set_speech_enabled(false).unwrap();
        assert!(!repo.speech_enabled().unwrap());
        assert_eq!(
            repo.get(KEY_SPEECH_ENABLED).unwrap().as_deref(),
            Some("false")
        );

        repo.set_speech_enabled(true).unwrap();
        assert!(repo.speech_enabled().unwrap());
        assert_eq!(
            repo.get(KEY_SPEECH_ENABLED).unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn test_unknown_preference_value_reads_enabled() {
        let repo = setup();
        repo.set(KEY_SPEECH_ENABLED, "maybe").unwrap();
        assert!(repo.speech_enabled().unwrap());
    }

    #[test]
    fn test_user_id_minted_once() {
        let repo = setup();

        let first = repo.user_id().unwrap();
        assert!(first.starts_with("user_"));
        assert_eq!(first.len(), "user_".len() + 16);

        let second = repo.user_id().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_entry_carries_timestamp() {
        let repo = setup();
        repo.set("k", "v").unwrap();

        let entry = repo.entry("k").unwrap().unwrap();
        assert_eq!(entry.key, "k");
        assert_eq!(entry.value, "v");
        // Parsed, not the fallback epoch
        assert!(entry.updated_at <= Utc::now());
    }
}
