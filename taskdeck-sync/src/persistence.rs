//! Persistence for the session and lightweight UI preferences.
//!
//! Each namespace is one JSON document under the configured directory. A
//! document that no longer parses is logged and treated as absent.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskdeck_core::User;
use tracing::warn;

pub const SESSION_FILE: &str = "session.json";
pub const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: Option<String>,
    pub user: Option<User>,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub theme: Theme,
    pub sidebar_collapsed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct PersistenceStore {
    dir: PathBuf,
}

impl PersistenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.dir.join(PREFERENCES_FILE)
    }

    pub fn load_session(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        load(&self.session_path())
    }

    pub fn save_session(&self, session: &PersistedSession) -> Result<(), PersistenceError> {
        save(&self.session_path(), session)
    }

    pub fn clear_session(&self) -> Result<(), PersistenceError> {
        remove(&self.session_path())
    }

    pub fn load_preferences(&self) -> Result<Option<Preferences>, PersistenceError> {
        load(&self.preferences_path())
    }

    pub fn save_preferences(&self, preferences: &Preferences) -> Result<(), PersistenceError> {
        save(&self.preferences_path(), preferences)
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    match serde_json::from_str::<T>(&contents) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Ignoring unreadable persisted state");
            Ok(None)
        }
    }
}

fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove(path: &Path) -> Result<(), PersistenceError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_core::UserRole;
    use taskdeck_test_utils::user;

    #[test]
    fn test_session_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path().join("nested"));
        assert_eq!(store.load_session().unwrap(), None);

        let session = PersistedSession {
            token: Some("abc".to_string()),
            user: Some(user("u1", UserRole::Admin)),
            is_authenticated: true,
        };
        store.save_session(&session).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session));

        store.clear_session().unwrap();
        assert_eq!(store.load_session().unwrap(), None);
        store.clear_session().unwrap();
    }

    #[test]
    fn test_namespaces_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        let prefs = Preferences {
            theme: Theme::Dark,
            sidebar_collapsed: true,
        };
        store.save_preferences(&prefs).unwrap();
        store.clear_session().unwrap();
        assert_eq!(store.load_preferences().unwrap(), Some(prefs));
    }

    #[test]
    fn test_corrupt_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        std::fs::write(store.session_path(), "{ not json").unwrap();
        assert_eq!(store.load_session().unwrap(), None);
    }

    #[test]
    fn test_partial_preferences_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        std::fs::write(store.preferences_path(), r#"{ "theme": "dark" }"#).unwrap();
        let prefs = store.load_preferences().unwrap().unwrap();
        assert_eq!(prefs.theme, Theme::Dark);
        assert!(!prefs.sidebar_collapsed);
    }
}
