use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD_MD5: &str = "password_md5";
pub const KEY_SCROBBLE_ENABLED: &str = "scrobble_enabled";
pub const KEY_SUBMIT_CACHE: &str = "submit_cache";

/// String-keyed persistent store backed by a single JSON object file.
///
/// Mutations stay in memory until [`Prefs::save`] is called. A store
/// without a path never touches the disk.
#[derive(Debug, Default)]
pub struct Prefs {
    path: Option<PathBuf>,
    values: Map<String, Value>,
}

impl Prefs {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed reading prefs at {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed parsing prefs at {}", path.display()))?
        } else {
            Map::new()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            values,
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns `None` for absent keys and for values of the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                log::warn!("Ignoring unreadable preference {key}: {err}");
                None
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed serializing preference {key}"))?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed creating prefs directory {}", parent.display())
            })?;
        }
        let serialized =
            serde_json::to_string_pretty(&self.values).context("Failed serializing prefs")?;
        fs::write(path, format!("{serialized}\n"))
            .with_context(|| format!("Failed writing prefs at {}", path.display()))?;
        Ok(())
    }

    pub fn username(&self) -> String {
        self.get_or(KEY_USERNAME, String::new())
    }

    pub fn password_md5(&self) -> String {
        self.get_or(KEY_PASSWORD_MD5, String::new())
    }

    pub fn scrobble_enabled(&self) -> bool {
        self.get_or(KEY_SCROBBLE_ENABLED, true)
    }

    pub fn set_username(&mut self, username: &str) -> Result<()> {
        self.set(KEY_USERNAME, &username)?;
        self.save()
    }

    /// Stores only the md5 digest of `password`.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        let password_md5 = format!("{:x}", md5::compute(password));
        self.set(KEY_PASSWORD_MD5, &password_md5)?;
        self.save()
    }

    pub fn set_scrobble_enabled(&mut self, enabled: bool) -> Result<()> {
        self.set(KEY_SCROBBLE_ENABLED, &enabled)?;
        self.save()
    }

    pub fn clear_credentials(&mut self) -> Result<()> {
        self.remove(KEY_USERNAME);
        self.remove(KEY_PASSWORD_MD5);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let mut prefs = Prefs::load(&path).unwrap();
        prefs.set_username("alice").unwrap();
        prefs.set_password("hunter2").unwrap();
        prefs.set_scrobble_enabled(false).unwrap();

        let reloaded = Prefs::load(&path).unwrap();
        assert_eq!(reloaded.username(), "alice");
        assert_eq!(
            reloaded.password_md5(),
            format!("{:x}", md5::compute("hunter2"))
        );
        assert!(!reloaded.scrobble_enabled());
    }

    #[test]
    fn set_without_save_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let mut prefs = Prefs::load(&path).unwrap();
        prefs.set("volume", &7).unwrap();
        assert!(prefs.has("volume"));
        assert!(!path.exists());
    }

    #[test]
    fn wrong_shape_reads_as_absent() {
        let mut prefs = Prefs::in_memory();
        prefs.set(KEY_SCROBBLE_ENABLED, &"yes").unwrap();
        assert!(prefs.scrobble_enabled());
        assert_eq!(prefs.get::<bool>(KEY_SCROBBLE_ENABLED), None);
    }

    #[test]
    fn clearing_credentials_keeps_other_keys() {
        let mut prefs = Prefs::in_memory();
        prefs.set_username("bob").unwrap();
        prefs.set_password("pw").unwrap();
        prefs.set_scrobble_enabled(false).unwrap();
        prefs.clear_credentials().unwrap();
        assert_eq!(prefs.username(), "");
        assert_eq!(prefs.password_md5(), "");
        assert!(prefs.has(KEY_SCROBBLE_ENABLED));
    }
}
