//! Repository settings and repository key validation.
//!
//! Settings are plain serde structs so they can be embedded in a larger
//! application config or loaded on their own from TOML:
//!
//! ```toml
//! repository_path = "/var/lib/app/data"
//! on_corrupt = "fail"
//! pretty = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Characters that are forbidden anywhere in a repository key.
const FORBIDDEN_KEY_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// What a read or flush does when the backing file is not a JSON array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptPolicy {
    /// Log a warning and treat the collection as empty. A following flush
    /// overwrites the corrupt file.
    #[default]
    TreatAsEmpty,
    /// Fail with [`StoreError::Corrupt`] and leave the file untouched.
    Fail,
}

/// Settings consumed by [`EntityStore`](crate::EntityStore).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    /// Root directory holding one `<key>.json` file per entity type.
    /// Required; stores refuse to open without it.
    pub repository_path: Option<PathBuf>,
    /// Handling of malformed backing files.
    pub on_corrupt: CorruptPolicy,
    /// Write indented JSON instead of the compact form.
    pub pretty: bool,
}

impl RepositorySettings {
    /// Settings rooted at `repository_path` with default policies.
    pub fn new(repository_path: impl Into<PathBuf>) -> Self {
        Self {
            repository_path: Some(repository_path.into()),
            ..Default::default()
        }
    }

    /// Replace the corrupt-file policy.
    pub fn with_corrupt_policy(mut self, policy: CorruptPolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    /// Enable or disable indented output.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::SettingsParse(e.to_string()))
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// The configured root directory, or a configuration error if unset.
    pub fn require_repository_path(&self) -> StoreResult<&Path> {
        match self.repository_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(StoreError::Config(
                "repository_path is required but was not set".into(),
            )),
        }
    }
}

/// Validate a repository key, returning `Ok(())` if it is usable as a file
/// stem inside the repository directory.
///
/// # Examples
///
/// ```
/// use jsonrepo_store::settings::validate_key;
///
/// assert!(validate_key("users").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key("../escape").is_err());
/// ```
pub fn validate_key(key: &str) -> StoreResult<()> {
    let invalid = |reason: String| StoreError::Config(format!("invalid repository key {key:?}: {reason}"));

    if key.trim().is_empty() {
        return Err(invalid("key must not be empty".into()));
    }
    if let Some(ch) = key.chars().find(|c| FORBIDDEN_KEY_CHARS.contains(c)) {
        return Err(invalid(format!("contains forbidden character {ch:?}")));
    }
    if key.contains("..") {
        return Err(invalid("must not contain '..'".into()));
    }
    if key.starts_with('.') {
        return Err(invalid("must not start with '.'".into()));
    }
    Ok(())
}
