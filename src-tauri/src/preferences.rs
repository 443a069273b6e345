use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{OrgListError, OrgListResult};

pub(crate) const PREFERENCES_FILE_NAME: &str = "org-preferences.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgPreferences {
    #[serde(default)]
    favorite_orgs: BTreeSet<String>,
    #[serde(default)]
    hidden_orgs: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

pub(crate) fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn normalize_username(username: &str) -> OrgListResult<String> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(OrgListError::InvalidInput(
            "username must be a non-empty string.".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

impl OrgPreferences {
    pub fn is_favorite(&self, username: &str) -> bool {
        self.favorite_orgs.contains(username.trim())
    }

    pub fn is_hidden(&self, username: &str) -> bool {
        self.hidden_orgs.contains(username.trim())
    }

    pub fn favorites(&self) -> impl Iterator<Item = &str> {
        self.favorite_orgs.iter().map(String::as_str)
    }

    pub fn hidden(&self) -> impl Iterator<Item = &str> {
        self.hidden_orgs.iter().map(String::as_str)
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    /// Returns whether the stored flag changed.
    pub fn set_favorite(&mut self, username: &str, favorite: bool) -> OrgListResult<bool> {
        let username = normalize_username(username)?;
        let changed = if favorite {
            self.favorite_orgs.insert(username)
        } else {
            self.favorite_orgs.remove(&username)
        };
        Ok(changed)
    }

    /// Returns the new favorite state.
    pub fn toggle_favorite(&mut self, username: &str) -> OrgListResult<bool> {
        let next = !self.is_favorite(username);
        self.set_favorite(username, next)?;
        Ok(next)
    }

    pub fn set_hidden(&mut self, username: &str, hidden: bool) -> OrgListResult<bool> {
        let username = normalize_username(username)?;
        let changed = if hidden {
            self.hidden_orgs.insert(username)
        } else {
            self.hidden_orgs.remove(&username)
        };
        Ok(changed)
    }

    pub fn forget(&mut self, username: &str) -> bool {
        let username = username.trim();
        let removed_favorite = self.favorite_orgs.remove(username);
        let removed_hidden = self.hidden_orgs.remove(username);
        removed_favorite || removed_hidden
    }
}

#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoadedPreferences {
    pub preferences: OrgPreferences,
    pub warning: Option<String>,
}

impl PreferencesStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PREFERENCES_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A corrupt file is replaced with empty preferences instead of blocking
    /// the tree; the caller gets the recovery as a warning.
    pub fn load(&self) -> OrgListResult<LoadedPreferences> {
        if !self.path.is_file() {
            return Ok(LoadedPreferences {
                preferences: OrgPreferences::default(),
                warning: None,
            });
        }

        let raw = fs::read_to_string(&self.path)
            .map_err(|error| OrgListError::storage("read", &self.path, error))?;

        match serde_json::from_str::<OrgPreferences>(&raw) {
            Ok(preferences) => Ok(LoadedPreferences {
                preferences,
                warning: None,
            }),
            Err(error) => {
                let preferences = OrgPreferences::default();
                self.save(&preferences)?;
                Ok(LoadedPreferences {
                    preferences,
                    warning: Some(format!(
                        "Failed to parse {} ({error}). Recovered with empty preferences.",
                        self.path.display()
                    )),
                })
            }
        }
    }

    pub fn save(&self, preferences: &OrgPreferences) -> OrgListResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| OrgListError::storage("create", parent, error))?;
        }

        let mut stamped = preferences.clone();
        stamped.updated_at = Some(now_iso());
        let body = serde_json::to_string_pretty(&stamped).map_err(|source| {
            OrgListError::Serialize {
                what: "org preferences",
                source,
            }
        })?;
        fs::write(&self.path, format!("{body}\n"))
            .map_err(|error| OrgListError::storage("write", &self.path, error))
    }

    /// Load, mutate, save. The closure's return value is passed through.
    pub fn update<T>(
        &self,
        mutate: impl FnOnce(&mut OrgPreferences) -> OrgListResult<T>,
    ) -> OrgListResult<(OrgPreferences, T)> {
        let mut preferences = self.load()?.preferences;
        let outcome = mutate(&mut preferences)?;
        self.save(&preferences)?;
        Ok((preferences, outcome))
    }
}
