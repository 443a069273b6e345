use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrgListError, OrgListResult};

pub(crate) const SETTINGS_FILE_NAME: &str = "settings.json";
const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 120;
const MIN_COMMAND_TIMEOUT_SECONDS: u64 = 5;
const MAX_COMMAND_TIMEOUT_SECONDS: u64 = 600;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 45;
const MAX_CACHE_TTL_SECONDS: u64 = 3600;

fn default_command_timeout_seconds() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECONDS
}

fn default_cache_ttl_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgListSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sf_binary: Option<String>,
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default)]
    pub show_hidden: bool,
    #[serde(default = "default_true")]
    pub telemetry_enabled: bool,
}

impl Default for OrgListSettings {
    fn default() -> Self {
        Self {
            sf_binary: None,
            command_timeout_seconds: DEFAULT_COMMAND_TIMEOUT_SECONDS,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            show_hidden: false,
            telemetry_enabled: true,
        }
    }
}

impl OrgListSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn normalized(mut self) -> Self {
        self.sf_binary = self
            .sf_binary
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self.command_timeout_seconds = self
            .command_timeout_seconds
            .clamp(MIN_COMMAND_TIMEOUT_SECONDS, MAX_COMMAND_TIMEOUT_SECONDS);
        self.cache_ttl_seconds = self.cache_ttl_seconds.min(MAX_CACHE_TTL_SECONDS);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgListSettingsUpdate {
    /// `Some("")` clears the configured binary.
    #[serde(default)]
    pub sf_binary: Option<String>,
    #[serde(default)]
    pub command_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub cache_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub show_hidden: Option<bool>,
    #[serde(default)]
    pub telemetry_enabled: Option<bool>,
}

pub(crate) fn apply_settings_update(
    mut settings: OrgListSettings,
    update: &OrgListSettingsUpdate,
) -> OrgListSettings {
    if let Some(sf_binary) = &update.sf_binary {
        settings.sf_binary = Some(sf_binary.clone());
    }
    if let Some(timeout) = update.command_timeout_seconds {
        settings.command_timeout_seconds = timeout;
    }
    if let Some(ttl) = update.cache_ttl_seconds {
        settings.cache_ttl_seconds = ttl;
    }
    if let Some(show_hidden) = update.show_hidden {
        settings.show_hidden = show_hidden;
    }
    if let Some(telemetry_enabled) = update.telemetry_enabled {
        settings.telemetry_enabled = telemetry_enabled;
    }
    settings.normalized()
}

#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: OrgListSettings,
    pub warning: Option<String>,
}

fn write_settings_file(path: &Path, settings: &OrgListSettings) -> OrgListResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| OrgListError::storage("create", parent, error))?;
    }
    let body = serde_json::to_string_pretty(settings).map_err(|source| OrgListError::Serialize {
        what: "settings",
        source,
    })?;
    fs::write(path, format!("{body}\n")).map_err(|error| OrgListError::storage("write", path, error))
}

pub(crate) fn settings_file_in(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE_NAME)
}

/// Writes defaults when the file is missing and recovers from a corrupt file
/// the same way.
pub(crate) fn ensure_settings(path: &Path) -> OrgListResult<LoadedSettings> {
    if !path.is_file() {
        let settings = OrgListSettings::default();
        write_settings_file(path, &settings)?;
        return Ok(LoadedSettings {
            settings,
            warning: None,
        });
    }

    let raw = fs::read_to_string(path).map_err(|error| OrgListError::storage("read", path, error))?;
    match serde_json::from_str::<OrgListSettings>(&raw) {
        Ok(settings) => Ok(LoadedSettings {
            settings: settings.normalized(),
            warning: None,
        }),
        Err(error) => {
            let settings = OrgListSettings::default();
            write_settings_file(path, &settings)?;
            Ok(LoadedSettings {
                settings,
                warning: Some(format!(
                    "Failed to parse {} ({error}). Recovered with defaults.",
                    path.display()
                )),
            })
        }
    }
}

pub(crate) fn update_settings(
    path: &Path,
    update: &OrgListSettingsUpdate,
) -> OrgListResult<OrgListSettings> {
    let current = ensure_settings(path)?.settings;
    let next = apply_settings_update(current, update);
    write_settings_file(path, &next)?;
    Ok(next)
}
