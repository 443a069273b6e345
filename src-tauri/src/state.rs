use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{OrgListError, OrgListResult};
use crate::preferences::PreferencesStore;
use crate::provider::{OrgListProvider, ProviderOptions};
use crate::settings::{ensure_settings, settings_file_in, OrgListSettings};
use crate::sf_cli::{
    configured_sf_bin_path, evaluate_sf_binary_status, resolve_sf_binary, SfBinaryResolution,
    SfBinaryStatus, SfCli,
};

/// Everything the commands share, managed by Tauri once the app data
/// directory is known.
pub(crate) struct OrgListState {
    pub provider: OrgListProvider,
    settings_path: PathBuf,
    settings: Mutex<OrgListSettings>,
    sf_status: Mutex<Option<SfBinaryStatus>>,
}

fn load_settings(path: &Path) -> OrgListSettings {
    match ensure_settings(path) {
        Ok(loaded) => {
            if let Some(warning) = loaded.warning {
                tracing::warn!(path = %path.display(), "{warning}");
            }
            loaded.settings
        }
        Err(error) => {
            tracing::warn!(%error, "using default settings");
            OrgListSettings::default()
        }
    }
}

pub(crate) fn resolve_for(settings: &OrgListSettings) -> SfBinaryResolution {
    resolve_sf_binary(
        configured_sf_bin_path().as_deref(),
        settings.sf_binary.as_deref(),
    )
}

pub(crate) fn cli_for(settings: &OrgListSettings) -> (Arc<SfCli>, SfBinaryResolution) {
    let resolution = resolve_for(settings);
    let cli = Arc::new(SfCli::new(
        resolution.path.clone(),
        settings.command_timeout(),
    ));
    (cli, resolution)
}

fn check_sf_binary(resolution: &SfBinaryResolution) -> SfBinaryStatus {
    let status = evaluate_sf_binary_status(resolution);
    if let Some(issue) = &status.issue {
        tracing::warn!(
            source = %resolution.source,
            path = %resolution.path.display(),
            "sf binary is invalid and may break org commands: {issue}"
        );
    }
    status
}

impl OrgListState {
    pub(crate) fn initialize(data_dir: &Path) -> Self {
        let settings_path = settings_file_in(data_dir);
        let settings = load_settings(&settings_path);
        let (cli, resolution) = cli_for(&settings);
        let status = check_sf_binary(&resolution);
        tracing::info!(
            binary = %resolution.path.display(),
            source = %resolution.source,
            data_dir = %data_dir.display(),
            "org list backend ready"
        );

        let provider = OrgListProvider::new(
            cli,
            PreferencesStore::in_dir(data_dir),
            ProviderOptions::from(&settings),
        );

        Self {
            provider,
            settings_path,
            settings: Mutex::new(settings),
            sf_status: Mutex::new(Some(status)),
        }
    }

    pub(crate) fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub(crate) fn settings(&self) -> OrgListResult<OrgListSettings> {
        self.settings
            .lock()
            .map(|settings| settings.clone())
            .map_err(|_| OrgListError::Poisoned("settings"))
    }

    /// Pushes new settings into the provider, rebuilding the CLI when the
    /// binary or the timeout changed. Returns whether the CLI was swapped.
    pub(crate) fn apply_settings(&self, next: OrgListSettings) -> OrgListResult<bool> {
        let mut current = self
            .settings
            .lock()
            .map_err(|_| OrgListError::Poisoned("settings"))?;

        let cli_changed = current.sf_binary != next.sf_binary
            || current.command_timeout_seconds != next.command_timeout_seconds;
        if cli_changed {
            let (cli, resolution) = cli_for(&next);
            let status = check_sf_binary(&resolution);
            self.provider.set_cli(cli)?;
            self.store_sf_status(status)?;
        }

        self.provider
            .set_load_policy(next.cache_ttl(), next.telemetry_enabled)?;
        self.provider.set_show_hidden(next.show_hidden)?;
        *current = next;
        Ok(cli_changed)
    }

    pub(crate) fn sf_status(&self) -> Option<SfBinaryStatus> {
        self.sf_status.lock().ok().and_then(|status| status.clone())
    }

    pub(crate) fn store_sf_status(&self, status: SfBinaryStatus) -> OrgListResult<()> {
        let mut stored = self
            .sf_status
            .lock()
            .map_err(|_| OrgListError::Poisoned("sf status"))?;
        *stored = Some(status);
        Ok(())
    }
}
