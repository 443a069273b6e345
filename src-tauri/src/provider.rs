use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cache::{CacheOutcome, OrgListCache};
use crate::error::{OrgListError, OrgListResult};
use crate::org_actions::{run_action, ActionEffect, ActionReport, OrgAction};
use crate::org_list::{fetch_org_list, OrgKind, OrgRecord};
use crate::org_tree::{group_node_id, OrgTreeModel, TreeNode};
use crate::preferences::{now_iso, OrgPreferences, PreferencesStore};
use crate::settings::OrgListSettings;
use crate::sf_cli::OrgCli;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    pub cache_ttl: Duration,
    pub show_hidden: bool,
    pub telemetry_enabled: bool,
}

impl From<&OrgListSettings> for ProviderOptions {
    fn from(settings: &OrgListSettings) -> Self {
        Self {
            cache_ttl: settings.cache_ttl(),
            show_hidden: settings.show_hidden,
            telemetry_enabled: settings.telemetry_enabled,
        }
    }
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self::from(&OrgListSettings::default())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadOutcome {
    pub changed: bool,
    pub cache: CacheOutcome,
    pub org_count: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeGroupView {
    pub node: TreeNode,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgTreeView {
    pub loading: bool,
    pub show_hidden: bool,
    pub roots: Vec<TreeNode>,
    pub groups: Vec<TreeGroupView>,
    pub org_count: usize,
    pub hidden_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Keeps the tree model in sync with the CLI output and the persisted
/// favorite/hidden preferences.
pub struct OrgListProvider {
    cli: RwLock<Arc<dyn OrgCli>>,
    tree: Mutex<OrgTreeModel>,
    cache: OrgListCache,
    preferences: PreferencesStore,
    options: RwLock<ProviderOptions>,
}

impl OrgListProvider {
    pub fn new(cli: Arc<dyn OrgCli>, preferences: PreferencesStore, options: ProviderOptions) -> Self {
        Self {
            cli: RwLock::new(cli),
            tree: Mutex::new(OrgTreeModel::default()),
            cache: OrgListCache::default(),
            preferences,
            options: RwLock::new(options),
        }
    }

    fn cli(&self) -> OrgListResult<Arc<dyn OrgCli>> {
        self.cli
            .read()
            .map(|cli| cli.clone())
            .map_err(|_| OrgListError::Poisoned("sf cli"))
    }

    /// Swapping the CLI drops the cached list; it may come from another binary.
    pub fn set_cli(&self, cli: Arc<dyn OrgCli>) -> OrgListResult<()> {
        let mut current = self
            .cli
            .write()
            .map_err(|_| OrgListError::Poisoned("sf cli"))?;
        *current = cli;
        self.cache.invalidate();
        Ok(())
    }

    pub fn options(&self) -> ProviderOptions {
        self.options
            .read()
            .map(|options| *options)
            .unwrap_or_default()
    }

    fn update_options(&self, apply: impl FnOnce(&mut ProviderOptions)) -> OrgListResult<()> {
        let mut current = self
            .options
            .write()
            .map_err(|_| OrgListError::Poisoned("provider options"))?;
        apply(&mut current);
        Ok(())
    }

    pub fn set_load_policy(&self, cache_ttl: Duration, telemetry_enabled: bool) -> OrgListResult<()> {
        self.update_options(|options| {
            options.cache_ttl = cache_ttl;
            options.telemetry_enabled = telemetry_enabled;
        })
    }

    pub fn set_show_hidden(&self, show_hidden: bool) -> OrgListResult<()> {
        self.update_options(|options| options.show_hidden = show_hidden)
    }

    fn lock_tree(&self) -> OrgListResult<MutexGuard<'_, OrgTreeModel>> {
        self.tree
            .lock()
            .map_err(|_| OrgListError::Poisoned("org tree"))
    }

    fn load_preferences(&self) -> OrgPreferences {
        match self.preferences.load() {
            Ok(loaded) => {
                if let Some(warning) = loaded.warning {
                    tracing::warn!(path = %self.preferences.path().display(), "{warning}");
                }
                let preferences = loaded.preferences;
                tracing::debug!(
                    favorites = preferences.favorites().count(),
                    hidden = preferences.hidden().count(),
                    updated_at = ?preferences.updated_at(),
                    "org preferences loaded"
                );
                preferences
            }
            Err(error) => {
                tracing::warn!(%error, "falling back to empty org preferences");
                OrgPreferences::default()
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.lock_tree().map(|tree| tree.is_loading()).unwrap_or(false)
    }

    /// First load: the tree shows a loading node until it finishes, whether
    /// or not the CLI succeeds.
    pub fn init(&self) -> OrgListResult<ReloadOutcome> {
        self.lock_tree()?.set_loading(true);
        let outcome = self.reload(true);
        self.lock_tree()?.set_loading(false);
        outcome
    }

    /// On failure the previous buckets stay in place and the error is kept
    /// on the model for the host to display.
    pub fn reload(&self, force: bool) -> OrgListResult<ReloadOutcome> {
        let started = Instant::now();
        let options = self.options();
        let cli = self.cli()?;

        let loaded = self
            .cache
            .get_or_load(options.cache_ttl, force, || fetch_org_list(cli.as_ref()));
        let exec_elapsed = started.elapsed();

        let (snapshot, cache_outcome) = match loaded {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(cli = %cli.describe(), %error, "org list load failed");
                self.lock_tree()?.set_error(Some(error.to_string()));
                return Err(error);
            }
        };

        if cache_outcome == CacheOutcome::Stale {
            // Superseded by a logout, delete or CLI swap that happened while
            // this load ran; whoever invalidated reloads or edits the tree.
            tracing::debug!(force, "discarding org list loaded before invalidation");
            return Ok(ReloadOutcome {
                changed: false,
                cache: cache_outcome,
                org_count: snapshot.len(),
                fingerprint: snapshot.fingerprint,
            });
        }

        if snapshot.is_empty() {
            tracing::info!("sf org list returned no authorized orgs");
        }

        let preferences = self.load_preferences();
        let changed = self
            .lock_tree()?
            .apply_snapshot(&snapshot, &preferences, now_iso());
        let org_count = snapshot.len();

        if options.telemetry_enabled {
            tracing::info!(
                event = "org_list",
                exec_ms = exec_elapsed.as_millis() as u64,
                total_ms = started.elapsed().as_millis() as u64,
                cache = ?cache_outcome,
                cache_age_ms = self.cache.age().map(|age| age.as_millis() as u64),
                force,
                changed,
                org_count,
                "org list loaded"
            );
        }

        Ok(ReloadOutcome {
            changed,
            cache: cache_outcome,
            org_count,
            fingerprint: snapshot.fingerprint,
        })
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.lock_tree()
            .ok()
            .and_then(|tree| tree.fingerprint().map(ToOwned::to_owned))
    }

    pub fn root_nodes(&self) -> OrgListResult<Vec<TreeNode>> {
        let show_hidden = self.options().show_hidden;
        Ok(self.lock_tree()?.root_nodes(show_hidden))
    }

    pub fn children(&self, parent_id: Option<&str>) -> OrgListResult<Vec<TreeNode>> {
        let Some(parent_id) = parent_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return self.root_nodes();
        };
        let show_hidden = self.options().show_hidden;
        Ok(self.lock_tree()?.children(parent_id, show_hidden))
    }

    pub fn tree_view(&self) -> OrgListResult<OrgTreeView> {
        let show_hidden = self.options().show_hidden;
        let tree = self.lock_tree()?;
        let roots = tree.root_nodes(show_hidden);
        let groups = if tree.is_loading() {
            Vec::new()
        } else {
            OrgKind::ALL
                .into_iter()
                .filter_map(|kind| {
                    let id = group_node_id(kind);
                    let node = roots.iter().find(|node| node.id == id)?.clone();
                    Some(TreeGroupView {
                        children: tree.children(&id, show_hidden),
                        node,
                    })
                })
                .collect()
        };

        Ok(OrgTreeView {
            loading: tree.is_loading(),
            show_hidden,
            roots,
            groups,
            org_count: tree.org_count(),
            hidden_count: tree.hidden_count(),
            loaded_at: tree.loaded_at().map(ToOwned::to_owned),
            last_error: tree.last_error().map(ToOwned::to_owned),
        })
    }

    pub fn lookup(&self, username: &str) -> OrgListResult<OrgRecord> {
        let tree = self.lock_tree()?;
        tree.find(username)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| OrgListError::OrgNotFound(username.trim().to_string()))
    }

    fn apply_preferences(&self, preferences: &OrgPreferences) -> OrgListResult<()> {
        self.lock_tree()?.apply_preferences(preferences);
        Ok(())
    }

    /// Returns the new favorite state.
    pub fn toggle_favorite(&self, username: &str) -> OrgListResult<bool> {
        let org = self.lookup(username)?;
        let (preferences, favorite) = self
            .preferences
            .update(|preferences| preferences.toggle_favorite(&org.username))?;
        self.apply_preferences(&preferences)?;
        tracing::debug!(username = %org.username, favorite, "favorite toggled");
        Ok(favorite)
    }

    /// Returns whether the stored flag changed.
    pub fn set_hidden(&self, username: &str, hidden: bool) -> OrgListResult<bool> {
        let org = self.lookup(username)?;
        let (preferences, changed) = self
            .preferences
            .update(|preferences| preferences.set_hidden(&org.username, hidden))?;
        self.apply_preferences(&preferences)?;
        Ok(changed)
    }

    pub fn run_action(&self, action: &OrgAction, username: &str) -> OrgListResult<ActionReport> {
        let org = self.lookup(username)?;
        let cli = self.cli()?;
        let report = run_action(cli.as_ref(), action, &org)?;
        if report.skipped {
            return Ok(report);
        }

        match report.effect {
            ActionEffect::None => {}
            ActionEffect::Reload => {
                self.cache.invalidate();
                // The CLI call already succeeded; a failed refresh is only
                // surfaced through the model's error.
                if let Err(error) = self.reload(true) {
                    tracing::warn!(%error, "reload after {:?} failed", report.action);
                }
            }
            ActionEffect::Remove => {
                self.cache.invalidate();
                self.lock_tree()?.remove(&org.username, org.kind);
                if let Err(error) = self
                    .preferences
                    .update(|preferences| Ok(preferences.forget(&org.username)))
                {
                    tracing::warn!(%error, username = %org.username, "failed to forget org preferences");
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org_actions::fake::RecordingCli;
    use crate::org_list::fixtures::ORG_LIST_JSON;
    use crate::sf_cli::CommandResult;
    use std::sync::mpsc;
    use std::thread;

    struct Harness {
        _dir: tempfile::TempDir,
        cli: Arc<RecordingCli>,
        provider: OrgListProvider,
        store: PreferencesStore,
    }

    fn test_options() -> ProviderOptions {
        ProviderOptions {
            cache_ttl: Duration::from_secs(60),
            show_hidden: false,
            telemetry_enabled: false,
        }
    }

    /// Blocks inside `run` until the test releases it.
    struct GatedCli {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        stdout: String,
    }

    impl OrgCli for GatedCli {
        fn run(&self, _args: &[String]) -> CommandResult {
            let _ = self.started.lock().expect("started lock").send(());
            let _ = self.release.lock().expect("release lock").recv();
            CommandResult {
                exit_code: Some(0),
                stdout: self.stdout.clone(),
                ..CommandResult::default()
            }
        }

        fn describe(&self) -> String {
            "gated-cli".to_string()
        }
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PreferencesStore::in_dir(dir.path());
        let cli = Arc::new(RecordingCli::default());
        let provider = OrgListProvider::new(cli.clone(), store.clone(), test_options());
        Harness {
            _dir: dir,
            cli,
            provider,
            store,
        }
    }

    fn labels(nodes: &[TreeNode]) -> Vec<String> {
        nodes.iter().map(|node| node.label.clone()).collect()
    }

    #[test]
    fn init_loads_groups_and_clears_loading() {
        let h = harness();
        assert!(h.provider.is_loading());
        h.cli.push_ok(ORG_LIST_JSON);

        let outcome = h.provider.init().expect("init");
        assert!(outcome.changed);
        assert_eq!(outcome.org_count, 5);
        assert!(!h.provider.is_loading());
        assert_eq!(
            labels(&h.provider.children(None).expect("roots")),
            vec!["Dev Hubs", "Sandboxes / Playgrounds", "Scratch Orgs"]
        );
        assert_eq!(h.cli.calls(), vec![vec!["org", "list", "--json"]]);
    }

    #[test]
    fn failed_init_still_clears_loading_and_records_error() {
        let h = harness();
        h.cli.push_failure(r#"{"status":1,"message":"sf is not logged in"}"#);

        let error = h.provider.init().unwrap_err();
        assert_eq!(error.to_string(), "Loading org list failed. sf is not logged in");
        assert!(!h.provider.is_loading());

        let view = h.provider.tree_view().expect("view");
        assert!(view.roots.is_empty());
        assert_eq!(view.last_error.as_deref(), Some(error.to_string().as_str()));
    }

    #[test]
    fn reload_uses_cache_unless_forced() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");

        let outcome = h.provider.reload(false).expect("cached");
        assert_eq!(outcome.cache, CacheOutcome::Hit);
        assert!(!outcome.changed);
        assert_eq!(h.cli.calls().len(), 1);

        h.cli.push_ok(ORG_LIST_JSON);
        let outcome = h.provider.reload(true).expect("forced");
        assert_eq!(outcome.cache, CacheOutcome::Miss);
        assert!(!outcome.changed);
        assert_eq!(h.cli.calls().len(), 2);
    }

    #[test]
    fn failed_reload_keeps_previous_orgs() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");

        h.cli.push_ok("definitely not json");
        assert!(h.provider.reload(true).is_err());
        let view = h.provider.tree_view().expect("view");
        assert_eq!(view.org_count, 5);
        assert!(view
            .last_error
            .unwrap_or_default()
            .starts_with("Failed to parse org list response."));
    }

    #[test]
    fn favorites_persist_and_resort_children() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");

        assert!(h.provider.toggle_favorite("admin@example.com.uat").expect("toggle"));
        let sandboxes = h
            .provider
            .children(Some(&group_node_id(OrgKind::NonScratch)))
            .expect("children");
        assert_eq!(labels(&sandboxes), vec!["★ uat", "playground@example.com"]);

        let stored = h.store.load().expect("load").preferences;
        assert!(stored.is_favorite("admin@example.com.uat"));
    }

    #[test]
    fn hidden_orgs_drop_out_until_show_hidden() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");

        assert!(h.provider.set_hidden("admin@hub.example.com", true).expect("hide"));
        let view = h.provider.tree_view().expect("view");
        assert_eq!(view.hidden_count, 1);
        assert!(view.roots.iter().all(|node| node.label != "Dev Hubs"));

        h.provider.set_show_hidden(true).expect("show hidden");
        let view = h.provider.tree_view().expect("view");
        assert_eq!(view.groups[0].node.label, "Dev Hubs");
        assert!(view.groups[0].children[0].is_hidden);
    }

    #[test]
    fn logout_removes_org_forgets_preferences_and_invalidates_cache() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");
        h.provider
            .toggle_favorite("test-abc@example.com")
            .expect("favorite");

        h.cli.push_ok(r#"{"status":0,"result":["test-abc@example.com"]}"#);
        let report = h
            .provider
            .run_action(&OrgAction::Logout, "test-abc@example.com")
            .expect("logout");
        assert_eq!(report.effect, ActionEffect::Remove);
        assert!(matches!(
            h.provider.lookup("test-abc@example.com"),
            Err(OrgListError::OrgNotFound(_))
        ));
        assert!(!h
            .store
            .load()
            .expect("load")
            .preferences
            .is_favorite("test-abc@example.com"));

        assert_eq!(
            h.cli.calls()[1],
            vec!["org", "logout", "--no-prompt", "-o", "feature-x"]
        );

        h.cli.push_ok(ORG_LIST_JSON);
        let outcome = h.provider.reload(false).expect("reload");
        assert_eq!(outcome.cache, CacheOutcome::Miss);
        assert!(outcome.changed);
    }

    #[test]
    fn rename_runs_alias_set_then_reloads() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");

        h.cli.push_ok(r#"{"status":0,"result":[{"alias":"qa","value":"admin@example.com.uat"}]}"#);
        h.cli.push_ok(&ORG_LIST_JSON.replace("\"alias\": \"uat\"", "\"alias\": \"qa\""));
        let report = h
            .provider
            .run_action(
                &OrgAction::Rename {
                    alias: "qa".to_string(),
                },
                "admin@example.com.uat",
            )
            .expect("rename");
        assert_eq!(report.effect, ActionEffect::Reload);

        let calls = h.cli.calls();
        assert_eq!(calls[1], vec!["alias", "set", "qa=admin@example.com.uat"]);
        assert_eq!(calls[2], vec!["org", "list", "--json"]);
        assert_eq!(
            h.provider.lookup("admin@example.com.uat").expect("listed").org_name(),
            "qa"
        );
    }

    #[test]
    fn failed_reload_after_action_still_reports_success() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");

        h.cli.push_ok(r#"{"status":0,"result":{"successes":[]}}"#);
        h.cli.push_failure(r#"{"status":1,"message":"network down"}"#);
        let report = h
            .provider
            .run_action(&OrgAction::SetDefault, "test-abc@example.com")
            .expect("default");
        assert_eq!(report.message.as_deref(), Some("Set feature-x to default."));
        let view = h.provider.tree_view().expect("view");
        assert!(view.last_error.unwrap_or_default().contains("network down"));
        assert_eq!(view.org_count, 5);
    }

    #[test]
    fn delete_of_sandbox_is_refused_without_calling_cli() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");

        let error = h
            .provider
            .run_action(&OrgAction::Delete, "admin@example.com.uat")
            .unwrap_err();
        assert!(matches!(error, OrgListError::Unsupported(_)));
        assert_eq!(h.cli.calls().len(), 1);
    }

    #[test]
    fn reload_that_outlives_a_cli_swap_is_discarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Arc::new(GatedCli {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
            stdout: ORG_LIST_JSON.to_string(),
        });
        let provider = Arc::new(OrgListProvider::new(
            gated,
            PreferencesStore::in_dir(dir.path()),
            test_options(),
        ));

        let worker = {
            let provider = provider.clone();
            thread::spawn(move || provider.reload(true))
        };
        started_rx.recv().expect("load started");

        let replacement = Arc::new(RecordingCli::default());
        replacement.push_ok(
            r#"{"status":0,"result":{"scratchOrgs":[{"alias":"solo","username":"solo@example.com","status":"Active"}]}}"#,
        );
        provider.set_cli(replacement).expect("swap cli");
        release_tx.send(()).expect("release");

        let outcome = worker.join().expect("thread").expect("reload");
        assert_eq!(outcome.cache, CacheOutcome::Stale);
        assert!(!outcome.changed);
        assert!(provider.lookup("admin@hub.example.com").is_err());

        let outcome = provider.reload(false).expect("reload");
        assert_eq!(outcome.cache, CacheOutcome::Miss);
        assert_eq!(
            provider.lookup("solo@example.com").expect("listed").org_name(),
            "solo"
        );
    }

    #[test]
    fn root_children_match_root_nodes() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");
        assert_eq!(
            h.provider.children(Some("  ")).expect("blank parent"),
            h.provider.root_nodes().expect("roots")
        );
    }

    #[test]
    fn unknown_orgs_are_rejected() {
        let h = harness();
        h.cli.push_ok(ORG_LIST_JSON);
        h.provider.init().expect("init");
        assert!(matches!(
            h.provider.toggle_favorite("nobody@example.com"),
            Err(OrgListError::OrgNotFound(_))
        ));
    }
}
