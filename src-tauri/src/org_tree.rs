use std::cmp::Ordering;

use serde::Serialize;

use crate::org_list::{OrgKind, OrgListSnapshot, OrgRecord};
use crate::preferences::OrgPreferences;

pub(crate) const LOADING_NODE_ID: &str = "loading";
const GROUP_ID_PREFIX: &str = "group:";
const ORG_ID_PREFIX: &str = "org:";
const FAVORITE_PREFIX: &str = "★ ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CollapsibleState {
    None,
    Expanded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_value: Option<String>,
    pub collapsible_state: CollapsibleState,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<OrgKind>,
    pub is_favorite: bool,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgEntry {
    pub record: OrgRecord,
    pub is_favorite: bool,
    pub is_hidden: bool,
}

impl OrgEntry {
    fn from_record(record: &OrgRecord, preferences: &OrgPreferences) -> Self {
        Self {
            is_favorite: preferences.is_favorite(&record.username),
            is_hidden: preferences.is_hidden(&record.username),
            record: record.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        if self.is_favorite {
            format!("{FAVORITE_PREFIX}{}", self.record.org_name())
        } else {
            self.record.org_name().to_string()
        }
    }

    fn to_node(&self) -> TreeNode {
        let mut description = self.record.username.clone();
        if self.record.is_default || self.record.is_default_dev_hub {
            description.push_str(" · default");
        }
        if self.is_hidden {
            description.push_str(" · hidden");
        }

        TreeNode {
            id: org_node_id(&self.record.username),
            label: self.display_name(),
            description: Some(description),
            tooltip: Some(format!("Status: {}", self.record.status)),
            context_value: Some(format!("{}-org", self.record.kind.tag())),
            collapsible_state: CollapsibleState::None,
            icon: "cloud".to_string(),
            username: Some(self.record.username.clone()),
            kind: Some(self.record.kind),
            is_favorite: self.is_favorite,
            is_hidden: self.is_hidden,
        }
    }
}

pub(crate) fn group_node_id(kind: OrgKind) -> String {
    format!("{GROUP_ID_PREFIX}{}", kind.tag())
}

pub(crate) fn org_node_id(username: &str) -> String {
    format!("{ORG_ID_PREFIX}{username}")
}

/// Anything that is not a known group falls into the sandbox bucket.
pub(crate) fn group_kind_from_id(id: &str) -> OrgKind {
    let tag = id.strip_prefix(GROUP_ID_PREFIX).unwrap_or(id);
    OrgKind::from_tag(tag)
        .or_else(|| {
            OrgKind::ALL
                .into_iter()
                .find(|kind| kind.group_label() == tag)
        })
        .unwrap_or(OrgKind::NonScratch)
}

fn compare_org_names(left: &str, right: &str) -> Ordering {
    left.to_lowercase()
        .cmp(&right.to_lowercase())
        .then_with(|| left.cmp(right))
}

fn compare_entries(left: &OrgEntry, right: &OrgEntry) -> Ordering {
    right
        .is_favorite
        .cmp(&left.is_favorite)
        .then_with(|| compare_org_names(left.record.org_name(), right.record.org_name()))
}

fn loading_node() -> TreeNode {
    TreeNode {
        id: LOADING_NODE_ID.to_string(),
        label: "Loading orgs...".to_string(),
        description: None,
        tooltip: None,
        context_value: None,
        collapsible_state: CollapsibleState::None,
        icon: "loading".to_string(),
        username: None,
        kind: None,
        is_favorite: false,
        is_hidden: false,
    }
}

fn group_node(kind: OrgKind) -> TreeNode {
    TreeNode {
        id: group_node_id(kind),
        label: kind.group_label().to_string(),
        description: None,
        tooltip: None,
        context_value: Some("org-group".to_string()),
        collapsible_state: CollapsibleState::Expanded,
        icon: "folder".to_string(),
        username: None,
        kind: Some(kind),
        is_favorite: false,
        is_hidden: false,
    }
}

#[derive(Debug, Clone)]
pub struct OrgTreeModel {
    loading: bool,
    dev_hubs: Vec<OrgEntry>,
    non_scratch_orgs: Vec<OrgEntry>,
    scratch_orgs: Vec<OrgEntry>,
    loaded_at: Option<String>,
    last_error: Option<String>,
    fingerprint: Option<String>,
}

impl Default for OrgTreeModel {
    fn default() -> Self {
        Self {
            loading: true,
            dev_hubs: Vec::new(),
            non_scratch_orgs: Vec::new(),
            scratch_orgs: Vec::new(),
            loaded_at: None,
            last_error: None,
            fingerprint: None,
        }
    }
}

impl OrgTreeModel {
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.last_error = error;
    }

    pub fn loaded_at(&self) -> Option<&str> {
        self.loaded_at.as_deref()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    fn bucket(&self, kind: OrgKind) -> &Vec<OrgEntry> {
        match kind {
            OrgKind::DevHub => &self.dev_hubs,
            OrgKind::NonScratch => &self.non_scratch_orgs,
            OrgKind::Scratch => &self.scratch_orgs,
        }
    }

    fn bucket_mut(&mut self, kind: OrgKind) -> &mut Vec<OrgEntry> {
        match kind {
            OrgKind::DevHub => &mut self.dev_hubs,
            OrgKind::NonScratch => &mut self.non_scratch_orgs,
            OrgKind::Scratch => &mut self.scratch_orgs,
        }
    }

    fn entries(&self) -> impl Iterator<Item = &OrgEntry> {
        self.dev_hubs
            .iter()
            .chain(self.non_scratch_orgs.iter())
            .chain(self.scratch_orgs.iter())
    }

    fn entries_mut(&mut self) -> impl Iterator<Item = &mut OrgEntry> {
        self.dev_hubs
            .iter_mut()
            .chain(self.non_scratch_orgs.iter_mut())
            .chain(self.scratch_orgs.iter_mut())
    }

    /// Returns whether the org list content changed since the last snapshot.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &OrgListSnapshot,
        preferences: &OrgPreferences,
        loaded_at: String,
    ) -> bool {
        let changed = self.fingerprint.as_deref() != Some(snapshot.fingerprint.as_str());
        for kind in OrgKind::ALL {
            let entries = snapshot
                .bucket(kind)
                .iter()
                .map(|record| OrgEntry::from_record(record, preferences))
                .collect();
            *self.bucket_mut(kind) = entries;
        }
        self.fingerprint = Some(snapshot.fingerprint.clone());
        self.loaded_at = Some(loaded_at);
        self.last_error = None;
        changed
    }

    pub fn apply_preferences(&mut self, preferences: &OrgPreferences) {
        for entry in self.entries_mut() {
            entry.is_favorite = preferences.is_favorite(&entry.record.username);
            entry.is_hidden = preferences.is_hidden(&entry.record.username);
        }
    }

    pub fn find(&self, username: &str) -> Option<&OrgEntry> {
        let username = username.trim();
        self.entries().find(|entry| entry.record.username == username)
    }

    pub fn remove(&mut self, username: &str, kind: OrgKind) -> bool {
        let bucket = self.bucket_mut(kind);
        let before = bucket.len();
        bucket.retain(|entry| entry.record.username != username);
        let removed = bucket.len() != before;
        if removed {
            // Forces the next reload to report a change even if the CLI
            // output happens to match what was cached before the removal.
            self.fingerprint = None;
        }
        removed
    }

    fn visible(&self, kind: OrgKind, show_hidden: bool) -> Vec<&OrgEntry> {
        let mut entries = self
            .bucket(kind)
            .iter()
            .filter(|entry| show_hidden || !entry.is_hidden)
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| compare_entries(left, right));
        entries
    }

    pub fn hidden_count(&self) -> usize {
        self.entries().filter(|entry| entry.is_hidden).count()
    }

    pub fn org_count(&self) -> usize {
        self.dev_hubs.len() + self.non_scratch_orgs.len() + self.scratch_orgs.len()
    }

    pub fn root_nodes(&self, show_hidden: bool) -> Vec<TreeNode> {
        if self.loading {
            return vec![loading_node()];
        }

        OrgKind::ALL
            .into_iter()
            .filter(|kind| !self.visible(*kind, show_hidden).is_empty())
            .map(group_node)
            .collect()
    }

    pub fn children(&self, group_id: &str, show_hidden: bool) -> Vec<TreeNode> {
        let kind = group_kind_from_id(group_id);
        self.visible(kind, show_hidden)
            .into_iter()
            .map(OrgEntry::to_node)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org_list::fixtures::ORG_LIST_JSON;
    use crate::org_list::parse_org_list_output;

    fn loaded_model(preferences: &OrgPreferences) -> OrgTreeModel {
        let snapshot = parse_org_list_output(ORG_LIST_JSON).expect("fixture parses");
        let mut model = OrgTreeModel::default();
        model.apply_snapshot(&snapshot, preferences, "2026-10-17T00:00:00Z".to_string());
        model.set_loading(false);
        model
    }

    #[test]
    fn shows_loading_node_until_first_load() {
        let model = OrgTreeModel::default();
        let roots = model.root_nodes(false);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].label, "Loading orgs...");
        assert_eq!(roots[0].icon, "loading");
    }

    #[test]
    fn groups_appear_in_fixed_order() {
        let model = loaded_model(&OrgPreferences::default());
        let labels = model
            .root_nodes(false)
            .into_iter()
            .map(|node| node.label)
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec!["Dev Hubs", "Sandboxes / Playgrounds", "Scratch Orgs"]
        );
    }

    #[test]
    fn empty_groups_are_omitted() {
        let snapshot = parse_org_list_output(
            r#"{"status":0,"result":{"scratchOrgs":[{"username":"s@example.com"}]}}"#,
        )
        .expect("parses");
        let mut model = OrgTreeModel::default();
        model.apply_snapshot(&snapshot, &OrgPreferences::default(), "now".to_string());
        model.set_loading(false);

        let roots = model.root_nodes(false);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, group_node_id(OrgKind::Scratch));
        assert_eq!(roots[0].collapsible_state, CollapsibleState::Expanded);
    }

    #[test]
    fn favorites_sort_first_then_case_insensitive_name() {
        let mut preferences = OrgPreferences::default();
        preferences
            .set_favorite("test-def@example.com", true)
            .expect("favorite");
        let model = loaded_model(&preferences);

        let labels = model
            .children(&group_node_id(OrgKind::Scratch), false)
            .into_iter()
            .map(|node| node.label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["★ test-def@example.com", "feature-x"]);

        let sandboxes = model
            .children(&group_node_id(OrgKind::NonScratch), false)
            .into_iter()
            .map(|node| node.label)
            .collect::<Vec<_>>();
        assert_eq!(sandboxes, vec!["playground@example.com", "uat"]);
    }

    #[test]
    fn org_nodes_carry_host_metadata() {
        let model = loaded_model(&OrgPreferences::default());
        let hubs = model.children(&group_node_id(OrgKind::DevHub), false);
        let hub = &hubs[0];
        assert_eq!(hub.label, "hub");
        assert_eq!(hub.tooltip.as_deref(), Some("Status: Connected"));
        assert_eq!(hub.context_value.as_deref(), Some("dev-hub-org"));
        assert_eq!(
            hub.description.as_deref(),
            Some("admin@hub.example.com · default")
        );
        assert_eq!(hub.collapsible_state, CollapsibleState::None);
    }

    #[test]
    fn hidden_orgs_are_filtered_unless_requested() {
        let mut preferences = OrgPreferences::default();
        preferences
            .set_hidden("admin@hub.example.com", true)
            .expect("hide");
        let model = loaded_model(&preferences);

        assert_eq!(model.hidden_count(), 1);
        let roots = model.root_nodes(false);
        assert!(roots.iter().all(|node| node.label != "Dev Hubs"));

        let roots = model.root_nodes(true);
        assert_eq!(roots[0].label, "Dev Hubs");
        let hub = &model.children(&group_node_id(OrgKind::DevHub), true)[0];
        assert!(hub.is_hidden);
        assert!(hub.description.as_deref().unwrap_or_default().ends_with("· hidden"));
    }

    #[test]
    fn unknown_group_falls_back_to_sandboxes() {
        let model = loaded_model(&OrgPreferences::default());
        let fallback = model.children("something-else", false);
        let sandboxes = model.children(&group_node_id(OrgKind::NonScratch), false);
        assert_eq!(fallback, sandboxes);
        assert_eq!(
            model.children("Scratch Orgs", false),
            model.children(&group_node_id(OrgKind::Scratch), false)
        );
    }

    #[test]
    fn remove_drops_only_the_matching_bucket_entry() {
        let mut model = loaded_model(&OrgPreferences::default());
        assert!(!model.remove("test-abc@example.com", OrgKind::NonScratch));
        assert!(model.remove("test-abc@example.com", OrgKind::Scratch));
        assert!(model.find("test-abc@example.com").is_none());
        assert_eq!(model.org_count(), 4);
        assert!(model.fingerprint().is_none());
    }

    #[test]
    fn reapplying_same_snapshot_reports_no_change() {
        let snapshot = parse_org_list_output(ORG_LIST_JSON).expect("fixture parses");
        let mut model = OrgTreeModel::default();
        let prefs = OrgPreferences::default();
        assert!(model.apply_snapshot(&snapshot, &prefs, "t1".to_string()));
        assert!(!model.apply_snapshot(&snapshot, &prefs, "t2".to_string()));
        assert_eq!(model.loaded_at(), Some("t2"));
    }

    #[test]
    fn apply_preferences_updates_flags_in_place() {
        let mut model = loaded_model(&OrgPreferences::default());
        let mut preferences = OrgPreferences::default();
        preferences.set_favorite("admin@example.com.uat", true).expect("fav");
        model.apply_preferences(&preferences);
        let entry = model.find("admin@example.com.uat").expect("listed");
        assert!(entry.is_favorite);
        assert_eq!(entry.display_name(), "★ uat");
    }
}
