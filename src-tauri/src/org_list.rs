use std::collections::HashSet;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{OrgListError, OrgListResult};
use crate::sf_cli::{cli_error_message, OrgCli};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrgKind {
    DevHub,
    NonScratch,
    Scratch,
}

impl OrgKind {
    pub const ALL: [OrgKind; 3] = [OrgKind::DevHub, OrgKind::NonScratch, OrgKind::Scratch];

    pub fn tag(self) -> &'static str {
        match self {
            OrgKind::DevHub => "dev-hub",
            OrgKind::NonScratch => "non-scratch",
            OrgKind::Scratch => "scratch",
        }
    }

    pub fn group_label(self) -> &'static str {
        match self {
            OrgKind::DevHub => "Dev Hubs",
            OrgKind::NonScratch => "Sandboxes / Playgrounds",
            OrgKind::Scratch => "Scratch Orgs",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrgListEnvelope {
    #[serde(default)]
    status: Option<i64>,
    result: Option<OrgListResultBody>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrgListResultBody {
    #[serde(default)]
    dev_hubs: Vec<RawOrg>,
    #[serde(default)]
    non_scratch_orgs: Vec<RawOrg>,
    #[serde(default)]
    scratch_orgs: Vec<RawOrg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrg {
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    connected_status: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    org_id: Option<String>,
    #[serde(default)]
    instance_url: Option<String>,
    #[serde(default)]
    is_default_username: Option<bool>,
    #[serde(default)]
    is_default_dev_hub_username: Option<bool>,
    #[serde(default)]
    expiration_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub username: String,
    pub status: String,
    pub kind: OrgKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    pub is_default: bool,
    pub is_default_dev_hub: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

impl OrgRecord {
    pub fn org_name(&self) -> &str {
        self.alias
            .as_deref()
            .filter(|alias| !alias.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgListSnapshot {
    pub dev_hubs: Vec<OrgRecord>,
    pub non_scratch_orgs: Vec<OrgRecord>,
    pub scratch_orgs: Vec<OrgRecord>,
    pub fingerprint: String,
}

impl OrgListSnapshot {
    pub fn bucket(&self, kind: OrgKind) -> &[OrgRecord] {
        match kind {
            OrgKind::DevHub => &self.dev_hubs,
            OrgKind::NonScratch => &self.non_scratch_orgs,
            OrgKind::Scratch => &self.scratch_orgs,
        }
    }

    pub fn len(&self) -> usize {
        self.dev_hubs.len() + self.non_scratch_orgs.len() + self.scratch_orgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn org_list_args() -> Vec<String> {
    vec!["org".to_string(), "list".to_string(), "--json".to_string()]
}

pub(crate) fn fingerprint(stdout: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stdout.trim().as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn to_record(raw: RawOrg, kind: OrgKind) -> Option<OrgRecord> {
    let username = normalize_optional(raw.username)?;
    let status = normalize_optional(raw.connected_status)
        .or_else(|| normalize_optional(raw.status))
        .unwrap_or_else(|| "Unknown".to_string());

    Some(OrgRecord {
        alias: normalize_optional(raw.alias),
        username,
        status,
        kind,
        org_id: normalize_optional(raw.org_id),
        instance_url: normalize_optional(raw.instance_url),
        is_default: raw.is_default_username.unwrap_or(false),
        is_default_dev_hub: raw.is_default_dev_hub_username.unwrap_or(false),
        expiration_date: normalize_optional(raw.expiration_date),
    })
}

/// Splits the CLI result into the three tree buckets. The CLI lists dev hubs
/// under `nonScratchOrgs` as well; those entries only appear under Dev Hubs.
pub(crate) fn classify(body: OrgListResultBody, fingerprint: String) -> OrgListSnapshot {
    let dev_hubs = body
        .dev_hubs
        .into_iter()
        .filter_map(|raw| to_record(raw, OrgKind::DevHub))
        .collect::<Vec<_>>();

    let dev_hub_usernames = dev_hubs
        .iter()
        .map(|org| org.username.clone())
        .collect::<HashSet<_>>();

    let non_scratch_orgs = body
        .non_scratch_orgs
        .into_iter()
        .filter_map(|raw| to_record(raw, OrgKind::NonScratch))
        .filter(|org| !dev_hub_usernames.contains(&org.username))
        .collect::<Vec<_>>();

    let scratch_orgs = body
        .scratch_orgs
        .into_iter()
        .filter_map(|raw| to_record(raw, OrgKind::Scratch))
        .collect::<Vec<_>>();

    OrgListSnapshot {
        dev_hubs,
        non_scratch_orgs,
        scratch_orgs,
        fingerprint,
    }
}

pub(crate) fn parse_org_list_output(stdout: &str) -> OrgListResult<OrgListSnapshot> {
    let envelope = serde_json::from_str::<OrgListEnvelope>(stdout.trim())
        .map_err(|error| OrgListError::ParseFailed(error.to_string()))?;

    let Some(body) = envelope.result else {
        let detail = envelope
            .message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "Response has no result (status {}).",
                    envelope
                        .status
                        .map(|status| status.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                )
            });
        return Err(OrgListError::ParseFailed(detail));
    };

    Ok(classify(body, fingerprint(stdout)))
}

pub(crate) fn fetch_org_list(cli: &dyn OrgCli) -> OrgListResult<OrgListSnapshot> {
    let result = cli.run(&org_list_args());
    if !result.succeeded() {
        return Err(OrgListError::LoadFailed(cli_error_message(
            &result,
            "sf org list exited unsuccessfully.",
        )));
    }

    parse_org_list_output(&result.stdout)
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub(crate) const ORG_LIST_JSON: &str = r#"{
  "status": 0,
  "result": {
    "other": [],
    "sandboxes": [],
    "nonScratchOrgs": [
      {
        "alias": "hub",
        "username": "admin@hub.example.com",
        "orgId": "00D000000000001",
        "instanceUrl": "https://hub.my.salesforce.com",
        "connectedStatus": "Connected",
        "isDevHub": true,
        "isDefaultDevHubUsername": true
      },
      {
        "alias": "uat",
        "username": "admin@example.com.uat",
        "connectedStatus": "Connected",
        "isSandbox": true
      },
      {
        "username": "playground@example.com",
        "connectedStatus": "RefreshTokenAuthError"
      }
    ],
    "devHubs": [
      {
        "alias": "hub",
        "username": "admin@hub.example.com",
        "connectedStatus": "Connected",
        "isDefaultDevHubUsername": true
      }
    ],
    "scratchOrgs": [
      {
        "alias": "feature-x",
        "username": "test-abc@example.com",
        "status": "Active",
        "isDefaultUsername": true,
        "expirationDate": "2026-11-01"
      },
      {
        "alias": null,
        "username": "test-def@example.com",
        "status": "Active"
      }
    ]
  },
  "warnings": []
}"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::ORG_LIST_JSON;
    use super::*;

    #[test]
    fn classifies_orgs_and_excludes_dev_hubs_from_sandboxes() {
        let snapshot = parse_org_list_output(ORG_LIST_JSON).expect("fixture parses");

        assert_eq!(snapshot.dev_hubs.len(), 1);
        assert_eq!(snapshot.dev_hubs[0].kind, OrgKind::DevHub);
        assert!(snapshot.dev_hubs[0].is_default_dev_hub);

        let sandbox_usernames = snapshot
            .non_scratch_orgs
            .iter()
            .map(|org| org.username.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            sandbox_usernames,
            vec!["admin@example.com.uat", "playground@example.com"]
        );

        assert_eq!(snapshot.scratch_orgs.len(), 2);
        assert!(snapshot.scratch_orgs[0].is_default);
        assert_eq!(snapshot.len(), 5);
    }

    #[test]
    fn org_name_falls_back_to_username() {
        let snapshot = parse_org_list_output(ORG_LIST_JSON).expect("fixture parses");
        assert_eq!(snapshot.scratch_orgs[0].org_name(), "feature-x");
        assert_eq!(snapshot.scratch_orgs[1].org_name(), "test-def@example.com");
        assert_eq!(snapshot.non_scratch_orgs[1].org_name(), "playground@example.com");
    }

    #[test]
    fn status_prefers_connected_status_then_scratch_status() {
        let snapshot = parse_org_list_output(ORG_LIST_JSON).expect("fixture parses");
        assert_eq!(snapshot.non_scratch_orgs[1].status, "RefreshTokenAuthError");
        assert_eq!(snapshot.scratch_orgs[0].status, "Active");
    }

    #[test]
    fn missing_buckets_default_to_empty() {
        let snapshot = parse_org_list_output(r#"{"status":0,"result":{"scratchOrgs":[]}}"#)
            .expect("partial result parses");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn rejects_invalid_json_and_missing_result() {
        let error = parse_org_list_output("Warning: update available\n{").unwrap_err();
        assert!(error.to_string().starts_with("Failed to parse org list response."));

        let error =
            parse_org_list_output(r#"{"status":1,"name":"Boom","message":"No auth files"}"#)
                .unwrap_err();
        assert!(error.to_string().contains("No auth files"));
    }

    #[test]
    fn skips_orgs_without_username() {
        let snapshot = parse_org_list_output(
            r#"{"status":0,"result":{"scratchOrgs":[{"alias":"ghost"},{"username":" "}]}}"#,
        )
        .expect("parses");
        assert!(snapshot.scratch_orgs.is_empty());
    }

    #[test]
    fn fingerprint_ignores_surrounding_whitespace() {
        assert_eq!(fingerprint("{}\n"), fingerprint("  {}"));
        assert_ne!(fingerprint("{}"), fingerprint("[]"));
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in OrgKind::ALL {
            assert_eq!(OrgKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(OrgKind::from_tag("sandbox"), None);
    }
}
