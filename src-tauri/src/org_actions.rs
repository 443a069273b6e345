use serde::{Deserialize, Serialize};

use crate::error::{OrgListError, OrgListResult};
use crate::org_list::{OrgKind, OrgRecord};
use crate::sf_cli::{cli_error_message, OrgCli};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrgActionKind {
    Open,
    Rename,
    SetDefault,
    Logout,
    Delete,
}

impl OrgActionKind {
    pub fn tag(self) -> &'static str {
        match self {
            OrgActionKind::Open => "open",
            OrgActionKind::Rename => "rename",
            OrgActionKind::SetDefault => "set-default",
            OrgActionKind::Logout => "logout",
            OrgActionKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgAction {
    Open,
    Rename { alias: String },
    SetDefault,
    Logout,
    Delete,
}

/// What the tree has to do once the CLI call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionEffect {
    None,
    Reload,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPrompt {
    pub message: String,
    pub cancel_label: String,
    pub accept_label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub action: OrgActionKind,
    pub username: String,
    pub org_name: String,
    pub title: String,
    pub ok: bool,
    pub skipped: bool,
    pub effect: ActionEffect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

pub(crate) fn normalize_alias(alias: &str) -> OrgListResult<Option<String>> {
    let trimmed = alias.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(OrgListError::InvalidInput(
            "alias must not contain whitespace.".to_string(),
        ));
    }
    if trimmed.contains('=') {
        return Err(OrgListError::InvalidInput(
            "alias must not contain '='.".to_string(),
        ));
    }
    if trimmed.starts_with('-') {
        return Err(OrgListError::InvalidInput(
            "alias must not start with '-'.".to_string(),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

impl OrgAction {
    pub fn kind(&self) -> OrgActionKind {
        match self {
            OrgAction::Open => OrgActionKind::Open,
            OrgAction::Rename { .. } => OrgActionKind::Rename,
            OrgAction::SetDefault => OrgActionKind::SetDefault,
            OrgAction::Logout => OrgActionKind::Logout,
            OrgAction::Delete => OrgActionKind::Delete,
        }
    }

    pub fn effect(&self) -> ActionEffect {
        match self {
            OrgAction::Open => ActionEffect::None,
            OrgAction::Rename { .. } | OrgAction::SetDefault => ActionEffect::Reload,
            OrgAction::Logout | OrgAction::Delete => ActionEffect::Remove,
        }
    }

    pub fn confirmation(&self, org: &OrgRecord) -> Option<ConfirmationPrompt> {
        let name = org.org_name();
        let (message, cancel_label, accept_label) = match self {
            OrgAction::Open | OrgAction::Rename { .. } => return None,
            OrgAction::SetDefault => (
                format!("Do you want to set {name} as your default Org?"),
                "No",
                "Yes",
            ),
            OrgAction::Logout => (
                format!("Are you sure you want to log out of {name}?"),
                "Cancel",
                "Logout",
            ),
            OrgAction::Delete => (
                format!("Are you sure you want to delete {name}?"),
                "Cancel",
                "Delete",
            ),
        };

        Some(ConfirmationPrompt {
            message,
            cancel_label: cancel_label.to_string(),
            accept_label: accept_label.to_string(),
        })
    }

    pub fn progress_title(&self, org: &OrgRecord) -> String {
        let name = org.org_name();
        match self {
            OrgAction::Open => format!("Opening {name}."),
            OrgAction::Rename { alias } => {
                format!("Changing alias for {} to {alias}.", org.username)
            }
            OrgAction::SetDefault => format!("Setting {name} as default."),
            OrgAction::Logout => format!("Logging out {name}."),
            OrgAction::Delete => format!("Deleting {name}."),
        }
    }

    fn success_message(&self, org: &OrgRecord) -> Option<String> {
        let name = org.org_name();
        match self {
            OrgAction::Open | OrgAction::Rename { .. } => None,
            OrgAction::SetDefault => Some(format!("Set {name} to default.")),
            OrgAction::Logout => Some(format!("Logged out of {name}.")),
            OrgAction::Delete => Some(format!("Deleted {name}.")),
        }
    }

    fn error_message(&self, org: &OrgRecord) -> String {
        let name = org.org_name();
        match self {
            OrgAction::Open => format!("Error opening {name}."),
            OrgAction::Rename { .. } => format!("Error changing alias for {}.", org.username),
            OrgAction::SetDefault => format!("Error setting default to {name}."),
            OrgAction::Logout => format!("Error logging out of {name}."),
            OrgAction::Delete => format!("Error deleting {name}."),
        }
    }

    pub fn args(&self, org: &OrgRecord) -> OrgListResult<Vec<String>> {
        let name = org.org_name().to_string();
        let args = match self {
            OrgAction::Open => vec!["org".into(), "open".into(), "-o".into(), name],
            OrgAction::Rename { alias } => {
                let Some(alias) = normalize_alias(alias)? else {
                    return Err(OrgListError::InvalidInput(
                        "alias must be a non-empty string.".to_string(),
                    ));
                };
                vec![
                    "alias".into(),
                    "set".into(),
                    format!("{alias}={}", org.username),
                ]
            }
            OrgAction::SetDefault => {
                vec!["config".into(), "set".into(), format!("target-org={name}")]
            }
            OrgAction::Logout => vec![
                "org".into(),
                "logout".into(),
                "--no-prompt".into(),
                "-o".into(),
                name,
            ],
            OrgAction::Delete => {
                if org.kind != OrgKind::Scratch {
                    return Err(OrgListError::Unsupported(format!(
                        "Only scratch orgs can be deleted; log out of {name} instead."
                    )));
                }
                vec![
                    "org".into(),
                    "delete".into(),
                    "scratch".into(),
                    "--no-prompt".into(),
                    "-o".into(),
                    name,
                ]
            }
        };
        Ok(args)
    }

    /// A rename with a blank alias is a dismissed prompt, not an error.
    pub fn is_noop(&self) -> bool {
        matches!(self, OrgAction::Rename { alias } if alias.trim().is_empty())
    }
}

pub(crate) fn skipped_report(action: &OrgAction, org: &OrgRecord) -> ActionReport {
    ActionReport {
        action: action.kind(),
        username: org.username.clone(),
        org_name: org.org_name().to_string(),
        title: action.progress_title(org),
        ok: true,
        skipped: true,
        effect: ActionEffect::None,
        message: None,
        exit_code: None,
    }
}

pub(crate) fn run_action(
    cli: &dyn OrgCli,
    action: &OrgAction,
    org: &OrgRecord,
) -> OrgListResult<ActionReport> {
    if action.is_noop() {
        return Ok(skipped_report(action, org));
    }

    let args = action.args(org)?;
    let title = action.progress_title(org);
    tracing::info!(action = ?action.kind(), username = %org.username, "{title}");

    let result = cli.run(&args);
    if !result.succeeded() {
        let detail = cli_error_message(&result, "sf exited unsuccessfully.");
        tracing::warn!(action = ?action.kind(), username = %org.username, %detail, "org action failed");
        return Err(OrgListError::ActionFailed {
            message: action.error_message(org),
            detail,
        });
    }

    Ok(ActionReport {
        action: action.kind(),
        username: org.username.clone(),
        org_name: org.org_name().to_string(),
        title,
        ok: true,
        skipped: false,
        effect: action.effect(),
        message: action.success_message(org),
        exit_code: result.exit_code,
    })
}


#[cfg(test)]
mod tests {
    use super::fake::RecordingCli;
    use super::*;

    fn scratch_org(alias: Option<&str>) -> OrgRecord {
        OrgRecord {
            alias: alias.map(ToOwned::to_owned),
            username: "test-abc@example.com".to_string(),
            status: "Active".to_string(),
            kind: OrgKind::Scratch,
            org_id: None,
            instance_url: None,
            is_default: false,
            is_default_dev_hub: false,
            expiration_date: None,
        }
    }

    #[test]
    fn builds_argv_without_shell_quoting() {
        let org = scratch_org(Some("feature-x"));
        assert_eq!(
            OrgAction::Open.args(&org).expect("open"),
            vec!["org", "open", "-o", "feature-x"]
        );
        assert_eq!(
            OrgAction::SetDefault.args(&org).expect("default"),
            vec!["config", "set", "target-org=feature-x"]
        );
        assert_eq!(
            OrgAction::Logout.args(&org).expect("logout"),
            vec!["org", "logout", "--no-prompt", "-o", "feature-x"]
        );
        assert_eq!(
            OrgAction::Delete.args(&org).expect("delete"),
            vec!["org", "delete", "scratch", "--no-prompt", "-o", "feature-x"]
        );
        assert_eq!(
            OrgAction::Rename {
                alias: " qa ".to_string()
            }
            .args(&org)
            .expect("rename"),
            vec!["alias", "set", "qa=test-abc@example.com"]
        );
    }

    #[test]
    fn targets_username_when_alias_missing() {
        let org = scratch_org(None);
        assert_eq!(
            OrgAction::Open.args(&org).expect("open"),
            vec!["org", "open", "-o", "test-abc@example.com"]
        );
    }

    #[test]
    fn rejects_unsafe_aliases() {
        assert!(normalize_alias("two words").is_err());
        assert!(normalize_alias("a=b").is_err());
        assert!(normalize_alias("--json").is_err());
        assert_eq!(normalize_alias("  ").expect("blank"), None);
        assert_eq!(normalize_alias(" qa ").expect("ok"), Some("qa".to_string()));
    }

    #[test]
    fn delete_is_limited_to_scratch_orgs() {
        let mut org = scratch_org(Some("uat"));
        org.kind = OrgKind::NonScratch;
        let error = OrgAction::Delete.args(&org).unwrap_err();
        assert!(matches!(error, OrgListError::Unsupported(_)));
    }

    #[test]
    fn confirmation_prompts_use_host_labels() {
        let org = scratch_org(Some("feature-x"));
        assert!(OrgAction::Open.confirmation(&org).is_none());

        let prompt = OrgAction::Logout.confirmation(&org).expect("prompt");
        assert_eq!(prompt.message, "Are you sure you want to log out of feature-x?");
        assert_eq!(prompt.accept_label, "Logout");
        assert_eq!(prompt.cancel_label, "Cancel");

        let prompt = OrgAction::SetDefault.confirmation(&org).expect("prompt");
        assert_eq!((prompt.cancel_label.as_str(), prompt.accept_label.as_str()), ("No", "Yes"));
    }

    #[test]
    fn successful_logout_reports_removal() {
        let cli = RecordingCli::default();
        cli.push_ok(r#"{"status":0,"result":["test-abc@example.com"]}"#);
        let org = scratch_org(Some("feature-x"));

        let report = run_action(&cli, &OrgAction::Logout, &org).expect("logout");
        assert!(report.ok);
        assert_eq!(report.effect, ActionEffect::Remove);
        assert_eq!(report.message.as_deref(), Some("Logged out of feature-x."));
        assert_eq!(cli.calls().len(), 1);
    }

    #[test]
    fn failed_action_carries_cli_detail() {
        let cli = RecordingCli::default();
        cli.push_failure(r#"{"status":1,"message":"Browser not found"}"#);
        let org = scratch_org(Some("feature-x"));

        let error = run_action(&cli, &OrgAction::Open, &org).unwrap_err();
        assert_eq!(error.to_string(), "Error opening feature-x. Browser not found");
    }

    #[test]
    fn blank_rename_skips_the_cli() {
        let cli = RecordingCli::default();
        let org = scratch_org(Some("feature-x"));
        let report = run_action(
            &cli,
            &OrgAction::Rename {
                alias: "   ".to_string(),
            },
            &org,
        )
        .expect("noop");
        assert!(report.skipped);
        assert_eq!(report.effect, ActionEffect::None);
        assert!(cli.calls().is_empty());
    }
}
