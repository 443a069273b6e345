use tauri::{AppHandle, Emitter, Manager};
use uuid::Uuid;

use crate::confirmations::confirm;
use crate::dtos::{
    OrgActionPayload, OrgActionResponse, OrgFavoritePayload, OrgHiddenPayload,
    OrgListChangedEvent, OrgListChildrenPayload, OrgListLoadingEvent, OrgListReloadPayload,
    OrgListReloadResponse, OrgNodesResponse, OrgPreferenceResponse, OrgTreeResponse,
    SettingsResponse, SfCliStatusResponse,
};
use crate::org_actions::{ActionEffect, OrgAction};
use crate::settings::{update_settings, OrgListSettingsUpdate};
use crate::sf_cli::{cli_version, evaluate_sf_binary_status};
use crate::state::{cli_for, OrgListState};

pub(crate) const ORG_LIST_LOADING_EVENT: &str = "org-list-loading";
pub(crate) const ORG_LIST_CHANGED_EVENT: &str = "org-list-changed";

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn emit_loading(app: &AppHandle, loading: bool) {
    if let Err(error) = app.emit(ORG_LIST_LOADING_EVENT, OrgListLoadingEvent { loading }) {
        tracing::warn!(%error, "failed to emit {ORG_LIST_LOADING_EVENT}");
    }
}

pub(crate) fn emit_changed(app: &AppHandle, reason: &str, request_id: &str) {
    let fingerprint = app.state::<OrgListState>().provider.fingerprint();
    let payload = OrgListChangedEvent {
        reason: reason.to_string(),
        request_id: request_id.to_string(),
        fingerprint,
    };
    if let Err(error) = app.emit(ORG_LIST_CHANGED_EVENT, payload) {
        tracing::warn!(%error, "failed to emit {ORG_LIST_CHANGED_EVENT}");
    }
}

/// Forced reload off the command thread, announced once the tree is updated.
fn spawn_reload(app: AppHandle, reason: &'static str, request_id: String) {
    std::thread::spawn(move || {
        let state = app.state::<OrgListState>();
        if let Err(error) = state.provider.reload(true) {
            tracing::warn!(%error, reason, "org list reload failed");
        }
        emit_changed(&app, reason, &request_id);
    });
}

/// First load after startup; the tree shows its loading node until this
/// finishes.
pub(crate) fn spawn_initial_load(app: AppHandle) {
    std::thread::spawn(move || {
        let request_id = request_id();
        emit_loading(&app, true);
        let state = app.state::<OrgListState>();
        if let Err(error) = state.provider.init() {
            tracing::warn!(%error, "initial org list load failed");
        }
        emit_loading(&app, false);
        emit_changed(&app, "init", &request_id);
    });
}

#[tauri::command]
pub fn org_list_get_children(
    app: AppHandle,
    payload: OrgListChildrenPayload,
) -> OrgNodesResponse {
    let request_id = request_id();
    let state = app.state::<OrgListState>();
    let loading = state.provider.is_loading();

    match state.provider.children(payload.parent_id.as_deref()) {
        Ok(nodes) => OrgNodesResponse {
            request_id,
            ok: true,
            loading,
            nodes,
            error: None,
        },
        Err(error) => OrgNodesResponse {
            request_id,
            ok: false,
            loading,
            nodes: Vec::new(),
            error: Some(error.to_string()),
        },
    }
}

#[tauri::command]
pub fn org_list_get_tree(app: AppHandle) -> OrgTreeResponse {
    let request_id = request_id();
    match app.state::<OrgListState>().provider.tree_view() {
        Ok(tree) => OrgTreeResponse {
            request_id,
            ok: true,
            tree: Some(tree),
            error: None,
        },
        Err(error) => OrgTreeResponse {
            request_id,
            ok: false,
            tree: None,
            error: Some(error.to_string()),
        },
    }
}

#[tauri::command]
pub async fn org_list_reload(
    app: AppHandle,
    payload: OrgListReloadPayload,
) -> OrgListReloadResponse {
    let request_id = request_id();
    let force = payload.force.unwrap_or(true);
    let worker_app = app.clone();

    let loaded = tauri::async_runtime::spawn_blocking(move || {
        worker_app.state::<OrgListState>().provider.reload(force)
    })
    .await;

    let response = match loaded {
        Ok(Ok(outcome)) => OrgListReloadResponse {
            request_id,
            ok: true,
            outcome: Some(outcome),
            error: None,
        },
        Ok(Err(error)) => OrgListReloadResponse {
            request_id,
            ok: false,
            outcome: None,
            error: Some(error.to_string()),
        },
        Err(error) => OrgListReloadResponse {
            request_id,
            ok: false,
            outcome: None,
            error: Some(format!("Failed to run org list worker thread: {error}")),
        },
    };

    // Also sent on failure so the tree can show the error.
    emit_changed(&app, "reload", &response.request_id);
    response
}

async fn run_org_action(
    app: AppHandle,
    payload: OrgActionPayload,
    action: OrgAction,
) -> OrgActionResponse {
    let request_id = request_id();

    let org = match app.state::<OrgListState>().provider.lookup(&payload.username) {
        Ok(org) => org,
        Err(error) => return OrgActionResponse::failed(request_id, error.to_string()),
    };

    if !payload.confirmed.unwrap_or(false) {
        if let Some(prompt) = action.confirmation(&org) {
            if !confirm(&prompt).await {
                tracing::debug!(action = action.kind().tag(), username = %org.username, "cancelled");
                return OrgActionResponse {
                    request_id,
                    ok: false,
                    cancelled: Some(true),
                    report: None,
                    error: None,
                };
            }
        }
    }

    let kind = action.kind();
    let worker_app = app.clone();
    let username = org.username.clone();
    let ran = tauri::async_runtime::spawn_blocking(move || {
        worker_app
            .state::<OrgListState>()
            .provider
            .run_action(&action, &username)
    })
    .await;

    match ran {
        Ok(Ok(report)) => {
            if !report.skipped && report.effect != ActionEffect::None {
                emit_changed(&app, kind.tag(), &request_id);
            }
            OrgActionResponse {
                request_id,
                ok: true,
                cancelled: None,
                report: Some(report),
                error: None,
            }
        }
        Ok(Err(error)) => OrgActionResponse::failed(request_id, error.to_string()),
        Err(error) => OrgActionResponse::failed(
            request_id,
            format!("Failed to run org action worker thread: {error}"),
        ),
    }
}

#[tauri::command]
pub async fn org_open(app: AppHandle, payload: OrgActionPayload) -> OrgActionResponse {
    run_org_action(app, payload, OrgAction::Open).await
}

#[tauri::command]
pub async fn org_rename(app: AppHandle, payload: OrgActionPayload) -> OrgActionResponse {
    let alias = payload.alias.clone().unwrap_or_default();
    run_org_action(app, payload, OrgAction::Rename { alias }).await
}

#[tauri::command]
pub async fn org_set_default(
    app: AppHandle,
    payload: OrgActionPayload,
) -> OrgActionResponse {
    run_org_action(app, payload, OrgAction::SetDefault).await
}

#[tauri::command]
pub async fn org_logout(app: AppHandle, payload: OrgActionPayload) -> OrgActionResponse {
    run_org_action(app, payload, OrgAction::Logout).await
}

#[tauri::command]
pub async fn org_delete(app: AppHandle, payload: OrgActionPayload) -> OrgActionResponse {
    run_org_action(app, payload, OrgAction::Delete).await
}

#[tauri::command]
pub fn org_toggle_favorite(
    app: AppHandle,
    payload: OrgFavoritePayload,
) -> OrgPreferenceResponse {
    let request_id = request_id();
    let result = app
        .state::<OrgListState>()
        .provider
        .toggle_favorite(&payload.username);

    match result {
        Ok(is_favorite) => {
            emit_changed(&app, "favorite", &request_id);
            OrgPreferenceResponse {
                request_id,
                ok: true,
                username: payload.username,
                is_favorite: Some(is_favorite),
                is_hidden: None,
                changed: Some(true),
                error: None,
            }
        }
        Err(error) => OrgPreferenceResponse {
            request_id,
            ok: false,
            username: payload.username,
            is_favorite: None,
            is_hidden: None,
            changed: None,
            error: Some(error.to_string()),
        },
    }
}

#[tauri::command]
pub fn org_set_hidden(app: AppHandle, payload: OrgHiddenPayload) -> OrgPreferenceResponse {
    let request_id = request_id();
    let result = app
        .state::<OrgListState>()
        .provider
        .set_hidden(&payload.username, payload.hidden);

    match result {
        Ok(changed) => {
            if changed {
                emit_changed(&app, "hidden", &request_id);
            }
            OrgPreferenceResponse {
                request_id,
                ok: true,
                username: payload.username,
                is_favorite: None,
                is_hidden: Some(payload.hidden),
                changed: Some(changed),
                error: None,
            }
        }
        Err(error) => OrgPreferenceResponse {
            request_id,
            ok: false,
            username: payload.username,
            is_favorite: None,
            is_hidden: None,
            changed: None,
            error: Some(error.to_string()),
        },
    }
}

#[tauri::command]
pub fn settings_get(app: AppHandle) -> SettingsResponse {
    let request_id = request_id();
    let state = app.state::<OrgListState>();
    let settings_file = Some(state.settings_path().display().to_string());

    match state.settings() {
        Ok(settings) => SettingsResponse {
            request_id,
            ok: true,
            settings: Some(settings),
            settings_file,
            error: None,
        },
        Err(error) => SettingsResponse {
            request_id,
            ok: false,
            settings: None,
            settings_file,
            error: Some(error.to_string()),
        },
    }
}

#[tauri::command]
pub fn settings_update(app: AppHandle, payload: OrgListSettingsUpdate) -> SettingsResponse {
    let request_id = request_id();
    let state = app.state::<OrgListState>();
    let settings_file = Some(state.settings_path().display().to_string());

    let applied = update_settings(state.settings_path(), &payload).and_then(|settings| {
        let cli_changed = state.apply_settings(settings.clone())?;
        Ok((settings, cli_changed))
    });

    match applied {
        Ok((settings, cli_changed)) => {
            tracing::info!(
                show_hidden = settings.show_hidden,
                cache_ttl_seconds = settings.cache_ttl_seconds,
                command_timeout_seconds = settings.command_timeout_seconds,
                cli_changed,
                "settings updated"
            );
            if cli_changed {
                // The cache was dropped with the old CLI; refill it from the new one.
                spawn_reload(app.clone(), "settings", request_id.clone());
            } else if payload.show_hidden.is_some() {
                emit_changed(&app, "settings", &request_id);
            }
            SettingsResponse {
                request_id,
                ok: true,
                settings: Some(settings),
                settings_file,
                error: None,
            }
        }
        Err(error) => SettingsResponse {
            request_id,
            ok: false,
            settings: None,
            settings_file,
            error: Some(error.to_string()),
        },
    }
}

/// Re-evaluates the binary and asks it for its version.
#[tauri::command]
pub async fn sf_cli_status(app: AppHandle) -> SfCliStatusResponse {
    let request_id = request_id();
    let settings = match app.state::<OrgListState>().settings() {
        Ok(settings) => settings,
        Err(error) => {
            return SfCliStatusResponse {
                request_id,
                ok: false,
                status: None,
                error: Some(error.to_string()),
            }
        }
    };

    let checked = tauri::async_runtime::spawn_blocking(move || {
        let (cli, resolution) = cli_for(&settings);
        let mut status = evaluate_sf_binary_status(&resolution);
        if !status.has_issue {
            match cli_version(cli.as_ref()) {
                Ok(version) => status.version = Some(version),
                Err(issue) => {
                    status.has_issue = true;
                    status.issue = Some(issue);
                }
            }
        }
        status
    })
    .await;

    match checked {
        Ok(status) => {
            if let Err(error) = app.state::<OrgListState>().store_sf_status(status.clone()) {
                tracing::warn!(%error, "failed to store sf status");
            }
            SfCliStatusResponse {
                request_id,
                ok: !status.has_issue,
                status: Some(status),
                error: None,
            }
        }
        Err(error) => SfCliStatusResponse {
            request_id,
            ok: false,
            status: app.state::<OrgListState>().sf_status(),
            error: Some(format!("Failed to run sf status worker thread: {error}")),
        },
    }
}
