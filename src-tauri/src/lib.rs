mod cache;
mod commands;
mod confirmations;
mod dtos;
mod error;
mod org_actions;
mod org_list;
mod org_tree;
mod preferences;
mod provider;
mod settings;
mod sf_cli;
mod state;

use tauri::Manager;

use crate::state::OrgListState;

pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "org_list_desktop_lib=info,tauri=info".into()),
        )
        .init();

    tauri::Builder::default()
        .setup(|app| {
            let data_dir = app.path().app_data_dir()?;
            app.manage(OrgListState::initialize(&data_dir));
            commands::spawn_initial_load(app.handle().clone());
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::org_list_get_children,
            commands::org_list_get_tree,
            commands::org_list_reload,
            commands::org_open,
            commands::org_rename,
            commands::org_set_default,
            commands::org_logout,
            commands::org_delete,
            commands::org_toggle_favorite,
            commands::org_set_hidden,
            commands::settings_get,
            commands::settings_update,
            commands::sf_cli_status
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
