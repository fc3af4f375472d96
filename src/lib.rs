pub mod attachments;
pub mod cache;
pub mod client;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod guard;
pub mod models;
pub mod redaction;
pub mod session;

use crate::client::ClientCore;
use crate::guard::GuardDecision;
use crate::models::{
    AppSettings, BooleanResponse, EditorSnapshot, LoginPayload, NewNotePayload, Note,
    NoteEditPayload, PendingImageInfo, RegisterPayload, ResetOutcome, RestoreOutcome, SaveReport,
    Session, VerifyPayload, VerifyResponse,
};
use std::path::Path;
use std::sync::Arc;
use tauri::Manager;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

#[derive(Clone)]
struct AppState {
    client: Arc<ClientCore>,
}

// ─── Session Commands ────────────────────────────────────────────────────────

#[tauri::command]
fn restore_session(state: tauri::State<'_, AppState>) -> Result<RestoreOutcome, String> {
    state.client.restore_session().map_err(to_client_error)
}

#[tauri::command]
async fn login(
    state: tauri::State<'_, AppState>,
    payload: LoginPayload,
) -> Result<Session, String> {
    state.client.login(payload).await.map_err(to_client_error)
}

#[tauri::command]
async fn register(
    state: tauri::State<'_, AppState>,
    payload: RegisterPayload,
) -> Result<BooleanResponse, String> {
    state.client.register(payload).await.map_err(to_client_error)
}

#[tauri::command]
async fn logout(state: tauri::State<'_, AppState>) -> Result<BooleanResponse, String> {
    state.client.logout().await.map_err(to_client_error)
}

#[tauri::command]
async fn request_password_reset(
    state: tauri::State<'_, AppState>,
    payload: VerifyPayload,
) -> Result<VerifyResponse, String> {
    state
        .client
        .request_password_reset(payload)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
async fn submit_password_reset(
    state: tauri::State<'_, AppState>,
    new_password: String,
) -> Result<ResetOutcome, String> {
    state
        .client
        .submit_password_reset(new_password)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
fn check_route(state: tauri::State<'_, AppState>) -> Result<GuardDecision, String> {
    Ok(state.client.check_route())
}

// ─── Note Commands ───────────────────────────────────────────────────────────

#[tauri::command]
async fn load_notes(state: tauri::State<'_, AppState>) -> Result<Vec<Note>, String> {
    state.client.load_notes().await.map_err(to_client_error)
}

#[tauri::command]
async fn filtered_notes(
    state: tauri::State<'_, AppState>,
    search_term: String,
    selected_tag: Option<String>,
) -> Result<Vec<Note>, String> {
    state
        .client
        .filtered_notes(search_term, selected_tag)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
async fn tag_universe(state: tauri::State<'_, AppState>) -> Result<Vec<String>, String> {
    state.client.tag_universe().await.map_err(to_client_error)
}

#[tauri::command]
async fn get_note(state: tauri::State<'_, AppState>, note_id: String) -> Result<Note, String> {
    state.client.get_note(note_id).await.map_err(to_client_error)
}

#[tauri::command]
async fn delete_note(
    state: tauri::State<'_, AppState>,
    note_id: String,
) -> Result<BooleanResponse, String> {
    state
        .client
        .delete_note(note_id)
        .await
        .map_err(to_client_error)
}

// ─── Editor Commands ─────────────────────────────────────────────────────────

#[tauri::command]
fn open_note_composer(state: tauri::State<'_, AppState>) -> Result<EditorSnapshot, String> {
    state.client.open_note_composer().map_err(to_client_error)
}

#[tauri::command]
async fn open_note_editor(
    state: tauri::State<'_, AppState>,
    note_id: String,
) -> Result<EditorSnapshot, String> {
    state
        .client
        .open_note_editor(note_id)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
async fn add_pending_image(
    state: tauri::State<'_, AppState>,
    session_id: String,
    file_path: String,
) -> Result<PendingImageInfo, String> {
    state
        .client
        .add_pending_image(session_id, file_path)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
fn remove_pending_image(
    state: tauri::State<'_, AppState>,
    session_id: String,
    attachment_id: String,
) -> Result<BooleanResponse, String> {
    state
        .client
        .remove_pending_image(session_id, attachment_id)
        .map_err(to_client_error)
}

#[tauri::command]
async fn submit_new_note(
    state: tauri::State<'_, AppState>,
    session_id: String,
    payload: NewNotePayload,
) -> Result<Note, String> {
    state
        .client
        .submit_new_note(session_id, payload)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
async fn save_note_edits(
    state: tauri::State<'_, AppState>,
    session_id: String,
    payload: NoteEditPayload,
) -> Result<SaveReport, String> {
    state
        .client
        .save_note_edits(session_id, payload)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
async fn delete_note_image(
    state: tauri::State<'_, AppState>,
    session_id: String,
    image_id: String,
) -> Result<BooleanResponse, String> {
    state
        .client
        .delete_note_image(session_id, image_id)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
fn close_note_editor(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<BooleanResponse, String> {
    state
        .client
        .close_note_editor(session_id)
        .map_err(to_client_error)
}

// ─── Settings Commands ───────────────────────────────────────────────────────

#[tauri::command]
fn get_settings(state: tauri::State<'_, AppState>) -> Result<AppSettings, String> {
    state.client.get_settings().map_err(to_client_error)
}

#[tauri::command]
async fn update_settings(
    state: tauri::State<'_, AppState>,
    update: serde_json::Value,
) -> Result<AppSettings, String> {
    state
        .client
        .update_settings(update)
        .await
        .map_err(to_client_error)
}

// ─── App Setup ───────────────────────────────────────────────────────────────

pub fn run() {
    tauri::Builder::default()
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir().map_err(|error| error.to_string())?;
            std::fs::create_dir_all(&app_data_dir).map_err(|error| error.to_string())?;
            init_tracing(&app_data_dir).map_err(|error| error.to_string())?;

            let client = ClientCore::new(app_data_dir).map_err(|error| error.to_string())?;
            let handle = app.handle().clone();

            tauri::async_runtime::spawn({
                let client = client.clone();
                async move {
                    client.attach_app_handle(handle).await;

                    // Restore only after the handle is attached so the first
                    // slot change reaches the webview.
                    if let Err(error) = client.restore_session() {
                        tracing::warn!(error = %error, "startup session restore failed");
                    }
                }
            });

            tauri::async_runtime::spawn({
                let client = client.clone();
                async move {
                    let mut receiver = client.session_store().subscribe();
                    loop {
                        if receiver.changed().await.is_err() {
                            break;
                        }
                        let snapshot = receiver.borrow_and_update().clone();
                        client.notify_session_changed(snapshot);
                    }
                }
            });

            tauri::async_runtime::spawn({
                let client = client.clone();
                async move {
                    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
                    loop {
                        interval.tick().await;
                        client.expire_due_session();
                    }
                }
            });

            app.manage(AppState { client });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            restore_session,
            login,
            register,
            logout,
            request_password_reset,
            submit_password_reset,
            check_route,
            load_notes,
            filtered_notes,
            tag_universe,
            get_note,
            delete_note,
            open_note_composer,
            open_note_editor,
            add_pending_image,
            remove_pending_image,
            submit_new_note,
            save_note_edits,
            delete_note_image,
            close_note_editor,
            get_settings,
            update_settings
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}

fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "client.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
