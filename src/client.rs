use crate::attachments::{mime_for_file, EditorRegistry};
use crate::cache::{split_tags, NoteCache};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::gateway::{ApiGateway, HttpGateway, NotesApi};
use crate::guard::{self, GuardDecision};
use crate::models::{
    AppEventEnvelope, AppSettings, BooleanResponse, EditorSnapshot, LoginPayload, NewNotePayload,
    Note, NoteEditPayload, PendingImageInfo, RegisterPayload, ResetOutcome, RestoreOutcome,
    SaveReport, Session, VerifyPayload, VerifyResponse,
};
use crate::redaction::Redactor;
use crate::session::{KeyringVault, SessionStore, TokenVault};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{AppHandle, Emitter};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Coordinates the session store, the API gateway, the note cache, and the
/// editor registry behind the command surface.
pub struct ClientCore {
    db: Arc<Database>,
    session: Arc<SessionStore>,
    gateway: ApiGateway,
    cache: Mutex<NoteCache>,
    editors: EditorRegistry,
    redactor: RwLock<Redactor>,
    app_handle: RwLock<Option<AppHandle>>,
}

impl ClientCore {
    pub fn new(app_data_dir: PathBuf) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&app_data_dir.join("state.sqlite"))?);
        let settings = db.get_settings()?;
        let vault: Arc<dyn TokenVault> = Arc::new(KeyringVault::new());
        let api: Arc<dyn NotesApi> = Arc::new(HttpGateway::new(&settings.server_url)?);
        Self::with_components(app_data_dir, db, vault, api)
    }

    /// Wires the core from externally built parts. Tests swap in a memory
    /// vault and a fake API here.
    pub fn with_components(
        app_data_dir: PathBuf,
        db: Arc<Database>,
        vault: Arc<dyn TokenVault>,
        api: Arc<dyn NotesApi>,
    ) -> AppResult<Arc<Self>> {
        let settings = db.get_settings()?;
        let session = Arc::new(SessionStore::new(vault));
        let editors = EditorRegistry::new(app_data_dir.join("previews"))?;
        match editors.sweep_stale_previews() {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "swept stale preview files");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(error = %error, "failed to sweep stale preview files");
            }
        }

        Ok(Arc::new(Self {
            db,
            gateway: ApiGateway::new(api, session.clone()),
            session,
            cache: Mutex::new(NoteCache::new()),
            editors,
            redactor: RwLock::new(Redactor::new(settings.redact_aggressive)),
            app_handle: RwLock::new(None),
        }))
    }

    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn attach_app_handle(&self, app_handle: AppHandle) {
        let mut writer = self.app_handle.write().await;
        *writer = Some(app_handle);
    }

    fn emit_app_event(&self, event_type: &str, payload: serde_json::Value) {
        let envelope = AppEventEnvelope {
            r#type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
            event_id: Uuid::new_v4().to_string(),
        };
        if let Ok(handle_opt) = self.app_handle.try_read() {
            if let Some(handle) = handle_opt.as_ref() {
                let _ = handle.emit("app_event", envelope);
            }
        }
    }

    /// Pushes the new session slot value to the webview.
    pub fn notify_session_changed(&self, session: Option<Session>) {
        let phase = guard::phase(session.as_ref());
        self.emit_app_event(
            "session.changed",
            serde_json::json!({
                "phase": phase,
                "session": session,
            }),
        );
    }

    /// Watchdog tick: turns a passed expiry into a local logout plus an
    /// event the webview can surface as a notice.
    pub fn expire_due_session(&self) -> bool {
        let expired = self.session.expire_if_due();
        if expired {
            tracing::info!("session expired while idle");
            self.emit_app_event("session.expired", serde_json::json!({}));
        }
        expired
    }

    async fn log_error(&self, context: &'static str, error: &AppError) {
        let redacted = self.redactor.read().await.redact(&error.to_string());
        tracing::warn!(context, error = %redacted.content, "operation failed");
    }

    // ─── Session ────────────────────────────────────────────────────────────

    pub fn restore_session(&self) -> AppResult<RestoreOutcome> {
        let outcome = self.session.restore()?;
        tracing::info!(reason = outcome.reason.as_str(), "session restore");
        Ok(outcome)
    }

    pub async fn login(&self, payload: LoginPayload) -> AppResult<Session> {
        match self.gateway.login(&payload).await {
            Ok(response) => self.session.login(response.token),
            Err(error) => {
                self.log_error("login", &error).await;
                Err(error)
            }
        }
    }

    pub async fn register(&self, payload: RegisterPayload) -> AppResult<BooleanResponse> {
        match self.gateway.register(&payload).await {
            Ok(()) => Ok(BooleanResponse { success: true }),
            Err(error) => {
                self.log_error("register", &error).await;
                Err(error)
            }
        }
    }

    /// Clears local session state first, then tells the server. A failed
    /// notification never brings the session back.
    pub async fn logout(&self) -> AppResult<BooleanResponse> {
        let token = self.session.current().map(|session| session.token);
        self.session.logout()?;
        self.cache.lock().await.replace_all(Vec::new());

        if let Some(token) = token {
            if let Err(error) = self.gateway.notify_logout(&token).await {
                tracing::debug!(error = %error, "logout notification failed");
            }
        }
        Ok(BooleanResponse { success: true })
    }

    // ─── Password Recovery ──────────────────────────────────────────────────

    /// Step one of recovery: the security-question check. A successful answer
    /// yields a short-lived reset token which is kept vault-side, never in
    /// the webview.
    pub async fn request_password_reset(&self, payload: VerifyPayload) -> AppResult<VerifyResponse> {
        let response = match self.gateway.verify_security_answer(&payload).await {
            Ok(response) => response,
            Err(error) => {
                self.log_error("verify security answer", &error).await;
                return Err(error);
            }
        };

        if response.success {
            if let Some(token) = response.token.as_deref() {
                self.session.store_reset_token(token)?;
            }
        }

        let sanitized = VerifyResponse {
            success: response.success,
            token: None,
            message: response.message,
        };
        Ok(sanitized)
    }

    /// Step two of recovery: submits the new password with the stored reset
    /// token. The token is single-use on success and kept for a retry on
    /// failure.
    pub async fn submit_password_reset(&self, new_password: String) -> AppResult<ResetOutcome> {
        let Some(reset_token) = self.session.load_reset_token()? else {
            return Err(AppError::NotFound(
                "No password reset in progress".to_string(),
            ));
        };

        let outcome = match self.gateway.reset_password(&reset_token, &new_password).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.log_error("password reset", &error).await;
                return Err(error);
            }
        };

        if outcome.success {
            self.session.clear_reset_token()?;
        }
        Ok(outcome)
    }

    // ─── Notes ──────────────────────────────────────────────────────────────

    pub async fn load_notes(&self) -> AppResult<Vec<Note>> {
        let notes = self.gateway.list_notes().await?;
        let mut cache = self.cache.lock().await;
        cache.replace_all(notes);
        Ok(cache.notes().to_vec())
    }

    pub async fn filtered_notes(
        &self,
        search_term: String,
        selected_tag: Option<String>,
    ) -> AppResult<Vec<Note>> {
        let cache = self.cache.lock().await;
        Ok(cache.filtered(&search_term, selected_tag.as_deref()))
    }

    pub async fn tag_universe(&self) -> AppResult<Vec<String>> {
        Ok(self.cache.lock().await.tag_universe())
    }

    pub async fn get_note(&self, note_id: String) -> AppResult<Note> {
        self.gateway.get_note(&note_id).await
    }

    /// The cached note goes away only after the server confirms the delete.
    pub async fn delete_note(&self, note_id: String) -> AppResult<BooleanResponse> {
        self.gateway.delete_note(&note_id).await?;
        let removed = self.cache.lock().await.remove(&note_id);
        if !removed {
            tracing::debug!(note_id, "deleted note was not cached");
        }
        Ok(BooleanResponse { success: true })
    }

    // ─── Editor Sessions ────────────────────────────────────────────────────

    pub fn open_note_composer(&self) -> AppResult<EditorSnapshot> {
        let session_id = self.editors.open(None, Vec::new())?;
        Ok(EditorSnapshot {
            session_id,
            note: None,
            images: Vec::new(),
            pending: Vec::new(),
        })
    }

    pub async fn open_note_editor(&self, note_id: String) -> AppResult<EditorSnapshot> {
        let (note, images) = tokio::join!(
            self.gateway.get_note(&note_id),
            self.gateway.images_for_note(&note_id)
        );
        let note = note?;
        // A failed image fetch degrades to an empty list; the note still opens.
        let images = images.unwrap_or_else(|error| {
            tracing::warn!(note_id, error = %error, "failed to load images for note");
            Vec::new()
        });

        let session_id = self.editors.open(Some(note_id), images.clone())?;
        Ok(EditorSnapshot {
            session_id,
            note: Some(note),
            images,
            pending: Vec::new(),
        })
    }

    pub async fn add_pending_image(
        &self,
        session_id: String,
        file_path: String,
    ) -> AppResult<PendingImageInfo> {
        let path = PathBuf::from(&file_path);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| AppError::Invalid(format!("Not a usable file path: {}", file_path)))?
            .to_string();
        let mime_type = mime_for_file(&file_name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| AppError::Io(format!("Failed to read {}: {}", file_path, error)))?;

        self.editors.add_pending(&session_id, file_name, mime_type, bytes)
    }

    pub fn remove_pending_image(
        &self,
        session_id: String,
        attachment_id: String,
    ) -> AppResult<BooleanResponse> {
        let removed = self.editors.discard_pending(&session_id, &attachment_id)?;
        Ok(BooleanResponse { success: removed })
    }

    /// Creates the note in one call, images included. On failure the staged
    /// images fall back to pending so the user can retry from the composer.
    pub async fn submit_new_note(
        &self,
        session_id: String,
        payload: NewNotePayload,
    ) -> AppResult<Note> {
        let Some(identity) = self.session.current() else {
            return Err(AppError::AuthExpired("No active session".to_string()));
        };
        let user_id = identity.user_id.unwrap_or(identity.email);

        let staged = self.editors.begin_upload(&session_id)?;
        match self.gateway.create_note(&payload, &user_id, &staged).await {
            Ok(note) => {
                let _ = self.editors.finish_upload(&session_id, note.images.clone());
                let _ = self.editors.close(&session_id);
                self.cache.lock().await.insert(note.clone());
                Ok(note)
            }
            Err(error) => {
                let _ = self.editors.fail_upload(&session_id);
                self.log_error("create note", &error).await;
                Err(error)
            }
        }
    }

    /// Saves edits in two server calls: the note fields first, then any
    /// pending images. A failed upload is reported in the result instead of
    /// failing the save, since the note update already stuck.
    pub async fn save_note_edits(
        &self,
        session_id: String,
        payload: NoteEditPayload,
    ) -> AppResult<SaveReport> {
        let note_id = self
            .editors
            .note_id(&session_id)?
            .ok_or_else(|| AppError::Invalid("Editor session has no note to update".to_string()))?;

        self.gateway.update_note(&note_id, &payload).await?;
        self.apply_local_update(&note_id, &payload).await;

        let staged = self.editors.begin_upload(&session_id)?;
        if staged.is_empty() {
            let images = self.editors.persisted_images(&session_id)?;
            return Ok(SaveReport {
                note_updated: true,
                images_uploaded: 0,
                image_error: None,
                images,
            });
        }

        match self.gateway.upload_images(&note_id, &staged).await {
            Ok(()) => {
                let refreshed = match self.gateway.images_for_note(&note_id).await {
                    Ok(images) => images,
                    Err(error) => {
                        tracing::warn!(note_id, error = %error, "image refresh after upload failed");
                        self.editors.persisted_images(&session_id).unwrap_or_default()
                    }
                };
                let applied = self.editors.finish_upload(&session_id, refreshed)?;
                let images = if applied {
                    self.editors.persisted_images(&session_id)?
                } else {
                    Vec::new()
                };
                Ok(SaveReport {
                    note_updated: true,
                    images_uploaded: staged.len() as u32,
                    image_error: None,
                    images,
                })
            }
            Err(error) => {
                let _ = self.editors.fail_upload(&session_id);
                self.log_error("image upload", &error).await;
                Ok(SaveReport {
                    note_updated: true,
                    images_uploaded: 0,
                    image_error: Some(error.to_string()),
                    images: self.editors.persisted_images(&session_id).unwrap_or_default(),
                })
            }
        }
    }

    async fn apply_local_update(&self, note_id: &str, payload: &NoteEditPayload) {
        let mut cache = self.cache.lock().await;
        let Some(existing) = cache.get(note_id) else {
            return;
        };
        let mut updated = existing.clone();
        updated.title = payload.title.clone();
        updated.content = payload.content.clone();
        updated.tags = split_tags(&payload.tag);
        cache.apply_update(updated);
    }

    /// Deletes a persisted image server-side, then drops it from the editor
    /// session. The local list keeps the image whenever the server call fails.
    pub async fn delete_note_image(
        &self,
        session_id: String,
        image_id: String,
    ) -> AppResult<BooleanResponse> {
        self.gateway.delete_image(&image_id).await?;
        if !self.editors.remove_persisted(&session_id, &image_id)? {
            tracing::debug!(image_id, "deleted image was not tracked by the editor session");
        }
        Ok(BooleanResponse { success: true })
    }

    pub fn close_note_editor(&self, session_id: String) -> AppResult<BooleanResponse> {
        Ok(BooleanResponse {
            success: self.editors.close(&session_id)?,
        })
    }

    // ─── Routing & Settings ─────────────────────────────────────────────────

    pub fn check_route(&self) -> GuardDecision {
        guard::evaluate(self.session.current().as_ref())
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    /// A changed server URL takes effect on the next launch; the gateway is
    /// built once at startup.
    pub async fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let settings = self.db.update_settings(update)?;
        let mut redactor = self.redactor.write().await;
        *redactor = Redactor::new(settings.redact_aggressive);
        Ok(settings)
    }
}
