use crate::errors::{AppError, AppResult};
use crate::models::{
    AuthTokenResponse, LoginPayload, NewNotePayload, Note, NoteEditPayload, PersistedImage,
    RegisterPayload, ResetOutcome, VerifyPayload, VerifyResponse,
};
use crate::session::SessionStore;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NETWORK_MESSAGE: &str = "Network error. Please try again.";

/// An image staged for upload, read off disk and ready to become a
/// multipart file part.
#[derive(Debug, Clone)]
pub struct UploadImage {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// The notes backend as the client sees it. Tokens come in as plain strings
/// so implementations stay free of session-store concerns.
#[async_trait]
pub trait NotesApi: Send + Sync {
    async fn login(&self, payload: &LoginPayload) -> AppResult<AuthTokenResponse>;
    async fn register(&self, payload: &RegisterPayload) -> AppResult<()>;
    async fn verify_security_answer(&self, payload: &VerifyPayload) -> AppResult<VerifyResponse>;
    async fn reset_password(&self, reset_token: &str, new_password: &str)
        -> AppResult<ResetOutcome>;
    async fn notify_logout(&self, token: &str) -> AppResult<()>;

    async fn list_notes(&self, token: &str) -> AppResult<Vec<Note>>;
    async fn get_note(&self, token: &str, note_id: &str) -> AppResult<Note>;
    async fn create_note(
        &self,
        token: &str,
        payload: &NewNotePayload,
        user_id: &str,
        images: &[UploadImage],
    ) -> AppResult<Note>;
    async fn update_note(
        &self,
        token: &str,
        note_id: &str,
        payload: &NoteEditPayload,
    ) -> AppResult<()>;
    async fn delete_note(&self, token: &str, note_id: &str) -> AppResult<()>;

    async fn images_for_note(&self, token: &str, note_id: &str) -> AppResult<Vec<PersistedImage>>;
    async fn upload_images(
        &self,
        token: &str,
        note_id: &str,
        images: &[UploadImage],
    ) -> AppResult<()>;
    async fn delete_image(&self, token: &str, image_id: &str) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(default)]
    message: Option<String>,
}

/// reqwest-backed implementation speaking the backend's REST surface.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| AppError::Internal(format!("Failed to build HTTP client: {}", error)))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn network_error(operation: &'static str, error: reqwest::Error) -> AppError {
    tracing::debug!(
        operation,
        timeout = error.is_timeout(),
        connect = error.is_connect(),
        "transport failure"
    );
    AppError::Network(NETWORK_MESSAGE.to_string())
}

/// Turns a non-2xx response into an API error, preferring the server's own
/// `message` over the per-operation fallback.
async fn ensure_success(
    response: reqwest::Response,
    default_message: &str,
) -> AppResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ServerMessage>(&body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or_else(|| default_message.to_string());

    Err(AppError::Api { status, message })
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> AppResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|error| AppError::Internal(format!("Failed to parse {}: {}", what, error)))
}

fn image_part(image: &UploadImage) -> AppResult<reqwest::multipart::Part> {
    reqwest::multipart::Part::bytes(image.bytes.clone())
        .file_name(image.file_name.clone())
        .mime_str(&image.mime_type)
        .map_err(|error| AppError::Internal(format!("Failed to build image part: {}", error)))
}

#[async_trait]
impl NotesApi for HttpGateway {
    async fn login(&self, payload: &LoginPayload) -> AppResult<AuthTokenResponse> {
        let response = self
            .client
            .post(self.url("/api/auth/login"))
            .json(payload)
            .send()
            .await
            .map_err(|error| network_error("login", error))?;
        let response =
            ensure_success(response, "Login failed. Please check your credentials.").await?;
        parse_json(response, "login response").await
    }

    async fn register(&self, payload: &RegisterPayload) -> AppResult<()> {
        let response = self
            .client
            .post(self.url("/api/auth/register"))
            .json(payload)
            .send()
            .await
            .map_err(|error| network_error("register", error))?;
        ensure_success(response, "Registration failed. Please try again.").await?;
        Ok(())
    }

    async fn verify_security_answer(&self, payload: &VerifyPayload) -> AppResult<VerifyResponse> {
        let response = self
            .client
            .post(self.url("/api/auth/verify"))
            .json(payload)
            .send()
            .await
            .map_err(|error| network_error("verify", error))?;
        let response = ensure_success(response, "Verification failed. Please try again.").await?;
        parse_json(response, "verification response").await
    }

    async fn reset_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> AppResult<ResetOutcome> {
        let response = self
            .client
            .post(self.url("/api/auth/reset-password"))
            .query(&[("token", reset_token)])
            .json(&serde_json::json!({ "newPassword": new_password }))
            .send()
            .await
            .map_err(|error| network_error("reset_password", error))?;
        let response = ensure_success(response, "Password reset failed.").await?;
        parse_json(response, "password reset response").await
    }

    async fn notify_logout(&self, token: &str) -> AppResult<()> {
        let response = self
            .client
            .post(self.url("/api/auth/logout"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| network_error("logout", error))?;
        ensure_success(response, "Logout failed.").await?;
        Ok(())
    }

    async fn list_notes(&self, token: &str) -> AppResult<Vec<Note>> {
        let response = self
            .client
            .get(self.url("/notes/get"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| network_error("list_notes", error))?;
        let response = ensure_success(response, "Failed to load notes.").await?;
        parse_json(response, "note list").await
    }

    async fn get_note(&self, token: &str, note_id: &str) -> AppResult<Note> {
        let response = self
            .client
            .get(self.url(&format!("/notes/get/{}", note_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| network_error("get_note", error))?;
        let response = ensure_success(response, "Failed to load the note.").await?;
        parse_json(response, "note").await
    }

    async fn create_note(
        &self,
        token: &str,
        payload: &NewNotePayload,
        user_id: &str,
        images: &[UploadImage],
    ) -> AppResult<Note> {
        let mut form = reqwest::multipart::Form::new()
            .text("title", payload.title.clone())
            .text("content", payload.content.clone())
            .text("tags", payload.tags.join(","))
            .text("userId", user_id.to_string());
        for image in images {
            form = form.part("images", image_part(image)?);
        }

        let response = self
            .client
            .post(self.url("/notes/create"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|error| network_error("create_note", error))?;
        let response = ensure_success(response, "Failed to create the note.").await?;
        parse_json(response, "created note").await
    }

    async fn update_note(
        &self,
        token: &str,
        note_id: &str,
        payload: &NoteEditPayload,
    ) -> AppResult<()> {
        let form = reqwest::multipart::Form::new()
            .text("title", payload.title.clone())
            .text("content", payload.content.clone())
            .text("tag", payload.tag.clone());

        let response = self
            .client
            .put(self.url(&format!("/notes/edit/{}", note_id)))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|error| network_error("update_note", error))?;
        ensure_success(response, "Failed to update the note.").await?;
        Ok(())
    }

    async fn delete_note(&self, token: &str, note_id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/notes/delete/{}", note_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| network_error("delete_note", error))?;
        ensure_success(response, "Failed to delete the note.").await?;
        Ok(())
    }

    async fn images_for_note(&self, token: &str, note_id: &str) -> AppResult<Vec<PersistedImage>> {
        let response = self
            .client
            .get(self.url(&format!("/image/note/{}", note_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| network_error("images_for_note", error))?;
        let response = ensure_success(response, "Failed to load images.").await?;
        parse_json(response, "image list").await
    }

    async fn upload_images(
        &self,
        token: &str,
        note_id: &str,
        images: &[UploadImage],
    ) -> AppResult<()> {
        let mut form = reqwest::multipart::Form::new();
        for image in images {
            form = form.part("image", image_part(image)?);
        }

        let response = self
            .client
            .post(self.url(&format!("/image/{}/images", note_id)))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|error| network_error("upload_images", error))?;
        ensure_success(response, "Failed to upload images.").await?;
        Ok(())
    }

    async fn delete_image(&self, token: &str, image_id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/image/delete/{}", image_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| network_error("delete_image", error))?;
        ensure_success(response, "Failed to delete the image.").await?;
        Ok(())
    }
}

/// Session-aware front of the API. Authenticated operations take their
/// bearer token from the session store at call time, so an expired session
/// turns into a local logout instead of a doomed request.
pub struct ApiGateway {
    api: Arc<dyn NotesApi>,
    session: Arc<SessionStore>,
}

impl ApiGateway {
    pub fn new(api: Arc<dyn NotesApi>, session: Arc<SessionStore>) -> Self {
        Self { api, session }
    }

    pub async fn login(&self, payload: &LoginPayload) -> AppResult<AuthTokenResponse> {
        self.api.login(payload).await
    }

    pub async fn register(&self, payload: &RegisterPayload) -> AppResult<()> {
        self.api.register(payload).await
    }

    pub async fn verify_security_answer(
        &self,
        payload: &VerifyPayload,
    ) -> AppResult<VerifyResponse> {
        self.api.verify_security_answer(payload).await
    }

    pub async fn reset_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> AppResult<ResetOutcome> {
        self.api.reset_password(reset_token, new_password).await
    }

    /// Logout notification takes the token explicitly because the session
    /// slot is already cleared by the time it fires.
    pub async fn notify_logout(&self, token: &str) -> AppResult<()> {
        self.api.notify_logout(token).await
    }

    pub async fn list_notes(&self) -> AppResult<Vec<Note>> {
        let token = self.session.bearer_for_call()?;
        self.api.list_notes(&token).await
    }

    pub async fn get_note(&self, note_id: &str) -> AppResult<Note> {
        let token = self.session.bearer_for_call()?;
        self.api.get_note(&token, note_id).await
    }

    pub async fn create_note(
        &self,
        payload: &NewNotePayload,
        user_id: &str,
        images: &[UploadImage],
    ) -> AppResult<Note> {
        let token = self.session.bearer_for_call()?;
        self.api.create_note(&token, payload, user_id, images).await
    }

    pub async fn update_note(&self, note_id: &str, payload: &NoteEditPayload) -> AppResult<()> {
        let token = self.session.bearer_for_call()?;
        self.api.update_note(&token, note_id, payload).await
    }

    pub async fn delete_note(&self, note_id: &str) -> AppResult<()> {
        let token = self.session.bearer_for_call()?;
        self.api.delete_note(&token, note_id).await
    }

    pub async fn images_for_note(&self, note_id: &str) -> AppResult<Vec<PersistedImage>> {
        let token = self.session.bearer_for_call()?;
        self.api.images_for_note(&token, note_id).await
    }

    pub async fn upload_images(&self, note_id: &str, images: &[UploadImage]) -> AppResult<()> {
        let token = self.session.bearer_for_call()?;
        self.api.upload_images(&token, note_id, images).await
    }

    pub async fn delete_image(&self, image_id: &str) -> AppResult<()> {
        let token = self.session.bearer_for_call()?;
        self.api.delete_image(&token, image_id).await
    }
}
