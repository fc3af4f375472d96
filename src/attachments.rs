use crate::errors::{AppError, AppResult};
use crate::gateway::UploadImage;
use crate::models::{PendingImageInfo, PersistedImage};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const MAX_IMAGE_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Pending,
    Uploading,
    Persisted,
    Discarded,
}

/// Maps a file name to the mime type sent with its multipart part. Anything
/// unrecognized falls out as octet-stream and is rejected by validation.
pub fn mime_for_file(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Preview file for a not-yet-uploaded image. The backing file is removed
/// exactly once, on explicit release or when the handle drops.
#[derive(Debug)]
struct PreviewHandle {
    path: PathBuf,
    released: bool,
}

impl PreviewHandle {
    fn create(dir: &Path, attachment_id: &str, file_name: &str, bytes: &[u8]) -> AppResult<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("img");
        let path = dir.join(format!("{}.{}", attachment_id, ext));
        fs::write(&path, bytes)
            .map_err(|error| AppError::Io(format!("Failed to write preview file: {}", error)))?;
        Ok(Self {
            path,
            released: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(error) = fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %error, "failed to remove preview file");
            }
        }
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug)]
struct PendingAttachment {
    id: String,
    file_name: String,
    mime_type: String,
    bytes: Vec<u8>,
    state: AttachmentState,
    preview: PreviewHandle,
}

impl PendingAttachment {
    fn info(&self) -> PendingImageInfo {
        PendingImageInfo {
            attachment_id: self.id.clone(),
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.bytes.len() as u64,
            preview_path: self.preview.path().display().to_string(),
        }
    }
}

/// One open composer or editor view: the note it targets (none while
/// composing a new note), the images the server already has, and the local
/// pending ones.
#[derive(Debug)]
struct EditorSession {
    note_id: Option<String>,
    pending: Vec<PendingAttachment>,
    persisted: Vec<PersistedImage>,
}

impl EditorSession {
    fn new(note_id: Option<String>, persisted: Vec<PersistedImage>) -> Self {
        Self {
            note_id,
            pending: Vec::new(),
            persisted,
        }
    }

    fn add_pending(
        &mut self,
        previews_dir: &Path,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> AppResult<PendingImageInfo> {
        if !mime_type.starts_with("image/") {
            return Err(AppError::Invalid(
                "Only image files can be attached".to_string(),
            ));
        }
        if bytes.len() as u64 > MAX_IMAGE_BYTES {
            return Err(AppError::Invalid("Images are limited to 2 MB".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let preview = PreviewHandle::create(previews_dir, &id, &file_name, &bytes)?;
        let attachment = PendingAttachment {
            id,
            file_name,
            mime_type,
            bytes,
            state: AttachmentState::Pending,
            preview,
        };
        let info = attachment.info();
        self.pending.push(attachment);
        Ok(info)
    }

    fn discard_pending(&mut self, attachment_id: &str) -> bool {
        let Some(index) = self
            .pending
            .iter()
            .position(|attachment| attachment.id == attachment_id)
        else {
            return false;
        };
        let mut attachment = self.pending.remove(index);
        attachment.state = AttachmentState::Discarded;
        attachment.preview.release();
        true
    }

    fn begin_upload(&mut self) -> Vec<UploadImage> {
        let mut staged = Vec::new();
        for attachment in &mut self.pending {
            if attachment.state == AttachmentState::Pending {
                attachment.state = AttachmentState::Uploading;
                staged.push(UploadImage {
                    file_name: attachment.file_name.clone(),
                    mime_type: attachment.mime_type.clone(),
                    bytes: attachment.bytes.clone(),
                });
            }
        }
        staged
    }

    fn finish_upload(&mut self, refreshed: Vec<PersistedImage>) {
        for attachment in &mut self.pending {
            if attachment.state == AttachmentState::Uploading {
                attachment.state = AttachmentState::Persisted;
                attachment.preview.release();
            }
        }
        self.pending
            .retain(|attachment| attachment.state != AttachmentState::Persisted);
        self.persisted = refreshed;
    }

    fn fail_upload(&mut self) {
        for attachment in &mut self.pending {
            if attachment.state == AttachmentState::Uploading {
                attachment.state = AttachmentState::Pending;
            }
        }
    }

    fn pending_infos(&self) -> Vec<PendingImageInfo> {
        self.pending.iter().map(PendingAttachment::info).collect()
    }
}

/// All open editor sessions, keyed by a generated session id. The id doubles
/// as the staleness guard: results of in-flight calls are dropped when the
/// session they belong to is gone.
pub struct EditorRegistry {
    sessions: Mutex<HashMap<String, EditorSession>>,
    previews_dir: PathBuf,
}

impl EditorRegistry {
    pub fn new(previews_dir: PathBuf) -> AppResult<Self> {
        fs::create_dir_all(&previews_dir)
            .map_err(|error| AppError::Io(format!("Failed to create previews dir: {}", error)))?;
        Ok(Self {
            sessions: Mutex::new(HashMap::new()),
            previews_dir,
        })
    }

    /// Deletes preview files left behind by an earlier process. Only safe
    /// before any session exists.
    pub fn sweep_stale_previews(&self) -> AppResult<usize> {
        let mut removed = 0usize;
        let entries = fs::read_dir(&self.previews_dir)
            .map_err(|error| AppError::Io(format!("Failed to read previews dir: {}", error)))?;
        for entry in entries {
            let entry = entry.map_err(|error| AppError::Io(error.to_string()))?;
            if entry.path().is_file() && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, HashMap<String, EditorSession>>> {
        self.sessions
            .lock()
            .map_err(|_| AppError::Internal("editor registry mutex poisoned".to_string()))
    }

    pub fn open(
        &self,
        note_id: Option<String>,
        persisted: Vec<PersistedImage>,
    ) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        self.lock()?
            .insert(id.clone(), EditorSession::new(note_id, persisted));
        Ok(id)
    }

    /// Dropping the session releases every remaining preview handle.
    pub fn close(&self, session_id: &str) -> AppResult<bool> {
        Ok(self.lock()?.remove(session_id).is_some())
    }

    pub fn note_id(&self, session_id: &str) -> AppResult<Option<String>> {
        let sessions = self.lock()?;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("No open editor session {}", session_id)))?;
        Ok(session.note_id.clone())
    }

    pub fn add_pending(
        &self,
        session_id: &str,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> AppResult<PendingImageInfo> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("No open editor session {}", session_id)))?;
        session.add_pending(&self.previews_dir, file_name, mime_type, bytes)
    }

    pub fn discard_pending(&self, session_id: &str, attachment_id: &str) -> AppResult<bool> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("No open editor session {}", session_id)))?;
        Ok(session.discard_pending(attachment_id))
    }

    pub fn pending_infos(&self, session_id: &str) -> AppResult<Vec<PendingImageInfo>> {
        let sessions = self.lock()?;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("No open editor session {}", session_id)))?;
        Ok(session.pending_infos())
    }

    pub fn persisted_images(&self, session_id: &str) -> AppResult<Vec<PersistedImage>> {
        let sessions = self.lock()?;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("No open editor session {}", session_id)))?;
        Ok(session.persisted.clone())
    }

    /// Marks every pending image as uploading and returns the staged set.
    pub fn begin_upload(&self, session_id: &str) -> AppResult<Vec<UploadImage>> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("No open editor session {}", session_id)))?;
        Ok(session.begin_upload())
    }

    /// Completion of a successful upload. Returns false when the session was
    /// closed while the call was in flight; the result is dropped then.
    pub fn finish_upload(
        &self,
        session_id: &str,
        refreshed: Vec<PersistedImage>,
    ) -> AppResult<bool> {
        let mut sessions = self.lock()?;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.finish_upload(refreshed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reverts uploading images to pending so the user can retry. Tolerates
    /// a session closed mid-flight.
    pub fn fail_upload(&self, session_id: &str) -> AppResult<bool> {
        let mut sessions = self.lock()?;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.fail_upload();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops a server-deleted image from the session's persisted list.
    /// Tolerates a session closed mid-flight.
    pub fn remove_persisted(&self, session_id: &str, image_id: &str) -> AppResult<bool> {
        let mut sessions = self.lock()?;
        match sessions.get_mut(session_id) {
            Some(session) => {
                let before = session.persisted.len();
                session.persisted.retain(|image| image.id != image_id);
                Ok(session.persisted.len() != before)
            }
            None => Ok(false),
        }
    }
}
