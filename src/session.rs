use crate::errors::{AppError, AppResult};
use crate::models::{RestoreOutcome, RestoreReason, Session};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

const KEYRING_SERVICE: &str = "notes-desktop";

pub const BEARER_TOKEN_KEY: &str = "bearer-token";
pub const RESET_TOKEN_KEY: &str = "reset-token";

/// Claims the client reads out of the auth token. The token is not verified
/// here; the server is the authority and rejects bad signatures on every call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, deserialize_with = "crate::models::lenient_id_opt")]
    pub user_id: Option<String>,
}

/// Splits a JWT into its three segments and decodes the middle one as
/// base64url claims JSON. No signature check.
pub fn decode_claims(token: &str) -> AppResult<TokenClaims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AppError::Decode(
            "Token is not a three-segment JWT".to_string(),
        ));
    };

    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|error| AppError::Decode(format!("Token payload is not base64url: {}", error)))?;

    serde_json::from_slice(&raw).map_err(|error| {
        AppError::Decode(format!("Token payload is not valid claims JSON: {}", error))
    })
}

pub fn is_expired(claims: &TokenClaims) -> bool {
    claims.exp <= Utc::now().timestamp()
}

fn expiry_instant(exp: i64) -> AppResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(exp, 0)
        .ok_or_else(|| AppError::Decode(format!("Token expiry {} is out of range", exp)))
}

fn session_from_token(token: String, claims: TokenClaims) -> AppResult<Session> {
    let expires_at = expiry_instant(claims.exp)?;
    let username = claims
        .sub
        .split('@')
        .next()
        .unwrap_or(claims.sub.as_str())
        .to_string();
    Ok(Session {
        token,
        username,
        email: claims.sub,
        user_id: claims.user_id,
        expires_at,
    })
}

/// Durable storage for tokens. Implementations must be callable from any
/// thread; the keyring variant serializes access internally.
pub trait TokenVault: Send + Sync {
    fn load(&self, key: &str) -> AppResult<Option<String>>;
    fn store(&self, key: &str, value: &str) -> AppResult<()>;
    fn clear(&self, key: &str) -> AppResult<()>;
}

/// OS keychain backed vault.
pub struct KeyringVault {
    service: String,
    lock: Mutex<()>,
}

impl KeyringVault {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> AppResult<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(|error| AppError::Io(error.to_string()))
    }

    fn guard(&self) -> AppResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| AppError::Internal("keyring mutex poisoned".to_string()))
    }
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenVault for KeyringVault {
    fn load(&self, key: &str) -> AppResult<Option<String>> {
        let _guard = self.guard()?;
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    fn store(&self, key: &str, value: &str) -> AppResult<()> {
        let _guard = self.guard()?;
        self.entry(key)?
            .set_password(value)
            .map_err(|error| AppError::Io(error.to_string()))
    }

    fn clear(&self, key: &str) -> AppResult<()> {
        let _guard = self.guard()?;
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }
}

/// In-memory vault for tests and headless environments without a keychain.
#[derive(Default)]
pub struct MemoryVault {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("vault mutex poisoned".to_string()))
    }
}

impl TokenVault for MemoryVault {
    fn load(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.guard()?.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> AppResult<()> {
        self.guard()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> AppResult<()> {
        self.guard()?.remove(key);
        Ok(())
    }
}

/// The process-wide session slot. Holds at most one session, persists its
/// token through the vault, and broadcasts every change over a watch channel.
pub struct SessionStore {
    vault: Arc<dyn TokenVault>,
    slot: watch::Sender<Option<Session>>,
}

impl SessionStore {
    pub fn new(vault: Arc<dyn TokenVault>) -> Self {
        let (slot, _) = watch::channel(None);
        Self { vault, slot }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.slot.subscribe()
    }

    pub fn current(&self) -> Option<Session> {
        self.slot.borrow().clone()
    }

    fn publish(&self, session: Option<Session>) {
        self.slot.send_replace(session);
    }

    /// Rebuilds the session from the persisted token, if any. An expired or
    /// undecodable token is cleared from the vault so it is never retried.
    pub fn restore(&self) -> AppResult<RestoreOutcome> {
        let Some(token) = self.vault.load(BEARER_TOKEN_KEY)? else {
            self.publish(None);
            return Ok(RestoreOutcome {
                session: None,
                reason: RestoreReason::NoToken,
            });
        };

        match decode_claims(&token) {
            Err(error) => {
                tracing::warn!(error = %error, "persisted token failed to decode; clearing it");
                self.vault.clear(BEARER_TOKEN_KEY)?;
                self.publish(None);
                Ok(RestoreOutcome {
                    session: None,
                    reason: RestoreReason::Invalid,
                })
            }
            Ok(claims) if is_expired(&claims) => {
                self.vault.clear(BEARER_TOKEN_KEY)?;
                self.publish(None);
                Ok(RestoreOutcome {
                    session: None,
                    reason: RestoreReason::Expired,
                })
            }
            Ok(claims) => {
                let session = session_from_token(token, claims)?;
                self.publish(Some(session.clone()));
                Ok(RestoreOutcome {
                    session: Some(session),
                    reason: RestoreReason::Restored,
                })
            }
        }
    }

    /// Accepts a freshly issued token, persists it, and fills the slot. A
    /// token that is already expired is rejected without being stored.
    pub fn login(&self, token: String) -> AppResult<Session> {
        let claims = decode_claims(&token)?;
        if is_expired(&claims) {
            return Err(AppError::Expired(
                "Login token is already expired".to_string(),
            ));
        }

        let session = session_from_token(token, claims)?;
        self.vault.store(BEARER_TOKEN_KEY, &session.token)?;
        self.publish(Some(session.clone()));
        Ok(session)
    }

    /// Clears the slot first so the in-memory session is gone even if the
    /// vault delete fails.
    pub fn logout(&self) -> AppResult<()> {
        self.publish(None);
        self.vault.clear(BEARER_TOKEN_KEY)
    }

    /// Token for an authenticated request, re-checked against the expiry
    /// immediately before use. Expiry here behaves as a local logout.
    pub fn bearer_for_call(&self) -> AppResult<String> {
        let Some(session) = self.current() else {
            return Err(AppError::AuthExpired("No active session".to_string()));
        };

        if session.expires_at <= Utc::now() {
            self.publish(None);
            if let Err(error) = self.vault.clear(BEARER_TOKEN_KEY) {
                tracing::warn!(error = %error, "failed to clear expired token");
            }
            return Err(AppError::AuthExpired(
                "Session expired before the request was sent".to_string(),
            ));
        }

        Ok(session.token)
    }

    /// Watchdog hook: drops the session once its expiry passes. Returns
    /// whether an expiry happened.
    pub fn expire_if_due(&self) -> bool {
        let due = self
            .current()
            .map(|session| session.expires_at <= Utc::now())
            .unwrap_or(false);
        if due {
            self.publish(None);
            if let Err(error) = self.vault.clear(BEARER_TOKEN_KEY) {
                tracing::warn!(error = %error, "failed to clear expired token");
            }
        }
        due
    }

    pub fn store_reset_token(&self, token: &str) -> AppResult<()> {
        self.vault.store(RESET_TOKEN_KEY, token)
    }

    pub fn load_reset_token(&self) -> AppResult<Option<String>> {
        self.vault.load(RESET_TOKEN_KEY)
    }

    pub fn clear_reset_token(&self) -> AppResult<()> {
        self.vault.clear(RESET_TOKEN_KEY)
    }

    #[cfg(test)]
    pub(crate) fn force_session(&self, session: Option<Session>) {
        self.publish(session);
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_claims, MemoryVault, SessionStore, TokenVault, BEARER_TOKEN_KEY};
    use crate::errors::AppError;
    use crate::models::RestoreReason;
    use base64::Engine;
    use chrono::Utc;
    use std::sync::Arc;

    fn make_token(payload: serde_json::Value) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = engine.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    fn store_with_token(token: &str) -> SessionStore {
        let vault = Arc::new(MemoryVault::new());
        vault.store(BEARER_TOKEN_KEY, token).expect("store token");
        SessionStore::new(vault)
    }

    #[test]
    fn decode_reads_subject_and_expiry() {
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": 4_102_444_800i64,
            "userId": 12
        }));
        let claims = decode_claims(&token).expect("claims");
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.exp, 4_102_444_800);
        assert_eq!(claims.user_id.as_deref(), Some("12"));
    }

    #[test]
    fn decode_accepts_padded_payload() {
        let engine = base64::engine::general_purpose::URL_SAFE;
        let header = engine.encode(br#"{"alg":"HS256"}"#);
        let body = engine.encode(r#"{"sub":"a@b.c","exp":4102444800}"#);
        let token = format!("{}.{}.sig", header, body);
        decode_claims(&token).expect("padded payload decodes");
    }

    #[test]
    fn decode_rejects_wrong_segment_count() {
        assert!(matches!(
            decode_claims("only-one-segment"),
            Err(AppError::Decode(_))
        ));
        assert!(matches!(
            decode_claims("a.b.c.d"),
            Err(AppError::Decode(_))
        ));
    }

    #[test]
    fn login_derives_username_from_subject() {
        let store = SessionStore::new(Arc::new(MemoryVault::new()));
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() + 3_600
        }));

        let session = store.login(token).expect("login");
        assert_eq!(session.username, "alice");
        assert_eq!(session.email, "alice@example.com");
        assert!(store.current().is_some());
    }

    #[test]
    fn login_keeps_whole_subject_without_at_sign() {
        let store = SessionStore::new(Arc::new(MemoryVault::new()));
        let token = make_token(serde_json::json!({
            "sub": "alice",
            "exp": Utc::now().timestamp() + 3_600
        }));

        let session = store.login(token).expect("login");
        assert_eq!(session.username, "alice");
    }

    #[test]
    fn login_rejects_expired_token_without_storing() {
        let vault = Arc::new(MemoryVault::new());
        let store = SessionStore::new(vault.clone());
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() - 10
        }));

        assert!(matches!(store.login(token), Err(AppError::Expired(_))));
        assert!(store.current().is_none());
        assert!(vault.load(BEARER_TOKEN_KEY).expect("load").is_none());
    }

    #[test]
    fn restore_with_valid_token_fills_slot() {
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() + 3_600
        }));
        let store = store_with_token(&token);

        let outcome = store.restore().expect("restore");
        assert_eq!(outcome.reason, RestoreReason::Restored);
        let session = outcome.session.expect("session");
        assert_eq!(session.username, "alice");
        assert_eq!(store.current().expect("slot").token, token);
    }

    #[test]
    fn restore_with_expired_token_clears_storage() {
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() - 10
        }));
        let vault = Arc::new(MemoryVault::new());
        vault.store(BEARER_TOKEN_KEY, &token).expect("store");
        let store = SessionStore::new(vault.clone());

        let outcome = store.restore().expect("restore");
        assert_eq!(outcome.reason, RestoreReason::Expired);
        assert!(outcome.session.is_none());
        assert!(vault.load(BEARER_TOKEN_KEY).expect("load").is_none());
    }

    #[test]
    fn restore_with_garbage_token_clears_storage() {
        let store = store_with_token("not-a-jwt");

        let outcome = store.restore().expect("restore");
        assert_eq!(outcome.reason, RestoreReason::Invalid);
        assert!(outcome.session.is_none());
        assert!(store.vault.load(BEARER_TOKEN_KEY).expect("load").is_none());
    }

    #[test]
    fn restore_without_token_reports_no_token() {
        let store = SessionStore::new(Arc::new(MemoryVault::new()));
        let outcome = store.restore().expect("restore");
        assert_eq!(outcome.reason, RestoreReason::NoToken);
        assert!(outcome.session.is_none());
    }

    #[test]
    fn logout_clears_slot_and_vault() {
        let vault = Arc::new(MemoryVault::new());
        let store = SessionStore::new(vault.clone());
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() + 3_600
        }));
        store.login(token).expect("login");

        store.logout().expect("logout");
        assert!(store.current().is_none());
        assert!(vault.load(BEARER_TOKEN_KEY).expect("load").is_none());
    }

    #[test]
    fn bearer_for_call_returns_live_token() {
        let store = SessionStore::new(Arc::new(MemoryVault::new()));
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() + 3_600
        }));
        store.login(token.clone()).expect("login");

        assert_eq!(store.bearer_for_call().expect("token"), token);
    }

    #[test]
    fn bearer_for_call_logs_out_when_expiry_passed() {
        let vault = Arc::new(MemoryVault::new());
        let store = SessionStore::new(vault.clone());
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() + 3_600
        }));
        let mut session = store.login(token).expect("login");
        session.expires_at = Utc::now() - chrono::Duration::seconds(5);
        store.force_session(Some(session));

        assert!(matches!(
            store.bearer_for_call(),
            Err(AppError::AuthExpired(_))
        ));
        assert!(store.current().is_none());
        assert!(vault.load(BEARER_TOKEN_KEY).expect("load").is_none());
    }

    #[test]
    fn expire_if_due_only_fires_after_expiry() {
        let store = SessionStore::new(Arc::new(MemoryVault::new()));
        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() + 3_600
        }));
        let mut session = store.login(token).expect("login");

        assert!(!store.expire_if_due());
        assert!(store.current().is_some());

        session.expires_at = Utc::now() - chrono::Duration::seconds(5);
        store.force_session(Some(session));
        assert!(store.expire_if_due());
        assert!(store.current().is_none());
    }

    #[test]
    fn reset_token_round_trip() {
        let store = SessionStore::new(Arc::new(MemoryVault::new()));
        assert!(store.load_reset_token().expect("load").is_none());

        store.store_reset_token("rt-1").expect("store");
        assert_eq!(store.load_reset_token().expect("load").as_deref(), Some("rt-1"));

        store.clear_reset_token().expect("clear");
        assert!(store.load_reset_token().expect("load").is_none());
    }

    #[test]
    fn slot_changes_reach_subscribers() {
        let store = SessionStore::new(Arc::new(MemoryVault::new()));
        let mut receiver = store.subscribe();
        assert!(receiver.borrow().is_none());

        let token = make_token(serde_json::json!({
            "sub": "alice@example.com",
            "exp": Utc::now().timestamp() + 3_600
        }));
        store.login(token).expect("login");

        assert!(receiver.has_changed().expect("channel open"));
        assert!(receiver.borrow_and_update().is_some());
    }
}
