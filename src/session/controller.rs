//! Session lifecycle: rehydrate, login, logout, profile updates, expiry.
//!
//! ## Flow
//!
//! 1. `initialize` reads the stored record once and settles on
//!    authenticated or anonymous. It installs the request/response hooks on
//!    the API client and never touches the network.
//! 2. `login` posts credentials, persists the returned token and profile,
//!    and reports a [`LoginOutcome`]. Failures never change stored state.
//! 3. Every later request carries `Authorization: Bearer <token>` unless the
//!    caller set its own header.
//! 4. A 401 or 403 on a request that carried the token tears the session
//!    down and sends the user to the login screen with a notice. The caller
//!    still receives the error.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::profile::{AdminProfile, ProfileUpdate};
use super::state::{SessionHandle, SessionState};
use super::store::{SessionRecord, SessionStore, StoredSession};
use super::token;
use crate::api::{ApiClient, ApiEnvelope, ApiError, ApiRequest, Interceptor};

/// Admin login endpoint.
pub const LOGIN_PATH: &str = "/api/admin/auth/login";

/// Notice attached to the forced redirect after expiry.
pub const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";

const NETWORK_FAILURE_MESSAGE: &str =
    "Unable to reach the server. Please check your connection and try again.";
const REJECTED_FALLBACK_MESSAGE: &str = "Login failed. Please check your email and password.";
const UNEXPECTED_FAILURE_MESSAGE: &str = "Something went wrong while logging in. Please try again.";

// ── Navigation ───────────────────────────────────────────────────

/// Moves the user to the login screen.
pub trait Navigator: Send + Sync {
    /// `notice` is shown on the login screen when present.
    fn to_login(&self, notice: Option<&str>);
}

/// Navigator that only logs. Useful for headless consumers.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn to_login(&self, notice: Option<&str>) {
        tracing::warn!(notice = notice.unwrap_or(""), "Redirecting to login");
    }
}

// ── Login outcome ────────────────────────────────────────────────

/// Why a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailureKind {
    /// The backend refused the credentials.
    Rejected,
    /// No response was received.
    Network,
    /// Anything else, such as an unreadable response.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginFailure {
    pub kind: LoginFailureKind,
    /// Human-readable, safe to show as-is.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Success(AdminProfile),
    Failure(LoginFailure),
}

impl LoginOutcome {
    fn failure(kind: LoginFailureKind, message: impl Into<String>) -> Self {
        Self::Failure(LoginFailure {
            kind,
            message: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The failure message, `None` on success.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(&f.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    admin: AdminProfile,
    token: String,
}

// ── Shared core ──────────────────────────────────────────────────

/// State shared between the controller and its interceptor.
struct SessionCore {
    store: SessionStore,
    state: watch::Sender<SessionState>,
    navigator: Arc<dyn Navigator>,
}

impl SessionCore {
    fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    /// Purge the record, drop in-memory state, and redirect if a session
    /// was actually torn down.
    ///
    /// Check and clear happen under the channel's write lock, so concurrent
    /// 401s for one session yield a single redirect.
    fn expire(&self, reason: &'static str) {
        let mut had_session = false;
        self.state.send_modify(|s| {
            had_session = s.token.is_some();
            *s = SessionState::anonymous();
        });
        self.store.purge_record();

        if had_session {
            tracing::info!(reason, "Admin session ended");
            self.navigator.to_login(Some(SESSION_EXPIRED_NOTICE));
        } else {
            tracing::debug!(reason, "No session to end");
        }
    }
}

/// Attaches the bearer token and reacts to 401/403.
struct SessionInterceptor {
    core: Arc<SessionCore>,
}

#[async_trait]
impl Interceptor for SessionInterceptor {
    async fn before_request(&self, request: &mut ApiRequest) {
        if request.headers.contains_key(AUTHORIZATION) {
            return;
        }
        let Some(token) = self.core.token() else {
            return;
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers.insert(AUTHORIZATION, value);
                request.mark_carries_session();
            }
            Err(e) => tracing::warn!(error = %e, "Stored token is not a valid header value"),
        }
    }

    async fn after_response(&self, request: &mut ApiRequest, status: StatusCode) {
        match status {
            StatusCode::UNAUTHORIZED if !request.retried => {
                request.retried = true;
                // Requests with a caller-supplied Authorization never carried
                // the session, so their 401 says nothing about it.
                if request.carries_session() {
                    self.core.expire("unauthorized");
                }
            }
            // TODO: surface 403 as access-denied without ending the session
            // once the backend distinguishes role errors from revoked tokens.
            StatusCode::FORBIDDEN if request.carries_session() => {
                self.core.expire("forbidden");
            }
            _ => {}
        }
    }
}

// ── Controller ───────────────────────────────────────────────────

/// Sole writer of the admin session.
pub struct SessionController {
    core: Arc<SessionCore>,
    api: Arc<ApiClient>,
    hooks_installed: AtomicBool,
}

impl SessionController {
    pub fn new(store: SessionStore, api: Arc<ApiClient>, navigator: Arc<dyn Navigator>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            core: Arc::new(SessionCore {
                store,
                state,
                navigator,
            }),
            api,
            hooks_installed: AtomicBool::new(false),
        }
    }

    /// Read-only view for consumers.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.core.state.subscribe())
    }

    /// Current snapshot.
    pub fn state(&self) -> SessionState {
        self.core.state.borrow().clone()
    }

    /// The API client carrying this session's hooks.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    fn install_hooks(&self) {
        if self
            .hooks_installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.api.install(Arc::new(SessionInterceptor {
                core: self.core.clone(),
            }));
        }
    }

    /// Rehydrate from storage. Always ends with `is_loading == false`.
    pub fn initialize(&self) -> SessionState {
        self.install_hooks();
        self.core.state.send_modify(|s| {
            s.initialized = true;
            s.is_loading = true;
        });

        let next = match self.core.store.load_record() {
            StoredSession::Absent => {
                tracing::debug!("No stored admin session");
                SessionState::anonymous()
            }
            StoredSession::Partial => {
                tracing::warn!("Stored admin session is incomplete, purging");
                self.core.store.purge_record();
                SessionState::anonymous()
            }
            StoredSession::Complete(record) if token::is_valid(&record.token) => {
                tracing::info!(admin = %record.profile.email, "Restored admin session");
                SessionState::authenticated(record.token, record.profile)
            }
            StoredSession::Complete(_) => {
                tracing::info!("Stored admin session has expired, purging");
                self.core.store.purge_record();
                SessionState::anonymous()
            }
        };

        self.core.state.send_replace(next.clone());
        next
    }

    /// Authenticate with email and password.
    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        self.install_hooks();
        self.core.state.send_modify(|s| s.is_loading = true);

        let outcome = match self.request_login(email, password).await {
            Ok(data) => {
                let record = SessionRecord {
                    token: data.token,
                    profile: data.admin,
                };
                self.core.store.save_record(&record);
                tracing::info!(admin = %record.profile.email, "Admin logged in");

                let profile = record.profile.clone();
                self.core
                    .state
                    .send_replace(SessionState::authenticated(record.token, record.profile));
                LoginOutcome::Success(profile)
            }
            Err(outcome) => outcome,
        };

        if !outcome.is_success() {
            self.core.state.send_modify(|s| s.is_loading = false);
        }
        outcome
    }

    async fn request_login(&self, email: &str, password: &str) -> Result<LoginData, LoginOutcome> {
        // Bad credentials answer 401; that must not tear down a stored session.
        let request = ApiRequest::post(LOGIN_PATH)
            .json(serde_json::json!({ "email": email, "password": password }))
            .without_session_hooks();

        let response = match self.api.dispatch(request).await {
            Ok(response) => response,
            Err(ApiError::Transport(e)) => {
                tracing::warn!(error = %e, "Login request got no response");
                return Err(LoginOutcome::failure(
                    LoginFailureKind::Network,
                    NETWORK_FAILURE_MESSAGE,
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "Login request failed");
                return Err(LoginOutcome::failure(
                    LoginFailureKind::Unexpected,
                    UNEXPECTED_FAILURE_MESSAGE,
                ));
            }
        };

        let envelope: ApiEnvelope<serde_json::Value> = match response.json() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(status = %response.status, error = %e, "Unreadable login response");
                return Err(LoginOutcome::failure(
                    LoginFailureKind::Unexpected,
                    UNEXPECTED_FAILURE_MESSAGE,
                ));
            }
        };

        if !envelope.success {
            tracing::info!(status = %response.status, "Login rejected");
            let message = envelope
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| REJECTED_FALLBACK_MESSAGE.to_string());
            return Err(LoginOutcome::failure(LoginFailureKind::Rejected, message));
        }

        if !response.status.is_success() {
            tracing::error!(status = %response.status, "Login reported success with an error status");
            return Err(LoginOutcome::failure(
                LoginFailureKind::Unexpected,
                UNEXPECTED_FAILURE_MESSAGE,
            ));
        }

        envelope
            .data
            .and_then(|data| serde_json::from_value::<LoginData>(data).ok())
            .filter(|data| !data.token.is_empty())
            .ok_or_else(|| {
                tracing::error!("Login response is missing the admin or token");
                LoginOutcome::failure(LoginFailureKind::Unexpected, UNEXPECTED_FAILURE_MESSAGE)
            })
    }

    /// End the session and wipe local storage. Safe to call repeatedly.
    pub fn logout(&self) {
        let was_authenticated = self.core.state.borrow().is_authenticated;
        self.core.store.clear();
        self.core.state.send_replace(SessionState::anonymous());
        if was_authenticated {
            tracing::info!("Admin logged out");
        }
    }

    /// Merge `update` into the cached profile and persist it. Local only:
    /// call after the backend accepted the change. `None` when signed out.
    pub fn update_profile(&self, update: ProfileUpdate) -> Option<AdminProfile> {
        let mut merged = None;
        self.core.state.send_if_modified(|s| match s.profile.as_mut() {
            Some(profile) => {
                profile.apply(update);
                merged = Some(profile.clone());
                true
            }
            None => false,
        });

        match merged {
            Some(ref profile) => self.core.store.save_profile(profile),
            None => tracing::debug!("Profile update ignored, no active session"),
        }
        merged
    }

    /// Re-check token expiry, ending the session when it no longer holds.
    pub fn validate_token(&self) -> bool {
        match self.core.token() {
            Some(token) if token::is_valid(&token) => true,
            _ => {
                self.core.expire("token invalid");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::AesEncryptor;
    use crate::session::state::SessionPhase;
    use crate::session::storage::{FileTier, MemoryTier, StorageTier};
    use crate::session::store::{PROFILE_KEY, TOKEN_KEY};
    use crate::session::token::forge_expiring_in;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{any, body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "test-encryption-key";

    #[derive(Default)]
    struct RecordingNavigator {
        notices: Mutex<Vec<Option<String>>>,
    }

    impl Navigator for RecordingNavigator {
        fn to_login(&self, notice: Option<&str>) {
            self.notices.lock().push(notice.map(str::to_string));
        }
    }

    struct Harness {
        _tmp: TempDir,
        durable: Arc<FileTier>,
        ephemeral: Arc<MemoryTier>,
        navigator: Arc<RecordingNavigator>,
        controller: SessionController,
    }

    impl Harness {
        fn new(base_url: &str) -> Self {
            let tmp = TempDir::new().unwrap();
            let durable = Arc::new(FileTier::new(tmp.path().join("session")));
            let ephemeral = Arc::new(MemoryTier::new());
            let navigator = Arc::new(RecordingNavigator::default());
            let api = Arc::new(ApiClient::new(base_url, Duration::from_secs(5)).unwrap());
            let controller = SessionController::new(
                SessionStore::new(
                    durable.clone(),
                    ephemeral.clone(),
                    AesEncryptor::from_passphrase(KEY),
                ),
                api,
                navigator.clone(),
            );
            Self {
                _tmp: tmp,
                durable,
                ephemeral,
                navigator,
                controller,
            }
        }

        /// Second view onto the same tiers, as another component would see them.
        fn store(&self) -> SessionStore {
            SessionStore::new(
                self.durable.clone(),
                self.ephemeral.clone(),
                AesEncryptor::from_passphrase(KEY),
            )
        }

        fn seed(&self, token: &str) {
            self.store().save_record(&SessionRecord {
                token: token.to_string(),
                profile: admin(),
            });
        }

        fn notices(&self) -> Vec<Option<String>> {
            self.navigator.notices.lock().clone()
        }
    }

    fn admin() -> AdminProfile {
        AdminProfile::new("65f0c", "owner@stitchery.test", "Owner", "super_admin")
            .with_avatar("/uploads/avatars/owner.png")
    }

    fn login_success_body(token: &str) -> serde_json::Value {
        json!({
            "success": true,
            "message": "Login successful",
            "data": {
                "admin": {
                    "id": "65f0c",
                    "email": "owner@stitchery.test",
                    "name": "Owner",
                    "role": "super_admin",
                    "avatar": "/uploads/avatars/owner.png"
                },
                "token": token
            }
        })
    }

    // ── Initialize ──────────────────────────────────────────────────

    #[tokio::test]
    async fn initialize_without_session_is_anonymous_and_offline() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        assert_eq!(h.controller.state().phase(), SessionPhase::Uninitialized);

        let state = h.controller.initialize();
        assert!(!state.is_loading);
        assert!(!state.is_authenticated);
        assert_eq!(h.controller.handle().current().phase(), SessionPhase::Anonymous);
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn initialize_with_valid_session_attaches_bearer() {
        let server = MockServer::start().await;
        let token = forge_expiring_in(3600);
        let bearer = format!("Bearer {token}");
        Mock::given(method("GET"))
            .and(path("/api/admin/products"))
            .and(header("authorization", bearer.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.seed(&token);

        let state = h.controller.initialize();
        assert!(state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.token.as_deref(), Some(token.as_str()));
        assert_eq!(state.profile, Some(admin()));

        let body: serde_json::Value = h
            .controller
            .api()
            .get_json("/api/admin/products")
            .await
            .unwrap();
        assert_eq!(body["success"], json!(true));
    }

    #[tokio::test]
    async fn initialize_with_expired_session_purges() {
        let h = Harness::new("http://127.0.0.1:1");
        h.seed(&forge_expiring_in(-60));

        let state = h.controller.initialize();
        assert!(!state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(h.store().load_record(), StoredSession::Absent);
        assert_eq!(h.durable.read(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn initialize_with_unreadable_token_purges() {
        let h = Harness::new("http://127.0.0.1:1");
        h.seed("not-a-signed-token");

        let state = h.controller.initialize();
        assert_eq!(state.phase(), SessionPhase::Anonymous);
        assert_eq!(h.store().load_record(), StoredSession::Absent);
    }

    #[tokio::test]
    async fn initialize_with_partial_record_purges() {
        let h = Harness::new("http://127.0.0.1:1");
        h.store().set(TOKEN_KEY, &forge_expiring_in(3600));

        let state = h.controller.initialize();
        assert_eq!(state.phase(), SessionPhase::Anonymous);
        assert_eq!(h.durable.read(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn initialize_with_corrupted_profile_is_anonymous() {
        let h = Harness::new("http://127.0.0.1:1");
        h.seed(&forge_expiring_in(3600));
        h.durable.write(PROFILE_KEY, "aes256:AAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap();

        let state = h.controller.initialize();
        assert!(!state.is_authenticated);
        assert_eq!(h.durable.read(TOKEN_KEY).unwrap(), None);
    }

    // ── Login ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_success_persists_and_authenticates() {
        let server = MockServer::start().await;
        let token = forge_expiring_in(7 * 24 * 3600);
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({"email": "owner@stitchery.test", "password": "hunter22"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_success_body(&token)))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();

        let outcome = h.controller.login("owner@stitchery.test", "hunter22").await;
        assert_eq!(outcome, LoginOutcome::Success(admin()));
        assert_eq!(outcome.message(), None);

        let state = h.controller.state();
        assert!(state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.token.as_deref(), Some(token.as_str()));

        assert_eq!(
            h.store().load_record(),
            StoredSession::Complete(SessionRecord {
                token,
                profile: admin(),
            })
        );
    }

    #[tokio::test]
    async fn login_rejection_leaves_existing_session_alone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "message": "Invalid credentials"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        let existing = forge_expiring_in(3600);
        h.seed(&existing);
        h.controller.initialize();
        let before = h.store().load_record();

        let outcome = h.controller.login("owner@stitchery.test", "wrong").await;
        match outcome {
            LoginOutcome::Failure(ref f) => {
                assert_eq!(f.kind, LoginFailureKind::Rejected);
                assert_eq!(f.message, "Invalid credentials");
            }
            ref other => panic!("unexpected {other:?}"),
        }

        let state = h.controller.state();
        assert!(state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.token.as_deref(), Some(existing.as_str()));
        assert_eq!(h.store().load_record(), before);
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn login_rejection_with_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "message": "Invalid credentials"})),
            )
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();

        let outcome = h.controller.login("a@b.c", "x").await;
        assert_eq!(outcome.message(), Some("Invalid credentials"));
        assert!(!h.controller.state().is_authenticated);
        assert_eq!(h.store().load_record(), StoredSession::Absent);
    }

    #[tokio::test]
    async fn login_rejection_without_message_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"success": false})))
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();

        let outcome = h.controller.login("a@b.c", "x").await;
        assert_eq!(outcome.message(), Some(REJECTED_FALLBACK_MESSAGE));
    }

    #[tokio::test]
    async fn login_without_response_reports_connectivity() {
        let h = Harness::new("http://127.0.0.1:1");
        h.controller.initialize();

        let outcome = h.controller.login("a@b.c", "x").await;
        assert_eq!(
            outcome,
            LoginOutcome::Failure(LoginFailure {
                kind: LoginFailureKind::Network,
                message: NETWORK_FAILURE_MESSAGE.to_string(),
            })
        );
        assert!(!h.controller.state().is_loading);
    }

    #[tokio::test]
    async fn login_with_unreadable_body_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad gateway</html>"))
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();

        match h.controller.login("a@b.c", "x").await {
            LoginOutcome::Failure(f) => assert_eq!(f.kind, LoginFailureKind::Unexpected),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!h.controller.state().is_loading);
    }

    #[tokio::test]
    async fn login_success_without_token_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"admin": {"id": "1"}}})),
            )
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();

        let outcome = h.controller.login("a@b.c", "x").await;
        assert_eq!(outcome.message(), Some(UNEXPECTED_FAILURE_MESSAGE));
        assert_eq!(h.store().load_record(), StoredSession::Absent);
    }

    #[tokio::test]
    async fn login_notifies_subscribers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(login_success_body(&forge_expiring_in(600))),
            )
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();
        let mut rx = h.controller.handle().subscribe();
        let _ = rx.borrow_and_update();

        assert!(h.controller.login("owner@stitchery.test", "pw").await.is_success());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_authenticated);
    }

    // ── Logout / profile ────────────────────────────────────────────

    #[tokio::test]
    async fn logout_wipes_both_tiers_and_is_idempotent() {
        let h = Harness::new("http://127.0.0.1:1");
        h.seed(&forge_expiring_in(3600));
        h.ephemeral.write(TOKEN_KEY, "aes256:stale").unwrap();
        h.controller.initialize();

        h.controller.logout();
        assert_eq!(h.controller.state().phase(), SessionPhase::Anonymous);
        assert_eq!(h.durable.read(TOKEN_KEY).unwrap(), None);
        assert_eq!(h.durable.read(PROFILE_KEY).unwrap(), None);
        assert!(h.ephemeral.is_empty());

        h.controller.logout();
        assert_eq!(h.controller.state().phase(), SessionPhase::Anonymous);
        assert_eq!(h.durable.read(TOKEN_KEY).unwrap(), None);
        assert!(h.ephemeral.is_empty());
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn update_profile_merges_and_persists() {
        let h = Harness::new("http://127.0.0.1:1");
        let token = forge_expiring_in(3600);
        h.seed(&token);
        h.controller.initialize();

        let merged = h
            .controller
            .update_profile(ProfileUpdate {
                name: Some("Head Stitcher".into()),
                avatar: Some("/uploads/avatars/new.png".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merged.name, "Head Stitcher");
        assert_eq!(merged.email, "owner@stitchery.test");

        assert_eq!(h.controller.state().profile, Some(merged.clone()));
        match h.store().load_record() {
            StoredSession::Complete(record) => {
                assert_eq!(record.token, token);
                assert_eq!(record.profile, merged);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_profile_when_signed_out_is_ignored() {
        let h = Harness::new("http://127.0.0.1:1");
        h.controller.initialize();

        let result = h.controller.update_profile(ProfileUpdate {
            name: Some("Nobody".into()),
            ..Default::default()
        });
        assert!(result.is_none());
        assert_eq!(h.store().load_record(), StoredSession::Absent);
    }

    // ── Expiry handling ─────────────────────────────────────────────

    #[tokio::test]
    async fn validate_token_keeps_live_session() {
        let h = Harness::new("http://127.0.0.1:1");
        h.seed(&forge_expiring_in(3600));
        h.controller.initialize();

        assert!(h.controller.validate_token());
        assert!(h.controller.state().is_authenticated);
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn validate_token_ends_expired_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(login_success_body(&forge_expiring_in(-5))),
            )
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();
        assert!(h.controller.login("owner@stitchery.test", "pw").await.is_success());

        assert!(!h.controller.validate_token());
        assert!(!h.controller.state().is_authenticated);
        assert_eq!(h.store().load_record(), StoredSession::Absent);
        assert_eq!(h.notices(), vec![Some(SESSION_EXPIRED_NOTICE.to_string())]);
    }

    #[tokio::test]
    async fn unauthorized_response_ends_session_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/admin/tutorials"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"success": false, "message": "jwt expired"})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.seed(&forge_expiring_in(3600));
        h.controller.initialize();

        let err = h
            .controller
            .api()
            .get_json::<serde_json::Value>("/api/admin/tutorials")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { ref message } if message == "jwt expired"));
        assert!(!h.controller.state().is_authenticated);
        assert_eq!(h.store().load_record(), StoredSession::Absent);

        // The login screen fires the same request again; no second cycle.
        let err = h
            .controller
            .api()
            .get_json::<serde_json::Value>("/api/admin/tutorials")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { .. }));
        assert_eq!(h.notices(), vec![Some(SESSION_EXPIRED_NOTICE.to_string())]);
    }

    #[tokio::test]
    async fn forbidden_response_also_ends_session() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/admin/users/42"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.seed(&forge_expiring_in(3600));
        h.controller.initialize();

        let err = h
            .controller
            .api()
            .execute(ApiRequest::new(reqwest::Method::DELETE, "/api/admin/users/42"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden { .. }));
        assert!(!h.controller.state().is_authenticated);
        assert_eq!(h.notices().len(), 1);
    }

    #[tokio::test]
    async fn explicit_authorization_header_is_respected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/admin/contact"))
            .and(header("authorization", "Bearer service-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.seed(&forge_expiring_in(3600));
        h.controller.initialize();

        let request = ApiRequest::get("/api/admin/contact").header(
            AUTHORIZATION,
            HeaderValue::from_static("Bearer service-token"),
        );
        let err = h.controller.api().execute(request).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { .. }));
        assert!(err.is_session_error());

        // Someone else's credential failing does not end our session.
        assert!(h.controller.state().is_authenticated);
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn anonymous_request_is_sent_without_credentials() {
        let server = MockServer::start().await;
        Mock::given(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/admin/gallery"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        h.controller.initialize();

        let _: serde_json::Value = h.controller.api().get_json("/api/admin/gallery").await.unwrap();
    }

    #[tokio::test]
    async fn login_without_initialize_still_attaches_bearer() {
        let server = MockServer::start().await;
        let token = forge_expiring_in(3600);
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_success_body(&token)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/admin/orders"))
            .and(header("authorization", format!("Bearer {token}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        assert!(h.controller.login("owner@stitchery.test", "hunter22").await.is_success());

        let _: serde_json::Value = h.controller.api().get_json("/api/admin/orders").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_unauthorized_responses_redirect_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/admin/orders"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        for round in 1..=20 {
            h.seed(&forge_expiring_in(3600));
            assert!(h.controller.initialize().is_authenticated);

            let requests: Vec<_> = (0..16)
                .map(|_| {
                    let api = h.controller.api().clone();
                    tokio::spawn(async move {
                        api.get_json::<serde_json::Value>("/api/admin/orders").await
                    })
                })
                .collect();
            for request in requests {
                let result = request.await.unwrap();
                assert!(matches!(result, Err(ApiError::Unauthorized { .. })));
            }

            assert_eq!(h.notices().len(), round);
            assert!(!h.controller.state().is_authenticated);
            assert_eq!(h.store().load_record(), StoredSession::Absent);
        }
    }

    /// Serves one 401 whose body is cut off before its declared length.
    fn truncated_unauthorized_server() -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 401 Unauthorized\r\n\
                      Content-Type: application/json\r\n\
                      Content-Length: 256\r\n\r\n{\"success\":",
                );
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn unauthorized_with_broken_body_still_ends_session() {
        let h = Harness::new(&truncated_unauthorized_server());
        h.seed(&forge_expiring_in(3600));
        h.controller.initialize();

        let err = h
            .controller
            .api()
            .get_json::<serde_json::Value>("/api/admin/orders")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert!(!h.controller.state().is_authenticated);
        assert_eq!(h.store().load_record(), StoredSession::Absent);
        assert_eq!(h.notices(), vec![Some(SESSION_EXPIRED_NOTICE.to_string())]);
    }
}
