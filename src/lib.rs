//! Authenticated-session client for the craft shop admin console.
//!
//! The crate keeps an admin signed in across runs: the bearer token and
//! profile are stored encrypted on disk, checked for expiry on start, and
//! attached to every admin API request. A 401/403 from the API ends the
//! session and sends the user back to login.
//!
//! ```rust,ignore
//! let config = craftadmin::Config::load(None)?;
//! let session = craftadmin::open_session(&config, Arc::new(LogNavigator))?;
//! session.initialize();
//! if let LoginOutcome::Failure(f) = session.login("owner@shop.test", "pw").await {
//!     eprintln!("{}", f.message);
//! }
//! ```

pub mod api;
pub mod config;
pub mod security;
pub mod session;

use anyhow::{Context, Result};
use std::sync::Arc;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use config::Config;
pub use session::{
    AdminProfile, LogNavigator, LoginOutcome, Navigator, ProfileUpdate, SessionController,
    SessionHandle, SessionState,
};

/// Wire up the store, API client and controller described by `config`.
/// The returned controller still needs [`SessionController::initialize`].
pub fn open_session(config: &Config, navigator: Arc<dyn Navigator>) -> Result<SessionController> {
    let session_dir = config.session_dir()?;
    let store = session::SessionStore::new(
        session::FileTier::new(session_dir),
        session::MemoryTier::new(),
        security::AesEncryptor::from_passphrase(config.effective_encryption_key()),
    );
    let api = ApiClient::new(&config.api_base_url, config.request_timeout())
        .context("invalid api_base_url")?;
    Ok(SessionController::new(store, Arc::new(api), navigator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_session_uses_configured_dirs() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            api_base_url: "https://api.stitchery.test/".into(),
            encryption_key: Some("k".into()),
            data_dir: Some(tmp.path().to_path_buf()),
            ..Config::default()
        };

        let session = open_session(&config, Arc::new(LogNavigator)).unwrap();
        assert_eq!(session.api().base_url(), "https://api.stitchery.test");
        assert!(!session.initialize().is_authenticated);
    }

    #[test]
    fn open_session_rejects_bad_url() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            api_base_url: "::nope::".into(),
            data_dir: Some(tmp.path().to_path_buf()),
            ..Config::default()
        };
        assert!(open_session(&config, Arc::new(LogNavigator)).is_err());
    }
}
