//! Encrypted two-tier session store.
//!
//! Values are serialized to JSON, encrypted with the shared
//! [`AesEncryptor`], and written to the durable tier. When the durable tier
//! refuses a write the value lands in the ephemeral tier instead.
//!
//! ## Failure policy
//! Nothing here returns an error to the caller. Write failures are logged
//! and leave prior state untouched; unreadable values read back as `None`
//! so a corrupted session degrades to "logged out".

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::profile::AdminProfile;
use super::storage::StorageTier;
use crate::security::AesEncryptor;

/// Key holding the encrypted bearer token.
pub const TOKEN_KEY: &str = "auth_super_token";

/// Key holding the encrypted admin profile.
pub const PROFILE_KEY: &str = "auth_super_admin";

/// Outcome of reading one key, before it is collapsed to an `Option`.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRead<T> {
    Missing,
    Corrupt(String),
    Value(T),
}

impl<T> StoreRead<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Missing | Self::Corrupt(_) => None,
        }
    }
}

/// A token plus the profile it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub token: String,
    pub profile: AdminProfile,
}

/// What the store holds for the session keys.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredSession {
    Absent,
    /// Only one of token/profile is readable.
    Partial,
    Complete(SessionRecord),
}

/// Encrypted store over a durable and an ephemeral tier.
pub struct SessionStore {
    durable: Box<dyn StorageTier>,
    ephemeral: Box<dyn StorageTier>,
    cipher: AesEncryptor,
}

impl SessionStore {
    pub fn new(
        durable: impl StorageTier + 'static,
        ephemeral: impl StorageTier + 'static,
        cipher: AesEncryptor,
    ) -> Self {
        Self {
            durable: Box::new(durable),
            ephemeral: Box::new(ephemeral),
            cipher,
        }
    }

    // ── Generic key/value API ───────────────────────────────────────

    /// Serialize, encrypt and write `value` under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let ciphertext = match self.seal(value) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to encrypt session value");
                return;
            }
        };

        match self.durable.write(key, &ciphertext) {
            Ok(()) => {
                // Older fallback copy must not resurface once the durable entry goes.
                if let Err(e) = self.ephemeral.delete(key) {
                    tracing::debug!(key, error = %e, "Failed to drop ephemeral copy");
                }
            }
            Err(e) => {
                tracing::warn!(
                    key,
                    tier = self.durable.name(),
                    error = %e,
                    "Durable write rejected, falling back to ephemeral tier"
                );
                if let Err(e) = self.ephemeral.write(key, &ciphertext) {
                    tracing::error!(
                        key,
                        tier = self.ephemeral.name(),
                        error = %e,
                        "Failed to persist session value"
                    );
                }
            }
        }
    }

    /// Read and decrypt `key`; `None` when absent or unreadable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read(key).into_option()
    }

    /// Read `key` keeping the distinction between missing and corrupt.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> StoreRead<T> {
        let Some(ciphertext) = self.raw(key) else {
            return StoreRead::Missing;
        };

        let plaintext = match self.cipher.decrypt(&ciphertext) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecryptable session value");
                return StoreRead::Corrupt(e.to_string());
            }
        };

        match serde_json::from_str(&plaintext) {
            Ok(v) => StoreRead::Value(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding unparsable session value");
                StoreRead::Corrupt(e.to_string())
            }
        }
    }

    /// Delete `key` from both tiers.
    pub fn remove(&self, key: &str) {
        for tier in [&self.durable, &self.ephemeral] {
            if let Err(e) = tier.delete(key) {
                tracing::warn!(key, tier = tier.name(), error = %e, "Failed to remove session value");
            }
        }
    }

    /// Wipe both tiers entirely. Hard reset, used by explicit logout.
    pub fn clear(&self) {
        for tier in [&self.durable, &self.ephemeral] {
            if let Err(e) = tier.clear() {
                tracing::warn!(tier = tier.name(), error = %e, "Failed to clear storage tier");
            }
        }
    }

    fn seal<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<String> {
        let json = serde_json::to_string(value)?;
        self.cipher.encrypt(&json)
    }

    fn raw(&self, key: &str) -> Option<String> {
        for tier in [&self.durable, &self.ephemeral] {
            match tier.read(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key, tier = tier.name(), error = %e, "Storage tier read failed");
                }
            }
        }
        None
    }

    // ── Session record helpers ──────────────────────────────────────

    /// Load the token/profile pair.
    pub fn load_record(&self) -> StoredSession {
        let token: Option<String> = self.get(TOKEN_KEY);
        let profile: Option<AdminProfile> = self.get(PROFILE_KEY);
        match (token, profile) {
            (Some(token), Some(profile)) => StoredSession::Complete(SessionRecord { token, profile }),
            (None, None) => StoredSession::Absent,
            _ => StoredSession::Partial,
        }
    }

    /// Replace the stored record.
    pub fn save_record(&self, record: &SessionRecord) {
        self.set(TOKEN_KEY, &record.token);
        self.set(PROFILE_KEY, &record.profile);
    }

    /// Rewrite only the profile half of the record.
    pub fn save_profile(&self, profile: &AdminProfile) {
        self.set(PROFILE_KEY, profile);
    }

    /// Remove both halves of the record.
    pub fn purge_record(&self) {
        self.remove(TOKEN_KEY);
        self.remove(PROFILE_KEY);
    }
}
