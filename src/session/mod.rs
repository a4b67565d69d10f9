//! Authenticated admin session.
//!
//! Provides:
//! - Encrypted two-tier persistence of the token and admin profile ([`store`])
//! - Client-side token expiry checks ([`token`])
//! - The lifecycle controller: rehydrate, login, logout, profile update,
//!   request/response hooks ([`controller`])
//! - Read-only session handle and route guard decisions for consumers
//!
//! ## Design Decisions
//! - Only [`SessionController`] writes session state; everyone else holds a
//!   [`SessionHandle`].
//! - Every storage or decode failure resolves to "logged out". Nothing in
//!   this module can leave the client believing it is authenticated when it
//!   is not.

pub mod controller;
pub mod guard;
pub mod profile;
pub mod state;
pub mod storage;
pub mod store;
pub mod token;

pub use controller::{
    LoginFailure, LoginFailureKind, LoginOutcome, LogNavigator, Navigator, SessionController,
    SESSION_EXPIRED_NOTICE,
};
pub use guard::GuardDecision;
pub use profile::{AdminProfile, ProfileUpdate};
pub use state::{SessionHandle, SessionPhase, SessionState};
pub use storage::{FileTier, MemoryTier, StorageTier};
pub use store::{SessionRecord, SessionStore, StoredSession};
