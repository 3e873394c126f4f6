//! Session-aware HTTP client for loadrig
//!
//! Every virtual-user iteration logs in, issues its journey steps with the
//! session cookies attached and logs out. [`SessionClient`] is the seam the
//! execution engine drives; [`HttpSessionClient`] is the reqwest
//! implementation used against a real target.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-export main types for convenience
pub use client::{
    classify, extract_identity, HttpSessionClient, SessionClient, LOGOUT_STATUSES, SESSION_HEADER,
};
pub use config::SessionClientConfig;
pub use errors::{AuthError, RequestError};
pub use types::{PreparedRequest, Session, StepOutcome};
