//! Authentication
//!
//! Token verification is delegated to the external identity provider; this
//! module owns the HTTP verification client, a short-lived verification
//! cache, and the axum middleware that turns a Bearer token into an
//! [`AuthUser`] extension.

mod middleware;
mod verifier;

pub use middleware::{require_auth, AuthState, AuthUser};
pub use verifier::{TokenVerifier, VerifiedIdentity};
