//! Per-stage permission boundary.
//!
//! Each stage runs with a short-lived [`ScopedCredential`] carrying only the
//! capabilities its role is granted by a [`PolicySet`] (first-match-wins,
//! default-deny). Operations that touch shared state check the credential
//! before acting; a denial is terminal for the stage.
//!
//! - [`capability`] - `Capability` enum (`source_read`, `tag_write`, …)
//! - [`rules`]      - `PolicyRule`, `PolicySet`, `PolicyVerdict`
//! - [`credential`] - `ScopedCredential`, `CredentialIssuer`

pub mod capability;
pub mod credential;
pub mod rules;

pub use capability::Capability;
pub use credential::{
    CredentialIssuer, ScopedCredential, DEFAULT_CREDENTIAL_TTL_SECS, STAGE_TOKEN_ENV,
    STAGE_TOKEN_EXPIRES_ENV,
};
pub use rules::{PolicyRule, PolicySet, PolicyVerdict};
