//! The caller identity resolved from a bearer token.

use serde::{Deserialize, Serialize};

/// A verified caller, produced only by the identity verifier.
///
/// Lives for one request and is never persisted by the gateway. The `id` is
/// opaque; it doubles as the ownership prefix of every key the principal may
/// create.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Opaque identity-provider user id.
    pub id: String,

    /// Email address, compared against the configured admin email.
    pub email: String,
}

impl Principal {
    /// True when this principal's email matches the configured admin email.
    ///
    /// Comparison is case-insensitive; identity providers are inconsistent
    /// about email casing.
    pub fn is_admin(&self, admin_email: &str) -> bool {
        !admin_email.is_empty() && self.email.eq_ignore_ascii_case(admin_email)
    }
}
