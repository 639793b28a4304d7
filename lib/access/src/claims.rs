//! Verified identity assertion claims.

use chrono::{DateTime, Utc};

/// The decoded, verified fields of an identity assertion.
///
/// Produced by an [`IdTokenVerifier`](crate::provider::IdTokenVerifier)
/// after signature and nonce verification; read-only and scoped to a single
/// callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    /// The subject claim - the provider's stable unique identifier for the
    /// person.
    pub subject: String,
    /// The nonce embedded in the assertion.
    pub nonce: String,
    /// When the assertion was issued.
    pub issued_at: DateTime<Utc>,
    /// When the assertion expires.
    pub expires_at: DateTime<Utc>,
    /// Provider-specific principal-name claim, used as a username hint.
    pub upn: Option<String>,
}

impl IdentityClaims {
    /// Creates a new claim set.
    #[must_use]
    pub fn new(
        subject: String,
        nonce: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject,
            nonce,
            issued_at,
            expires_at,
            upn: None,
        }
    }

    /// Sets the principal-name claim.
    #[must_use]
    pub fn with_upn(mut self, upn: Option<String>) -> Self {
        self.upn = upn;
        self
    }

    /// Returns the principal used for restriction checks: the username hint
    /// when present, the subject otherwise.
    #[must_use]
    pub fn restriction_principal(&self) -> &str {
        self.upn.as_deref().unwrap_or(&self.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(upn: Option<&str>) -> IdentityClaims {
        let now = Utc::now();
        IdentityClaims::new(
            "sub-123".to_string(),
            "nonce-abc".to_string(),
            now,
            now + Duration::hours(1),
        )
        .with_upn(upn.map(str::to_string))
    }

    #[test]
    fn restriction_principal_prefers_upn() {
        let claims = claims(Some("alice@example.com"));
        assert_eq!(claims.restriction_principal(), "alice@example.com");
    }

    #[test]
    fn restriction_principal_falls_back_to_subject() {
        let claims = claims(None);
        assert_eq!(claims.restriction_principal(), "sub-123");
    }
}
