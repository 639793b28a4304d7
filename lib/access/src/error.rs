//! Error types for the login flow.
//!
//! Every variant is terminal: the flow aborts at the point of detection and
//! the error surfaces to the caller. Nothing here is retried or recovered
//! internally.

use std::fmt;

/// Errors raised while processing an authorization-code login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFlowError {
    /// The callback carried no authorization code.
    MissingAuthCode,
    /// The callback carried no state parameter.
    MissingState,
    /// No registered authorization request matches the state value, or it
    /// was already consumed.
    UnknownOrExpiredState,
    /// The token endpoint response contained no identity assertion.
    MissingIdToken,
    /// The nonce embedded in the identity assertion does not match the one
    /// stored at request time.
    NonceMismatch,
    /// The verified identity is rejected by the configured acceptance rules.
    RestrictionFailed { reason: String },
    /// The signed-in account is already bound to a different external
    /// identity.
    AccountAlreadyConnected { username: String },
    /// The external identity is already bound to another local account.
    IdentityAlreadyConnectedToDifferentAccount { username: String },
    /// A staged manual match exists for the candidate username; the login
    /// must be resolved by hand.
    PendingExternalMatch {
        candidate: String,
        matched_username: String,
    },
    /// No local account exists and provisioning is disabled.
    NoAccountProvisioning { username: String },
    /// The local authentication handshake was rejected.
    LoginFailed { username: String },
    /// The identity provider could not be reached or answered unusably.
    Provider { reason: String },
    /// A persistence collaborator failed.
    Store { reason: String },
}

impl LoginFlowError {
    /// Wraps a provider transport failure.
    pub fn provider(reason: impl fmt::Display) -> Self {
        Self::Provider {
            reason: reason.to_string(),
        }
    }

    /// Wraps a store failure.
    pub fn store(reason: impl fmt::Display) -> Self {
        Self::Store {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for LoginFlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAuthCode => {
                write!(f, "no authorization code received from the provider")
            }
            Self::MissingState => {
                write!(f, "no state parameter received from the provider")
            }
            Self::UnknownOrExpiredState => {
                write!(f, "unknown or expired authorization request state")
            }
            Self::MissingIdToken => {
                write!(f, "token response contained no id token")
            }
            Self::NonceMismatch => {
                write!(f, "id token nonce does not match the stored nonce")
            }
            Self::RestrictionFailed { reason } => {
                write!(f, "login rejected by restrictions: {reason}")
            }
            Self::AccountAlreadyConnected { username } => {
                write!(f, "account '{username}' is already connected to another identity")
            }
            Self::IdentityAlreadyConnectedToDifferentAccount { username } => {
                write!(f, "identity is already connected to account '{username}'")
            }
            Self::PendingExternalMatch {
                candidate,
                matched_username,
            } => {
                write!(
                    f,
                    "'{candidate}' is staged for manual matching to account '{matched_username}'"
                )
            }
            Self::NoAccountProvisioning { username } => {
                write!(f, "no account '{username}' and provisioning is disabled")
            }
            Self::LoginFailed { username } => {
                write!(f, "authentication handshake failed for '{username}'")
            }
            Self::Provider { reason } => {
                write!(f, "identity provider error: {reason}")
            }
            Self::Store { reason } => {
                write!(f, "store error: {reason}")
            }
        }
    }
}

impl std::error::Error for LoginFlowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restriction_failed_display() {
        let err = LoginFlowError::RestrictionFailed {
            reason: "domain not allowed".to_string(),
        };
        assert!(err.to_string().contains("restrictions"));
        assert!(err.to_string().contains("domain not allowed"));
    }

    #[test]
    fn identity_connected_elsewhere_display() {
        let err = LoginFlowError::IdentityAlreadyConnectedToDifferentAccount {
            username: "bob".to_string(),
        };
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn pending_match_display() {
        let err = LoginFlowError::PendingExternalMatch {
            candidate: "alice@example.com".to_string(),
            matched_username: "alice".to_string(),
        };
        assert!(err.to_string().contains("alice@example.com"));
        assert!(err.to_string().contains("manual matching"));
    }

    #[test]
    fn store_helper_wraps_reason() {
        let err = LoginFlowError::store("connection refused");
        assert_eq!(
            err,
            LoginFlowError::Store {
                reason: "connection refused".to_string()
            }
        );
    }
}
