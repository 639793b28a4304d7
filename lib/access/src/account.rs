//! Local accounts and the collaborator interfaces around them.
//!
//! The account backend owns account records; this crate only reads them and
//! requests mutations through [`AccountStore`]. Flow notifications go
//! through [`EventSink`], and staged manual identity matches are looked up
//! through [`PendingMatchFinder`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wicket_core::AccountId;

use crate::error::LoginFlowError;
use crate::provider::TokenSet;

/// How an account authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthMethod {
    /// The external OpenID Connect provider.
    OpenIdConnect,
    /// Local password authentication.
    Password,
    /// Any other authentication backend, by name.
    Other(String),
}

impl AuthMethod {
    /// Returns the persisted name of the method.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenIdConnect => "oidc",
            Self::Password => "password",
            Self::Other(name) => name,
        }
    }

    /// Returns true if the method is the external provider.
    #[must_use]
    pub fn is_oidc(&self) -> bool {
        matches!(self, Self::OpenIdConnect)
    }
}

impl From<String> for AuthMethod {
    fn from(name: String) -> Self {
        match name.as_str() {
            "oidc" => Self::OpenIdConnect,
            "password" => Self::Password,
            _ => Self::Other(name),
        }
    }
}

impl From<AuthMethod> for String {
    fn from(method: AuthMethod) -> Self {
        method.as_str().to_string()
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A local account as seen by the login flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAccount {
    /// Internal account ID.
    pub id: AccountId,
    /// Unique local username.
    pub username: String,
    /// The account's current authentication method.
    pub auth_method: AuthMethod,
    /// Opaque reference to the account's stored credential, if any. Captured
    /// into the previous-login backup when the method is switched.
    pub credential: Option<String>,
}

impl LocalAccount {
    /// Creates an account value with a fresh ID and no credential.
    #[must_use]
    pub fn new(username: impl Into<String>, auth_method: AuthMethod) -> Self {
        Self {
            id: AccountId::new(),
            username: username.into(),
            auth_method,
            credential: None,
        }
    }

    /// Sets the credential reference.
    #[must_use]
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

/// An authenticated session produced by the local handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The authenticated username.
    pub username: String,
    /// When the handshake succeeded.
    pub established_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session established now.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            established_at: Utc::now(),
        }
    }
}

/// Reference to an account staged for manual matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    /// Internal account ID.
    pub account_id: AccountId,
    /// The account's username.
    pub username: String,
}

/// Notifications emitted by the flow.
///
/// Delivery is fire-and-forget: a sink must never block or fail the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// An identity was verified on behalf of a caller that wanted
    /// confirmation only. Carries the raw callback and token-exchange data.
    IdentityVerified {
        state: String,
        code: String,
        tokens: TokenSet,
    },
    /// An external identity was linked to a local account.
    AccountConnected { username: String },
    /// A login could not be completed.
    LoginFailed { username: String, reason: String },
}

/// The account backend consumed by the flow.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Returns true if an account with this username exists.
    async fn exists(&self, username: &str) -> Result<bool, LoginFlowError>;

    /// Creates an account for the username, authenticating via the external
    /// provider.
    async fn provision(&self, username: &str) -> Result<LocalAccount, LoginFlowError>;

    /// Switches an account's authentication method.
    async fn set_auth_method(
        &self,
        username: &str,
        method: AuthMethod,
    ) -> Result<(), LoginFlowError>;

    /// Runs the local authentication handshake. Returns `None` if the
    /// handshake is rejected.
    async fn authenticate(&self, username: &str) -> Result<Option<Session>, LoginFlowError>;

    /// Completes a session established by [`authenticate`](Self::authenticate).
    async fn complete_session(&self, session: Session) -> Result<(), LoginFlowError>;
}

/// Fire-and-forget notification sink.
pub trait EventSink: Send + Sync {
    /// Emits one event. Must not block.
    fn emit(&self, event: FlowEvent);
}

/// Lookup of previously staged manual identity matches.
#[async_trait]
pub trait PendingMatchFinder: Send + Sync {
    /// Returns the staged match for the candidate username, if any.
    async fn find(&self, candidate: &str) -> Result<Option<AccountRef>, LoginFlowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_method_string_roundtrip() {
        for method in [
            AuthMethod::OpenIdConnect,
            AuthMethod::Password,
            AuthMethod::Other("ldap".to_string()),
        ] {
            let name = String::from(method.clone());
            assert_eq!(AuthMethod::from(name), method);
        }
    }

    #[test]
    fn auth_method_names() {
        assert_eq!(AuthMethod::OpenIdConnect.as_str(), "oidc");
        assert_eq!(AuthMethod::Password.as_str(), "password");
        assert_eq!(AuthMethod::Other("saml".to_string()).as_str(), "saml");
        assert!(AuthMethod::OpenIdConnect.is_oidc());
        assert!(!AuthMethod::Password.is_oidc());
    }

    #[test]
    fn account_serde_roundtrip() {
        let account = LocalAccount::new("alice", AuthMethod::Password)
            .with_credential(Some("hash:abc".to_string()));
        let json = serde_json::to_string(&account).expect("serialize");
        let parsed: LocalAccount = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(account, parsed);
    }
}
