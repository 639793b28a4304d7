//! Identity provider collaborator interfaces.
//!
//! The flow consumes the provider through two narrow seams: the transport
//! client ([`IdentityProviderClient`]) and the assertion verifier
//! ([`IdTokenVerifier`]). Wire formats beyond the fields captured here are
//! the client's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::claims::IdentityClaims;
use crate::error::LoginFlowError;

/// The consumed fields of a token-endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer token for provider API calls.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// The raw identity assertion, if the provider issued one.
    pub id_token: Option<String>,
}

impl TokenSet {
    /// Creates a token set with only an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token;
        self
    }

    /// Sets the raw identity assertion.
    #[must_use]
    pub fn with_id_token(mut self, token: Option<String>) -> Self {
        self.id_token = token;
        self
    }
}

/// The consumed fields of a userinfo response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Username as reported by the provider.
    pub username: String,
    /// Email address, if reported.
    pub email: Option<String>,
}

/// Transport client for the identity provider.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    /// Builds the authorization-endpoint URL carrying the client id,
    /// `response_type=code`, the redirect target, the requested scopes, the
    /// state token, the nonce, and any extra parameters.
    fn authorization_url(
        &self,
        prompt_login: bool,
        state: &str,
        nonce: &str,
        extra_params: &[(String, String)],
    ) -> Result<String, LoginFlowError>;

    /// Exchanges an authorization code at the token endpoint.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, LoginFlowError>;

    /// Fetches userinfo with an access token.
    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, LoginFlowError>;
}

/// Cryptographic verifier for identity assertions.
///
/// A verifier must reject any assertion whose embedded nonce is not exactly
/// the expected one, surfacing
/// [`LoginFlowError::NonceMismatch`].
pub trait IdTokenVerifier: Send + Sync {
    /// Decodes and verifies a raw assertion against the expected nonce.
    fn verify(
        &self,
        raw_assertion: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, LoginFlowError>;
}
