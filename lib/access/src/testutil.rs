//! Provider and verifier stubs shared by the crate's tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::claims::IdentityClaims;
use crate::error::LoginFlowError;
use crate::provider::{IdTokenVerifier, IdentityProviderClient, TokenSet, UserInfo};

/// Provider client returning canned responses.
pub(crate) struct StubProvider {
    pub username: String,
    pub token_set: TokenSet,
}

impl StubProvider {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            token_set: TokenSet::new("stub-access-token")
                .with_refresh_token(Some("stub-refresh-token".to_string()))
                .with_id_token(Some("stub-id-token".to_string())),
        }
    }

    pub fn with_token_set(mut self, token_set: TokenSet) -> Self {
        self.token_set = token_set;
        self
    }
}

#[async_trait]
impl IdentityProviderClient for StubProvider {
    fn authorization_url(
        &self,
        prompt_login: bool,
        state: &str,
        nonce: &str,
        extra_params: &[(String, String)],
    ) -> Result<String, LoginFlowError> {
        let mut url = format!(
            "https://idp.test/authorize?response_type=code&client_id=test-client&state={state}&nonce={nonce}"
        );
        if prompt_login {
            url.push_str("&prompt=login");
        }
        for (key, value) in extra_params {
            url.push_str(&format!("&{key}={value}"));
        }
        Ok(url)
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenSet, LoginFlowError> {
        Ok(self.token_set.clone())
    }

    async fn fetch_user_info(&self, _access_token: &str) -> Result<UserInfo, LoginFlowError> {
        Ok(UserInfo {
            username: self.username.clone(),
            email: None,
        })
    }
}

/// Verifier accepting any assertion minted for the expected nonce.
///
/// With `embedded_nonce` set, the stub behaves like an assertion carrying
/// that fixed nonce: verification fails unless it equals the expected one.
pub(crate) struct StubVerifier {
    pub subject: String,
    pub upn: Option<String>,
    pub embedded_nonce: Option<String>,
}

impl StubVerifier {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            upn: None,
            embedded_nonce: None,
        }
    }

    pub fn with_upn(mut self, upn: &str) -> Self {
        self.upn = Some(upn.to_string());
        self
    }

    pub fn with_embedded_nonce(mut self, nonce: &str) -> Self {
        self.embedded_nonce = Some(nonce.to_string());
        self
    }
}

impl IdTokenVerifier for StubVerifier {
    fn verify(
        &self,
        _raw_assertion: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, LoginFlowError> {
        if let Some(embedded) = &self.embedded_nonce {
            if embedded != expected_nonce {
                return Err(LoginFlowError::NonceMismatch);
            }
        }
        let now = Utc::now();
        Ok(IdentityClaims::new(
            self.subject.clone(),
            expected_nonce.to_string(),
            now,
            now + Duration::hours(1),
        )
        .with_upn(self.upn.clone()))
    }
}
