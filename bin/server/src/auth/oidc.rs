//! Identity provider client implementation using the openidconnect crate.

use std::str::FromStr;

use async_trait::async_trait;
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreProviderMetadata, CoreUserInfoClaims,
};
use openidconnect::{
    AccessToken, AuthorizationCode, ClaimsVerificationError, ClientId, ClientSecret, CsrfToken,
    IssuerUrl, Nonce, OAuth2TokenResponse, RedirectUrl, Scope,
};
use serde::{Deserialize, Serialize};
use wicket_access::{
    IdTokenVerifier, IdentityClaims, IdentityProviderClient, LoginFlowError, TokenSet, UserInfo,
};

/// Connection configuration for the identity provider.
///
/// Fields with defaults can be omitted when loading from environment
/// variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The OIDC issuer URL (e.g., "https://login.example.com/tenant").
    /// Used for OIDC discovery.
    issuer_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// The redirect URI for the OAuth2 callback
    /// (e.g., "https://app.example.com/auth/oidc").
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

impl ProviderConfig {
    /// Creates a new provider configuration with default scopes.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            scopes: default_scopes(),
        }
    }

    /// Returns the OIDC issuer URL.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated
    /// string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes.split(',').map(str::trim).collect()
    }
}

/// Provider setup errors.
#[derive(Debug)]
pub enum ProviderError {
    /// Configuration error (invalid URLs, etc.)
    Configuration(String),
    /// Failed to discover provider metadata.
    Discovery(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "provider configuration error: {}", msg),
            Self::Discovery(msg) => write!(f, "provider discovery error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Transport client for the identity provider.
pub struct ProviderClient {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl ProviderClient {
    /// Creates a new provider client by discovering the provider metadata.
    pub async fn discover(config: ProviderConfig) -> Result<Self, ProviderError> {
        let issuer_url = IssuerUrl::new(config.issuer_url().to_string())
            .map_err(|e| ProviderError::Configuration(format!("invalid issuer URL: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http_client)
            .await
            .map_err(|e| ProviderError::Discovery(format!("failed to discover provider: {}", e)))?;

        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string())
            .map_err(|e| ProviderError::Configuration(format!("invalid redirect URI: {}", e)))?;

        let client_id = ClientId::new(config.client_id().to_string());
        let client_secret = ClientSecret::new(config.client_secret.clone());

        Ok(Self {
            provider_metadata,
            client_id,
            client_secret,
            redirect_url,
            config,
            http_client,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns a verifier for assertions issued to this client.
    #[must_use]
    pub fn verifier(&self) -> ProviderVerifier {
        ProviderVerifier {
            provider_metadata: self.provider_metadata.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

#[async_trait]
impl IdentityProviderClient for ProviderClient {
    fn authorization_url(
        &self,
        prompt_login: bool,
        state: &str,
        nonce: &str,
        extra_params: &[(String, String)],
    ) -> Result<String, LoginFlowError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let state = CsrfToken::new(state.to_string());
        let nonce = Nonce::new(nonce.to_string());
        let mut auth_request = client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            move || state,
            move || nonce,
        );

        for scope in self.config.scopes() {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }
        if prompt_login {
            auth_request = auth_request.add_extra_param("prompt", "login");
        }
        for (key, value) in extra_params {
            auth_request = auth_request.add_extra_param(key.clone(), value.clone());
        }

        let (auth_url, _state, _nonce) = auth_request.url();
        Ok(auth_url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, LoginFlowError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| LoginFlowError::provider(format!("token endpoint error: {}", e)))?
            .request_async(&self.http_client)
            .await
            .map_err(|e| LoginFlowError::provider(format!("token exchange failed: {}", e)))?;

        // The verifier needs the raw JWT; pull it out of the serialized
        // response rather than the typed accessor.
        let response_json = serde_json::to_value(&token_response).map_err(|e| {
            LoginFlowError::provider(format!("failed to serialize token response: {}", e))
        })?;
        let id_token = response_json
            .get("id_token")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(TokenSet::new(token_response.access_token().secret().clone())
            .with_refresh_token(token_response.refresh_token().map(|t| t.secret().clone()))
            .with_id_token(id_token))
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, LoginFlowError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let claims: CoreUserInfoClaims = client
            .user_info(AccessToken::new(access_token.to_string()), None)
            .map_err(|e| LoginFlowError::provider(format!("userinfo endpoint error: {}", e)))?
            .request_async(&self.http_client)
            .await
            .map_err(|e| LoginFlowError::provider(format!("userinfo request failed: {}", e)))?;

        let email = claims.email().map(|e| e.as_str().to_string());
        let username = claims
            .preferred_username()
            .map(|u| u.as_str().to_string())
            .or_else(|| email.clone())
            .unwrap_or_else(|| claims.subject().to_string());

        Ok(UserInfo { username, email })
    }
}

/// Assertion verifier backed by the provider's published keys.
pub struct ProviderVerifier {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
}

impl IdTokenVerifier for ProviderVerifier {
    fn verify(
        &self,
        raw_assertion: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, LoginFlowError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        );

        let id_token = CoreIdToken::from_str(raw_assertion)
            .map_err(|e| LoginFlowError::provider(format!("unparseable id token: {}", e)))?;

        let nonce = Nonce::new(expected_nonce.to_string());
        let claims = id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| match e {
                ClaimsVerificationError::InvalidNonce(_) => LoginFlowError::NonceMismatch,
                other => {
                    LoginFlowError::provider(format!("id token validation failed: {}", other))
                }
            })?;

        let upn = raw_claim(raw_assertion, "upn")
            .or_else(|| raw_claim(raw_assertion, "preferred_username"));

        Ok(IdentityClaims::new(
            claims.subject().to_string(),
            expected_nonce.to_string(),
            claims.issue_time(),
            claims.expiration(),
        )
        .with_upn(upn))
    }
}

/// Extracts a string claim from the raw JWT payload.
///
/// Custom claims such as "upn" are not in the standard claim set, so the
/// payload is decoded directly.
fn raw_claim(raw_jwt: &str, claim: &str) -> Option<String> {
    use base64::Engine;

    // JWT is base64url(header).base64url(payload).signature
    let payload = raw_jwt.split('.').nth(1)?;
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;
    payload
        .get(claim)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn fake_jwt(payload: serde_json::Value) -> String {
        let encode = |value: &serde_json::Value| {
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(serde_json::to_vec(value).expect("serialize"))
        };
        format!(
            "{}.{}.signature",
            encode(&serde_json::json!({"alg": "RS256"})),
            encode(&payload)
        )
    }

    #[test]
    fn provider_config_parses_scopes() {
        let config = ProviderConfig::new(
            "https://login.example.com".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "https://app.example.com/auth/oidc".to_string(),
        );
        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
    }

    #[test]
    fn provider_config_deserializes_with_default_scopes() {
        let json = r#"{
            "issuer_url": "https://login.example.com",
            "client_id": "my-client",
            "client_secret": "secret",
            "redirect_uri": "https://app.example.com/auth/oidc"
        }"#;
        let config: ProviderConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.issuer_url(), "https://login.example.com");
        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
    }

    #[test]
    fn raw_claim_reads_custom_payload_fields() {
        let jwt = fake_jwt(serde_json::json!({
            "sub": "ext-1",
            "upn": "alice@example.com"
        }));
        assert_eq!(raw_claim(&jwt, "upn").as_deref(), Some("alice@example.com"));
        assert_eq!(raw_claim(&jwt, "missing"), None);
    }

    #[test]
    fn raw_claim_rejects_malformed_tokens() {
        assert_eq!(raw_claim("not-a-jwt", "upn"), None);
        assert_eq!(raw_claim("a.!!!.c", "upn"), None);
    }
}
