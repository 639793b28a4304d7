//! The authorization-code login flow.
//!
//! [`AuthorizationCodeFlow`] orchestrates one full round trip: building the
//! outbound authorization redirect, then validating the callback, consuming
//! the anti-replay state, exchanging the code, verifying the assertion,
//! applying restrictions, and dispatching to one of the three outcome
//! handlers (event capture, account linking, login).
//!
//! Grant-type flows are interchangeable strategies behind the [`LoginFlow`]
//! trait; a sibling grant type would be a sibling implementation selected by
//! configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::account::{AccountStore, EventSink, FlowEvent, PendingMatchFinder};
use crate::config::FlowConfig;
use crate::context::RequestContext;
use crate::error::LoginFlowError;
use crate::linker::AccountLinker;
use crate::provider::{IdTokenVerifier, IdentityProviderClient};
use crate::resolver::AccountResolver;
use crate::state::{AuthState, StateMetadata, StateStore};
use crate::token::{PrevLoginStore, TokenRecordStore};

/// Query parameters of a request hitting the flow endpoint.
///
/// A request carrying a `state` value is a provider callback; anything else
/// is an initial login request.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    /// Authorization code returned by the provider.
    pub code: Option<String>,
    /// State token echoed back by the provider.
    pub state: Option<String>,
    /// Ask the provider to prompt for credentials even with an active
    /// provider session.
    pub prompt_login: bool,
    /// Ask the provider for administrative consent.
    pub prompt_admin_consent: bool,
    /// Where to send the browser once the flow completes.
    pub redirect: Option<String>,
}

impl CallbackParams {
    /// Parameters of a provider callback.
    #[must_use]
    pub fn callback(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }
}

/// Terminal result of a handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Initial request: send the browser to the provider.
    RedirectToProvider { url: String },
    /// A login completed.
    LoggedIn { username: String, redirect: String },
    /// The identity was linked to the signed-in account.
    Linked { username: String, redirect: String },
    /// Identity verified on behalf of a verification-only caller; no
    /// account was touched.
    Verified,
}

/// A grant-type login flow.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// Builds the outbound authorization redirect and registers the
    /// matching state record. Returns the provider URL.
    async fn initiate(
        &self,
        prompt_login: bool,
        metadata: StateMetadata,
        extra_params: &[(String, String)],
    ) -> Result<String, LoginFlowError>;

    /// Handles a request to the flow endpoint: initial requests re-enter
    /// `initiate`, callbacks run the validation and dispatch machine.
    async fn handle_redirect(
        &self,
        params: CallbackParams,
        ctx: RequestContext,
    ) -> Result<FlowOutcome, LoginFlowError>;
}

/// The authorization-code grant flow.
pub struct AuthorizationCodeFlow {
    config: FlowConfig,
    provider: Arc<dyn IdentityProviderClient>,
    verifier: Arc<dyn IdTokenVerifier>,
    states: Arc<dyn StateStore>,
    records: Arc<dyn TokenRecordStore>,
    events: Arc<dyn EventSink>,
    linker: AccountLinker,
    resolver: AccountResolver,
}

impl AuthorizationCodeFlow {
    /// Creates the flow over its collaborators.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        config: FlowConfig,
        provider: Arc<dyn IdentityProviderClient>,
        verifier: Arc<dyn IdTokenVerifier>,
        states: Arc<dyn StateStore>,
        records: Arc<dyn TokenRecordStore>,
        prev_logins: Arc<dyn PrevLoginStore>,
        accounts: Arc<dyn AccountStore>,
        events: Arc<dyn EventSink>,
        pending_matches: Arc<dyn PendingMatchFinder>,
    ) -> Self {
        let linker = AccountLinker::new(
            provider.clone(),
            records.clone(),
            prev_logins,
            accounts.clone(),
            events.clone(),
        );
        let resolver = AccountResolver::new(
            config.clone(),
            provider.clone(),
            records.clone(),
            accounts,
            events.clone(),
            pending_matches,
        );
        Self {
            config,
            provider,
            verifier,
            states,
            records,
            events,
            linker,
            resolver,
        }
    }

    /// Runs the callback state machine for a provider response.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
        ctx: RequestContext,
    ) -> Result<FlowOutcome, LoginFlowError> {
        let code = params
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or(LoginFlowError::MissingAuthCode)?;
        let state = params
            .state
            .as_deref()
            .filter(|state| !state.is_empty())
            .ok_or(LoginFlowError::MissingState)?;

        // Consuming the state is deliberately irreversible: single use is
        // guaranteed even if the rest of the callback fails.
        let auth_state = self
            .states
            .take(state)
            .await?
            .ok_or(LoginFlowError::UnknownOrExpiredState)?;
        let metadata = auth_state.metadata;

        let token_set = self.provider.exchange_code(code).await?;
        let raw_assertion = token_set
            .id_token
            .as_deref()
            .ok_or(LoginFlowError::MissingIdToken)?;

        let claims = self.verifier.verify(raw_assertion, &auth_state.nonce)?;

        let principal = claims.restriction_principal();
        if !self.config.allows_domain_of(principal) {
            tracing::warn!(%principal, "login rejected by domain restrictions");
            return Err(LoginFlowError::RestrictionFailed {
                reason: format!("'{principal}' is not in an accepted domain"),
            });
        }

        if ctx.verification_only {
            self.events.emit(FlowEvent::IdentityVerified {
                state: state.to_string(),
                code: code.to_string(),
                tokens: token_set.clone(),
            });
            tracing::info!(subject = %claims.subject, "identity verified without login");
            return Ok(FlowOutcome::Verified);
        }

        if let Some(account) = ctx.account.as_ref() {
            let existing = self.records.find_by_external_id(&claims.subject).await?;
            if existing.is_none() || !account.auth_method.is_oidc() {
                let connect_only = ctx.connect_only || metadata.connect_only;
                self.linker
                    .link(&claims, code, &token_set, account, connect_only)
                    .await?;
                let redirect = metadata
                    .redirect
                    .unwrap_or_else(|| self.config.post_link_redirect().to_string());
                return Ok(FlowOutcome::Linked {
                    username: account.username.clone(),
                    redirect,
                });
            }
        }

        let username = self.resolver.resolve(&claims, code, &token_set).await?;
        tracing::info!(%username, "login completed");
        Ok(FlowOutcome::LoggedIn {
            username,
            redirect: self.config.post_login_redirect().to_string(),
        })
    }
}

#[async_trait]
impl LoginFlow for AuthorizationCodeFlow {
    async fn initiate(
        &self,
        prompt_login: bool,
        metadata: StateMetadata,
        extra_params: &[(String, String)],
    ) -> Result<String, LoginFlowError> {
        let state = generate_token();
        let nonce = generate_token();
        let url = self
            .provider
            .authorization_url(prompt_login, &state, &nonce, extra_params)?;
        self.states
            .create(AuthState::new(state.clone(), nonce, metadata))
            .await?;
        tracing::debug!(%state, "registered authorization request");
        Ok(url)
    }

    async fn handle_redirect(
        &self,
        params: CallbackParams,
        ctx: RequestContext,
    ) -> Result<FlowOutcome, LoginFlowError> {
        let is_callback = params.state.as_deref().is_some_and(|state| !state.is_empty());
        if is_callback {
            return self.handle_callback(params, ctx).await;
        }

        let mut extra_params = Vec::new();
        if params.prompt_admin_consent {
            extra_params.push(("prompt".to_string(), "admin_consent".to_string()));
        }
        let metadata = StateMetadata {
            redirect: params.redirect.clone(),
            connect_only: ctx.connect_only,
            extra: BTreeMap::new(),
        };
        let url = self
            .initiate(params.prompt_login, metadata, &extra_params)
            .await?;
        Ok(FlowOutcome::RedirectToProvider { url })
    }
}

/// Generates an unguessable, URL-safe opaque token.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
