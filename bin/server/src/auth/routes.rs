//! HTTP routes for the login flow.
//!
//! One endpoint serves both halves of the round trip: a request without a
//! `state` parameter starts a login, a request with one is the provider
//! callback. The connect and verify entry points stage their flow mode in a
//! short-lived cookie that the callback restores into the request context.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::sync::Arc;
use time::Duration as TimeDuration;
use wicket_access::{
    CallbackParams, FlowOutcome, LoginFlow, LoginFlowError, RequestContext, StateMetadata,
};

use super::{
    AppState,
    db::{PgAccountStore, SessionRepository},
};

/// Session cookie name.
const SESSION_COOKIE: &str = "session";

/// Flow mode cookie name (staged by the connect/verify entry points for the
/// duration of the provider round trip).
const FLOW_MODE_COOKIE: &str = "flow_mode";

/// Query parameters accepted by the flow endpoint.
#[derive(Debug, Deserialize)]
pub struct FlowQuery {
    code: Option<String>,
    state: Option<String>,
    promptlogin: Option<String>,
    promptaconsent: Option<String>,
    redirect: Option<String>,
}

/// Parses the `promptlogin`/`promptaconsent` query flags.
fn flag(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

impl FlowQuery {
    fn into_params(self) -> CallbackParams {
        CallbackParams {
            code: self.code,
            state: self.state,
            prompt_login: flag(self.promptlogin.as_deref()),
            prompt_admin_consent: flag(self.promptaconsent.as_deref()),
            redirect: self.redirect,
        }
    }
}

/// The flow endpoint: initial login requests and provider callbacks.
pub async fn flow_endpoint(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    let mut ctx = request_context(&state, &jar).await?;

    let mut jar = jar;
    if let Some(mode) = jar.get(FLOW_MODE_COOKIE).map(|c| c.value().to_string()) {
        match mode.as_str() {
            "verify" => ctx.verification_only = true,
            "connect" => ctx.connect_only = true,
            other => tracing::debug!(mode = other, "ignoring unknown flow mode"),
        }
        jar = jar.add(
            Cookie::build((FLOW_MODE_COOKIE, ""))
                .path("/")
                .max_age(TimeDuration::ZERO),
        );
    }

    let outcome = state.flow.handle_redirect(query.into_params(), ctx).await?;
    respond(&state, jar, outcome).await
}

/// Starts a connect-only flow: link the verified identity to the signed-in
/// account without switching its authentication method.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    start_with_mode(&state, jar, query, "connect", true).await
}

/// Starts a verification-only flow: confirm the identity, emit an event,
/// touch no account.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    start_with_mode(&state, jar, query, "verify", false).await
}

/// Logs out the user by deleting their session.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    if let Some(session_cookie) = jar.get(SESSION_COOKIE) {
        let sessions = SessionRepository::new(state.db_pool.clone());
        let _ = sessions.delete(session_cookie.value()).await;
    }

    let remove_session = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    (jar.add(remove_session), Redirect::to("/"))
}

async fn start_with_mode(
    state: &AppState,
    jar: CookieJar,
    query: FlowQuery,
    mode: &'static str,
    connect_only: bool,
) -> Result<Response, AuthError> {
    let mut extra_params = Vec::new();
    if flag(query.promptaconsent.as_deref()) {
        extra_params.push(("prompt".to_string(), "admin_consent".to_string()));
    }
    let metadata = StateMetadata {
        redirect: query.redirect.clone(),
        connect_only,
        ..StateMetadata::default()
    };

    let url = state
        .flow
        .initiate(flag(query.promptlogin.as_deref()), metadata, &extra_params)
        .await?;

    let mode_cookie = Cookie::build((FLOW_MODE_COOKIE, mode))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(10));

    Ok((jar.add(mode_cookie), Redirect::to(&url)).into_response())
}

/// Builds the request context from the session cookie.
async fn request_context(state: &AppState, jar: &CookieJar) -> Result<RequestContext, AuthError> {
    let Some(session_cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(RequestContext::anonymous());
    };

    let sessions = SessionRepository::new(state.db_pool.clone());
    let Some(session) = sessions.find_by_id(session_cookie.value()).await? else {
        return Ok(RequestContext::anonymous());
    };
    if session.is_expired() {
        let _ = sessions.delete(&session.id).await;
        return Ok(RequestContext::anonymous());
    }

    let accounts = PgAccountStore::new(state.db_pool.clone());
    Ok(match accounts.find(&session.username).await? {
        Some(account) => RequestContext::for_account(account),
        None => RequestContext::anonymous(),
    })
}

/// Translates a flow outcome into an HTTP response.
async fn respond(
    state: &AppState,
    jar: CookieJar,
    outcome: FlowOutcome,
) -> Result<Response, AuthError> {
    match outcome {
        FlowOutcome::RedirectToProvider { url } => Ok((jar, Redirect::to(&url)).into_response()),
        FlowOutcome::LoggedIn { username, redirect } => {
            let sessions = SessionRepository::new(state.db_pool.clone());
            let duration_minutes = state.session_config.duration_minutes;
            let session = sessions
                .create(&username, ChronoDuration::minutes(duration_minutes))
                .await?;

            let session_cookie = Cookie::build((SESSION_COOKIE, session.id))
                .path("/")
                .http_only(true)
                .secure(state.session_config.secure_cookies)
                .same_site(SameSite::Lax)
                .max_age(TimeDuration::minutes(duration_minutes));

            Ok((jar.add(session_cookie), Redirect::to(&redirect)).into_response())
        }
        FlowOutcome::Linked { username, redirect } => {
            tracing::debug!(%username, "link completed, redirecting");
            Ok((jar, Redirect::to(&redirect)).into_response())
        }
        FlowOutcome::Verified => Ok((jar, "identity verified").into_response()),
    }
}

/// Authentication errors surfaced over HTTP.
#[derive(Debug)]
pub enum AuthError {
    Flow(LoginFlowError),
}

impl From<LoginFlowError> for AuthError {
    fn from(err: LoginFlowError) -> Self {
        Self::Flow(err)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let Self::Flow(err) = self;
        let status = match &err {
            LoginFlowError::MissingAuthCode
            | LoginFlowError::MissingState
            | LoginFlowError::UnknownOrExpiredState
            | LoginFlowError::MissingIdToken
            | LoginFlowError::NonceMismatch => StatusCode::BAD_REQUEST,
            LoginFlowError::RestrictionFailed { .. }
            | LoginFlowError::NoAccountProvisioning { .. } => StatusCode::FORBIDDEN,
            LoginFlowError::AccountAlreadyConnected { .. }
            | LoginFlowError::IdentityAlreadyConnectedToDifferentAccount { .. }
            | LoginFlowError::PendingExternalMatch { .. } => StatusCode::CONFLICT,
            LoginFlowError::LoginFailed { .. } => StatusCode::UNAUTHORIZED,
            LoginFlowError::Provider { .. } | LoginFlowError::Store { .. } => {
                tracing::error!(error = %err, "login flow failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "authentication failed")
                    .into_response();
            }
        };

        (status, err.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parses_query_booleans() {
        assert!(flag(Some("1")));
        assert!(flag(Some("true")));
        assert!(!flag(Some("0")));
        assert!(!flag(Some("yes")));
        assert!(!flag(None));
    }

    #[test]
    fn flow_errors_map_to_statuses() {
        let cases = [
            (LoginFlowError::MissingAuthCode, StatusCode::BAD_REQUEST),
            (LoginFlowError::UnknownOrExpiredState, StatusCode::BAD_REQUEST),
            (LoginFlowError::NonceMismatch, StatusCode::BAD_REQUEST),
            (
                LoginFlowError::RestrictionFailed {
                    reason: "domain".to_string(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                LoginFlowError::AccountAlreadyConnected {
                    username: "alice".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                LoginFlowError::LoginFailed {
                    username: "alice".to_string(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                LoginFlowError::store("down"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AuthError::from(err).into_response().status(), status);
        }
    }
}
