//! Resolving a verified identity to a login session.

use std::sync::Arc;

use crate::account::{AccountStore, EventSink, FlowEvent, PendingMatchFinder};
use crate::claims::IdentityClaims;
use crate::config::FlowConfig;
use crate::error::LoginFlowError;
use crate::provider::{IdentityProviderClient, TokenSet};
use crate::token::TokenRecordStore;

/// Resolves a verified identity to a (possibly newly provisioned) local
/// account and completes the login session.
pub struct AccountResolver {
    config: FlowConfig,
    provider: Arc<dyn IdentityProviderClient>,
    records: Arc<dyn TokenRecordStore>,
    accounts: Arc<dyn AccountStore>,
    events: Arc<dyn EventSink>,
    pending_matches: Arc<dyn PendingMatchFinder>,
}

impl AccountResolver {
    /// Creates a resolver over the given collaborators.
    pub fn new(
        config: FlowConfig,
        provider: Arc<dyn IdentityProviderClient>,
        records: Arc<dyn TokenRecordStore>,
        accounts: Arc<dyn AccountStore>,
        events: Arc<dyn EventSink>,
        pending_matches: Arc<dyn PendingMatchFinder>,
    ) -> Self {
        Self {
            config,
            provider,
            records,
            accounts,
            events,
            pending_matches,
        }
    }

    /// Resolves the identity and completes the session. Returns the local
    /// username that was logged in.
    ///
    /// Token-record creation and account provisioning happen before the
    /// final handshake and are not rolled back if it fails; a rejected
    /// handshake leaves the binding in place for the next attempt.
    pub async fn resolve(
        &self,
        claims: &IdentityClaims,
        auth_code: &str,
        token_set: &TokenSet,
    ) -> Result<String, LoginFlowError> {
        let external_id = &claims.subject;

        let username = match self.records.find_by_external_id(external_id).await? {
            Some(record) => {
                self.records.rotate(record.id, auth_code, token_set).await?;
                record.username
            }
            None => {
                let info = self.provider.fetch_user_info(&token_set.access_token).await?;
                let candidate = claims.upn.clone().unwrap_or(info.username);

                if let Some(matched) = self.pending_matches.find(&candidate).await? {
                    return Err(LoginFlowError::PendingExternalMatch {
                        candidate,
                        matched_username: matched.username,
                    });
                }

                self.records
                    .create(external_id, &candidate, auth_code, token_set)
                    .await?;
                candidate
            }
        };

        if !self.accounts.exists(&username).await? {
            if self.config.allow_provisioning() {
                self.accounts.provision(&username).await?;
                tracing::info!(%username, "provisioned account for new identity");
            } else {
                self.events.emit(FlowEvent::LoginFailed {
                    username: username.clone(),
                    reason: "no such account and provisioning is disabled".to_string(),
                });
                return Err(LoginFlowError::NoAccountProvisioning { username });
            }
        }

        let session = self
            .accounts
            .authenticate(&username)
            .await?
            .ok_or_else(|| LoginFlowError::LoginFailed {
                username: username.clone(),
            })?;
        self.accounts.complete_session(session).await?;

        Ok(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountRef, AuthMethod, LocalAccount};
    use crate::memory::{
        CollectingEventSink, InMemoryAccountStore, InMemoryPendingMatches,
        InMemoryTokenRecordStore,
    };
    use crate::testutil::StubProvider;
    use chrono::{Duration, Utc};
    use wicket_core::AccountId;

    fn claims(subject: &str, upn: Option<&str>) -> IdentityClaims {
        let now = Utc::now();
        IdentityClaims::new(
            subject.to_string(),
            "nonce".to_string(),
            now,
            now + Duration::hours(1),
        )
        .with_upn(upn.map(str::to_string))
    }

    fn token_set(access_token: &str) -> TokenSet {
        TokenSet::new(access_token).with_id_token(Some(format!("idt-{access_token}")))
    }

    struct Fixture {
        records: Arc<InMemoryTokenRecordStore>,
        accounts: Arc<InMemoryAccountStore>,
        events: Arc<CollectingEventSink>,
        pending: Arc<InMemoryPendingMatches>,
        resolver: AccountResolver,
    }

    fn fixture_with(config: FlowConfig, provider_username: &str) -> Fixture {
        let records = Arc::new(InMemoryTokenRecordStore::new());
        let accounts = Arc::new(InMemoryAccountStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let pending = Arc::new(InMemoryPendingMatches::new());
        let resolver = AccountResolver::new(
            config,
            Arc::new(StubProvider::new(provider_username)),
            records.clone(),
            accounts.clone(),
            events.clone(),
            pending.clone(),
        );
        Fixture {
            records,
            accounts,
            events,
            pending,
            resolver,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FlowConfig::default(), "alice")
    }

    #[tokio::test]
    async fn fresh_identity_provisions_account_and_completes_session() {
        let f = fixture();

        let username = f
            .resolver
            .resolve(&claims("ext-1", None), "code1", &token_set("at1"))
            .await
            .unwrap();

        assert_eq!(username, "alice");
        let records = f.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id, "ext-1");
        assert_eq!(records[0].username, "alice");
        assert!(f.accounts.get("alice").is_some());
        assert_eq!(f.accounts.completed_sessions().len(), 1);
    }

    #[tokio::test]
    async fn candidate_username_prefers_principal_name_claim() {
        let f = fixture_with(FlowConfig::default(), "fallback-user");

        let username = f
            .resolver
            .resolve(
                &claims("ext-1", Some("upn-user@example.com")),
                "code1",
                &token_set("at1"),
            )
            .await
            .unwrap();

        assert_eq!(username, "upn-user@example.com");
    }

    #[tokio::test]
    async fn known_identity_reuses_binding_and_rotates() {
        let f = fixture();
        f.resolver
            .resolve(&claims("ext-1", None), "code1", &token_set("at1"))
            .await
            .unwrap();

        let username = f
            .resolver
            .resolve(&claims("ext-1", None), "code2", &token_set("at2"))
            .await
            .unwrap();

        assert_eq!(username, "alice");
        let records = f.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].auth_code, "code2");
        assert_eq!(records[0].access_token, "at2");
    }

    #[tokio::test]
    async fn staged_match_aborts_without_creating_a_record() {
        let f = fixture();
        f.pending.stage(
            "alice",
            AccountRef {
                account_id: AccountId::new(),
                username: "alice-manual".to_string(),
            },
        );

        let err = f
            .resolver
            .resolve(&claims("ext-1", None), "code1", &token_set("at1"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LoginFlowError::PendingExternalMatch {
                candidate: "alice".to_string(),
                matched_username: "alice-manual".to_string(),
            }
        );
        assert!(f.records.records().is_empty());
    }

    #[tokio::test]
    async fn provisioning_disabled_fails_and_emits_event() {
        let f = fixture_with(
            FlowConfig::builder().allow_provisioning(false).build(),
            "alice",
        );

        let err = f
            .resolver
            .resolve(&claims("ext-1", None), "code1", &token_set("at1"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LoginFlowError::NoAccountProvisioning {
                username: "alice".to_string()
            }
        );
        assert!(f.accounts.get("alice").is_none());
        assert!(matches!(
            f.events.events().as_slice(),
            [FlowEvent::LoginFailed { username, .. }] if username == "alice"
        ));
    }

    #[tokio::test]
    async fn rejected_handshake_fails_login() {
        let f = fixture();
        // Account exists but still authenticates locally, so the provider
        // handshake is refused.
        f.accounts
            .insert(LocalAccount::new("alice", AuthMethod::Password));

        let err = f
            .resolver
            .resolve(&claims("ext-1", None), "code1", &token_set("at1"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LoginFlowError::LoginFailed {
                username: "alice".to_string()
            }
        );
        // The binding created before the handshake is not rolled back.
        assert_eq!(f.records.records().len(), 1);
        assert!(f.accounts.completed_sessions().is_empty());
    }
}
