//! Linking a verified identity to the signed-in account.

use std::sync::Arc;

use crate::account::{AccountStore, AuthMethod, EventSink, FlowEvent, LocalAccount};
use crate::claims::IdentityClaims;
use crate::error::LoginFlowError;
use crate::provider::{IdentityProviderClient, TokenSet};
use crate::token::{PrevLoginRecord, PrevLoginStore, TokenRecordStore};

/// Resolves migration and linking of a verified identity onto the account
/// of the currently active local session.
///
/// Linking is idempotent for an identity already bound to the signed-in
/// account: repeat links only rotate the token record. An identity bound to
/// a different account, or an account bound to a different identity, is a
/// conflict and nothing is mutated.
pub struct AccountLinker {
    provider: Arc<dyn IdentityProviderClient>,
    records: Arc<dyn TokenRecordStore>,
    prev_logins: Arc<dyn PrevLoginStore>,
    accounts: Arc<dyn AccountStore>,
    events: Arc<dyn EventSink>,
}

impl AccountLinker {
    /// Creates a linker over the given collaborators.
    pub fn new(
        provider: Arc<dyn IdentityProviderClient>,
        records: Arc<dyn TokenRecordStore>,
        prev_logins: Arc<dyn PrevLoginStore>,
        accounts: Arc<dyn AccountStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider,
            records,
            prev_logins,
            accounts,
            events,
        }
    }

    /// Links the verified identity to `account`.
    ///
    /// With `connect_only` the account keeps its current authentication
    /// method; otherwise the method is switched to the provider, preceded by
    /// a one-time backup of the method it had before.
    pub async fn link(
        &self,
        claims: &IdentityClaims,
        auth_code: &str,
        token_set: &TokenSet,
        account: &LocalAccount,
        connect_only: bool,
    ) -> Result<(), LoginFlowError> {
        let external_id = &claims.subject;

        if let Some(record) = self.records.find_by_external_id(external_id).await? {
            if !self.accounts.exists(&record.username).await? {
                // The bound account is gone; the record is stale.
                tracing::info!(
                    external_id,
                    stale_username = %record.username,
                    "removing token record bound to a deleted account"
                );
                self.records.delete(record.id).await?;
            } else if record.username == account.username {
                self.records.rotate(record.id, auth_code, token_set).await?;
                self.maybe_switch_method(account, connect_only).await?;
                return Ok(());
            } else {
                return Err(LoginFlowError::IdentityAlreadyConnectedToDifferentAccount {
                    username: record.username,
                });
            }
        }

        if let Some(record) = self.records.find_by_username(&account.username).await? {
            if record.external_id == *external_id {
                self.records.rotate(record.id, auth_code, token_set).await?;
                self.maybe_switch_method(account, connect_only).await?;
                return Ok(());
            }
            return Err(LoginFlowError::AccountAlreadyConnected {
                username: account.username.clone(),
            });
        }

        // Validates the access token against the userinfo endpoint before
        // binding.
        self.provider
            .fetch_user_info(&token_set.access_token)
            .await?;

        self.records
            .create(external_id, &account.username, auth_code, token_set)
            .await?;
        self.events.emit(FlowEvent::AccountConnected {
            username: account.username.clone(),
        });
        tracing::info!(external_id, username = %account.username, "identity connected to account");

        if !connect_only && !account.auth_method.is_oidc() {
            self.prev_logins
                .record_once(PrevLoginRecord {
                    account_id: account.id,
                    method: account.auth_method.clone(),
                    credential: account.credential.clone(),
                })
                .await?;
            self.accounts
                .set_auth_method(&account.username, AuthMethod::OpenIdConnect)
                .await?;
        }

        Ok(())
    }

    async fn maybe_switch_method(
        &self,
        account: &LocalAccount,
        connect_only: bool,
    ) -> Result<(), LoginFlowError> {
        if !connect_only && !account.auth_method.is_oidc() {
            self.accounts
                .set_auth_method(&account.username, AuthMethod::OpenIdConnect)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        CollectingEventSink, InMemoryAccountStore, InMemoryPrevLoginStore,
        InMemoryTokenRecordStore,
    };
    use crate::testutil::StubProvider;
    use chrono::{Duration, Utc};

    fn claims_for(subject: &str) -> IdentityClaims {
        let now = Utc::now();
        IdentityClaims::new(
            subject.to_string(),
            "nonce".to_string(),
            now,
            now + Duration::hours(1),
        )
    }

    fn token_set(access_token: &str) -> TokenSet {
        TokenSet::new(access_token).with_id_token(Some(format!("idt-{access_token}")))
    }

    struct Fixture {
        records: Arc<InMemoryTokenRecordStore>,
        prev_logins: Arc<InMemoryPrevLoginStore>,
        accounts: Arc<InMemoryAccountStore>,
        events: Arc<CollectingEventSink>,
        linker: AccountLinker,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(InMemoryTokenRecordStore::new());
        let prev_logins = Arc::new(InMemoryPrevLoginStore::new());
        let accounts = Arc::new(InMemoryAccountStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let linker = AccountLinker::new(
            Arc::new(StubProvider::new("provider-user")),
            records.clone(),
            prev_logins.clone(),
            accounts.clone(),
            events.clone(),
        );
        Fixture {
            records,
            prev_logins,
            accounts,
            events,
            linker,
        }
    }

    #[tokio::test]
    async fn fresh_link_switches_method_and_backs_up_previous() {
        let f = fixture();
        let account = LocalAccount::new("alice", AuthMethod::Password)
            .with_credential(Some("hash:orig".to_string()));
        f.accounts.insert(account.clone());

        f.linker
            .link(&claims_for("ext-1"), "code1", &token_set("at1"), &account, false)
            .await
            .unwrap();

        let records = f.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id, "ext-1");
        assert_eq!(records[0].username, "alice");

        let backups = f.prev_logins.records();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].method, AuthMethod::Password);
        assert_eq!(backups[0].credential.as_deref(), Some("hash:orig"));

        assert_eq!(
            f.accounts.get("alice").unwrap().auth_method,
            AuthMethod::OpenIdConnect
        );
        assert_eq!(
            f.events.events(),
            vec![FlowEvent::AccountConnected {
                username: "alice".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn connect_only_keeps_method_and_writes_no_backup() {
        let f = fixture();
        let account = LocalAccount::new("alice", AuthMethod::Password);
        f.accounts.insert(account.clone());

        f.linker
            .link(&claims_for("ext-1"), "code1", &token_set("at1"), &account, true)
            .await
            .unwrap();

        assert_eq!(f.records.records().len(), 1);
        assert!(f.prev_logins.records().is_empty());
        assert_eq!(
            f.accounts.get("alice").unwrap().auth_method,
            AuthMethod::Password
        );
    }

    #[tokio::test]
    async fn repeat_link_is_idempotent_and_rotates() {
        let f = fixture();
        let account = LocalAccount::new("alice", AuthMethod::Password);
        f.accounts.insert(account.clone());

        f.linker
            .link(&claims_for("ext-1"), "code1", &token_set("at1"), &account, false)
            .await
            .unwrap();
        // The account switched to the provider on the first link.
        let account = f.accounts.get("alice").unwrap();
        f.linker
            .link(&claims_for("ext-1"), "code2", &token_set("at2"), &account, false)
            .await
            .unwrap();

        let records = f.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].auth_code, "code2");
        assert_eq!(records[0].access_token, "at2");
        assert_eq!(f.prev_logins.records().len(), 1);
    }

    #[tokio::test]
    async fn identity_bound_elsewhere_is_a_conflict() {
        let f = fixture();
        let alice = LocalAccount::new("alice", AuthMethod::OpenIdConnect);
        let bob = LocalAccount::new("bob", AuthMethod::Password);
        f.accounts.insert(alice.clone());
        f.accounts.insert(bob.clone());
        f.linker
            .link(&claims_for("ext-1"), "code1", &token_set("at1"), &alice, false)
            .await
            .unwrap();

        let err = f
            .linker
            .link(&claims_for("ext-1"), "code2", &token_set("at2"), &bob, false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LoginFlowError::IdentityAlreadyConnectedToDifferentAccount {
                username: "alice".to_string()
            }
        );

        // Neither binding changed.
        let records = f.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].username, "alice");
        assert_eq!(records[0].auth_code, "code1");
        assert_eq!(
            f.accounts.get("bob").unwrap().auth_method,
            AuthMethod::Password
        );
    }

    #[tokio::test]
    async fn account_bound_to_other_identity_is_a_conflict() {
        let f = fixture();
        let alice = LocalAccount::new("alice", AuthMethod::OpenIdConnect);
        f.accounts.insert(alice.clone());
        f.linker
            .link(&claims_for("ext-1"), "code1", &token_set("at1"), &alice, false)
            .await
            .unwrap();

        let err = f
            .linker
            .link(&claims_for("ext-2"), "code2", &token_set("at2"), &alice, false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LoginFlowError::AccountAlreadyConnected {
                username: "alice".to_string()
            }
        );
        assert_eq!(f.records.records().len(), 1);
    }

    #[tokio::test]
    async fn stale_record_is_deleted_and_relinked() {
        let f = fixture();
        let ghost = LocalAccount::new("ghost", AuthMethod::OpenIdConnect);
        f.accounts.insert(ghost.clone());
        f.linker
            .link(&claims_for("ext-1"), "code1", &token_set("at1"), &ghost, false)
            .await
            .unwrap();
        f.accounts.remove("ghost");

        let alice = LocalAccount::new("alice", AuthMethod::Password);
        f.accounts.insert(alice.clone());
        f.linker
            .link(&claims_for("ext-1"), "code2", &token_set("at2"), &alice, false)
            .await
            .unwrap();

        let records = f.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].username, "alice");
    }

    #[tokio::test]
    async fn relink_of_provider_account_writes_no_backup() {
        let f = fixture();
        let account = LocalAccount::new("alice", AuthMethod::OpenIdConnect);
        f.accounts.insert(account.clone());

        f.linker
            .link(&claims_for("ext-1"), "code1", &token_set("at1"), &account, false)
            .await
            .unwrap();

        assert!(f.prev_logins.records().is_empty());
    }
}
