//! Authorization-code login flow for the wicket platform.
//!
//! This crate implements the relying-party side of an OpenID Connect
//! authorization-code login:
//! - Initiating an authorization request (`LoginFlow::initiate`)
//! - Validating the provider callback and consuming the anti-replay state
//! - Exchanging the authorization code and verifying the identity assertion
//! - Resolving the verified identity onto a local account: fresh login
//!   (`AccountResolver`), linking to the signed-in account (`AccountLinker`),
//!   or identity-verification-only
//!
//! External concerns stay behind narrow traits: the provider transport
//! (`IdentityProviderClient`), assertion cryptography (`IdTokenVerifier`),
//! persistence (`StateStore`, `TokenRecordStore`, `PrevLoginStore`), the
//! account backend (`AccountStore`), and notifications (`EventSink`).
//!
//! # Replay protection
//!
//! Every authorization request registers an [`AuthState`](state::AuthState)
//! record keyed by an unguessable state token. The callback consumes that
//! record with a single atomic fetch-and-delete; a second callback carrying
//! the same state token always fails with
//! [`LoginFlowError::UnknownOrExpiredState`].
//!
//! # Example
//!
//! ```
//! use wicket_access::{FlowConfig, StateMetadata};
//!
//! let config = FlowConfig::builder()
//!     .allow_provisioning(false)
//!     .allowed_domains(vec!["example.com".to_string()])
//!     .build();
//!
//! assert!(config.allows_domain_of("alice@example.com"));
//! assert!(!config.allows_domain_of("mallory@elsewhere.test"));
//!
//! let metadata = StateMetadata::from_json("not json at all");
//! assert_eq!(metadata, StateMetadata::default());
//! ```

pub mod account;
pub mod claims;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod linker;
pub mod memory;
pub mod provider;
pub mod resolver;
pub mod state;
pub mod token;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types at crate root
pub use account::{
    AccountRef, AccountStore, AuthMethod, EventSink, FlowEvent, LocalAccount,
    PendingMatchFinder, Session,
};
pub use claims::IdentityClaims;
pub use config::{FlowConfig, FlowConfigBuilder};
pub use context::RequestContext;
pub use error::LoginFlowError;
pub use flow::{AuthorizationCodeFlow, CallbackParams, FlowOutcome, LoginFlow};
pub use linker::AccountLinker;
pub use provider::{IdTokenVerifier, IdentityProviderClient, TokenSet, UserInfo};
pub use resolver::AccountResolver;
pub use state::{AuthState, StateMetadata, StateStore};
pub use token::{PrevLoginRecord, PrevLoginStore, TokenRecord, TokenRecordStore};
