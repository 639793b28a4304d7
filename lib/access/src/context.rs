//! Request-scoped context for the login flow.
//!
//! Everything the flow needs to know about the incoming request (who is
//! signed in and which special flow mode applies) is carried explicitly in
//! a [`RequestContext`] rather than read from shared process state.

use crate::account::LocalAccount;

/// The request-scoped inputs to a callback.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The account of the active local session, if any.
    pub account: Option<LocalAccount>,
    /// The caller wants identity confirmation only: the flow emits an event
    /// and stops without touching any account.
    pub verification_only: bool,
    /// Link the verified identity to the signed-in account without switching
    /// that account's primary authentication method.
    pub connect_only: bool,
}

impl RequestContext {
    /// Context for a request with no active session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context for a request with an active session.
    #[must_use]
    pub fn for_account(account: LocalAccount) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }

    /// Marks the request as identity-verification-only.
    #[must_use]
    pub fn verification_only(mut self) -> Self {
        self.verification_only = true;
        self
    }

    /// Marks the request as connect-only.
    #[must_use]
    pub fn connect_only(mut self) -> Self {
        self.connect_only = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AuthMethod;

    #[test]
    fn anonymous_context_has_no_account() {
        let ctx = RequestContext::anonymous();
        assert!(ctx.account.is_none());
        assert!(!ctx.verification_only);
        assert!(!ctx.connect_only);
    }

    #[test]
    fn context_flags_compose() {
        let account = LocalAccount::new("alice", AuthMethod::Password);
        let ctx = RequestContext::for_account(account).connect_only();
        assert!(ctx.account.is_some());
        assert!(ctx.connect_only);
        assert!(!ctx.verification_only);
    }
}
