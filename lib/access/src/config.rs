//! Flow-level configuration.
//!
//! [`FlowConfig`] collects the decisions the login flow makes that are not
//! provider connection details: whether unknown identities may be
//! provisioned, which domains are accepted, and where to send the browser
//! after a login or an account link. It is assembled once at startup and
//! passed to the flow by value.

use serde::{Deserialize, Serialize};

/// Configuration for the authorization-code login flow.
///
/// Fields with defaults can be omitted when loading from environment
/// variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Whether a local account is created for a verified identity that has
    /// none. Default: true
    #[serde(default = "default_allow_provisioning")]
    allow_provisioning: bool,
    /// Domains accepted by the restriction check, matched against the
    /// domain part of the identity's username hint. Empty means all
    /// identities are accepted. Default: empty
    #[serde(default)]
    allowed_domains: Vec<String>,
    /// Where the browser is sent after a completed login.
    /// Default: "/"
    #[serde(default = "default_post_login_redirect")]
    post_login_redirect: String,
    /// Where the browser is sent after linking an identity to the signed-in
    /// account, unless the request stored its own redirect target.
    /// Default: "/profile"
    #[serde(default = "default_post_link_redirect")]
    post_link_redirect: String,
    /// Age in minutes after which unconsumed authorization request states
    /// are discarded. Default: 15
    #[serde(default = "default_state_max_age_minutes")]
    state_max_age_minutes: i64,
}

fn default_allow_provisioning() -> bool {
    true
}

fn default_post_login_redirect() -> String {
    "/".to_string()
}

fn default_post_link_redirect() -> String {
    "/profile".to_string()
}

fn default_state_max_age_minutes() -> i64 {
    15
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            allow_provisioning: default_allow_provisioning(),
            allowed_domains: Vec::new(),
            post_login_redirect: default_post_login_redirect(),
            post_link_redirect: default_post_link_redirect(),
            state_max_age_minutes: default_state_max_age_minutes(),
        }
    }
}

impl FlowConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> FlowConfigBuilder {
        FlowConfigBuilder::new()
    }

    /// Returns whether unknown identities may be provisioned.
    #[must_use]
    pub fn allow_provisioning(&self) -> bool {
        self.allow_provisioning
    }

    /// Returns the accepted domains. Empty means unrestricted.
    #[must_use]
    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Returns the post-login redirect target.
    #[must_use]
    pub fn post_login_redirect(&self) -> &str {
        &self.post_login_redirect
    }

    /// Returns the default post-link redirect target.
    #[must_use]
    pub fn post_link_redirect(&self) -> &str {
        &self.post_link_redirect
    }

    /// Returns the maximum age of an unconsumed authorization request state,
    /// in minutes.
    #[must_use]
    pub fn state_max_age_minutes(&self) -> i64 {
        self.state_max_age_minutes
    }

    /// Returns true if the principal's domain passes the restriction check.
    ///
    /// With an empty allow-list every principal passes. Otherwise the part
    /// after the last `@` must equal one of the configured domains
    /// (case-insensitive); a principal without a domain part is rejected.
    #[must_use]
    pub fn allows_domain_of(&self, principal: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let Some((_, domain)) = principal.rsplit_once('@') else {
            return false;
        };
        self.allowed_domains
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(domain))
    }
}

/// Builder for `FlowConfig`.
#[derive(Debug, Default)]
pub struct FlowConfigBuilder {
    config: FlowConfig,
}

impl FlowConfigBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: FlowConfig::default(),
        }
    }

    /// Sets whether unknown identities may be provisioned.
    #[must_use]
    pub fn allow_provisioning(mut self, allow: bool) -> Self {
        self.config.allow_provisioning = allow;
        self
    }

    /// Sets the accepted domains.
    #[must_use]
    pub fn allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.config.allowed_domains = domains;
        self
    }

    /// Sets the post-login redirect target.
    #[must_use]
    pub fn post_login_redirect(mut self, target: String) -> Self {
        self.config.post_login_redirect = target;
        self
    }

    /// Sets the default post-link redirect target.
    #[must_use]
    pub fn post_link_redirect(mut self, target: String) -> Self {
        self.config.post_link_redirect = target;
        self
    }

    /// Sets the maximum age of unconsumed states, in minutes.
    #[must_use]
    pub fn state_max_age_minutes(mut self, minutes: i64) -> Self {
        self.config.state_max_age_minutes = minutes;
        self
    }

    /// Builds the `FlowConfig`.
    #[must_use]
    pub fn build(self) -> FlowConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = FlowConfig::default();
        assert!(config.allow_provisioning());
        assert!(config.allowed_domains().is_empty());
        assert_eq!(config.post_login_redirect(), "/");
        assert_eq!(config.post_link_redirect(), "/profile");
        assert_eq!(config.state_max_age_minutes(), 15);
    }

    #[test]
    fn empty_allow_list_accepts_everyone() {
        let config = FlowConfig::default();
        assert!(config.allows_domain_of("anyone@anywhere.test"));
        assert!(config.allows_domain_of("no-domain-at-all"));
    }

    #[test]
    fn allow_list_matches_domain_case_insensitively() {
        let config = FlowConfig::builder()
            .allowed_domains(vec!["example.com".to_string()])
            .build();
        assert!(config.allows_domain_of("alice@example.com"));
        assert!(config.allows_domain_of("alice@EXAMPLE.COM"));
        assert!(!config.allows_domain_of("alice@elsewhere.test"));
    }

    #[test]
    fn allow_list_rejects_principal_without_domain() {
        let config = FlowConfig::builder()
            .allowed_domains(vec!["example.com".to_string()])
            .build();
        assert!(!config.allows_domain_of("alice"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{ "allowed_domains": ["example.com"] }"#;
        let config: FlowConfig = serde_json::from_str(json).expect("deserialize");
        assert!(config.allow_provisioning());
        assert_eq!(config.allowed_domains(), ["example.com".to_string()]);
        assert_eq!(config.post_link_redirect(), "/profile");
    }
}
