//! Authorization URL construction.
//!
//! The browsing surface is pointed at the URL built here. Building it is a
//! pure function of the configuration and the attempt's PKCE challenge; no
//! network I/O happens.

use url::Url;

use crate::config::AuthConfig;
use crate::error::Result;
use crate::pkce::{CHALLENGE_METHOD_S256, PkcePair};

/// The parameters of one authorization request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    redirect_uri: String,
    scope: String,
    code_challenge: String,
    code_challenge_method: &'static str,
    state: Option<String>,
}

impl AuthorizationRequest {
    /// Compose a request for `pkce` using the configured redirect URI and
    /// scopes.
    pub fn new(config: &AuthConfig, pkce: &PkcePair) -> Self {
        Self {
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope.clone(),
            code_challenge: pkce.challenge().to_string(),
            code_challenge_method: CHALLENGE_METHOD_S256,
            state: None,
        }
    }

    /// Attach a CSRF `state` value.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn code_challenge(&self) -> &str {
        &self.code_challenge
    }

    pub fn code_challenge_method(&self) -> &str {
        self.code_challenge_method
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }
}

/// Build the authorization URL the browsing surface should open.
///
/// Query parameters already present on the configured authorize endpoint
/// are preserved.
///
/// # Errors
///
/// Returns [`AuthError::UrlParse`](crate::AuthError::UrlParse) if the
/// authorize endpoint is not a valid URL.
pub fn build_authorization_url(config: &AuthConfig, request: &AuthorizationRequest) -> Result<Url> {
    let mut url = Url::parse(&config.authorize_endpoint)?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &config.client_id);
        params.append_pair("redirect_uri", &request.redirect_uri);
        if !request.scope.is_empty() {
            params.append_pair("scope", &request.scope);
        }
        params.append_pair("code_challenge", &request.code_challenge);
        params.append_pair("code_challenge_method", request.code_challenge_method);
        if let Some(ref state) = request.state {
            params.append_pair("state", state);
        }
    }

    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> AuthConfig {
        AuthConfig::for_login_host(
            "https://login.example.com",
            "test-client-id",
            "http://127.0.0.1:8400/callback",
        )
        .with_scope("api refresh_token")
    }

    fn params(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn url_includes_all_params() {
        let config = test_config();
        let pkce = PkcePair::generate().unwrap();
        let request = AuthorizationRequest::new(&config, &pkce).with_state("st-1");
        let url = build_authorization_url(&config, &request).unwrap();
        let params = params(&url);

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "test-client-id");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8400/callback");
        assert_eq!(params["scope"], "api refresh_token");
        assert_eq!(params["code_challenge"], pkce.challenge());
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"], "st-1");
        assert_eq!(url.path(), "/services/oauth2/authorize");
    }

    #[test]
    fn url_omits_state_and_empty_scope() {
        let config = test_config().with_scope("");
        let pkce = PkcePair::generate().unwrap();
        let request = AuthorizationRequest::new(&config, &pkce);
        let url = build_authorization_url(&config, &request).unwrap();
        let params = params(&url);

        assert!(!params.contains_key("state"));
        assert!(!params.contains_key("scope"));
    }

    #[test]
    fn url_preserves_existing_query_params() {
        let mut config = test_config();
        config.authorize_endpoint = "https://login.example.com/authorize?prompt=login".to_string();
        let pkce = PkcePair::generate().unwrap();
        let request = AuthorizationRequest::new(&config, &pkce);
        let url = build_authorization_url(&config, &request).unwrap();
        let params = params(&url);

        assert_eq!(params["prompt"], "login");
        assert_eq!(params["response_type"], "code");
    }

    #[test]
    fn url_is_deterministic_for_same_request() {
        let config = test_config();
        let pkce = PkcePair::generate().unwrap();
        let request = AuthorizationRequest::new(&config, &pkce).with_state("s");
        assert_eq!(
            build_authorization_url(&config, &request).unwrap(),
            build_authorization_url(&config, &request).unwrap()
        );
    }

    #[test]
    fn request_accessors() {
        let config = test_config();
        let pkce = PkcePair::generate().unwrap();
        let request = AuthorizationRequest::new(&config, &pkce);
        assert_eq!(request.redirect_uri(), config.redirect_uri);
        assert_eq!(request.scope(), "api refresh_token");
        assert_eq!(request.code_challenge(), pkce.challenge());
        assert_eq!(request.code_challenge_method(), "S256");
        assert!(request.state().is_none());
    }

    #[test]
    fn invalid_authorize_endpoint() {
        let mut config = test_config();
        config.authorize_endpoint = "::nope".to_string();
        let pkce = PkcePair::generate().unwrap();
        let request = AuthorizationRequest::new(&config, &pkce);
        assert!(build_authorization_url(&config, &request).is_err());
    }
}
