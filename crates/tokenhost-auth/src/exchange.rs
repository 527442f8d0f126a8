//! Authorization code exchange.

use crate::config::AuthConfig;
use crate::endpoint::{TokenEndpoint, TokenResponse};
use crate::error::{AuthError, Result};
use crate::pkce::PkceVerifier;
use crate::token::{self, TokenRecord};

/// Trades an authorization code plus its PKCE verifier for a token record.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    endpoint: TokenEndpoint,
    client_id: String,
    client_secret: Option<String>,
}

impl TokenExchangeClient {
    pub fn new(config: &AuthConfig, http: reqwest::Client) -> Self {
        Self {
            endpoint: TokenEndpoint::new(config, http),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    /// Exchange `code` for tokens.
    ///
    /// The verifier is consumed whatever the outcome. `scope` is never sent
    /// here; the provider rejects it on this grant.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ProviderError`] when the provider rejects the code with
    ///   an OAuth error body.
    /// - [`AuthError::TokenRequestFailed`] for other rejections.
    /// - [`AuthError::UnrecognizedResponseShape`] /
    ///   [`AuthError::IncompleteTokenData`] when the answer is unusable.
    /// - [`AuthError::Network`] on transport failure.
    pub async fn exchange(
        &self,
        code: &str,
        verifier: PkceVerifier,
        redirect_uri: &str,
    ) -> Result<TokenRecord> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(ref secret) = self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        tracing::debug!("exchanging authorization code");
        let response = self.endpoint.post(&params).await;
        drop(verifier);

        match response? {
            TokenResponse::Granted(body) => {
                let record = token::normalize(&body)?.into_record(None)?;
                tracing::info!(
                    instance_url = %record.instance_url,
                    expires_in = record.expires_in,
                    "authorization code exchanged"
                );
                Ok(record)
            }
            TokenResponse::Rejected(rejection) => {
                tracing::warn!(status = rejection.status, "code exchange rejected");
                match rejection.error {
                    Some(error) => Err(AuthError::ProviderError {
                        description: error.description().to_string(),
                        code: error.error,
                    }),
                    None => Err(rejection.into_request_failed()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::PkcePair;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const REDIRECT: &str = "http://127.0.0.1:8400/callback";

    fn client(server: &MockServer) -> TokenExchangeClient {
        let config = AuthConfig::for_login_host(&server.uri(), "client-1", REDIRECT)
            .with_scope("api refresh_token");
        TokenExchangeClient::new(&config, reqwest::Client::new())
    }

    #[tokio::test]
    async fn exchange_sends_pkce_and_no_scope() {
        let server = MockServer::start().await;
        let pkce = PkcePair::generate().unwrap();
        let verifier_text = pkce.verifier().as_str().to_string();

        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains(format!("code_verifier={verifier_text}")))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(|req: &Request| {
                let body = String::from_utf8_lossy(&req.body).to_string();
                assert!(!body.contains("scope="), "scope sent on exchange: {body}");
                assert!(!body.contains("client_secret="));
                ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": "at",
                    "refresh_token": "rt",
                    "instance_url": "https://tenant.example.com",
                    "expires_in": 3600
                }))
            })
            .expect(1)
            .mount(&server)
            .await;

        let record = client(&server)
            .exchange("the-code", pkce.into_verifier(), REDIRECT)
            .await
            .unwrap();
        assert_eq!(record.access_token, "at");
        assert_eq!(record.expires_in, 3600);
    }

    #[tokio::test]
    async fn exchange_sends_secret_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("client_secret=shh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "accessToken": "at",
                    "refreshToken": "rt",
                    "instanceUrl": "https://tenant.example.com"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = AuthConfig::for_login_host(&server.uri(), "client-1", REDIRECT)
            .with_client_secret("shh");
        let client = TokenExchangeClient::new(&config, reqwest::Client::new());
        let record = client
            .exchange("c", PkcePair::generate().unwrap().into_verifier(), REDIRECT)
            .await
            .unwrap();
        assert_eq!(record.expires_in, crate::token::DEFAULT_EXPIRES_IN_SECS);
    }

    #[tokio::test]
    async fn exchange_oauth_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "authorization code expired"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .exchange("c", PkcePair::generate().unwrap().into_verifier(), REDIRECT)
            .await;
        match result {
            Err(AuthError::ProviderError { code, description }) => {
                assert_eq!(code, "invalid_grant");
                assert_eq!(description, "authorization code expired");
            }
            other => panic!("expected ProviderError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchange_incomplete_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "instance_url": "https://tenant.example.com"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .exchange("c", PkcePair::generate().unwrap().into_verifier(), REDIRECT)
            .await;
        match result {
            Err(AuthError::IncompleteTokenData { missing }) => {
                assert_eq!(missing, vec!["refresh_token"]);
            }
            other => panic!("expected IncompleteTokenData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchange_server_error_is_request_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let result = client(&server)
            .exchange("c", PkcePair::generate().unwrap().into_verifier(), REDIRECT)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::TokenRequestFailed { status: 500, .. })
        ));
    }
}
