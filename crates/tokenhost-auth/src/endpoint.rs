//! Token endpoint transport shared by the exchange and refresh clients.

use serde_json::Value;

use crate::config::{AuthConfig, RequestEncoding};
use crate::error::{AuthError, Result};
use crate::token::{self, OAuthErrorBody};

/// Longest response body kept in errors and logs.
const MAX_BODY_CHARS: usize = 512;

/// What the token endpoint answered.
#[derive(Debug)]
pub(crate) enum TokenResponse {
    /// A JSON body that should carry tokens.
    Granted(Value),
    /// A non-2xx answer, or a 2xx answer carrying only an OAuth error.
    Rejected(Rejection),
}

#[derive(Debug)]
pub(crate) struct Rejection {
    pub status: u16,
    pub error: Option<OAuthErrorBody>,
    pub body: String,
}

impl Rejection {
    /// The generic failure for a rejection without special handling.
    pub fn into_request_failed(self) -> AuthError {
        AuthError::TokenRequestFailed {
            status: self.status,
            body: self.body,
        }
    }
}

/// A configured token endpoint.
#[derive(Debug, Clone)]
pub(crate) struct TokenEndpoint {
    http: reqwest::Client,
    url: String,
    encoding: RequestEncoding,
}

impl TokenEndpoint {
    pub fn new(config: &AuthConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            url: config.token_endpoint.clone(),
            encoding: config.token_request_encoding,
        }
    }

    /// POST `params` and classify the answer.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Network`] on transport failure and
    /// [`AuthError::UnrecognizedResponseShape`] for a 2xx body that is not
    /// JSON.
    pub async fn post(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let request = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json");
        let request = match self.encoding {
            RequestEncoding::Form => request.form(params),
            RequestEncoding::Json => {
                let body: serde_json::Map<String, Value> = params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
                    .collect();
                request.json(&body)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(status = status.as_u16(), "token endpoint answered");

        let json = serde_json::from_str::<Value>(&text).ok();

        if status.is_success() {
            let Some(json) = json else {
                tracing::warn!(status = status.as_u16(), "token endpoint returned a non-JSON body");
                return Err(AuthError::UnrecognizedResponseShape);
            };
            if token::recognize(&json).is_none() {
                if let Some(error) = OAuthErrorBody::from_value(&json) {
                    return Ok(TokenResponse::Rejected(Rejection {
                        status: status.as_u16(),
                        error: Some(error),
                        body: truncate(&text),
                    }));
                }
            }
            return Ok(TokenResponse::Granted(json));
        }

        Ok(TokenResponse::Rejected(Rejection {
            status: status.as_u16(),
            error: json.as_ref().and_then(OAuthErrorBody::from_value),
            body: truncate(&text),
        }))
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(server: &MockServer, encoding: RequestEncoding) -> TokenEndpoint {
        let config = AuthConfig::for_login_host(&server.uri(), "client", "http://127.0.0.1:8400/cb")
            .with_token_request_encoding(encoding);
        TokenEndpoint::new(&config, reqwest::Client::new())
    }

    #[test]
    fn truncate_long_bodies() {
        assert_eq!(truncate("short"), "short");
        let long = "é".repeat(MAX_BODY_CHARS + 10);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), MAX_BODY_CHARS + 3);
    }

    #[tokio::test]
    async fn form_encoding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = endpoint(&server, RequestEncoding::Form)
            .post(&[("grant_type", "refresh_token")])
            .await
            .unwrap();
        assert!(matches!(response, TokenResponse::Granted(_)));
    }

    #[tokio::test]
    async fn json_encoding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_json(serde_json::json!({
                "grant_type": "authorization_code",
                "code": "c"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = endpoint(&server, RequestEncoding::Json)
            .post(&[("grant_type", "authorization_code"), ("code", "c")])
            .await
            .unwrap();
        assert!(matches!(response, TokenResponse::Granted(_)));
    }

    #[tokio::test]
    async fn success_status_with_error_body_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "expired"
            })))
            .mount(&server)
            .await;

        let response = endpoint(&server, RequestEncoding::Form)
            .post(&[("grant_type", "refresh_token")])
            .await
            .unwrap();
        match response {
            TokenResponse::Rejected(rejection) => {
                assert_eq!(rejection.status, 200);
                assert_eq!(rejection.error.unwrap().error, "invalid_grant");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_without_oauth_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let response = endpoint(&server, RequestEncoding::Form)
            .post(&[("grant_type", "refresh_token")])
            .await
            .unwrap();
        match response {
            TokenResponse::Rejected(rejection) => {
                assert_eq!(rejection.status, 502);
                assert!(rejection.error.is_none());
                let err = rejection.into_request_failed();
                assert!(err.is_retryable());
                assert!(err.to_string().contains("bad gateway"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_status_with_html_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let result = endpoint(&server, RequestEncoding::Form)
            .post(&[("grant_type", "refresh_token")])
            .await;
        assert!(matches!(result, Err(AuthError::UnrecognizedResponseShape)));
    }
}
