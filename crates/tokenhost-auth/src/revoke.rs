//! Token revocation (RFC 7009).

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// Best-effort revocation used by logout.
#[derive(Debug, Clone)]
pub struct RevocationClient {
    http: reqwest::Client,
    endpoint: Option<String>,
    client_id: String,
}

impl RevocationClient {
    pub fn new(config: &AuthConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: config.revoke_endpoint.clone(),
            client_id: config.client_id.clone(),
        }
    }

    /// Whether a revocation endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Ask the provider to revoke `token`. Without a configured endpoint this
    /// only logs.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Network`] or [`AuthError::TokenRequestFailed`].
    /// Callers treat both as non-fatal.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let Some(ref endpoint) = self.endpoint else {
            tracing::debug!("no revocation endpoint configured, skipping remote revoke");
            return Ok(());
        };

        let response = self
            .http
            .post(endpoint)
            .form(&[("token", token), ("client_id", self.client_id.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("token revoked at provider");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(AuthError::TokenRequestFailed {
            status: status.as_u16(),
            body,
        })
    }
}
