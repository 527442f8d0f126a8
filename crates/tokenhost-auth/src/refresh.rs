//! Refresh-token grant.

use crate::config::AuthConfig;
use crate::endpoint::{TokenEndpoint, TokenResponse};
use crate::error::{AuthError, Result};
use crate::token::{self, TokenRecord};

/// Obtains a new access token from a stored refresh token.
#[derive(Debug, Clone)]
pub struct TokenRefreshClient {
    endpoint: TokenEndpoint,
    client_id: String,
    client_secret: Option<String>,
    scope: String,
}

impl TokenRefreshClient {
    pub fn new(config: &AuthConfig, http: reqwest::Client) -> Self {
        Self {
            endpoint: TokenEndpoint::new(config, http),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
        }
    }

    /// Refresh `existing`. The returned record replaces it wholesale;
    /// `refresh_token` and `instance_url` carry over when the provider omits
    /// them.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthorized`] (`reauthenticate: true`) when the grant is
    ///   invalid or revoked.
    /// - [`AuthError::TokenRequestFailed`] for any other rejection.
    /// - [`AuthError::Network`] on transport failure.
    pub async fn refresh(&self, existing: &TokenRecord) -> Result<TokenRecord> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", existing.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(ref secret) = self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        if !self.scope.is_empty() {
            params.push(("scope", self.scope.as_str()));
        }

        tracing::debug!(instance_url = %existing.instance_url, "refreshing access token");

        match self.endpoint.post(&params).await? {
            TokenResponse::Granted(body) => {
                let record = token::normalize(&body)?.into_record(Some(existing))?;
                tracing::info!(expires_in = record.expires_in, "access token refreshed");
                Ok(record)
            }
            TokenResponse::Rejected(rejection) => {
                if let Some(error) = rejection.error.as_ref().filter(|e| e.is_revocation()) {
                    tracing::warn!(
                        status = rejection.status,
                        error = %error.error,
                        "refresh token no longer accepted"
                    );
                    let reason = if error.description().is_empty() {
                        error.error.clone()
                    } else {
                        format!("{}: {}", error.error, error.description())
                    };
                    return Err(AuthError::Unauthorized {
                        reauthenticate: true,
                        reason,
                    });
                }
                tracing::warn!(status = rejection.status, "refresh request failed");
                Err(rejection.into_request_failed())
            }
        }
    }
}
