//! Error types for the auth engine crate.
//!
//! All engine operations surface errors through [`AuthError`], the single
//! error type for this crate. Each variant carries enough context for callers
//! to decide how to handle the failure; [`AuthError::is_retryable`],
//! [`AuthError::requires_reauthentication`] and [`AuthError::user_message`]
//! encode the handling policy.

/// Unified error type for the tokenhost auth engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // -- Login attempt ------------------------------------------------------
    /// The system CSPRNG could not produce a PKCE verifier.
    #[error("secure random source unavailable")]
    EntropyUnavailable,

    /// The user closed the browsing surface before the redirect arrived.
    #[error("login cancelled by user")]
    UserCancelled,

    /// No redirect arrived before the login attempt's deadline.
    #[error("callback timed out after {timeout_secs} seconds")]
    CallbackTimeout {
        /// How many seconds we waited before giving up.
        timeout_secs: u64,
    },

    /// The authorization server reported an error, either on the redirect or
    /// in response to the code exchange.
    #[error("provider returned {code}: {description}")]
    ProviderError {
        /// The OAuth `error` code (e.g. `access_denied`).
        code: String,
        /// The provider's `error_description`, empty when absent.
        description: String,
    },

    /// The redirect matched but carried neither a code nor an error.
    #[error("malformed authorization callback")]
    MalformedCallback {
        /// The full redirect URL, kept for diagnostics.
        raw_url: String,
    },

    /// The redirect echoed a `state` that does not belong to this attempt.
    #[error("callback state does not match the login attempt")]
    StateMismatch,

    /// Another login is already in flight in this process.
    #[error("a login is already in progress")]
    LoginInProgress,

    // -- Token endpoint -----------------------------------------------------
    /// The token endpoint answered with a body no shape matcher recognises.
    #[error("unrecognized token response shape")]
    UnrecognizedResponseShape,

    /// The token response lacked fields a stored token must carry.
    #[error("incomplete token data, missing: {}", .missing.join(", "))]
    IncompleteTokenData {
        /// Names of the missing fields.
        missing: Vec<&'static str>,
    },

    /// The stored credentials are no longer accepted by the provider.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Always `true` when the only way forward is an interactive login.
        reauthenticate: bool,
        /// Provider error code or description.
        reason: String,
    },

    /// The token endpoint rejected the request without a recognised OAuth
    /// error body.
    #[error("token request failed with HTTP {status}: {body}")]
    TokenRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// An HTTP request to the provider failed in transport.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    // -- Session ------------------------------------------------------------
    /// No credentials are stored.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The browsing surface could not be opened or driven.
    #[error("browsing surface failed: {reason}")]
    Surface {
        /// What went wrong.
        reason: String,
    },

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    // -- Underlying errors --------------------------------------------------
    /// An error propagated from the token store.
    #[error("store error: {0}")]
    Store(#[from] tokenhost_store::StoreError),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (e.g. from the loopback listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthError {
    /// Whether starting a fresh login attempt (or repeating a refresh) may
    /// succeed. A retry never reuses a PKCE verifier or authorization code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::CallbackTimeout { .. } => true,
            Self::TokenRequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether stored credentials must be cleared and the user sent through
    /// an interactive login.
    pub fn requires_reauthentication(&self) -> bool {
        match self {
            Self::Unauthorized { reauthenticate, .. } => *reauthenticate,
            Self::NotAuthenticated => true,
            _ => false,
        }
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderError { code, description } if description.is_empty() => format!(
                "The identity provider refused the request ({code}). Check that access was granted and the app is configured for this account."
            ),
            Self::ProviderError { code, description } => format!(
                "The identity provider refused the request ({code}: {description}). Check that access was granted and the app is configured for this account."
            ),
            Self::Unauthorized { .. } | Self::NotAuthenticated => {
                "Your session has ended. Please log in again.".to_string()
            }
            Self::UserCancelled => "Login was cancelled.".to_string(),
            Self::CallbackTimeout { .. } => "Login timed out. Please try again.".to_string(),
            Self::LoginInProgress => "A login is already in progress.".to_string(),
            Self::Network(_) => {
                "Could not reach the identity provider. Check your connection and try again."
                    .to_string()
            }
            _ => "Login failed. Please try again.".to_string(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider_error() {
        let err = AuthError::ProviderError {
            code: "access_denied".to_string(),
            description: "user denied".to_string(),
        };
        assert_eq!(err.to_string(), "provider returned access_denied: user denied");
    }

    #[test]
    fn error_display_incomplete_token_data() {
        let err = AuthError::IncompleteTokenData {
            missing: vec!["refresh_token", "instance_url"],
        };
        assert_eq!(
            err.to_string(),
            "incomplete token data, missing: refresh_token, instance_url"
        );
    }

    #[test]
    fn error_display_callback_timeout() {
        let err = AuthError::CallbackTimeout { timeout_secs: 300 };
        assert_eq!(err.to_string(), "callback timed out after 300 seconds");
    }

    #[test]
    fn error_display_malformed_hides_url() {
        let err = AuthError::MalformedCallback {
            raw_url: "https://app.example.com/cb?junk=1".to_string(),
        };
        assert_eq!(err.to_string(), "malformed authorization callback");
    }

    #[test]
    fn unauthorized_requires_reauthentication() {
        let err = AuthError::Unauthorized {
            reauthenticate: true,
            reason: "invalid_grant".to_string(),
        };
        assert!(err.requires_reauthentication());
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = AuthError::TokenRequestFailed {
            status: 503,
            body: String::new(),
        };
        assert!(err.is_retryable());

        let err = AuthError::TokenRequestFailed {
            status: 400,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn user_cancelled_is_not_retryable() {
        assert!(!AuthError::UserCancelled.is_retryable());
        assert!(!AuthError::UserCancelled.requires_reauthentication());
    }

    #[test]
    fn provider_error_and_unauthorized_messages_differ() {
        let provider = AuthError::ProviderError {
            code: "access_denied".to_string(),
            description: String::new(),
        };
        let unauthorized = AuthError::Unauthorized {
            reauthenticate: true,
            reason: "revoked".to_string(),
        };
        assert!(provider.user_message().contains("access_denied"));
        assert!(unauthorized.user_message().contains("log in again"));
        assert_ne!(provider.user_message(), unauthorized.user_message());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthError>();
    }
}
