//! Engine configuration.
//!
//! [`AuthConfig`] is the immutable description of the one identity provider
//! this engine talks to. It is loaded by the host (TOML file, environment, or
//! built in code) and handed to [`SessionManager`](crate::SessionManager).
//! Defaults cover every tuning knob; only the provider coordinates are
//! required.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Environment variable prefix read by [`AuthConfig::from_env`].
const ENV_PREFIX: &str = "TOKENHOST_";

/// Default refresh window: refresh when the token expires within 5 minutes.
const DEFAULT_REFRESH_SKEW_SECS: u64 = 300;

/// Default upper bound on one interactive login (5 minutes).
const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 300;

/// Default interval of the last-resort location poll.
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default timeout for a single HTTP request to the provider.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Body encoding used for token endpoint requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEncoding {
    /// `application/x-www-form-urlencoded`.
    #[default]
    Form,
    /// `application/json`.
    Json,
}

/// Which [`BrowsingSurface`](crate::surface::BrowsingSurface) implementation
/// drives the authorization step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// The system browser plus a local HTTP listener on the redirect URI.
    #[default]
    Loopback,
    /// A window owned by the host application that reports its navigations.
    Window,
}

impl SurfaceKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loopback" => Some(Self::Loopback),
            "window" => Some(Self::Window),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

/// Provider coordinates and engine tuning.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The OAuth client ID.
    pub client_id: String,

    /// The OAuth client secret (confidential clients only).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// The authorization endpoint URL.
    pub authorize_endpoint: String,

    /// The token endpoint URL, used for both exchange and refresh.
    pub token_endpoint: String,

    /// The revocation endpoint URL. Logout skips remote revocation without it.
    #[serde(default)]
    pub revoke_endpoint: Option<String>,

    /// The userinfo endpoint URL, used to fetch the cached profile.
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// The single redirect URI registered with the provider.
    pub redirect_uri: String,

    /// Space-separated scopes. Sent at authorization and refresh, never at
    /// code exchange.
    #[serde(default)]
    pub scope: String,

    /// Token endpoint body encoding.
    #[serde(default)]
    pub token_request_encoding: RequestEncoding,

    /// Browsing surface selection.
    #[serde(default)]
    pub surface: SurfaceKind,

    /// Refresh tokens that expire within this many seconds.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,

    /// Abandon a login attempt after this many seconds.
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,

    /// Interval of the location-poll channel, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout for each HTTP request to the provider, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_refresh_skew_secs() -> u64 {
    DEFAULT_REFRESH_SKEW_SECS
}

fn default_login_timeout_secs() -> u64 {
    DEFAULT_LOGIN_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("authorize_endpoint", &self.authorize_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("revoke_endpoint", &self.revoke_endpoint)
            .field("userinfo_endpoint", &self.userinfo_endpoint)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("token_request_encoding", &self.token_request_encoding)
            .field("surface", &self.surface)
            .field("refresh_skew_secs", &self.refresh_skew_secs)
            .field("login_timeout_secs", &self.login_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl AuthConfig {
    /// Build a configuration whose endpoints live under `login_host`
    /// (`{login_host}/services/oauth2/{authorize,token,revoke,userinfo}`).
    pub fn for_login_host(
        login_host: &str,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        let host = login_host.trim_end_matches('/');
        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorize_endpoint: format!("{host}/services/oauth2/authorize"),
            token_endpoint: format!("{host}/services/oauth2/token"),
            revoke_endpoint: Some(format!("{host}/services/oauth2/revoke")),
            userinfo_endpoint: Some(format!("{host}/services/oauth2/userinfo")),
            redirect_uri: redirect_uri.into(),
            scope: String::new(),
            token_request_encoding: RequestEncoding::default(),
            surface: SurfaceKind::default(),
            refresh_skew_secs: DEFAULT_REFRESH_SKEW_SECS,
            login_timeout_secs: DEFAULT_LOGIN_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the document does not parse
    /// or fails [`validate`](Self::validate).
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| AuthError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading auth configuration");
        Self::from_toml_str(&contents)
    }

    /// Build from `TOKENHOST_*` environment variables, loading a `.env` file
    /// first if one exists.
    ///
    /// Required: `TOKENHOST_CLIENT_ID`, `TOKENHOST_REDIRECT_URI`,
    /// `TOKENHOST_LOGIN_HOST`. Optional: `TOKENHOST_CLIENT_SECRET`,
    /// `TOKENHOST_SCOPE`, `TOKENHOST_SURFACE` (`loopback` or `window`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if a required variable is missing
    /// or the result fails validation.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; `from_env` with the
    /// environment swapped out.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |suffix: &str| {
            var(suffix).ok_or_else(|| AuthError::InvalidConfig {
                reason: format!("{ENV_PREFIX}{suffix} is not set"),
            })
        };

        let login_host = required("LOGIN_HOST")?;
        let mut config = Self::for_login_host(
            &login_host,
            required("CLIENT_ID")?,
            required("REDIRECT_URI")?,
        );
        config.client_secret = var("CLIENT_SECRET");
        if let Some(scope) = var("SCOPE") {
            config.scope = scope;
        }
        if let Some(surface) = var("SURFACE") {
            config.surface =
                SurfaceKind::parse(&surface).ok_or_else(|| AuthError::InvalidConfig {
                    reason: format!("unknown surface '{surface}'"),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every endpoint parses and every knob is usable.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(invalid("client_id is empty"));
        }

        parse_endpoint("authorize_endpoint", &self.authorize_endpoint)?;
        parse_endpoint("token_endpoint", &self.token_endpoint)?;
        parse_endpoint("redirect_uri", &self.redirect_uri)?;
        if let Some(ref revoke) = self.revoke_endpoint {
            parse_endpoint("revoke_endpoint", revoke)?;
        }
        if let Some(ref userinfo) = self.userinfo_endpoint {
            parse_endpoint("userinfo_endpoint", userinfo)?;
        }

        if self.login_timeout_secs == 0 {
            return Err(invalid("login_timeout_secs must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Set the client secret.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Set the requested scopes.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Set the token endpoint body encoding.
    pub fn with_token_request_encoding(mut self, encoding: RequestEncoding) -> Self {
        self.token_request_encoding = encoding;
        self
    }

    /// Select the browsing surface.
    pub fn with_surface(mut self, surface: SurfaceKind) -> Self {
        self.surface = surface;
        self
    }

    /// Set the refresh window, in seconds.
    pub fn with_refresh_skew_secs(mut self, secs: u64) -> Self {
        self.refresh_skew_secs = secs;
        self
    }

    /// Set the login timeout, in seconds.
    pub fn with_login_timeout_secs(mut self, secs: u64) -> Self {
        self.login_timeout_secs = secs;
        self
    }

    /// Set the location-poll interval, in milliseconds.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Remove the revocation endpoint.
    pub fn without_revoke_endpoint(mut self) -> Self {
        self.revoke_endpoint = None;
        self
    }

    /// Login timeout as a [`Duration`].
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    /// Location-poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-request HTTP timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the HTTP client shared by the token, revoke and userinfo calls.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()?)
    }
}

fn invalid(reason: &str) -> AuthError {
    AuthError::InvalidConfig {
        reason: reason.to_string(),
    }
}

fn parse_endpoint(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| AuthError::InvalidConfig {
        reason: format!("{field} '{value}' is not a valid URL: {e}"),
    })
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
            "https://login.example.com/",
            "client-123",
            "https://app.example.com/oauth/callback",
        )
    }

    #[test]
    fn for_login_host_derives_endpoints() {
        let config = test_config();
        assert_eq!(
            config.authorize_endpoint,
            "https://login.example.com/services/oauth2/authorize"
        );
        assert_eq!(
            config.token_endpoint,
            "https://login.example.com/services/oauth2/token"
        );
        assert_eq!(
            config.revoke_endpoint.as_deref(),
            Some("https://login.example.com/services/oauth2/revoke")
        );
        assert_eq!(config.refresh_skew_secs, 300);
        assert_eq!(config.login_timeout_secs, 300);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_setters() {
        let config = test_config()
            .with_client_secret("s3cret")
            .with_scope("api refresh_token")
            .with_surface(SurfaceKind::Window)
            .with_token_request_encoding(RequestEncoding::Json)
            .with_poll_interval_ms(50)
            .without_revoke_endpoint();
        assert_eq!(config.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.scope, "api refresh_token");
        assert_eq!(config.surface, SurfaceKind::Window);
        assert_eq!(config.token_request_encoding, RequestEncoding::Json);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert!(config.revoke_endpoint.is_none());
    }

    #[test]
    fn debug_redacts_secret() {
        let config = test_config().with_client_secret("super-secret-value");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn toml_with_defaults() {
        let config = AuthConfig::from_toml_str(
            r#"
            client_id = "abc"
            authorize_endpoint = "https://login.example.com/authorize"
            token_endpoint = "https://login.example.com/token"
            redirect_uri = "myapp://oauth/callback"
            scope = "api refresh_token"
            surface = "window"
            token_request_encoding = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.surface, SurfaceKind::Window);
        assert_eq!(config.token_request_encoding, RequestEncoding::Json);
        assert_eq!(config.refresh_skew_secs, 300);
        assert!(config.client_secret.is_none());
        assert!(config.revoke_endpoint.is_none());
    }

    #[test]
    fn toml_missing_required_field() {
        let result = AuthConfig::from_toml_str(r#"client_id = "abc""#);
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.toml");
        std::fs::write(
            &path,
            r#"
            client_id = "file-client"
            authorize_endpoint = "https://login.example.com/authorize"
            token_endpoint = "https://login.example.com/token"
            redirect_uri = "http://127.0.0.1:8400/callback"
            login_timeout_secs = 60
            "#,
        )
        .unwrap();

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.client_id, "file-client");
        assert_eq!(config.login_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn validate_rejects_bad_urls_and_zero_knobs() {
        let mut config = test_config();
        config.token_endpoint = "not a url".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("token_endpoint"));

        let config = test_config().with_poll_interval_ms(0);
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.client_id = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_lookup_reads_prefixed_vars() {
        let vars: HashMap<&str, &str> = [
            ("TOKENHOST_LOGIN_HOST", "https://login.example.com"),
            ("TOKENHOST_CLIENT_ID", "env-client"),
            ("TOKENHOST_REDIRECT_URI", "http://127.0.0.1:8400/callback"),
            ("TOKENHOST_CLIENT_SECRET", "env-secret"),
            ("TOKENHOST_SCOPE", "api"),
            ("TOKENHOST_SURFACE", "Window"),
        ]
        .into_iter()
        .collect();

        let config =
            AuthConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.client_id, "env-client");
        assert_eq!(config.client_secret.as_deref(), Some("env-secret"));
        assert_eq!(config.scope, "api");
        assert_eq!(config.surface, SurfaceKind::Window);
        assert_eq!(
            config.token_endpoint,
            "https://login.example.com/services/oauth2/token"
        );
    }

    #[test]
    fn from_lookup_missing_required() {
        let result = AuthConfig::from_lookup(|name| {
            (name == "TOKENHOST_CLIENT_ID").then(|| "only-client".to_string())
        });
        let err = result.unwrap_err().to_string();
        assert!(err.contains("TOKENHOST_LOGIN_HOST"));
    }

    #[test]
    fn from_lookup_unknown_surface() {
        let result = AuthConfig::from_lookup(|name| match name {
            "TOKENHOST_LOGIN_HOST" => Some("https://login.example.com".to_string()),
            "TOKENHOST_CLIENT_ID" => Some("c".to_string()),
            "TOKENHOST_REDIRECT_URI" => Some("http://127.0.0.1:8400/cb".to_string()),
            "TOKENHOST_SURFACE" => Some("popup".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }
}
