//! Session manager: the consumer-facing entry point.
//!
//! [`SessionManager`] owns the only code paths that write to the
//! [`TokenStore`]. It runs interactive logins, keeps the stored access token
//! fresh, recovers from 401s and clears everything on logout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokenhost_store::TokenStore;
use tokio::time::Instant;
use uuid::Uuid;

use crate::authorize::{AuthorizationRequest, build_authorization_url};
use crate::capture::{CallbackOutcome, RedirectCapture, RedirectTarget};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::exchange::TokenExchangeClient;
use crate::pkce::{PkcePair, PkceVerifier};
use crate::refresh::TokenRefreshClient;
use crate::revoke::RevocationClient;
use crate::surface::{self, BrowsingSurface, WindowHost};
use crate::token::TokenRecord;

/// Store key of the persisted [`TokenRecord`].
pub const TOKEN_KEY: &str = "oauth_tokens";

/// Store key of the cached [`UserProfile`].
pub const PROFILE_KEY: &str = "user_profile";

// ---------------------------------------------------------------------------
// LoginAttempt
// ---------------------------------------------------------------------------

/// Everything one interactive login owns. Created per `login()` call and
/// dropped when it returns.
#[derive(Debug)]
pub struct LoginAttempt {
    id: Uuid,
    pkce: PkcePair,
    state: String,
    started: Instant,
    timeout: Duration,
}

impl LoginAttempt {
    /// Start an attempt bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EntropyUnavailable`] if no PKCE pair can be made.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            pkce: PkcePair::generate()?,
            state: Uuid::now_v7().simple().to_string(),
            started: Instant::now(),
            timeout,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pkce(&self) -> &PkcePair {
        &self.pkce
    }

    /// The CSRF value sent as `state`.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.timeout
    }

    /// Time left before the attempt expires.
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// Whether `returned` is this attempt's state.
    pub fn verify_state(&self, returned: Option<&str>) -> Result<()> {
        if returned == Some(self.state.as_str()) {
            Ok(())
        } else {
            Err(AuthError::StateMismatch)
        }
    }

    /// End the attempt, keeping only the verifier for the exchange.
    pub fn into_verifier(self) -> PkceVerifier {
        self.pkce.into_verifier()
    }
}

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// Identity record from the provider's userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Every other claim, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Clears the single-flight flag when the login ends, however it ends.
struct LoginGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LoginGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AuthError::LoginInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Orchestrates login, refresh, 401 recovery and logout for one provider.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct SessionManager {
    config: AuthConfig,
    store: Arc<dyn TokenStore>,
    surface: Arc<dyn BrowsingSurface>,
    http: reqwest::Client,
    exchange: TokenExchangeClient,
    refresh: TokenRefreshClient,
    revocation: RevocationClient,
    login_in_flight: AtomicBool,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field(
                "login_in_flight",
                &self.login_in_flight.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager over `store`, showing logins on `surface`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if `config` fails validation, or
    /// [`AuthError::Network`] if the HTTP client cannot be built.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn TokenStore>,
        surface: Arc<dyn BrowsingSurface>,
    ) -> Result<Self> {
        config.validate()?;
        let http = config.http_client()?;
        Ok(Self {
            exchange: TokenExchangeClient::new(&config, http.clone()),
            refresh: TokenRefreshClient::new(&config, http.clone()),
            revocation: RevocationClient::new(&config, http.clone()),
            http,
            config,
            store,
            surface,
            login_in_flight: AtomicBool::new(false),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// As [`new`](Self::new), picking the surface from `config.surface`.
    ///
    /// # Errors
    ///
    /// As [`surface::from_config`] and [`new`](Self::new).
    pub fn from_config(
        config: AuthConfig,
        store: Arc<dyn TokenStore>,
        window_host: Option<Arc<dyn WindowHost>>,
    ) -> Result<Self> {
        let surface = surface::from_config(&config, window_host)?;
        Self::new(config, store, surface)
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // -- Login --------------------------------------------------------------

    /// Run an interactive login and persist the resulting tokens.
    ///
    /// # Errors
    ///
    /// - [`AuthError::LoginInProgress`] if another login is running.
    /// - [`AuthError::UserCancelled`] / [`AuthError::CallbackTimeout`] when
    ///   no redirect arrives.
    /// - [`AuthError::ProviderError`], [`AuthError::MalformedCallback`],
    ///   [`AuthError::StateMismatch`] for a bad redirect.
    /// - Any exchange error. Nothing is persisted on failure.
    pub async fn login(&self) -> Result<TokenRecord> {
        let _guard = LoginGuard::acquire(&self.login_in_flight)?;

        let attempt = LoginAttempt::new(self.config.login_timeout())?;
        let attempt_id = attempt.id();
        tracing::info!(attempt_id = %attempt_id, "starting interactive login");

        let request =
            AuthorizationRequest::new(&self.config, attempt.pkce()).with_state(attempt.state());
        let url = build_authorization_url(&self.config, &request)?;
        let capture = RedirectCapture::new(RedirectTarget::parse(&self.config.redirect_uri)?);

        let session = self.surface.open(&url).await?;
        tracing::debug!(
            attempt_id = %attempt_id,
            provider = url.host_str().unwrap_or_default(),
            "authorization page opened"
        );

        let outcome = capture
            .watch(session, self.config.poll_interval(), attempt.remaining())
            .await
            .map_err(|e| match e {
                AuthError::CallbackTimeout { .. } => AuthError::CallbackTimeout {
                    timeout_secs: self.config.login_timeout_secs,
                },
                other => other,
            });
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::info!(attempt_id = %attempt_id, error = %e, "login ended without a redirect");
                return Err(e);
            }
        };

        let code = match outcome {
            CallbackOutcome::Code { code, state } => {
                if let Err(e) = attempt.verify_state(state.as_deref()) {
                    tracing::warn!(attempt_id = %attempt_id, "redirect state does not match");
                    return Err(e);
                }
                code
            }
            CallbackOutcome::ProviderError { code, description } => {
                return Err(AuthError::ProviderError { code, description });
            }
            CallbackOutcome::Malformed { raw_url } => {
                return Err(AuthError::MalformedCallback { raw_url });
            }
        };

        let record = self
            .exchange
            .exchange(&code, attempt.into_verifier(), request.redirect_uri())
            .await?;

        {
            // A refresh still in flight must settle before the new record lands.
            let _lock = self.refresh_lock.lock().await;
            self.save_tokens(&record).await?;
        }
        if let Err(e) = self.store.delete(PROFILE_KEY).await {
            tracing::warn!(attempt_id = %attempt_id, error = %e, "could not drop cached profile");
        }

        tracing::info!(attempt_id = %attempt_id, "login completed");
        Ok(record)
    }

    // -- Token lifecycle ----------------------------------------------------

    /// Return a token that is not about to expire, refreshing if needed.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if nothing is stored.
    /// - [`AuthError::Unauthorized`] if the refresh token was rejected; the
    ///   stored credentials are cleared first.
    /// - Other refresh errors unchanged; the stored record is kept.
    pub async fn ensure_valid_token(&self) -> Result<TokenRecord> {
        let skew = self.config.refresh_skew_secs;
        let current = self.load_tokens().await?.ok_or(AuthError::NotAuthenticated)?;
        if !current.expires_within(skew) {
            return Ok(current);
        }
        tracing::debug!(expires_at = current.expires_at(), "access token near expiry");
        self.refresh_if(|stored| stored.expires_within(skew)).await
    }

    /// Recover from a 401 seen while using `rejected_access_token`.
    ///
    /// Refreshes unless the stored token already differs from the rejected
    /// one, in which case the stored token is returned.
    ///
    /// # Errors
    ///
    /// As [`ensure_valid_token`](Self::ensure_valid_token).
    pub async fn handle_unauthorized(&self, rejected_access_token: &str) -> Result<TokenRecord> {
        tracing::info!("access token rejected by resource server");
        self.refresh_if(|stored| stored.access_token == rejected_access_token)
            .await
    }

    /// Refresh under the refresh lock, re-checking `needs_refresh` against
    /// the stored record once the lock is held.
    async fn refresh_if(&self, needs_refresh: impl Fn(&TokenRecord) -> bool) -> Result<TokenRecord> {
        let _lock = self.refresh_lock.lock().await;

        let stored = self.load_tokens().await?.ok_or(AuthError::NotAuthenticated)?;
        if !needs_refresh(&stored) {
            tracing::debug!("token already refreshed by a concurrent caller");
            return Ok(stored);
        }

        match self.refresh.refresh(&stored).await {
            Ok(record) => {
                self.save_tokens(&record).await?;
                Ok(record)
            }
            Err(e) if e.requires_reauthentication() => {
                tracing::warn!(error = %e, "refresh rejected, clearing stored credentials");
                self.clear_credentials().await?;
                Err(match e {
                    AuthError::Unauthorized { reason, .. } => AuthError::Unauthorized {
                        reauthenticate: true,
                        reason,
                    },
                    other => AuthError::Unauthorized {
                        reauthenticate: true,
                        reason: other.to_string(),
                    },
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, retryable = e.is_retryable(), "token refresh failed");
                Err(e)
            }
        }
    }

    /// Revoke at the provider (best effort) and delete everything stored.
    /// Safe to call when already logged out.
    ///
    /// # Errors
    ///
    /// Only store failures are returned; revocation failures are logged.
    pub async fn logout(&self) -> Result<()> {
        match self.load_tokens().await {
            Ok(Some(record)) => {
                let token = if record.refresh_token.is_empty() {
                    &record.access_token
                } else {
                    &record.refresh_token
                };
                if let Err(e) = self.revocation.revoke(token).await {
                    tracing::warn!(error = %e, "token revocation failed, continuing logout");
                }
            }
            Ok(None) => tracing::debug!("logout with no stored credentials"),
            Err(e) => tracing::warn!(error = %e, "could not read credentials before logout"),
        }

        self.clear_credentials().await?;
        tracing::info!("logged out");
        Ok(())
    }

    // -- Accessors ----------------------------------------------------------

    pub async fn is_authenticated(&self) -> Result<bool> {
        Ok(self.load_tokens().await?.is_some())
    }

    /// The stored record, without refreshing.
    pub async fn current_token(&self) -> Result<Option<TokenRecord>> {
        self.load_tokens().await
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.load_tokens().await?.map(|r| r.access_token))
    }

    pub async fn instance_url(&self) -> Result<Option<String>> {
        Ok(self.load_tokens().await?.map(|r| r.instance_url))
    }

    // -- Profile ------------------------------------------------------------

    /// Fetch the user's profile from the userinfo endpoint and cache it.
    ///
    /// A 401 triggers one [`handle_unauthorized`](Self::handle_unauthorized)
    /// and one retry.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidConfig`] without a userinfo endpoint, otherwise as
    /// [`ensure_valid_token`](Self::ensure_valid_token) plus
    /// [`AuthError::TokenRequestFailed`] for other HTTP failures.
    pub async fn user_profile(&self) -> Result<UserProfile> {
        let endpoint = self
            .config
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::InvalidConfig {
                reason: "no userinfo_endpoint configured".to_string(),
            })?;

        let token = self.ensure_valid_token().await?;
        let profile = match self.fetch_profile(endpoint, &token).await? {
            Some(profile) => profile,
            None => {
                let token = self.handle_unauthorized(&token.access_token).await?;
                self.fetch_profile(endpoint, &token)
                    .await?
                    .ok_or_else(|| AuthError::Unauthorized {
                        reauthenticate: true,
                        reason: "userinfo rejected a freshly refreshed token".to_string(),
                    })?
            }
        };

        self.store
            .set(PROFILE_KEY, serde_json::to_value(&profile)?)
            .await?;
        Ok(profile)
    }

    /// The last profile fetched by [`user_profile`](Self::user_profile).
    pub async fn cached_profile(&self) -> Result<Option<UserProfile>> {
        match self.store.get(PROFILE_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// `Ok(None)` on 401.
    async fn fetch_profile(&self, endpoint: &str, token: &TokenRecord) -> Result<Option<UserProfile>> {
        let response = self
            .http
            .get(endpoint)
            .header(reqwest::header::AUTHORIZATION, token.authorization_header())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenRequestFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(response.json().await?))
    }

    // -- Store helpers ------------------------------------------------------

    /// Read the stored record. A record that no longer parses, or breaks the
    /// non-empty invariant, counts as absent.
    async fn load_tokens(&self) -> Result<Option<TokenRecord>> {
        let Some(value) = self.store.get(TOKEN_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<TokenRecord>(value) {
            Ok(record)
                if !record.access_token.is_empty()
                    && !record.refresh_token.is_empty()
                    && !record.instance_url.is_empty() =>
            {
                Ok(Some(record))
            }
            Ok(_) => {
                tracing::warn!("stored token record is incomplete, ignoring it");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored token record is unreadable, ignoring it");
                Ok(None)
            }
        }
    }

    async fn save_tokens(&self, record: &TokenRecord) -> Result<()> {
        self.store.set(TOKEN_KEY, serde_json::to_value(record)?).await?;
        tracing::debug!(expires_at = record.expires_at(), "token record stored");
        Ok(())
    }

    async fn clear_credentials(&self) -> Result<()> {
        self.store.delete(TOKEN_KEY).await?;
        self.store.delete(PROFILE_KEY).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
