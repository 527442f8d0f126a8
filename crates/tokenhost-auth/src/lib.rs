//! Authentication engine for tokenhost.
//!
//! This crate runs the OAuth 2.0 authorization code flow with PKCE against a
//! single identity provider and manages the resulting tokens for the host
//! process:
//!
//! - **PKCE** (RFC 7636) verifier/challenge pairs, one per login attempt
//! - **Redirect capture** across racing navigation channels, exactly once
//! - **Browsing surfaces**: a host-driven window or the system browser with a
//!   loopback listener
//! - **Token lifecycle**: exchange, normalization, refresh, 401 recovery and
//!   revocation
//!
//! Tokens are persisted through the [`tokenhost_store::TokenStore`] contract.
//! The [`SessionManager`] is the only component that writes to it.
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//! ├── PkcePair              (verifier + S256 challenge)
//! ├── build_authorization_url
//! ├── BrowsingSurface       (WindowSurface | LoopbackSurface)
//! ├── RedirectCapture       (exactly-once state machine)
//! ├── TokenExchangeClient   (authorization_code grant)
//! ├── TokenRefreshClient    (refresh_token grant)
//! ├── RevocationClient      (logout)
//! └── TokenStore            (oauth_tokens, user_profile)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tokenhost_auth::{AuthConfig, SessionManager};
//! use tokenhost_store::JsonFileTokenStore;
//!
//! # async fn example() -> tokenhost_auth::Result<()> {
//! let config = AuthConfig::for_login_host(
//!     "https://login.example.com",
//!     "my-client-id",
//!     "http://127.0.0.1:8400/callback",
//! )
//! .with_scope("api refresh_token");
//!
//! let store = Arc::new(JsonFileTokenStore::new("data/tokens.json"));
//! let session = SessionManager::from_config(config, store, None)?;
//!
//! if !session.is_authenticated().await? {
//!     session.login().await?;
//! }
//! let token = session.ensure_valid_token().await?;
//! println!("calling {} as {}", token.instance_url, token.token_type);
//! # Ok(())
//! # }
//! ```

pub mod authorize;
pub mod capture;
pub mod config;
mod endpoint;
pub mod error;
pub mod exchange;
pub mod pkce;
pub mod refresh;
pub mod revoke;
pub mod session;
pub mod surface;
pub mod token;

// Re-export key types at the crate root for convenience.
pub use authorize::{AuthorizationRequest, build_authorization_url};
pub use capture::{CallbackOutcome, CapturePhase, Observation, RedirectCapture, RedirectTarget};
pub use config::{AuthConfig, RequestEncoding, SurfaceKind};
pub use error::{AuthError, Result};
pub use exchange::TokenExchangeClient;
pub use pkce::{PkcePair, PkceVerifier, pkce_challenge};
pub use refresh::TokenRefreshClient;
pub use revoke::RevocationClient;
pub use session::{LoginAttempt, PROFILE_KEY, SessionManager, TOKEN_KEY, UserProfile};
pub use surface::{
    BrowsingSurface, LoopbackSurface, NavigationChannel, NavigationSink, SurfaceEvent,
    SurfaceHandle, SurfaceSession, WindowHost, WindowSurface,
};
pub use token::TokenRecord;
