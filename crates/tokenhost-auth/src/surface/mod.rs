//! Browsing surfaces.
//!
//! A browsing surface is whatever shows the provider's login page to the
//! user: a window owned by the host application, or the system browser with a
//! local listener catching the redirect. Each concrete surface reports what it
//! sees through its own mix of channels; this module adapts all of them into
//! one stream of [`SurfaceEvent`]s that the
//! [`RedirectCapture`](crate::capture::RedirectCapture) consumes.
//!
//! - [`WindowSurface`]: host-driven window ([`WindowHost`] + [`NavigationSink`]).
//! - [`LoopbackSurface`]: system browser + `127.0.0.1` HTTP listener.

pub mod loopback;
pub mod window;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{AuthConfig, SurfaceKind};
use crate::error::{AuthError, Result};

pub use loopback::LoopbackSurface;
pub use window::{NavigationSink, WindowHost, WindowSurface};

/// The notification channel a navigation was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationChannel {
    /// Fired before the surface starts a navigation.
    WillNavigate,
    /// Fired when the server answers with an HTTP redirect.
    WillRedirect,
    /// Fired after a navigation committed.
    DidNavigate,
    /// Fired for fragment / history API navigations.
    DidNavigateInPage,
    /// Periodic read of the surface's current location.
    LocationPoll,
    /// A request that reached the local loopback listener.
    Loopback,
}

impl NavigationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WillNavigate => "will_navigate",
            Self::WillRedirect => "will_redirect",
            Self::DidNavigate => "did_navigate",
            Self::DidNavigateInPage => "did_navigate_in_page",
            Self::LocationPoll => "location_poll",
            Self::Loopback => "loopback",
        }
    }
}

impl std::fmt::Display for NavigationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation reported by a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The surface is at, or about to load, `url`.
    Navigated {
        channel: NavigationChannel,
        url: String,
    },
    /// The user closed the surface.
    Closed,
}

/// Control side of an open surface.
pub trait SurfaceHandle: Send + Sync {
    /// Whether [`current_location`](Self::current_location) is worth polling.
    fn polls_location(&self) -> bool {
        false
    }

    /// The URL the surface currently shows, if the platform exposes it.
    fn current_location(&self) -> Option<String> {
        None
    }

    /// Close the surface. Must be idempotent.
    fn close(&self);
}

/// An open surface: the event stream plus its control handle.
pub struct SurfaceSession {
    events: mpsc::UnboundedReceiver<SurfaceEvent>,
    handle: Arc<dyn SurfaceHandle>,
}

impl SurfaceSession {
    pub fn new(events: mpsc::UnboundedReceiver<SurfaceEvent>, handle: Arc<dyn SurfaceHandle>) -> Self {
        Self { events, handle }
    }

    pub(crate) fn into_parts(self) -> (mpsc::UnboundedReceiver<SurfaceEvent>, Arc<dyn SurfaceHandle>) {
        (self.events, self.handle)
    }
}

/// Capability to show the authorization page to the user.
#[async_trait]
pub trait BrowsingSurface: Send + Sync {
    /// Open the surface at `url` and start reporting navigations.
    async fn open(&self, url: &Url) -> Result<SurfaceSession>;
}

/// Select the surface named by `config.surface`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidConfig`] when the window surface is selected
/// but the host supplied no [`WindowHost`], or when the redirect URI cannot be
/// served by the loopback listener.
pub fn from_config(
    config: &AuthConfig,
    window_host: Option<Arc<dyn WindowHost>>,
) -> Result<Arc<dyn BrowsingSurface>> {
    match config.surface {
        SurfaceKind::Window => {
            let host = window_host.ok_or_else(|| AuthError::InvalidConfig {
                reason: "surface = \"window\" requires a window host".to_string(),
            })?;
            Ok(Arc::new(WindowSurface::new(host)))
        }
        SurfaceKind::Loopback => Ok(Arc::new(LoopbackSurface::new(&config.redirect_uri)?)),
    }
}
