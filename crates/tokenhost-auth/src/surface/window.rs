//! Host-driven window surface.
//!
//! The host application owns a native window (or webview, or popup) and
//! forwards whatever navigation callbacks its platform offers through a
//! [`NavigationSink`]. Which callbacks fire, how often, and in what order is
//! up to the platform; the capture downstream deduplicates them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::{BrowsingSurface, NavigationChannel, SurfaceEvent, SurfaceHandle, SurfaceSession};
use crate::error::Result;

/// Sender half handed to the host's window.
///
/// Cheap to clone; every platform listener gets its own copy. Once the
/// capture resolves it drops the receiving end, after which every method
/// here is a silent no-op and [`is_detached`](Self::is_detached) is `true`.
#[derive(Debug, Clone)]
pub struct NavigationSink {
    tx: mpsc::UnboundedSender<SurfaceEvent>,
}

impl NavigationSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SurfaceEvent>) -> Self {
        Self { tx }
    }

    /// Report a navigation observed on `channel`.
    pub fn navigated(&self, channel: NavigationChannel, url: impl Into<String>) {
        let _ = self.tx.send(SurfaceEvent::Navigated {
            channel,
            url: url.into(),
        });
    }

    pub fn will_navigate(&self, url: impl Into<String>) {
        self.navigated(NavigationChannel::WillNavigate, url);
    }

    pub fn will_redirect(&self, url: impl Into<String>) {
        self.navigated(NavigationChannel::WillRedirect, url);
    }

    pub fn did_navigate(&self, url: impl Into<String>) {
        self.navigated(NavigationChannel::DidNavigate, url);
    }

    pub fn did_navigate_in_page(&self, url: impl Into<String>) {
        self.navigated(NavigationChannel::DidNavigateInPage, url);
    }

    /// Report that the user closed the window.
    pub fn closed(&self) {
        let _ = self.tx.send(SurfaceEvent::Closed);
    }

    /// Whether the capture has stopped listening.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Implemented by the host application to open its login window.
#[async_trait]
pub trait WindowHost: Send + Sync {
    /// Open a window at `url`, wire its navigation callbacks to `sink`, and
    /// return a handle that can close it (and, optionally, read its location).
    async fn open_window(&self, url: &Url, sink: NavigationSink) -> Result<Arc<dyn SurfaceHandle>>;
}

/// [`BrowsingSurface`] backed by a [`WindowHost`].
pub struct WindowSurface {
    host: Arc<dyn WindowHost>,
}

impl WindowSurface {
    pub fn new(host: Arc<dyn WindowHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl BrowsingSurface for WindowSurface {
    async fn open(&self, url: &Url) -> Result<SurfaceSession> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.host.open_window(url, NavigationSink::new(tx)).await?;
        tracing::debug!(host = url.host_str().unwrap_or_default(), "login window opened");
        Ok(SurfaceSession::new(rx, handle))
    }
}
