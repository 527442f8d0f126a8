//! System browser + local HTTP listener.
//!
//! The authorization URL is opened in the user's default browser and the
//! provider redirects back to `http://127.0.0.1:{port}/...`. A minimal TCP
//! listener on that address turns every incoming request into a
//! [`NavigationChannel::Loopback`] event and answers with a small HTML page.
//!
//! No external HTTP server framework is needed; the listener uses raw
//! [`tokio::net::TcpListener`]. The browser tab cannot report being closed,
//! so a loopback login is bounded by the login timeout alone.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use url::Url;

use super::{BrowsingSurface, NavigationChannel, SurfaceEvent, SurfaceHandle, SurfaceSession};
use crate::capture::RedirectTarget;
use crate::error::{AuthError, Result};

/// The HTML page returned to the browser once the redirect arrived.
const CALLBACK_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Sign-in received</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }
        .card {
            text-align: center;
            padding: 3rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.08);
        }
    </style>
</head>
<body>
    <div class="card">
        <h1>Sign-in received</h1>
        <p>You can close this tab and return to the application.</p>
    </div>
</body>
</html>"#;

/// OAuth redirects are small GET requests; 4KB is more than enough.
const MAX_REQUEST_BYTES: usize = 4096;

/// How long a connection may stay silent before it is dropped.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay after the `failures`-th consecutive accept error: doubles from
/// 50ms up to 1s.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

/// [`BrowsingSurface`] that opens the system browser and listens on the
/// loopback redirect URI.
#[derive(Debug, Clone)]
pub struct LoopbackSurface {
    target: RedirectTarget,
    bind_addr: String,
    origin: String,
    launch_browser: bool,
}

impl LoopbackSurface {
    /// Prepare a surface for `redirect_uri`, which must be an `http` URL on
    /// `127.0.0.1`, `localhost` or `[::1]` with an explicit port.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the redirect URI cannot be
    /// served locally.
    pub fn new(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri).map_err(|e| AuthError::InvalidConfig {
            reason: format!("redirect_uri '{redirect_uri}' is not a valid URL: {e}"),
        })?;

        if url.scheme() != "http" {
            return Err(AuthError::InvalidConfig {
                reason: format!("loopback redirect_uri must use http, got '{}'", url.scheme()),
            });
        }
        let host = match url.host_str() {
            Some(h @ ("127.0.0.1" | "localhost" | "[::1]")) => h.to_string(),
            other => {
                return Err(AuthError::InvalidConfig {
                    reason: format!(
                        "loopback redirect_uri must point at this machine, got '{}'",
                        other.unwrap_or_default()
                    ),
                });
            }
        };
        let port = url.port().ok_or_else(|| AuthError::InvalidConfig {
            reason: "loopback redirect_uri needs an explicit port".to_string(),
        })?;

        let bind_host = if host == "localhost" {
            "127.0.0.1".to_string()
        } else {
            host.clone()
        };

        Ok(Self {
            target: RedirectTarget::parse(redirect_uri)?,
            bind_addr: format!("{bind_host}:{port}"),
            origin: format!("http://{host}:{port}"),
            launch_browser: true,
        })
    }

    /// Do not launch a browser; only log the URL. Useful for headless hosts
    /// and tests that drive the listener themselves.
    pub fn without_browser(mut self) -> Self {
        self.launch_browser = false;
        self
    }

    /// Serve `bind_addr` until aborted, forwarding every request target.
    ///
    /// Each connection runs on its own task so an idle one (a browser
    /// preconnect) cannot hold up the redirect. The tasks live in a
    /// [`JoinSet`] that is dropped, and so aborted, with this future.
    async fn serve(
        listener: TcpListener,
        origin: String,
        target: RedirectTarget,
        tx: mpsc::UnboundedSender<SurfaceEvent>,
    ) {
        let origin: Arc<str> = origin.into();
        let mut connections = JoinSet::new();
        let mut accept_failures = 0u32;

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = tx.closed() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => {
                    accept_failures = 0;
                    conn
                }
                Err(e) => {
                    accept_failures = accept_failures.saturating_add(1);
                    let backoff = accept_backoff(accept_failures);
                    tracing::warn!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "loopback accept failed"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };
            tracing::debug!(peer = %peer, "accepted loopback connection");

            let origin = Arc::clone(&origin);
            let target = target.clone();
            let tx = tx.clone();
            connections.spawn(async move {
                if let Err(e) = Self::handle_connection(stream, &origin, &target, &tx).await {
                    tracing::debug!(error = %e, "loopback request failed");
                }
            });
        }
    }

    /// Read one request, forward the full URL it targeted, then reply.
    async fn handle_connection(
        mut stream: TcpStream,
        origin: &str,
        target: &RedirectTarget,
        tx: &mpsc::UnboundedSender<SurfaceEvent>,
    ) -> Result<()> {
        let mut buf = [0u8; MAX_REQUEST_BYTES];
        let n = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| AuthError::Surface {
                reason: "loopback connection sent no request".to_string(),
            })??;
        if n == 0 {
            return Ok(());
        }
        let request = String::from_utf8_lossy(&buf[..n]);

        let Some(url) = Self::request_url(&request, origin) else {
            Self::respond(&mut stream, "400 Bad Request", "bad request").await?;
            return Ok(());
        };

        let is_redirect = Url::parse(&url).is_ok_and(|u| target.matches(&u));
        // A closed receiver means the capture is already over.
        let _ = tx.send(SurfaceEvent::Navigated {
            channel: NavigationChannel::Loopback,
            url,
        });

        if is_redirect {
            Self::respond(&mut stream, "200 OK", CALLBACK_HTML).await?;
        } else {
            Self::respond(&mut stream, "404 Not Found", "not found").await?;
        }
        Ok(())
    }

    /// Rebuild the absolute URL from the request line.
    ///
    /// Expected format: `GET /some/path?code=xxx HTTP/1.1`
    fn request_url(request: &str, origin: &str) -> Option<String> {
        let request_line = request.lines().next()?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?;
        let path = parts.next()?;
        if method != "GET" || !path.starts_with('/') {
            return None;
        }
        Some(format!("{origin}{path}"))
    }

    async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len(),
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Open `url` in the default browser.
    fn open_browser(url: &str) -> std::io::Result<()> {
        #[cfg(target_os = "macos")]
        {
            Command::new("open").arg(url).spawn()?;
        }
        #[cfg(target_os = "linux")]
        {
            Command::new("xdg-open").arg(url).spawn()?;
        }
        #[cfg(target_os = "windows")]
        {
            Command::new("cmd").args(["/C", "start", "", url]).spawn()?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowsingSurface for LoopbackSurface {
    async fn open(&self, url: &Url) -> Result<SurfaceSession> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "loopback listener waiting for OAuth redirect");

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::serve(
            listener,
            self.origin.clone(),
            self.target.clone(),
            tx,
        ));

        let launched = self.launch_browser && Self::open_browser(url.as_str()).is_ok();
        if !launched {
            tracing::info!(url = %url, "open this URL in your browser to authorize");
        }

        let handle: Arc<dyn SurfaceHandle> = Arc::new(LoopbackHandle {
            listener: task.abort_handle(),
        });
        Ok(SurfaceSession::new(rx, handle))
    }
}

struct LoopbackHandle {
    listener: AbortHandle,
}

impl SurfaceHandle for LoopbackHandle {
    fn close(&self) {
        self.listener.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
