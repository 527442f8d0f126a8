//! Exactly-once redirect capture.
//!
//! A browsing surface reports the same redirect through several overlapping
//! channels (pre-navigation, redirect, post-navigation, in-page navigation, a
//! periodic location poll, a loopback request). Any subset of them may fire,
//! in any order, from different tasks. [`RedirectCapture`] funnels every one
//! of them through [`RedirectCapture::observe`] and guarantees that exactly
//! one [`CallbackOutcome`] is produced per login attempt.
//!
//! # States
//!
//! ```text
//! Idle ──start_watch──▶ Watching ──first match──▶ Resolved ──teardown──▶ Closed
//!                          │ ──surface closed──▶ Cancelled ──teardown──▶ Closed
//!                          │ ──deadline──────▶ TimedOut  ──teardown──▶ Closed
//! ```
//!
//! Leaving `Watching` is a single compare-and-swap on an [`AtomicU8`], done
//! before any side effect. Whoever wins the swap delivers the settlement;
//! everyone else is a no-op. Teardown aborts the poll task, drops the event
//! receiver (detaching the surface's listeners) and closes the surface.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{AuthError, Result};
use crate::surface::{NavigationChannel, SurfaceEvent, SurfaceHandle, SurfaceSession};

// ---------------------------------------------------------------------------
// Redirect target
// ---------------------------------------------------------------------------

/// The redirect URI, parsed for prefix matching.
///
/// A candidate matches when scheme, host and port are equal and its path
/// either equals the target path or continues it after a `/`. Plain string
/// prefixes never count: `https://app/cb` does not match `https://app/cb-x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    url: Url,
    path: String,
}

impl RedirectTarget {
    /// Parse the configured redirect URI.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if it is not an absolute URL.
    pub fn parse(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri).map_err(|e| AuthError::InvalidConfig {
            reason: format!("redirect_uri '{redirect_uri}' is not a valid URL: {e}"),
        })?;
        let path = url.path().trim_end_matches('/').to_string();
        Ok(Self { url, path })
    }

    /// Whether `candidate` is a hit on this redirect URI.
    pub fn matches(&self, candidate: &Url) -> bool {
        if candidate.scheme() != self.url.scheme()
            || candidate.host_str() != self.url.host_str()
            || candidate.port_or_known_default() != self.url.port_or_known_default()
        {
            return false;
        }

        let path = candidate.path();
        match path.strip_prefix(self.path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// As [`matches`](Self::matches), for an unparsed URL. Unparseable input
    /// never matches.
    pub fn matches_str(&self, candidate: &str) -> bool {
        Url::parse(candidate).is_ok_and(|u| self.matches(&u))
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What a matched redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// An authorization code, plus the echoed `state` if any.
    Code {
        code: String,
        state: Option<String>,
    },
    /// The provider reported `error` / `error_description`.
    ProviderError { code: String, description: String },
    /// Neither a code nor an error was present.
    Malformed { raw_url: String },
}

impl CallbackOutcome {
    /// Read `code`, `error`, `error_description` and `state` from a matched
    /// redirect. The query is consulted first, then the fragment. An error
    /// takes precedence over a code.
    pub fn from_redirect(url: &Url) -> Self {
        let params = |source: &str| {
            let mut code = None;
            let mut error = None;
            let mut description = None;
            let mut state = None;
            for (key, value) in url::form_urlencoded::parse(source.as_bytes()) {
                let value = value.into_owned();
                match key.as_ref() {
                    "code" if code.is_none() => code = Some(value),
                    "error" if error.is_none() => error = Some(value),
                    "error_description" if description.is_none() => description = Some(value),
                    "state" if state.is_none() => state = Some(value),
                    _ => {}
                }
            }
            (code, error, description, state)
        };

        let mut found = params(url.query().unwrap_or_default());
        if found.0.is_none() && found.1.is_none() {
            found = params(url.fragment().unwrap_or_default());
        }
        let (code, error, description, state) = found;

        match (code, error) {
            (_, Some(error)) if !error.is_empty() => Self::ProviderError {
                code: error,
                description: description.unwrap_or_default(),
            },
            (Some(code), _) if !code.is_empty() => Self::Code { code, state },
            _ => Self::Malformed {
                raw_url: url.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Lifecycle of a [`RedirectCapture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CapturePhase {
    Idle = 0,
    Watching = 1,
    Resolved = 2,
    Cancelled = 3,
    TimedOut = 4,
    Closed = 5,
}

impl CapturePhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Watching,
            2 => Self::Resolved,
            3 => Self::Cancelled,
            4 => Self::TimedOut,
            _ => Self::Closed,
        }
    }
}

/// Result of reporting one navigation to the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The URL is not the redirect target; watching continues.
    Ignored,
    /// The URL matched but the capture is not watching yet.
    NotWatching,
    /// The URL matched but another report already settled the attempt.
    Duplicate,
    /// This report settled the attempt.
    Resolved(CallbackOutcome),
}

enum Settlement {
    Outcome(CallbackOutcome),
    Cancelled,
    TimedOut,
}

// ---------------------------------------------------------------------------
// RedirectCapture
// ---------------------------------------------------------------------------

/// Single-resolution redirect watcher for one login attempt.
pub struct RedirectCapture {
    target: RedirectTarget,
    phase: AtomicU8,
    settle_tx: Mutex<Option<oneshot::Sender<Settlement>>>,
    settle_rx: Mutex<Option<oneshot::Receiver<Settlement>>>,
}

impl RedirectCapture {
    /// Create an idle capture for `target`.
    pub fn new(target: RedirectTarget) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(Self {
            target,
            phase: AtomicU8::new(CapturePhase::Idle as u8),
            settle_tx: Mutex::new(Some(tx)),
            settle_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn phase(&self) -> CapturePhase {
        CapturePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn target(&self) -> &RedirectTarget {
        &self.target
    }

    /// Move `Idle → Watching`. Returns `false` if the capture was already
    /// started.
    pub fn start_watch(&self) -> bool {
        self.transition(CapturePhase::Idle, CapturePhase::Watching)
            .is_ok()
    }

    /// Report a navigation seen on `channel`. Safe to call from any task or
    /// thread, any number of times.
    pub fn observe(&self, channel: NavigationChannel, raw_url: &str) -> Observation {
        let Ok(url) = Url::parse(raw_url) else {
            tracing::trace!(channel = %channel, "ignoring unparseable navigation");
            return Observation::Ignored;
        };
        if !self.target.matches(&url) {
            tracing::trace!(channel = %channel, "navigation does not match redirect target");
            return Observation::Ignored;
        }

        match self.transition(CapturePhase::Watching, CapturePhase::Resolved) {
            Ok(()) => {}
            Err(CapturePhase::Idle) => return Observation::NotWatching,
            Err(_) => {
                tracing::debug!(channel = %channel, "duplicate redirect report ignored");
                return Observation::Duplicate;
            }
        }

        let outcome = CallbackOutcome::from_redirect(&url);
        match outcome {
            CallbackOutcome::Code { .. } => {
                tracing::info!(channel = %channel, "authorization code captured");
            }
            CallbackOutcome::ProviderError { ref code, .. } => {
                tracing::warn!(channel = %channel, error = %code, "provider returned an error on redirect");
            }
            CallbackOutcome::Malformed { ref raw_url } => {
                tracing::warn!(channel = %channel, raw_url = %raw_url, "redirect carried neither code nor error");
            }
        }

        self.settle(Settlement::Outcome(outcome.clone()));
        Observation::Resolved(outcome)
    }

    /// Report that the user closed the surface. Returns `false` if the
    /// attempt was already settled, in which case the close is ignored.
    pub fn cancel(&self) -> bool {
        if self
            .transition(CapturePhase::Watching, CapturePhase::Cancelled)
            .is_err()
        {
            return false;
        }
        tracing::info!("browsing surface closed before redirect");
        self.settle(Settlement::Cancelled);
        true
    }

    fn expire(&self) -> bool {
        if self
            .transition(CapturePhase::Watching, CapturePhase::TimedOut)
            .is_err()
        {
            return false;
        }
        self.settle(Settlement::TimedOut);
        true
    }

    fn transition(&self, from: CapturePhase, to: CapturePhase) -> std::result::Result<(), CapturePhase> {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(CapturePhase::from_u8)
    }

    fn settle(&self, settlement: Settlement) {
        if let Some(tx) = lock(&self.settle_tx).take() {
            let _ = tx.send(settlement);
        }
    }

    /// Drive `session` until the attempt settles, then tear it down.
    ///
    /// Events from the session and the optional location poll (every
    /// `poll_interval`) all go through [`observe`](Self::observe). The wait is
    /// bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UserCancelled`] if the surface closed first (or its
    ///   event stream ended).
    /// - [`AuthError::CallbackTimeout`] if `timeout` elapsed.
    /// - [`AuthError::Surface`] if this capture was already driven.
    pub async fn watch(
        self: Arc<Self>,
        session: SurfaceSession,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<CallbackOutcome> {
        let (mut events, handle) = session.into_parts();

        let Some(mut settled) = lock(&self.settle_rx).take() else {
            handle.close();
            return Err(AuthError::Surface {
                reason: "redirect capture already used".to_string(),
            });
        };
        if !self.start_watch() {
            handle.close();
            return Err(AuthError::Surface {
                reason: "redirect capture already started".to_string(),
            });
        }

        let poller = handle.polls_location().then(|| {
            tokio::spawn(poll_location(
                Arc::clone(&self),
                Arc::clone(&handle),
                poll_interval,
            ))
        });
        // Runs on every exit path, including the caller dropping this future.
        let teardown = Teardown {
            capture: Arc::clone(&self),
            handle,
            poller,
        };

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut deadline_fired = false;
        let mut stream_open = true;

        let settlement = loop {
            tokio::select! {
                biased;

                result = &mut settled => break result,

                _ = &mut deadline, if !deadline_fired => {
                    deadline_fired = true;
                    self.expire();
                }

                event = events.recv(), if stream_open => match event {
                    Some(SurfaceEvent::Navigated { channel, url }) => {
                        self.observe(channel, &url);
                    }
                    Some(SurfaceEvent::Closed) => {
                        self.cancel();
                    }
                    None => {
                        stream_open = false;
                        self.cancel();
                    }
                },
            }
        };

        drop(events);
        drop(teardown);

        match settlement {
            Ok(Settlement::Outcome(outcome)) => Ok(outcome),
            Ok(Settlement::Cancelled) => Err(AuthError::UserCancelled),
            Ok(Settlement::TimedOut) => Err(AuthError::CallbackTimeout {
                timeout_secs: timeout.as_secs(),
            }),
            Err(_) => Err(AuthError::Surface {
                reason: "redirect capture dropped without settling".to_string(),
            }),
        }
    }
}

/// Stops the poll task, closes the surface and marks the capture closed.
struct Teardown {
    capture: Arc<RedirectCapture>,
    handle: Arc<dyn SurfaceHandle>,
    poller: Option<JoinHandle<()>>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.handle.close();
        self.capture
            .phase
            .store(CapturePhase::Closed as u8, Ordering::Release);
        tracing::debug!("redirect capture torn down");
    }
}

/// Floor for the location poll; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Last-resort channel: read the surface's location on a fixed interval.
async fn poll_location(
    capture: Arc<RedirectCapture>,
    handle: Arc<dyn SurfaceHandle>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if capture.phase() != CapturePhase::Watching {
            break;
        }
        if let Some(url) = handle.current_location() {
            capture.observe(NavigationChannel::LocationPoll, &url);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
