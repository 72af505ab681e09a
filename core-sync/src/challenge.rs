//! # Verification Challenge Handling
//!
//! Detects anti-automation interstitials and walks the user through them in
//! an interactive session provided by the host.
//!
//! Resolution never completes on its own. Title polling only feeds a status
//! hint; the session content is read back after the user signals completion
//! through [`ChallengeControl`] and must pass detection again.

use bridge_traits::error::BridgeError;
use bridge_traits::{ChallengeSessionHost, SessionHandle};
use core_runtime::config::ChallengeMarkers;
use core_runtime::events::{ChallengeEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_if_sensitive;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default interval between session title polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Host session ids can carry cookies, so they never reach the logs
fn session_label(handle: &SessionHandle) -> String {
    redact_if_sensitive("session_id", handle.as_str())
}

// ============================================================================
// Detection
// ============================================================================

/// Case-insensitive marker matcher
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    phrases: Vec<String>,
    form_markers: Vec<String>,
    normal_markers: Vec<String>,
}

impl ChallengeDetector {
    pub fn new(markers: &ChallengeMarkers) -> Self {
        let lower = |values: &[String]| -> Vec<String> {
            values
                .iter()
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.to_lowercase())
                .collect()
        };

        Self {
            phrases: lower(&markers.phrases),
            form_markers: lower(&markers.form_markers),
            normal_markers: lower(&markers.normal_markers),
        }
    }

    /// Whether `content` is a challenge page.
    ///
    /// Any normal-content marker wins over challenge signals.
    pub fn is_challenge(&self, content: &str) -> bool {
        let content = content.to_lowercase();

        if self.normal_markers.iter().any(|m| content.contains(m)) {
            return false;
        }

        self.phrases.iter().any(|p| content.contains(p))
            || self.form_markers.iter().any(|m| content.contains(m))
    }

    /// Liveness heuristic for a session title
    pub fn title_suggests_challenge(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.phrases.iter().any(|p| title.contains(p))
    }
}

// ============================================================================
// User signals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChallengeSignal {
    Completed,
    Cancel,
}

/// Cloneable handle the host uses to answer an active challenge
#[derive(Debug, Clone)]
pub struct ChallengeControl {
    sender: mpsc::UnboundedSender<ChallengeSignal>,
}

impl ChallengeControl {
    /// The user reports having completed the verification
    pub fn confirm_completed(&self) -> bool {
        self.sender.send(ChallengeSignal::Completed).is_ok()
    }

    /// The user gives up on the verification
    pub fn cancel(&self) -> bool {
        self.sender.send(ChallengeSignal::Cancel).is_ok()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeFailure {
    #[error("verification cancelled by the user")]
    UserCancelled,

    #[error("verification session was closed")]
    SessionClosed,

    #[error("sync cancelled during verification")]
    JobCancelled,

    #[error("no interactive session host is available")]
    Unavailable,

    #[error("session host error: {0}")]
    Host(String),
}

impl From<BridgeError> for ChallengeFailure {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::SessionClosed(_) => ChallengeFailure::SessionClosed,
            other => ChallengeFailure::Host(other.to_string()),
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

pub struct ChallengeResolver {
    host: Option<Arc<dyn ChallengeSessionHost>>,
    detector: ChallengeDetector,
    event_bus: EventBus,
    poll_interval: Duration,
    sender: mpsc::UnboundedSender<ChallengeSignal>,
    /// Held for the whole interactive session, so sessions never overlap
    signals: Mutex<mpsc::UnboundedReceiver<ChallengeSignal>>,
}

impl ChallengeResolver {
    pub fn new(
        host: Option<Arc<dyn ChallengeSessionHost>>,
        detector: ChallengeDetector,
        event_bus: EventBus,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            host,
            detector,
            event_bus,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sender,
            signals: Mutex::new(receiver),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn control(&self) -> ChallengeControl {
        ChallengeControl {
            sender: self.sender.clone(),
        }
    }

    pub fn detector(&self) -> &ChallengeDetector {
        &self.detector
    }

    /// Walk the user through the challenge at `url` and return the page
    /// content read back from the session.
    #[instrument(skip(self, cancel))]
    pub async fn resolve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, ChallengeFailure> {
        let Some(host) = self.host.as_ref() else {
            warn!("Challenge detected but no session host is configured");
            self.emit(ChallengeEvent::Failed {
                url: url.to_string(),
                reason: ChallengeFailure::Unavailable.to_string(),
            });
            return Err(ChallengeFailure::Unavailable);
        };

        let mut signals = self.signals.lock().await;
        while signals.try_recv().is_ok() {}

        let handle = match host.open_session(url).await {
            Ok(handle) => handle,
            Err(e) => {
                let failure = ChallengeFailure::from(e);
                self.emit(ChallengeEvent::Failed {
                    url: url.to_string(),
                    reason: failure.to_string(),
                });
                return Err(failure);
            }
        };

        let session = session_label(&handle);
        info!(%session, "Waiting for user to complete verification");
        self.emit(ChallengeEvent::Detected {
            url: url.to_string(),
        });

        let outcome = self
            .await_confirmation(host.as_ref(), &handle, url, &mut signals, cancel)
            .await;

        if let Err(e) = host.close_session(&handle).await {
            warn!(%session, error = %e, "Failed to close verification session");
        }

        match &outcome {
            Ok(_) => {
                info!("Verification completed");
                self.emit(ChallengeEvent::Resolved {
                    url: url.to_string(),
                });
            }
            Err(failure) => {
                warn!(reason = %failure, "Verification not completed");
                self.emit(ChallengeEvent::Failed {
                    url: url.to_string(),
                    reason: failure.to_string(),
                });
            }
        }

        outcome
    }

    async fn await_confirmation(
        &self,
        host: &dyn ChallengeSessionHost,
        handle: &SessionHandle,
        url: &str,
        signals: &mut mpsc::UnboundedReceiver<ChallengeSignal>,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, ChallengeFailure> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_hint: Option<bool> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ChallengeFailure::JobCancelled),
                signal = signals.recv() => match signal {
                    Some(ChallengeSignal::Completed) => {
                        let content = host.extract_content(handle).await?;
                        if !self.detector.is_challenge(&content) {
                            return Ok(content);
                        }
                        debug!("Session still shows a challenge after confirmation");
                        self.emit(ChallengeEvent::StillPresent {
                            url: url.to_string(),
                        });
                    }
                    Some(ChallengeSignal::Cancel) | None => {
                        return Err(ChallengeFailure::UserCancelled)
                    }
                },
                _ = ticker.tick() => match host.poll_title(handle).await {
                    Ok(None) => return Err(ChallengeFailure::SessionClosed),
                    Ok(Some(title)) => {
                        let likely_complete = !self.detector.title_suggests_challenge(&title);
                        if last_hint != Some(likely_complete) {
                            last_hint = Some(likely_complete);
                            self.emit(ChallengeEvent::StatusHint {
                                url: url.to_string(),
                                likely_complete,
                            });
                        }
                    }
                    Err(BridgeError::SessionClosed(_)) => {
                        return Err(ChallengeFailure::SessionClosed)
                    }
                    Err(e) => debug!(error = %e, "Session title poll failed"),
                },
            }
        }
    }

    fn emit(&self, event: ChallengeEvent) {
        // No subscribers is fine.
        let _ = self.event_bus.emit(CoreEvent::Challenge(event));
    }
}
