//! Interactive Challenge Session Host
//!
//! When the remote site interposes an anti-automation check, the engine asks
//! the host to show the page to the user (a browser tab, an embedded webview)
//! and later reads the page back from that session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Opaque handle to an interactive session opened by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host capability for user-visible verification sessions
///
/// # Example
///
/// ```ignore
/// let handle = host.open_session("https://example.com/v/abc").await?;
/// if let Some(title) = host.poll_title(&handle).await? {
///     println!("session title: {title}");
/// }
/// let html = host.extract_content(&handle).await?;
/// host.close_session(&handle).await?;
/// ```
#[async_trait]
pub trait ChallengeSessionHost: Send + Sync {
    /// Open a session showing `url` to the user
    async fn open_session(&self, url: &str) -> Result<SessionHandle>;

    /// Current document title of the session.
    ///
    /// Returns `Ok(None)` once the session has been closed outside the engine's
    /// control (for example the user closed the tab).
    async fn poll_title(&self, handle: &SessionHandle) -> Result<Option<String>>;

    /// Current document markup of the session
    async fn extract_content(&self, handle: &SessionHandle) -> Result<String>;

    /// Close the session. Closing an already-closed session is not an error.
    async fn close_session(&self, handle: &SessionHandle) -> Result<()>;
}
