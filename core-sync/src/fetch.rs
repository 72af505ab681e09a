//! # Retrying Fetch Layer
//!
//! Every page the engine reads goes through [`FetchLayer::fetch`]: bounded
//! retries for transient failures, then challenge detection with a single
//! re-fetch after the user resolves it.

use crate::challenge::{ChallengeFailure, ChallengeResolver};
use crate::{Result, SyncError};
use bridge_traits::{HttpClient, HttpRequest, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const ACCEPT_MARKUP: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";

/// Retry and timeout settings for page fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) collection-mirror".to_string(),
        }
    }
}

/// A fetched page with its body decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub content: String,
}

impl FetchedPage {
    fn from_response(url: &str, response: &HttpResponse) -> Self {
        Self {
            url: url.to_string(),
            status: response.status,
            content_type: response.content_type().map(str::to_string),
            content: response.text_lossy(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct FetchLayer {
    http: Arc<dyn HttpClient>,
    policy: FetchPolicy,
    resolver: Arc<ChallengeResolver>,
}

impl FetchLayer {
    pub fn new(
        http: Arc<dyn HttpClient>,
        policy: FetchPolicy,
        resolver: Arc<ChallengeResolver>,
    ) -> Self {
        Self {
            http,
            policy,
            resolver,
        }
    }

    pub fn resolver(&self) -> &ChallengeResolver {
        &self.resolver
    }

    /// Fetch `url`, resolving a verification challenge if one is served.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Network`] once all attempts fail transiently
    /// - [`SyncError::ChallengeUnresolved`] if the challenge could not be cleared
    /// - [`SyncError::Cancelled`] if `cancel` fires while waiting
    #[instrument(skip(self, cancel))]
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FetchedPage> {
        let response = self.fetch_with_retry(url, cancel).await?;
        if !self.is_challenge(&response) {
            return Ok(FetchedPage::from_response(url, &response));
        }

        warn!(status = response.status, "Verification challenge served");
        match self.resolver.resolve(url, cancel).await {
            Ok(_) => {}
            Err(ChallengeFailure::JobCancelled) => return Err(SyncError::Cancelled),
            Err(failure) => {
                return Err(SyncError::ChallengeUnresolved {
                    url: url.to_string(),
                    reason: failure.to_string(),
                })
            }
        }

        let response = self.fetch_with_retry(url, cancel).await?;
        if self.is_challenge(&response) {
            return Err(SyncError::ChallengeUnresolved {
                url: url.to_string(),
                reason: "challenge still served after verification".to_string(),
            });
        }

        Ok(FetchedPage::from_response(url, &response))
    }

    /// Challenge pages come back as 2xx, 403 or 503 markup
    fn is_challenge(&self, response: &HttpResponse) -> bool {
        (response.is_success() || response.status == 403 || response.status == 503)
            && response.is_markup()
            && self.resolver.detector().is_challenge(&response.text_lossy())
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let request = HttpRequest::get(url)
                .header("User-Agent", self.policy.user_agent.as_str())
                .header("Accept", ACCEPT_MARKUP)
                .timeout(self.policy.request_timeout);

            match tokio::time::timeout(self.policy.request_timeout, self.http.execute(request))
                .await
            {
                Ok(Ok(response)) => {
                    if self.is_challenge(&response) || !is_retryable_status(response.status) {
                        debug!(attempt, status = response.status, "Fetched");
                        return Ok(response);
                    }
                    last_error = format!("HTTP {}", response.status);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "timed out after {} ms",
                        self.policy.request_timeout.as_millis()
                    )
                }
            }

            if attempt < max_attempts {
                warn!(attempt, max_attempts, url, error = %last_error, "Request failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.retry_delay) => {}
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                }
            }
        }

        Err(SyncError::Network(format!(
            "{} failed after {} attempts: {}",
            url, max_attempts, last_error
        )))
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
