//! # Core Configuration Module
//!
//! Configuration for the collection mirror core.
//!
//! ## Overview
//!
//! [`CoreConfig`] is assembled through [`CoreConfigBuilder`] and holds the host
//! capabilities plus the [`SiteConfig`] describing where the remote
//! collections live. Validation is fail-fast: a missing capability is reported
//! at build time with an actionable message, not on the first sync.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - remote requests (desktop default: reqwest)
//! - `SettingsStore` - preferences and the checkpoint slot (desktop default: SQLite)
//!
//! ## Optional Dependencies
//!
//! - `ChallengeSessionHost` - without it a verification challenge cannot be resolved
//! - `ConfirmationPrompt` - without it destructive list changes are always declined
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! `HttpClient` and `SettingsStore` are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SiteConfig};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/mirror.db")
//!     .site(SiteConfig::new("https://videos.example.com", "alice"))
//!     .build()?;
//! ```
//!
//! Without the feature, a missing capability fails the build step:
//!
//! ```ignore
//! let err = CoreConfig::builder()
//!     .database_path("/data/mirror.db")
//!     .site(SiteConfig::new("https://videos.example.com", "alice"))
//!     .build()
//!     .unwrap_err();
//! assert!(matches!(err, Error::CapabilityMissing { .. }));
//! ```

use crate::error::{Error, Result};
use bridge_traits::{ChallengeSessionHost, ConfirmationPrompt, HttpClient, SettingsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Placeholder substituted with the configured user identity
pub const USER_PLACEHOLDER: &str = "{user}";
/// Placeholder substituted with the 1-based page number
pub const PAGE_PLACEHOLDER: &str = "{page}";
/// Placeholder substituted with a list id
pub const LIST_PLACEHOLDER: &str = "{list}";

/// Core configuration for the collection mirror.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding mirrored records
    pub database_path: PathBuf,

    pub http_client: Arc<dyn HttpClient>,

    /// Preferences and checkpoint storage
    pub settings_store: Arc<dyn SettingsStore>,

    pub challenge_host: Option<Arc<dyn ChallengeSessionHost>>,

    pub confirmation_prompt: Option<Arc<dyn ConfirmationPrompt>>,

    /// Remote site shape
    pub site: SiteConfig,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("http_client", &"HttpClient { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "challenge_host",
                &self
                    .challenge_host
                    .as_ref()
                    .map(|_| "ChallengeSessionHost { ... }"),
            )
            .field(
                "confirmation_prompt",
                &self
                    .confirmation_prompt
                    .as_ref()
                    .map(|_| "ConfirmationPrompt { ... }"),
            )
            .field("site", &self.site)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        self.site.validate()
    }
}

// ============================================================================
// Site configuration
// ============================================================================

/// Markers used to recognise an interactive verification page.
///
/// All matching is case-insensitive. A page is a challenge only if a phrase or
/// form marker matches and none of the normal-content markers do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMarkers {
    /// Verification / incomplete-check wording
    pub phrases: Vec<String>,
    /// Fragments of the challenge form markup
    pub form_markers: Vec<String>,
    /// Fragments only present on real site pages; any match overrides
    pub normal_markers: Vec<String>,
}

impl Default for ChallengeMarkers {
    fn default() -> Self {
        Self {
            phrases: vec![
                "verify you are human".to_string(),
                "checking your browser".to_string(),
                "just a moment".to_string(),
                "verification incomplete".to_string(),
                "complete the security check".to_string(),
            ],
            form_markers: vec![
                "challenge-form".to_string(),
                "cf-challenge".to_string(),
                "captcha".to_string(),
            ],
            normal_markers: vec![
                "id=\"site-header\"".to_string(),
                "class=\"user-profile\"".to_string(),
            ],
        }
    }
}

impl ChallengeMarkers {
    pub fn with_phrases(mut self, phrases: Vec<String>) -> Self {
        self.phrases = phrases;
        self
    }

    pub fn with_form_markers(mut self, markers: Vec<String>) -> Self {
        self.form_markers = markers;
        self
    }

    pub fn with_normal_markers(mut self, markers: Vec<String>) -> Self {
        self.normal_markers = markers;
        self
    }
}

/// Remote site shape: base URL, user and URL templates.
///
/// Templates may be absolute or relative to `base_url` and use the
/// `{user}`, `{page}` and `{list}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    pub base_url: String,
    /// Remote user whose collections are mirrored
    pub user_identity: String,
    /// Profile/summary page holding the authoritative collection counts
    pub profile_url: String,
    pub watched_index_url: String,
    pub want_index_url: String,
    pub actor_favorites_url: String,
    pub owned_lists_url: String,
    pub favorited_lists_url: String,
    pub list_items_url: String,
    pub user_agent: String,
    pub challenge_markers: ChallengeMarkers,
}

impl SiteConfig {
    /// Site config with the conventional URL layout
    pub fn new(base_url: impl Into<String>, user_identity: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_identity: user_identity.into(),
            profile_url: "/users/{user}".to_string(),
            watched_index_url: "/users/{user}/watched?page={page}".to_string(),
            want_index_url: "/users/{user}/want?page={page}".to_string(),
            actor_favorites_url: "/users/{user}/actors?page={page}".to_string(),
            owned_lists_url: "/users/{user}/lists?page={page}".to_string(),
            favorited_lists_url: "/users/{user}/lists/favorited?page={page}".to_string(),
            list_items_url: "/lists/{list}?page={page}".to_string(),
            user_agent: format!("collection-mirror/{}", env!("CARGO_PKG_VERSION")),
            challenge_markers: ChallengeMarkers::default(),
        }
    }

    pub fn with_profile_url(mut self, template: impl Into<String>) -> Self {
        self.profile_url = template.into();
        self
    }

    pub fn with_watched_index_url(mut self, template: impl Into<String>) -> Self {
        self.watched_index_url = template.into();
        self
    }

    pub fn with_want_index_url(mut self, template: impl Into<String>) -> Self {
        self.want_index_url = template.into();
        self
    }

    pub fn with_actor_favorites_url(mut self, template: impl Into<String>) -> Self {
        self.actor_favorites_url = template.into();
        self
    }

    pub fn with_owned_lists_url(mut self, template: impl Into<String>) -> Self {
        self.owned_lists_url = template.into();
        self
    }

    pub fn with_favorited_lists_url(mut self, template: impl Into<String>) -> Self {
        self.favorited_lists_url = template.into();
        self
    }

    pub fn with_list_items_url(mut self, template: impl Into<String>) -> Self {
        self.list_items_url = template.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_challenge_markers(mut self, markers: ChallengeMarkers) -> Self {
        self.challenge_markers = markers;
        self
    }

    /// Resolve a possibly relative URL against `base_url`
    pub fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    /// Expand a template with the configured user, an optional page and list
    pub fn render(&self, template: &str, page: Option<u32>, list_id: Option<&str>) -> String {
        let mut url = template.replace(USER_PLACEHOLDER, &self.user_identity);
        if let Some(page) = page {
            url = url.replace(PAGE_PLACEHOLDER, &page.to_string());
        }
        if let Some(list_id) = list_id {
            url = url.replace(LIST_PLACEHOLDER, list_id);
        }
        self.absolute_url(&url)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidSite {
                field: "base_url".to_string(),
                message: format!("must be http(s), got '{}'", self.base_url),
            });
        }

        if self.user_identity.trim().is_empty() {
            return Err(Error::InvalidSite {
                field: "user_identity".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        let paged = [
            ("watched_index_url", &self.watched_index_url),
            ("want_index_url", &self.want_index_url),
            ("actor_favorites_url", &self.actor_favorites_url),
            ("owned_lists_url", &self.owned_lists_url),
            ("favorited_lists_url", &self.favorited_lists_url),
            ("list_items_url", &self.list_items_url),
        ];
        for (name, template) in paged {
            if !template.contains(PAGE_PLACEHOLDER) {
                return Err(Error::InvalidSite {
                    field: name.to_string(),
                    message: format!("must contain the {} placeholder", PAGE_PLACEHOLDER),
                });
            }
        }

        if !self.list_items_url.contains(LIST_PLACEHOLDER) {
            return Err(Error::InvalidSite {
                field: "list_items_url".to_string(),
                message: format!("must contain the {} placeholder", LIST_PLACEHOLDER),
            });
        }

        if self.challenge_markers.phrases.is_empty()
            && self.challenge_markers.form_markers.is_empty()
        {
            return Err(Error::InvalidSite {
                field: "challenge_markers".to_string(),
                message: "need at least one phrase or form marker".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Capability defaults
// ============================================================================

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the remote site. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Other hosts: inject a client built on the platform networking stack."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required for user preferences and sync checkpoints. \
                 Desktop: enable the 'desktop-shims' feature to use the default SqliteSettingsStore. \
                 Other hosts: inject platform-native settings storage."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to initialize default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let candidate = database_path
        .parent()
        .map(|parent| parent.join("settings.db"))
        .unwrap_or_else(|| PathBuf::from("settings.db"));

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default settings store: {}",
                    e
                ))
            })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on is not allowed on a runtime worker, so initialise on a helper thread
    let store = match Handle::try_current() {
        Ok(_) => {
            let path = candidate.clone();
            thread::spawn(move || init_store(path))
                .join()
                .map_err(|_| {
                    Error::Internal(
                        "Worker thread panicked while creating default SettingsStore".to_string(),
                    )
                })??
        }
        Err(_) => init_store(candidate)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    challenge_host: Option<Arc<dyn ChallengeSessionHost>>,
    confirmation_prompt: Option<Arc<dyn ConfirmationPrompt>>,
    site: Option<SiteConfig>,
}

impl CoreConfigBuilder {
    /// Sets the path of the SQLite database file.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn challenge_host(mut self, host: Arc<dyn ChallengeSessionHost>) -> Self {
        self.challenge_host = Some(host);
        self
    }

    pub fn confirmation_prompt(mut self, prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        self.confirmation_prompt = Some(prompt);
        self
    }

    pub fn site(mut self, site: SiteConfig) -> Self {
        self.site = Some(site);
        self
    }

    /// Builds the final configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the database path or site is missing or invalid
    /// - [`Error::CapabilityMissing`] if a required bridge is absent and no
    ///   desktop default is available
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let site = self.site.ok_or_else(|| {
            Error::Config("Site configuration is required. Use .site() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&database_path)?,
        };

        let config = CoreConfig {
            database_path,
            http_client,
            settings_store,
            challenge_host: self.challenge_host,
            confirmation_prompt: self.confirmation_prompt,
            site,
        };

        config.validate()?;

        Ok(config)
    }
}
