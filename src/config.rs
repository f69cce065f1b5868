//! Run configuration.
//!
//! Values come from, in order of precedence: command-line flags (with
//! `MUSICBRAINZ_USER_AGENT` / `MUSICBRAINZ_CONTACT` from the environment),
//! an optional TOML file passed with `--config`, then the defaults below.
//!
//! ```toml
//! [musicbrainz]
//! contact = "me@example.org"
//! requests_per_second = 2
//!
//! [thresholds]
//! low = 0.80
//! high = 0.85
//! ```

use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scoring::Thresholds;

/// Ceiling on the request rate even when a contact is configured.
pub const MAX_IDENTIFIED_RATE: u32 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub musicbrainz: MusicBrainzSettings,
    pub retry: RetrySettings,
    pub thresholds: Thresholds,
    pub cache: CacheSettings,
    pub tagging: TaggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub episodes: PathBuf,
    pub cache: PathBuf,
    /// beets library database; defaults to the platform config directory.
    pub library: Option<PathBuf>,
    pub preview: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            episodes: PathBuf::from("episodes.json"),
            cache: PathBuf::from("artist_cache.json"),
            library: None,
            preview: PathBuf::from("cww_tag_preview.json"),
        }
    }
}

impl PathSettings {
    pub fn library_path(&self) -> Option<PathBuf> {
        self.library
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join("beets").join("library.db")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicBrainzSettings {
    pub base_url: String,
    /// Full User-Agent override.
    pub user_agent: Option<String>,
    /// Contact URL or e-mail sent in the User-Agent.
    pub contact: Option<String>,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
    pub search_limit: u32,
}

impl Default for MusicBrainzSettings {
    fn default() -> Self {
        Self {
            base_url: "https://musicbrainz.org/ws/2".to_string(),
            user_agent: None,
            contact: None,
            requests_per_second: 1,
            timeout_secs: 15,
            search_limit: 5,
        }
    }
}

impl MusicBrainzSettings {
    fn contact(&self) -> Option<&str> {
        self.contact.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    fn user_agent_override(&self) -> Option<&str> {
        self.user_agent.as_deref().map(str::trim).filter(|ua| !ua.is_empty())
    }

    /// A contact, or a full User-Agent (which carries its own contact),
    /// identifies the client to MusicBrainz.
    pub fn is_identified(&self) -> bool {
        self.contact().is_some() || self.user_agent_override().is_some()
    }

    /// Requests per second actually used. Anonymous clients get 1/s; an
    /// identified client gets the configured rate up to [`MAX_IDENTIFIED_RATE`].
    pub fn effective_rate(&self) -> NonZeroU32 {
        let rate = if self.is_identified() {
            self.requests_per_second.clamp(1, MAX_IDENTIFIED_RATE)
        } else {
            1
        };
        NonZeroU32::new(rate).unwrap_or(NonZeroU32::MIN)
    }

    pub fn user_agent(&self) -> String {
        if let Some(ua) = self.user_agent_override() {
            return ua.to_string();
        }
        let product = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        match self.contact() {
            Some(contact) => format!("{} ( {} )", product, contact),
            None => product.to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub checkpoint_every: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { checkpoint_every: 25 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingSettings {
    pub tag: String,
}

impl Default for TaggingSettings {
    fn default() -> Self {
        Self { tag: "CWW".to_string() }
    }
}

impl Settings {
    /// Read settings from a TOML file, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let settings: Settings = toml::from_str(&text).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.thresholds.is_valid() {
            return Err(Error::InvalidConfig(format!(
                "thresholds must satisfy 0 <= low <= high <= 1 (got low={}, high={})",
                self.thresholds.low, self.thresholds.high
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if self.cache.checkpoint_every == 0 {
            return Err(Error::InvalidConfig("cache.checkpoint_every must be at least 1".into()));
        }
        if self.musicbrainz.search_limit == 0 {
            return Err(Error::InvalidConfig("musicbrainz.search_limit must be at least 1".into()));
        }
        if self.tagging.tag.trim().is_empty() || self.tagging.tag.contains(';') {
            return Err(Error::InvalidConfig(format!(
                "tagging.tag must be non-empty and contain no ';' (got {:?})",
                self.tagging.tag
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Shared CLI arguments
// ============================================================================

/// Flags common to every binary that talks to the metadata service.
#[derive(Args, Debug, Clone, Default)]
pub struct ServiceArgs {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Full User-Agent sent to MusicBrainz; should carry a contact and
    /// counts as identified (allows up to 5 requests/s)
    #[arg(long, env = "MUSICBRAINZ_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Contact URL or e-mail for the User-Agent (allows up to 5 requests/s)
    #[arg(long, env = "MUSICBRAINZ_CONTACT")]
    pub contact: Option<String>,

    /// Requests per second (ignored unless identified)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Artist cache file
    #[arg(long)]
    pub cache: Option<PathBuf>,
}

impl ServiceArgs {
    /// Load the config file and apply flag overrides on top.
    pub fn resolve(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(ua) = &self.user_agent {
            settings.musicbrainz.user_agent = Some(ua.clone());
        }
        if let Some(contact) = &self.contact {
            settings.musicbrainz.contact = Some(contact.clone());
        }
        if let Some(rate) = self.rate {
            settings.musicbrainz.requests_per_second = rate;
        }
        if let Some(cache) = &self.cache {
            settings.paths.cache = cache.clone();
        }
        settings.validate()?;
        Ok(settings)
    }
}
