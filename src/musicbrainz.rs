//! MusicBrainz artist search.
//!
//! The service is a black box with one contract: search by name and get back
//! ranked candidates. [`ArtistSearch`] is that seam; [`MusicBrainzService`]
//! is the HTTP implementation. Pacing and retries live in
//! [`crate::client::MetadataClient`], not here.

use serde::Deserialize;
use thiserror::Error;

use crate::config::MusicBrainzSettings;
use crate::models::ArtistRecord;

/// One failed call to the service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport(_) | ServiceError::RateLimited | ServiceError::Malformed(_) => {
                true
            }
            ServiceError::Status(code) => *code == 408 || *code >= 500,
        }
    }
}

impl From<ureq::Error> for ServiceError {
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::Status(429, _) => ServiceError::RateLimited,
            ureq::Error::Status(code, _) => ServiceError::Status(code),
            ureq::Error::Transport(transport) => ServiceError::Transport(transport.to_string()),
        }
    }
}

/// Name search against an artist catalogue.
pub trait ArtistSearch: Send + Sync {
    /// Candidates in service order. An empty list is a valid "no match".
    fn search_artist(&self, name: &str) -> Result<Vec<ArtistRecord>, ServiceError>;
}

// ============================================================================
// Response Shape
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    artists: Vec<SearchArtist>,
}

#[derive(Debug, Deserialize)]
struct SearchArtist {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "sort-name")]
    sort_name: Option<String>,
    #[serde(default)]
    score: u8,
}

fn into_records(response: SearchResponse) -> Vec<ArtistRecord> {
    response
        .artists
        .into_iter()
        .filter_map(|artist| {
            let name = artist.name.filter(|n| !n.trim().is_empty())?;
            Some(ArtistRecord {
                name,
                external_id: artist.id,
                sort_name: artist.sort_name,
                relevance: artist.score,
            })
        })
        .collect()
}

/// Parse a `/ws/2/artist` search body.
pub fn parse_search_response(body: &str) -> Result<Vec<ArtistRecord>, ServiceError> {
    serde_json::from_str::<SearchResponse>(body)
        .map(into_records)
        .map_err(|e| ServiceError::Malformed(e.to_string()))
}

// ============================================================================
// HTTP Implementation
// ============================================================================

pub struct MusicBrainzService {
    agent: ureq::Agent,
    search_url: String,
    limit: u32,
}

impl MusicBrainzService {
    pub fn new(settings: &MusicBrainzSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.timeout())
            .timeout_read(settings.timeout())
            .timeout_write(settings.timeout())
            .user_agent(&settings.user_agent())
            .build();
        Self {
            agent,
            search_url: format!("{}/artist", settings.base_url.trim_end_matches('/')),
            limit: settings.search_limit,
        }
    }
}

impl ArtistSearch for MusicBrainzService {
    fn search_artist(&self, name: &str) -> Result<Vec<ArtistRecord>, ServiceError> {
        let response = self
            .agent
            .get(&self.search_url)
            .set("Accept", "application/json")
            .query("query", name)
            .query("fmt", "json")
            .query("limit", &self.limit.to_string())
            .call()?;
        let body = response
            .into_string()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        parse_search_response(&body)
    }
}
