//! Catalog lookup: turning a playlist/album/track reference into the ordered
//! list of track descriptors to download.

mod spotify;

pub use spotify::{SpotifyCatalog, SpotifyCredentials};

use crate::models::TrackDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unsupported reference: {0}")]
    UnsupportedReference(String),

    #[error("catalog credentials missing: set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET")]
    MissingCredentials,

    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The reference kind does not fit the operation (e.g. tagging from a playlist).
    #[error("expected a {expected} reference, got {actual}")]
    WrongKind {
        expected: ReferenceKind,
        actual: ReferenceKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Playlist,
    Album,
    Track,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::Playlist => "playlist",
            ReferenceKind::Album => "album",
            ReferenceKind::Track => "track",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "playlist" => Some(ReferenceKind::Playlist),
            "album" => Some(ReferenceKind::Album),
            "track" => Some(ReferenceKind::Track),
            _ => None,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://open\.spotify\.com/(?:intl-[A-Za-z-]+/)?(playlist|album|track)/([A-Za-z0-9]+)/?(?:[?#].*)?$")
        .unwrap()
});

static URI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^spotify:(playlist|album|track):([A-Za-z0-9]+)$").unwrap());

/// A catalog object: what kind it is and its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: String,
}

impl Reference {
    pub fn new(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    /// Accepts `https://open.spotify.com/<kind>/<id>[?...]` (optionally with
    /// an `intl-xx/` segment) and `spotify:<kind>:<id>`.
    pub fn parse(input: &str) -> Result<Self, CatalogError> {
        let trimmed = input.trim();
        let caps = URL_PATTERN
            .captures(trimmed)
            .or_else(|| URI_PATTERN.captures(trimmed))
            .ok_or_else(|| CatalogError::UnsupportedReference(input.to_string()))?;

        let kind = ReferenceKind::from_segment(&caps[1])
            .ok_or_else(|| CatalogError::UnsupportedReference(input.to_string()))?;
        Ok(Self::new(kind, &caps[2]))
    }

    /// Canonical share URL.
    pub fn url(&self) -> String {
        format!("https://open.spotify.com/{}/{}", self.kind, self.id)
    }
}

impl FromStr for Reference {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Resolves a reference into track descriptors, in catalog order.
pub trait CatalogResolver: Send + Sync {
    fn resolve(&self, reference: &Reference) -> Result<Vec<TrackDescriptor>, CatalogError>;
}
