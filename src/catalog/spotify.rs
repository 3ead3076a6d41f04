//! Spotify Web API resolver (client-credentials flow, blocking HTTP).

use super::{CatalogError, CatalogResolver, Reference, ReferenceKind};
use crate::models::TrackDescriptor;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const PLAYLIST_PAGE_SIZE: usize = 100;

const UNKNOWN_TRACK: &str = "Unknown Track";
const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";

// ============================================================================
// API Models
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiAlbumRef {
    name: Option<String>,
    release_date: Option<String>,
}

/// Full or simplified track object. Album tracks come without `album`.
#[derive(Debug, Deserialize)]
struct ApiTrack {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    album: Option<ApiAlbumRef>,
    track_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    name: Option<String>,
    release_date: Option<String>,
    tracks: Page<ApiTrack>,
}

// ============================================================================
// Mapping
// ============================================================================

/// Artist names joined with ", ".
fn artists_display(artists: &[ApiArtist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_deref().unwrap_or(UNKNOWN_ARTIST))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Year part of a `YYYY[-MM[-DD]]` release date.
fn release_year(date: Option<&str>) -> Option<String> {
    date.and_then(|d| d.split('-').next())
        .filter(|year| !year.is_empty())
        .map(str::to_string)
}

/// Descriptor for a track. `album` overrides the track's own album (album
/// lookups return simplified tracks).
fn to_descriptor(track: ApiTrack, album: Option<(&str, Option<&str>)>) -> TrackDescriptor {
    let own_album = track.album.unwrap_or_default();
    let (album_name, year) = match album {
        Some((name, date)) => (name.to_string(), release_year(date)),
        None => (
            own_album.name.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
            release_year(own_album.release_date.as_deref()),
        ),
    };

    TrackDescriptor {
        title: track.name.unwrap_or_else(|| UNKNOWN_TRACK.to_string()),
        artists: artists_display(&track.artists),
        album: album_name,
        track_number: track.track_number,
        year,
    }
}

/// Descriptors for one playlist page; null tracks (removed or local files)
/// are skipped.
fn playlist_page_tracks(page: Page<PlaylistItem>) -> Vec<TrackDescriptor> {
    page.items
        .into_iter()
        .filter_map(|item| match item.track {
            Some(track) => Some(to_descriptor(track, None)),
            None => {
                tracing::warn!("Track is None, skipping...");
                None
            }
        })
        .collect()
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl SpotifyCredentials {
    /// Both values must be present and non-blank.
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> Result<Self, CatalogError> {
        match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => Ok(Self {
                client_id: id.trim().to_string(),
                client_secret: secret.trim().to_string(),
            }),
            _ => Err(CatalogError::MissingCredentials),
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifyCatalog {
    client: Client,
    credentials: SpotifyCredentials,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyCatalog {
    pub fn new(credentials: SpotifyCredentials) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(concat!("spotify-dl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            credentials,
            token: Mutex::new(None),
        })
    }

    /// Bearer token, refreshed a minute before it expires.
    fn access_token(&self) -> Result<String, CatalogError> {
        let mut cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()?;
        let token: TokenResponse = Self::parse_response(response)?;

        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn parse_response<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T, CatalogError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json()?)
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).bearer_auth(self.access_token()?).send()?;
        Self::parse_response(response)
    }

    fn playlist_tracks(&self, id: &str) -> Result<Vec<TrackDescriptor>, CatalogError> {
        let playlist: ApiPlaylist = self.get(&format!("{API_BASE}/playlists/{id}?fields=name"))?;
        tracing::info!(
            "You're downloading from: {}",
            playlist.name.as_deref().unwrap_or("Unknown Playlist")
        );

        let mut tracks = Vec::new();
        let mut offset = 0;
        loop {
            let page: Page<PlaylistItem> = self.get(&format!(
                "{API_BASE}/playlists/{id}/tracks?offset={offset}&limit={PLAYLIST_PAGE_SIZE}"
            ))?;
            let fetched = page.items.len();
            tracks.extend(playlist_page_tracks(page));
            if fetched < PLAYLIST_PAGE_SIZE {
                break;
            }
            offset += PLAYLIST_PAGE_SIZE;
        }
        Ok(tracks)
    }

    fn album_tracks(&self, id: &str) -> Result<Vec<TrackDescriptor>, CatalogError> {
        let album: ApiAlbum = self.get(&format!("{API_BASE}/albums/{id}"))?;
        let name = album.name.unwrap_or_else(|| UNKNOWN_ALBUM.to_string());
        let release_date = album.release_date;
        tracing::info!("You're downloading from Album: {}", name);

        let mut tracks = Vec::new();
        let mut page = album.tracks;
        loop {
            let next = page.next.take();
            tracks.extend(
                page.items
                    .into_iter()
                    .map(|track| to_descriptor(track, Some((name.as_str(), release_date.as_deref())))),
            );
            match next {
                Some(url) => page = self.get(&url)?,
                None => break,
            }
        }
        Ok(tracks)
    }

    fn single_track(&self, id: &str) -> Result<Vec<TrackDescriptor>, CatalogError> {
        let track: ApiTrack = self.get(&format!("{API_BASE}/tracks/{id}"))?;
        let descriptor = to_descriptor(track, None);
        tracing::info!("You're downloading track: {}", descriptor.title);
        Ok(vec![descriptor])
    }
}

impl CatalogResolver for SpotifyCatalog {
    fn resolve(&self, reference: &Reference) -> Result<Vec<TrackDescriptor>, CatalogError> {
        match reference.kind {
            ReferenceKind::Playlist => self.playlist_tracks(&reference.id),
            ReferenceKind::Album => self.album_tracks(&reference.id),
            ReferenceKind::Track => self.single_track(&reference.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_page_mapping() {
        let json = r#"{
            "items": [
                {"track": {
                    "name": "Song",
                    "artists": [{"name": "A"}, {"name": "B"}],
                    "album": {"name": "Record", "release_date": "2019-05-17"},
                    "track_number": 3
                }},
                {"track": null},
                {"track": {"artists": [{}], "album": {}}}
            ],
            "next": null
        }"#;
        let page: Page<PlaylistItem> = serde_json::from_str(json).unwrap();
        let tracks = playlist_page_tracks(page);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "Song");
        assert_eq!(tracks[0].artists, "A, B");
        assert_eq!(tracks[0].album, "Record");
        assert_eq!(tracks[0].track_number, Some(3));
        assert_eq!(tracks[0].year.as_deref(), Some("2019"));

        assert_eq!(tracks[1].title, "Unknown Track");
        assert_eq!(tracks[1].artists, "Unknown Artist");
        assert_eq!(tracks[1].album, "Unknown Album");
        assert_eq!(tracks[1].year, None);
    }

    #[test]
    fn test_album_tracks_take_album_name_and_year() {
        let json = r#"{
            "name": "Discovery",
            "release_date": "2001",
            "tracks": {
                "items": [{"name": "One More Time", "artists": [{"name": "Daft Punk"}], "track_number": 1}],
                "next": "https://api.spotify.com/v1/albums/x/tracks?offset=50"
            }
        }"#;
        let album: ApiAlbum = serde_json::from_str(json).unwrap();
        assert!(album.tracks.next.is_some());

        let name = album.name.unwrap();
        let track = album.tracks.items.into_iter().next().unwrap();
        let descriptor = to_descriptor(track, Some((name.as_str(), album.release_date.as_deref())));
        assert_eq!(descriptor.album, "Discovery");
        assert_eq!(descriptor.year.as_deref(), Some("2001"));
        assert_eq!(descriptor.track_number, Some(1));
    }

    #[test]
    fn test_release_year() {
        assert_eq!(release_year(Some("1999-12-31")).as_deref(), Some("1999"));
        assert_eq!(release_year(Some("1999")).as_deref(), Some("1999"));
        assert_eq!(release_year(Some("")), None);
        assert_eq!(release_year(None), None);
    }

    #[test]
    fn test_credentials_require_both_values() {
        assert!(SpotifyCredentials::new(Some("id".into()), Some("secret".into())).is_ok());
        assert!(matches!(
            SpotifyCredentials::new(Some("id".into()), None),
            Err(CatalogError::MissingCredentials)
        ));
        assert!(matches!(
            SpotifyCredentials::new(Some(" ".into()), Some("secret".into())),
            Err(CatalogError::MissingCredentials)
        ));
    }
}
