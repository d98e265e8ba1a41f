use std::{
    env,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use rand::{Rng, seq::IndexedRandom};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::{SongQuery, SongSource, SongSourceError};
use crate::state::game::Song;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SEARCH_URL: &str = "https://api.spotify.com/v1/search";
/// Tracks fetched per search page.
const SEARCH_PAGE_SIZE: u32 = 50;
/// Upper bound for the random page offset that varies results.
const MAX_RANDOM_OFFSET: u32 = 50;
/// Safety margin subtracted from the token lifetime before refreshing.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Environment variables carrying the client-credentials pair.
const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

/// Song source backed by the Spotify search API via the client-credentials
/// flow. Cheap to clone; the token cache is shared.
#[derive(Clone)]
pub struct SpotifySource {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl SpotifySource {
    /// Build a source from an explicit credentials pair.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                http: Client::new(),
                client_id,
                client_secret,
                token: Mutex::new(None),
            }),
        }
    }

    /// Build a source from `SPOTIFY_CLIENT_ID` / `SPOTIFY_CLIENT_SECRET`,
    /// when both are present.
    pub fn from_env() -> Option<Self> {
        let client_id = env::var(CLIENT_ID_ENV).ok().filter(|v| !v.is_empty())?;
        let client_secret = env::var(CLIENT_SECRET_ENV).ok().filter(|v| !v.is_empty())?;
        Some(Self::new(client_id, client_secret))
    }

    async fn lookup(&self, query: SongQuery) -> Result<Song, SongSourceError> {
        let token = self.token().await?;

        let primary = build_query(&query);
        let tracks = self.search(&token, &primary).await?;
        if let Some(song) = select_track(tracks, &query.exclude_years) {
            return Ok(song);
        }

        // Same fallback as the original lookup: one simpler query before
        // giving up, so narrow filters still produce a result.
        let fallback = random_letter().to_string();
        debug!(%primary, %fallback, "no candidate survived; retrying with fallback query");
        let tracks = self.search(&token, &fallback).await?;
        select_track(tracks, &query.exclude_years).ok_or(SongSourceError::NotFound)
    }

    /// Cached client-credentials token, refreshed shortly before expiry.
    async fn token(&self) -> Result<String, SongSourceError> {
        let mut guard = self.inner.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let response = self
            .inner
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.inner.client_id, Some(&self.inner.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| SongSourceError::upstream("requesting access token".into(), err))?;

        if !response.status().is_success() {
            return Err(SongSourceError::upstream_message(format!(
                "token endpoint answered {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| SongSourceError::upstream("decoding token response".into(), err))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        guard.replace(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn search(&self, token: &str, query: &str) -> Result<Vec<TrackItem>, SongSourceError> {
        let offset = rand::rng().random_range(0..MAX_RANDOM_OFFSET);
        let response = self
            .inner
            .http
            .get(SEARCH_URL)
            .bearer_auth(token)
            .query(&[
                ("q", query),
                ("type", "track"),
                ("limit", &SEARCH_PAGE_SIZE.to_string()),
                ("offset", &offset.to_string()),
            ])
            .send()
            .await
            .map_err(|err| SongSourceError::upstream("searching tracks".into(), err))?;

        if !response.status().is_success() {
            return Err(SongSourceError::upstream_message(format!(
                "search endpoint answered {}",
                response.status()
            )));
        }

        let results: SearchResponse = response
            .json()
            .await
            .map_err(|err| SongSourceError::upstream("decoding search response".into(), err))?;
        Ok(results.tracks.map(|page| page.items).unwrap_or_default())
    }
}

impl SongSource for SpotifySource {
    fn find_song(&self, query: SongQuery) -> BoxFuture<'static, Result<Song, SongSourceError>> {
        let source = self.clone();
        Box::pin(async move { source.lookup(query).await })
    }
}

/// Build a Spotify search query from the filters: a year range for the
/// decade, one randomly chosen genre, and a random letter when both are
/// absent (an empty query is rejected upstream).
fn build_query(query: &SongQuery) -> String {
    let mut rng = rand::rng();
    let mut parts = Vec::new();

    if let Some(start) = query.decade.as_ref().and_then(|d| d.parse::<i32>().ok()) {
        parts.push(format!("year:{start}-{}", start + 9));
    }
    if let Some(genre) = query.genres.choose(&mut rng) {
        parts.push(format!("genre:{genre}"));
    }
    if parts.is_empty() {
        parts.push(random_letter().to_string());
    }

    parts.join(" ")
}

fn random_letter() -> char {
    let mut rng = rand::rng();
    (b'a' + rng.random_range(0..26)) as char
}

/// Pick one candidate, preferring tracks outside the excluded years that
/// carry a preview URL, then relaxing the preview requirement.
fn select_track(tracks: Vec<TrackItem>, exclude_years: &[i32]) -> Option<Song> {
    let mut rng = rand::rng();

    let candidates: Vec<&TrackItem> = tracks
        .iter()
        .filter(|track| {
            track
                .release_year()
                .is_some_and(|year| !exclude_years.contains(&year))
        })
        .collect();

    let with_preview: Vec<&TrackItem> = candidates
        .iter()
        .copied()
        .filter(|track| track.preview_url.is_some())
        .collect();

    let picked = with_preview
        .choose(&mut rng)
        .copied()
        .or_else(|| candidates.choose(&mut rng).copied())?;

    picked.to_song()
}

#[derive(Debug, Clone, Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Debug, Clone, Deserialize)]
struct TrackPage {
    items: Vec<TrackItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct TrackItem {
    name: String,
    uri: String,
    preview_url: Option<String>,
    artists: Vec<ArtistItem>,
    album: AlbumItem,
}

impl TrackItem {
    /// Release year parsed from the album date, which may be `YYYY`,
    /// `YYYY-MM` or `YYYY-MM-DD`.
    fn release_year(&self) -> Option<i32> {
        let year = self.album.release_date.get(..4)?;
        year.parse().ok()
    }

    fn to_song(&self) -> Option<Song> {
        Some(Song {
            name: self.name.clone(),
            artist: self.artists.first()?.name.clone(),
            year: self.release_year()?,
            uri: self.uri.clone(),
            preview_url: self.preview_url.clone(),
            album_image: self.album.images.first().map(|image| image.url.clone()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ArtistItem {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AlbumItem {
    release_date: String,
    #[serde(default)]
    images: Vec<ImageItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageItem {
    url: String,
}
