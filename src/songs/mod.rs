//! External song lookup boundary.
//!
//! The game core treats the lookup as a black box: given filters and a list
//! of years to exclude, it returns one song or a recoverable error. The
//! caller supplies the exclusions (the current team's timeline years), so
//! the source never needs session awareness.

mod spotify;

pub use spotify::SpotifySource;

use std::error::Error;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::state::game::Song;

/// Filters forwarded to a song lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongQuery {
    /// Decade tag such as `"1990"`, or `None` for any era.
    pub decade: Option<String>,
    /// Candidate genre tags; the source may pick one.
    pub genres: Vec<String>,
    /// Release years to avoid, typically the guessing team's timeline.
    pub exclude_years: Vec<i32>,
}

/// Errors surfaced by a song source. All are recoverable: the host UI
/// offers a manual retry by fetching again.
#[derive(Debug, Error)]
pub enum SongSourceError {
    /// No track matched the filters, even after relaxing them.
    #[error("no matching song found")]
    NotFound,
    /// The upstream service failed or answered with an unusable payload.
    #[error("song lookup failed: {message}")]
    Upstream {
        /// Human-readable description of the failed step.
        message: String,
        /// Underlying transport or decoding failure, when there is one.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
}

impl SongSourceError {
    /// Construct an upstream error from any backend failure.
    pub fn upstream(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        SongSourceError::Upstream {
            message,
            source: Some(Box::new(source)),
        }
    }

    /// Construct an upstream error with no underlying cause.
    pub fn upstream_message(message: String) -> Self {
        SongSourceError::Upstream {
            message,
            source: None,
        }
    }
}

/// Black-box lookup returning one song matching the filters.
pub trait SongSource: Send + Sync {
    fn find_song(&self, query: SongQuery) -> BoxFuture<'static, Result<Song, SongSourceError>>;
}
