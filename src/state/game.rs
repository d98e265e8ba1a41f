use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alphabet used for session codes. Excludes `I`, `O`, `0` and `1` so codes
/// stay unambiguous when read aloud or typed from a QR overlay.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Length of a session code.
pub const CODE_LENGTH: usize = 6;
/// Decades a start card year can be drawn from when no filter is set.
pub const SUPPORTED_DECADES: [i32; 7] = [1960, 1970, 1980, 1990, 2000, 2010, 2020];

/// High-level status of a session. Only moves forward: lobby, then playing,
/// then finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Teams can still join; no song is in play.
    Lobby,
    /// Turns are being played.
    Playing,
    /// Final scoreboard; no further transitions except a fresh game.
    Finished,
}

/// Decade and genre restrictions applied to song lookups. Empty sets mean
/// "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicFilter {
    /// Decade tags such as `"1980"`.
    pub decades: Vec<String>,
    /// Genre tags such as `"pop"`.
    pub genres: Vec<String>,
}

/// Song metadata as returned by the external song source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    /// Track title.
    pub name: String,
    /// Primary artist name.
    pub artist: String,
    /// Release year the teams are guessing.
    pub year: i32,
    /// Spotify track reference.
    pub uri: String,
    /// Short audio preview, when the source has one.
    pub preview_url: Option<String>,
    /// Album artwork URL, when the source has one.
    pub album_image: Option<String>,
}

/// One entry on a team's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Stable identifier, referenced by guess messages.
    pub id: Uuid,
    /// Track title shown once revealed.
    pub song_name: String,
    /// Artist shown once revealed.
    pub artist_name: String,
    /// Year this card sits at on the timeline.
    pub release_year: i32,
    /// Spotify reference; absent on start cards.
    pub spotify_uri: Option<String>,
    /// Whether this is the team's seeded start card.
    pub is_start_card: bool,
    /// Locked cards are permanently scored; unlocked ones are still at risk
    /// of forfeiture if the turn ends in a wrong guess.
    pub is_locked: bool,
}

impl Card {
    /// Build the immutable start card every team is seeded with at join time.
    pub fn start_card(year: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            song_name: "Start card".to_string(),
            artist_name: String::new(),
            release_year: year,
            spotify_uri: None,
            is_start_card: true,
            is_locked: true,
        }
    }

    /// Build an unlocked card from the song of the round just guessed.
    pub fn from_song(song: &Song) -> Self {
        Self {
            id: Uuid::new_v4(),
            song_name: song.name.clone(),
            artist_name: song.artist.clone(),
            release_year: song.year,
            spotify_uri: Some(song.uri.clone()),
            is_start_card: false,
            is_locked: false,
        }
    }
}

/// A participating team and its timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Host-generated identifier; never chosen by the client.
    pub id: Uuid,
    /// Display name requested at join time.
    pub name: String,
    /// Palette color, `#RRGGBB`.
    pub color: String,
    /// Timeline cards in insertion order. Display order is by
    /// [`Card::release_year`], which is a presentation concern.
    pub cards: Vec<Card>,
}

impl Team {
    /// Number of scored cards, excluding the seeded start card.
    pub fn score(&self) -> usize {
        self.cards.iter().filter(|card| !card.is_start_card).count()
    }

    /// Number of cards still at risk this turn.
    pub fn unlocked_count(&self) -> usize {
        self.cards.iter().filter(|card| !card.is_locked).count()
    }

    /// Years already present on this team's timeline, used to exclude
    /// repeats from song lookups.
    pub fn timeline_years(&self) -> Vec<i32> {
        self.cards.iter().map(|card| card.release_year).collect()
    }
}

/// The guess currently in progress for one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    /// Round identifier.
    pub id: Uuid,
    /// Team whose turn this round belongs to.
    pub team_id: Uuid,
    /// The song being placed.
    pub song: Song,
    /// Whether the song's identity has been revealed. Informational only.
    pub is_revealed: bool,
    /// Correct guesses in the current uninterrupted streak.
    pub consecutive_correct: u32,
}

/// Authoritative session state. Owned exclusively by the host session
/// controller; every other device holds read-only copies replaced wholesale
/// on each broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Six-character session code.
    pub code: String,
    /// Lobby / playing / finished.
    pub status: GameStatus,
    /// Restrictions applied to song lookups.
    pub music_filter: MusicFilter,
    /// Teams keyed by id; insertion order is turn order.
    pub teams: IndexMap<Uuid, Team>,
    /// Team whose turn it is. `None` only while in the lobby.
    pub current_team_id: Option<Uuid>,
    /// Active round, if a song is in play.
    pub current_round: Option<Round>,
}

impl GameState {
    /// Fresh lobby state with a newly generated code.
    pub fn new(music_filter: MusicFilter) -> Self {
        Self {
            code: generate_code(),
            status: GameStatus::Lobby,
            music_filter,
            teams: IndexMap::new(),
            current_team_id: None,
            current_round: None,
        }
    }

    /// The team whose turn it is, when one is set.
    pub fn current_team(&self) -> Option<&Team> {
        self.current_team_id.and_then(|id| self.teams.get(&id))
    }

    /// Colors currently assigned to teams, in roster order.
    pub fn used_colors(&self) -> Vec<String> {
        self.teams.values().map(|team| team.color.clone()).collect()
    }
}

/// Generate a fresh session code. Collisions across concurrent sessions are
/// tolerated, not detected.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let index = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[index] as char
        })
        .collect()
}

/// Upper-case a user-typed session code; input is case-insensitive.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Whether a normalized code has the expected shape.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Build the join URL encoded into QR codes:
/// `<origin>/<base-path>/join?code=<CODE>`.
pub fn join_url(origin: &str, base_path: &str, code: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let base = base_path.trim_matches('/');
    if base.is_empty() {
        format!("{origin}/join?code={code}")
    } else {
        format!("{origin}/{base}/join?code={code}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_the_unambiguous_alphabet() {
        for _ in 0..64 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(is_valid_code(&code), "unexpected code `{code}`");
            for forbidden in ['I', 'O', '0', '1'] {
                assert!(!code.contains(forbidden));
            }
        }
    }

    #[test]
    fn codes_normalize_case_insensitively() {
        assert_eq!(normalize_code(" abc234\n"), "ABC234");
        assert!(is_valid_code(&normalize_code("abcdef")));
        assert!(!is_valid_code("ABC01"));
        assert!(!is_valid_code("ABCDE"));
    }

    #[test]
    fn join_url_encodes_the_code() {
        assert_eq!(
            join_url("https://example.test/", "play", "ABC234"),
            "https://example.test/play/join?code=ABC234"
        );
        assert_eq!(
            join_url("https://example.test", "", "ABC234"),
            "https://example.test/join?code=ABC234"
        );
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut state = GameState::new(MusicFilter::default());
        let team = Team {
            id: Uuid::new_v4(),
            name: "Reds".to_string(),
            color: "#EF4444".to_string(),
            cards: vec![Card::start_card(1987)],
        };
        state.teams.insert(team.id, team);

        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: GameState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, state);

        // Wire names are camelCase, matching what clients mirror verbatim.
        assert!(encoded.contains("\"musicFilter\""));
        assert!(encoded.contains("\"isStartCard\""));
        assert!(encoded.contains("\"currentTeamId\""));
    }
}
