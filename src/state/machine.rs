//! Pure transition functions over [`GameState`] snapshots.
//!
//! Every operation takes the current snapshot and returns a new one; none
//! perform I/O. A structurally inapplicable intent (a guess with no active
//! round, a pass with no current team) is a silent no-op returning an equal
//! value rather than an error. The host UI already gates which actions are
//! presentable, so there is no rejection channel.

use rand::Rng;
use rand::seq::IndexedRandom;
use uuid::Uuid;

use crate::state::game::{
    Card, GameState, GameStatus, MusicFilter, Round, SUPPORTED_DECADES, Song, Team,
};

/// Create a fresh lobby session with a newly generated code.
pub fn create_session(music_filter: MusicFilter) -> GameState {
    GameState::new(music_filter)
}

/// Add a team to the roster, seeding it with a start card.
///
/// The color is the first palette entry not used by any existing team; an
/// exhausted palette wraps around to the first entry. The start card year is
/// drawn uniformly from the filtered decades (all supported decades when the
/// filter is empty) plus a uniform 0-9 offset. The team is appended, so turn
/// order is join order. Returns the new snapshot and the new team's id.
pub fn add_team(state: &GameState, team_name: &str, palette: &[String]) -> (GameState, Uuid) {
    let mut next = state.clone();

    let used = next.used_colors();
    let color = palette
        .iter()
        .find(|candidate| !used.contains(candidate))
        .or_else(|| palette.first())
        .cloned()
        .unwrap_or_default();

    let team = Team {
        id: Uuid::new_v4(),
        name: team_name.to_string(),
        color,
        cards: vec![Card::start_card(draw_start_year(&next.music_filter))],
    };
    let team_id = team.id;
    next.teams.insert(team_id, team);

    (next, team_id)
}

/// Move the session from lobby to playing, handing the turn to the first
/// team in join order. No-op on an empty roster.
pub fn start_session(state: &GameState) -> GameState {
    let Some(first_team_id) = state.teams.keys().next().copied() else {
        return state.clone();
    };

    let mut next = state.clone();
    next.status = GameStatus::Playing;
    next.current_team_id = Some(first_team_id);
    next
}

/// Put a new song in play for the current team.
///
/// Carries forward the previous round's streak counter so a continuing
/// streak survives a "fetch next song" call. No-op when no team is current.
pub fn set_round(state: &GameState, song: Song) -> GameState {
    let Some(team_id) = state.current_team_id else {
        return state.clone();
    };

    let mut next = state.clone();
    let consecutive_correct = next
        .current_round
        .as_ref()
        .map(|round| round.consecutive_correct)
        .unwrap_or(0);
    next.current_round = Some(Round {
        id: Uuid::new_v4(),
        team_id,
        song,
        is_revealed: false,
        consecutive_correct,
    });
    next
}

/// Mark the active round's song as revealed. Informational only: cards and
/// score are untouched. No-op without an active round.
pub fn reveal_round(state: &GameState) -> GameState {
    if state.current_round.is_none() {
        return state.clone();
    }

    let mut next = state.clone();
    if let Some(round) = next.current_round.as_mut() {
        round.is_revealed = true;
    }
    next
}

/// Award the active round's song to the current team as an unlocked card and
/// extend the streak. No-op without an active round or current team.
pub fn apply_correct_guess(state: &GameState) -> GameState {
    let (Some(round), Some(team_id)) = (&state.current_round, state.current_team_id) else {
        return state.clone();
    };

    let mut next = state.clone();
    let card = Card::from_song(&round.song);
    let Some(team) = next.teams.get_mut(&team_id) else {
        return state.clone();
    };
    team.cards.push(card);
    if let Some(round) = next.current_round.as_mut() {
        round.consecutive_correct += 1;
    }
    next
}

/// Forfeit the whole streak: remove every unlocked card from the current
/// team, hand the turn to the next team in join order and clear the round.
/// No-op without an active round or current team.
pub fn apply_wrong_guess(state: &GameState) -> GameState {
    if state.current_round.is_none() {
        return state.clone();
    }
    let Some(team_id) = state.current_team_id else {
        return state.clone();
    };
    let Some(next_team_id) = next_team_after(state, team_id) else {
        return state.clone();
    };

    let mut next = state.clone();
    if let Some(team) = next.teams.get_mut(&team_id) {
        team.cards.retain(|card| card.is_locked);
    }
    next.current_team_id = Some(next_team_id);
    next.current_round = None;
    next
}

/// Bank the streak: lock every unlocked card of the current team, hand the
/// turn to the next team in join order and clear the round. No-op without a
/// current team.
pub fn pass_turn(state: &GameState) -> GameState {
    let Some(team_id) = state.current_team_id else {
        return state.clone();
    };
    let Some(next_team_id) = next_team_after(state, team_id) else {
        return state.clone();
    };

    let mut next = state.clone();
    if let Some(team) = next.teams.get_mut(&team_id) {
        for card in &mut team.cards {
            card.is_locked = true;
        }
    }
    next.current_team_id = Some(next_team_id);
    next.current_round = None;
    next
}

/// Move the session to its final state and clear any active round.
/// Idempotent.
pub fn end_session(state: &GameState) -> GameState {
    let mut next = state.clone();
    next.status = GameStatus::Finished;
    next.current_round = None;
    next
}

/// Teams ordered by score (non-start cards) descending; ties keep join
/// order, so the ranking is deterministic.
pub fn rank_teams(state: &GameState) -> Vec<Team> {
    let mut ranked: Vec<Team> = state.teams.values().cloned().collect();
    ranked.sort_by(|a, b| b.score().cmp(&a.score()));
    ranked
}

/// The team after `team_id` in cyclic join order.
fn next_team_after(state: &GameState, team_id: Uuid) -> Option<Uuid> {
    let index = state.teams.get_index_of(&team_id)?;
    let next = (index + 1) % state.teams.len();
    state.teams.get_index(next).map(|(id, _)| *id)
}

/// Uniform start year: a decade from the filter (all supported decades when
/// the filter is empty or unparsable) plus a 0-9 offset within it.
fn draw_start_year(filter: &MusicFilter) -> i32 {
    let mut decades: Vec<i32> = filter
        .decades
        .iter()
        .filter_map(|decade| decade.parse().ok())
        .collect();
    if decades.is_empty() {
        decades = SUPPORTED_DECADES.to_vec();
    }

    let mut rng = rand::rng();
    let decade = decades.choose(&mut rng).copied().unwrap_or(SUPPORTED_DECADES[0]);
    decade + rng.random_range(0..10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn palette() -> Vec<String> {
        AppConfig::default().colors().to_vec()
    }

    fn song(year: i32) -> Song {
        Song {
            name: format!("Song {year}"),
            artist: "Artist".to_string(),
            year,
            uri: format!("spotify:track:{year}"),
            preview_url: None,
            album_image: None,
        }
    }

    fn lobby_with_teams(names: &[&str]) -> GameState {
        let palette = palette();
        let mut state = create_session(MusicFilter::default());
        for name in names {
            (state, _) = add_team(&state, name, &palette);
        }
        state
    }

    fn playing_with_teams(names: &[&str]) -> GameState {
        start_session(&lobby_with_teams(names))
    }

    #[test]
    fn teams_within_palette_capacity_get_distinct_colors() {
        let palette = palette();
        let mut state = create_session(MusicFilter::default());
        for index in 0..palette.len() {
            (state, _) = add_team(&state, &format!("Team {index}"), &palette);
        }

        let mut colors = state.used_colors();
        colors.sort();
        colors.dedup();
        assert_eq!(colors.len(), palette.len());
    }

    #[test]
    fn team_beyond_palette_capacity_reuses_the_first_color() {
        let palette = palette();
        let mut state = create_session(MusicFilter::default());
        for index in 0..=palette.len() {
            (state, _) = add_team(&state, &format!("Team {index}"), &palette);
        }

        let overflow = state.teams.values().last().unwrap();
        assert_eq!(overflow.color, palette[0]);
    }

    #[test]
    fn passing_n_times_returns_the_turn_to_the_start() {
        for team_count in 1..=4 {
            let names: Vec<String> = (0..team_count).map(|i| format!("Team {i}")).collect();
            let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let start = playing_with_teams(&name_refs);

            let mut state = start.clone();
            for _ in 0..team_count {
                state = pass_turn(&state);
            }
            assert_eq!(state.current_team_id, start.current_team_id);
        }
    }

    #[test]
    fn wrong_guess_forfeits_the_entire_streak() {
        for streak in 1..=4 {
            let mut state = playing_with_teams(&["Reds", "Blues"]);
            let reds = state.current_team_id.unwrap();
            let cards_before = state.teams[&reds].cards.len();
            let unlocked_before = state.teams[&reds].unlocked_count();

            for step in 0..streak {
                state = set_round(&state, song(1970 + step));
                state = apply_correct_guess(&state);
            }
            assert_eq!(state.teams[&reds].unlocked_count(), streak as usize);

            state = apply_wrong_guess(&state);
            assert_eq!(state.teams[&reds].cards.len(), cards_before);
            assert_eq!(state.teams[&reds].unlocked_count(), unlocked_before);
        }
    }

    #[test]
    fn reveal_is_idempotent() {
        let state = set_round(&playing_with_teams(&["Reds"]), song(1994));
        let once = reveal_round(&state);
        let twice = reveal_round(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn round_less_intents_are_exact_no_ops() {
        let state = playing_with_teams(&["Reds", "Blues"]);
        assert!(state.current_round.is_none());

        assert_eq!(apply_correct_guess(&state), state);
        assert_eq!(apply_wrong_guess(&state), state);
        assert_eq!(reveal_round(&state), state);
    }

    #[test]
    fn pass_locks_the_streak_and_leaves_other_teams_untouched() {
        let mut state = playing_with_teams(&["Reds", "Blues"]);
        let reds = state.current_team_id.unwrap();
        let blues_before = state
            .teams
            .values()
            .find(|team| team.id != reds)
            .unwrap()
            .clone();

        state = set_round(&state, song(1984));
        state = apply_correct_guess(&state);
        state = set_round(&state, song(1991));
        state = apply_correct_guess(&state);
        assert_eq!(state.teams[&reds].unlocked_count(), 2);

        let state = pass_turn(&state);
        assert_eq!(state.teams[&reds].unlocked_count(), 0);
        assert!(state.teams[&reds].cards.iter().all(|card| card.is_locked));
        assert_eq!(state.teams[&blues_before.id], blues_before);
    }

    #[test]
    fn lobby_to_playing_hands_the_turn_to_the_first_team() {
        let state = lobby_with_teams(&["Reds", "Blues"]);
        let reds = *state.teams.keys().next().unwrap();

        let state = start_session(&state);
        assert_eq!(state.status, GameStatus::Playing);
        assert_eq!(state.current_team_id, Some(reds));
        for team in state.teams.values() {
            assert_eq!(team.cards.len(), 1);
            assert!(team.cards[0].is_start_card);
            assert!(team.cards[0].is_locked);
        }
    }

    #[test]
    fn starting_an_empty_lobby_is_a_no_op() {
        let state = create_session(MusicFilter::default());
        assert_eq!(start_session(&state), state);
    }

    #[test]
    fn correct_guess_awards_an_unlocked_card_and_extends_the_streak() {
        let state = playing_with_teams(&["Reds", "Blues"]);
        let reds = state.current_team_id.unwrap();

        let state = set_round(&state, song(1994));
        let state = apply_correct_guess(&state);

        assert_eq!(state.teams[&reds].cards.len(), 2);
        assert_eq!(state.teams[&reds].unlocked_count(), 1);
        assert_eq!(
            state.current_round.as_ref().unwrap().consecutive_correct,
            1
        );
        assert_eq!(state.current_team_id, Some(reds));
    }

    #[test]
    fn streak_then_miss_returns_the_team_to_its_start_card() {
        let state = playing_with_teams(&["Reds", "Blues"]);
        let reds = state.current_team_id.unwrap();
        let blues = *state.teams.keys().nth(1).unwrap();

        let state = set_round(&state, song(1994));
        let state = apply_correct_guess(&state);
        let state = set_round(&state, song(2003));
        let state = apply_correct_guess(&state);
        let state = apply_wrong_guess(&state);

        assert_eq!(state.teams[&reds].cards.len(), 1);
        assert_eq!(state.current_team_id, Some(blues));
        assert!(state.current_round.is_none());
    }

    #[test]
    fn passing_after_a_correct_guess_banks_the_card() {
        let state = playing_with_teams(&["Reds", "Blues"]);
        let reds = state.current_team_id.unwrap();
        let blues = *state.teams.keys().nth(1).unwrap();

        let state = set_round(&state, song(1994));
        let state = apply_correct_guess(&state);
        let state = pass_turn(&state);

        assert_eq!(state.teams[&reds].cards.len(), 2);
        assert_eq!(state.teams[&reds].unlocked_count(), 0);
        assert_eq!(state.current_team_id, Some(blues));
    }

    #[test]
    fn fetching_the_next_song_carries_the_streak_forward() {
        let state = playing_with_teams(&["Reds"]);
        let state = set_round(&state, song(1994));
        let state = apply_correct_guess(&state);

        let state = set_round(&state, song(1969));
        let round = state.current_round.as_ref().unwrap();
        assert_eq!(round.consecutive_correct, 1);
        assert!(!round.is_revealed);
        assert_eq!(round.song.year, 1969);
    }

    #[test]
    fn set_round_without_a_current_team_is_a_no_op() {
        let state = lobby_with_teams(&["Reds"]);
        assert_eq!(set_round(&state, song(1975)), state);
    }

    #[test]
    fn end_session_is_idempotent_and_clears_the_round() {
        let state = set_round(&playing_with_teams(&["Reds"]), song(1994));
        let ended = end_session(&state);
        assert_eq!(ended.status, GameStatus::Finished);
        assert!(ended.current_round.is_none());
        assert_eq!(end_session(&ended), ended);
    }

    #[test]
    fn ranking_is_by_score_with_join_order_ties() {
        let mut state = playing_with_teams(&["Reds", "Blues", "Greens"]);
        let blues = *state.teams.keys().nth(1).unwrap();

        // Hand Blues two scored cards.
        state.current_team_id = Some(blues);
        state = set_round(&state, song(1980));
        state = apply_correct_guess(&state);
        state = set_round(&state, song(1990));
        state = apply_correct_guess(&state);

        let ranked = rank_teams(&state);
        assert_eq!(ranked[0].id, blues);
        // Reds and Greens are tied at zero and keep join order.
        assert_eq!(ranked[1].name, "Reds");
        assert_eq!(ranked[2].name, "Greens");
    }

    #[test]
    fn start_card_year_respects_the_decade_filter() {
        let filter = MusicFilter {
            decades: vec!["1980".to_string()],
            genres: Vec::new(),
        };
        let palette = palette();
        for _ in 0..32 {
            let (state, team_id) = add_team(&create_session(filter.clone()), "Reds", &palette);
            let year = state.teams[&team_id].cards[0].release_year;
            assert!((1980..1990).contains(&year), "year {year} outside decade");
        }
    }
}
