use std::{collections::HashMap, sync::Arc};

use rand::seq::IndexedRandom;
use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{GAME_STATE_KEY, KvStore, storage::StorageError},
    dto::{Envelope, Guess, Message, TeamJoin, TeamJoined},
    error::ServiceError,
    songs::{SongQuery, SongSource},
    state::{
        game::{GameState, MusicFilter, Song, Team},
        machine,
    },
    transport::{ChannelEvent, GameChannel, PresenceKind},
};

/// A guess received over the channel, surfaced to the host operator.
///
/// Guesses are never applied automatically: a human judges the placement and
/// triggers [`HostSession::correct_guess`] or [`HostSession::wrong_guess`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedGuess {
    /// Device the guess came from.
    pub sender_id: String,
    /// The claimed placement.
    pub guess: Guess,
}

/// Host session controller: the sole writer of the authoritative
/// [`GameState`].
///
/// Every committed transition is persisted to the device-local store and
/// re-broadcast as a full snapshot; presence joins and explicit state
/// requests re-broadcast without mutating, which is what recovers late
/// joiners and peers that missed a broadcast.
pub struct HostSession {
    channel: Arc<dyn GameChannel>,
    store: Arc<dyn KvStore>,
    songs: Arc<dyn SongSource>,
    config: AppConfig,
    game: RwLock<Option<GameState>>,
    /// Devices whose join was confirmed, for duplicate-request de-dupe.
    joined_devices: Mutex<HashMap<String, Uuid>>,
    snapshots: watch::Sender<Option<GameState>>,
    guesses: watch::Sender<Option<ReceivedGuess>>,
}

impl HostSession {
    /// Construct a host session bound to a channel, a blob store and a song
    /// source.
    pub fn new(
        channel: Arc<dyn GameChannel>,
        store: Arc<dyn KvStore>,
        songs: Arc<dyn SongSource>,
        config: AppConfig,
    ) -> Arc<Self> {
        let (snapshots, _) = watch::channel(None);
        let (guesses, _) = watch::channel(None);
        Arc::new(Self {
            channel,
            store,
            songs,
            config,
            game: RwLock::new(None),
            joined_devices: Mutex::new(HashMap::new()),
            snapshots,
            guesses,
        })
    }

    /// Subscribe to committed snapshots. UI layers diff as needed; the
    /// controller never assumes a reactive framework.
    pub fn snapshots(&self) -> watch::Receiver<Option<GameState>> {
        self.snapshots.subscribe()
    }

    /// Subscribe to guesses awaiting the operator's judgment.
    pub fn guesses(&self) -> watch::Receiver<Option<ReceivedGuess>> {
        self.guesses.subscribe()
    }

    /// Copy of the current snapshot, when a game exists.
    pub async fn snapshot(&self) -> Option<GameState> {
        self.game.read().await.clone()
    }

    /// Create a fresh session, replacing any previous one.
    pub async fn create_game(&self, music_filter: MusicFilter) -> Result<GameState, ServiceError> {
        self.joined_devices.lock().await.clear();
        let state = machine::create_session(music_filter);
        info!(code = %state.code, "created game");
        self.commit(state.clone()).await?;
        Ok(state)
    }

    /// Drop the in-memory state and clear the persisted blob.
    pub async fn clear_game(&self) -> Result<(), ServiceError> {
        {
            let mut guard = self.game.write().await;
            guard.take();
        }
        self.joined_devices.lock().await.clear();
        self.snapshots.send_replace(None);
        self.store.clear(GAME_STATE_KEY).await?;
        Ok(())
    }

    /// Reload the persisted snapshot after a host restart and re-broadcast
    /// it so stale mirrors catch up.
    pub async fn resume(&self) -> Result<Option<GameState>, ServiceError> {
        let Some(bytes) = self.store.load(GAME_STATE_KEY).await? else {
            return Ok(None);
        };
        let state: GameState = serde_json::from_slice(&bytes)
            .map_err(|err| StorageError::corrupt(GAME_STATE_KEY, err))?;
        self.commit(state.clone()).await?;
        Ok(Some(state))
    }

    /// Move the lobby into play.
    pub async fn start_game(&self) -> Result<(), ServiceError> {
        self.transition(|state| machine::start_session(state)).await
    }

    /// Reveal the current round's song.
    pub async fn reveal_song(&self) -> Result<(), ServiceError> {
        self.transition(|state| machine::reveal_round(state)).await
    }

    /// Operator judged the current guess correct.
    pub async fn correct_guess(&self) -> Result<(), ServiceError> {
        self.transition(|state| machine::apply_correct_guess(state))
            .await
    }

    /// Operator judged the current guess wrong; the whole streak is
    /// forfeited and the turn moves on.
    pub async fn wrong_guess(&self) -> Result<(), ServiceError> {
        self.transition(|state| machine::apply_wrong_guess(state))
            .await
    }

    /// Bank the current team's streak and move the turn on.
    pub async fn pass_turn(&self) -> Result<(), ServiceError> {
        self.transition(|state| machine::pass_turn(state)).await
    }

    /// End the session, freezing the scoreboard.
    pub async fn end_game(&self) -> Result<(), ServiceError> {
        self.transition(|state| machine::end_session(state)).await
    }

    /// Teams ranked by score for the results view.
    pub async fn rank_teams(&self) -> Vec<Team> {
        match self.game.read().await.as_ref() {
            Some(state) => machine::rank_teams(state),
            None => Vec::new(),
        }
    }

    /// Fetch a song for the current team and put it in play.
    ///
    /// Picks a random decade from the filter (any era when unrestricted) and
    /// excludes the years already on the current team's timeline. A lookup
    /// failure leaves the state untouched; the operator simply retries.
    pub async fn fetch_next_song(&self) -> Result<Song, ServiceError> {
        let query = {
            let guard = self.game.read().await;
            let state = guard
                .as_ref()
                .ok_or_else(|| ServiceError::InvalidState("no active game".into()))?;
            let current_team = state
                .current_team()
                .ok_or_else(|| ServiceError::InvalidState("no team has the turn".into()))?;

            let mut rng = rand::rng();
            SongQuery {
                decade: state.music_filter.decades.choose(&mut rng).cloned(),
                genres: state.music_filter.genres.clone(),
                exclude_years: current_team.timeline_years(),
            }
        };

        let song = self.songs.find_song(query).await?;
        self.transition(|state| machine::set_round(state, song.clone()))
            .await?;
        Ok(song)
    }

    /// Spawn the event loop reacting to channel traffic.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut events = session.channel.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                session.handle_event(event).await;
            }
            debug!("host channel closed; event loop ending");
        })
    }

    async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(envelope) => self.handle_message(envelope).await,
            ChannelEvent::Presence(presence) => {
                if presence.kind == PresenceKind::Joined {
                    debug!(device = %presence.device_id, "peer joined; re-broadcasting state");
                    self.rebroadcast().await;
                }
            }
        }
    }

    async fn handle_message(&self, envelope: Envelope) {
        let sender_id = envelope.sender_id;
        match envelope.message {
            Message::TeamJoin(TeamJoin::Request { team_name }) => {
                if let Err(err) = self.handle_join(&sender_id, &team_name).await {
                    warn!(error = %err, device = %sender_id, "failed to handle join request");
                }
            }
            Message::TeamJoin(TeamJoin::StateRequest { .. }) => {
                self.rebroadcast().await;
            }
            Message::Pass {} => {
                debug!(device = %sender_id, "pass requested");
                if let Err(err) = self.pass_turn().await {
                    warn!(error = %err, "failed to apply pass request");
                }
            }
            Message::Guess(guess) => {
                info!(device = %sender_id, guess = ?guess, "guess received; awaiting operator judgment");
                self.guesses.send_replace(Some(ReceivedGuess { sender_id, guess }));
            }
            Message::Continue {} => {
                debug!(device = %sender_id, "continue requested");
            }
            // A host never mirrors snapshots or confirmations from peers.
            Message::GameState(_) | Message::TeamJoined(_) => {}
            Message::Unknown => {
                debug!(device = %sender_id, "ignoring unknown message type");
            }
        }
    }

    /// Handle a join request: create the team, commit, then send a directed
    /// confirmation so the requester binds to its identity without trusting
    /// a possibly-stale broadcast snapshot.
    ///
    /// A repeated request from an already-confirmed device re-sends the
    /// original confirmation instead of creating a second team, so a client
    /// retry after a missed confirmation stays idempotent.
    async fn handle_join(&self, sender_id: &str, team_name: &str) -> Result<(), ServiceError> {
        if let Some(team_id) = self.joined_devices.lock().await.get(sender_id).copied() {
            let existing = {
                let guard = self.game.read().await;
                guard
                    .as_ref()
                    .and_then(|state| state.teams.get(&team_id).cloned())
            };
            if let Some(team) = existing {
                info!(device = %sender_id, team = %team.name, "duplicate join; re-confirming");
                self.confirm_join(sender_id, &team)?;
                return Ok(());
            }
        }

        let (next, team_id) = {
            let guard = self.game.read().await;
            let state = guard
                .as_ref()
                .ok_or_else(|| ServiceError::InvalidState("no active game".into()))?;
            machine::add_team(state, team_name, self.config.colors())
        };
        let team = next.teams[&team_id].clone();

        self.commit(next).await?;
        self.joined_devices
            .lock()
            .await
            .insert(sender_id.to_string(), team_id);

        info!(device = %sender_id, team = %team.name, color = %team.color, "team joined");
        self.confirm_join(sender_id, &team)
    }

    fn confirm_join(&self, sender_id: &str, team: &Team) -> Result<(), ServiceError> {
        self.channel
            .send(Message::TeamJoined(TeamJoined {
                team_id: team.id,
                team_name: team.name.clone(),
                team_color: team.color.clone(),
                sender_id: sender_id.to_string(),
            }))
            .map_err(Into::into)
    }

    /// Re-send the current snapshot without mutating anything. Pure
    /// reconciliation for peers that missed a broadcast.
    async fn rebroadcast(&self) {
        let snapshot = self.game.read().await.clone();
        if let Some(state) = snapshot {
            if self.channel.send(Message::GameState(state)).is_err() {
                warn!("cannot re-broadcast: channel not connected");
            }
        }
    }

    /// Apply a pure transition to the current state and commit the result.
    async fn transition<F>(&self, apply: F) -> Result<(), ServiceError>
    where
        F: FnOnce(&GameState) -> GameState,
    {
        let next = {
            let guard = self.game.read().await;
            let state = guard
                .as_ref()
                .ok_or_else(|| ServiceError::InvalidState("no active game".into()))?;
            apply(state)
        };
        self.commit(next).await
    }

    /// Persist, notify local subscribers, then broadcast the snapshot.
    ///
    /// Persistence comes first so a crash between the steps loses a
    /// broadcast, never a committed state; peers recover the broadcast
    /// through the presence path.
    pub(crate) async fn commit(&self, next: GameState) -> Result<(), ServiceError> {
        {
            let mut guard = self.game.write().await;
            guard.replace(next.clone());
        }

        let blob = serde_json::to_vec(&next)?;
        self.store.save(GAME_STATE_KEY, blob).await?;

        self.snapshots.send_replace(Some(next.clone()));
        self.channel.send(Message::GameState(next))?;
        Ok(())
    }
}
