use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, RwLock, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{KvStore, TEAM_ID_KEY},
    dto::{Envelope, Guess, Message, TeamJoin, TeamJoined},
    error::ServiceError,
    state::game::GameState,
    transport::{ChannelEvent, GameChannel},
};

/// How long a join attempt waits for its directed confirmation.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a client's join handshake currently stands.
///
/// `TimedOut` and `Failed` are terminal for the attempt; the user retries
/// explicitly, there is no automatic resend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    /// No join has been attempted.
    Idle,
    /// Waiting for the transport to report a live connection.
    AwaitingConnection,
    /// Join request sent; waiting for a confirmation addressed to this
    /// device.
    AwaitingConfirmation,
    /// Bound to a team.
    Joined,
    /// No confirmation arrived within the window.
    TimedOut,
    /// The transport was not connected when the request was sent.
    Failed,
}

/// A join attempt waiting for its confirmation.
struct PendingJoin {
    attempt: u64,
    resolve: oneshot::Sender<TeamJoined>,
}

/// Client session controller: a read-only mirror of the host's broadcast
/// snapshots plus the join handshake.
///
/// Every `game_state` broadcast replaces the mirror wholesale; there is no
/// client-side merging. The controller sends discrete intents (join, guess,
/// pass, continue) and never mutates game state itself.
pub struct ClientSession {
    channel: Arc<dyn GameChannel>,
    store: Arc<dyn KvStore>,
    join_timeout: Duration,
    snapshots: watch::Sender<Option<GameState>>,
    join_phase: watch::Sender<JoinPhase>,
    my_team: RwLock<Option<Uuid>>,
    pending_join: Mutex<Option<PendingJoin>>,
    attempts: AtomicU64,
}

impl ClientSession {
    /// Construct a client session with the standard 10-second join window.
    pub fn new(channel: Arc<dyn GameChannel>, store: Arc<dyn KvStore>) -> Arc<Self> {
        Self::with_timeout(channel, store, DEFAULT_JOIN_TIMEOUT)
    }

    /// Construct a client session with an explicit join window.
    pub fn with_timeout(
        channel: Arc<dyn GameChannel>,
        store: Arc<dyn KvStore>,
        join_timeout: Duration,
    ) -> Arc<Self> {
        let (snapshots, _) = watch::channel(None);
        let (join_phase, _) = watch::channel(JoinPhase::Idle);
        Arc::new(Self {
            channel,
            store,
            join_timeout,
            snapshots,
            join_phase,
            my_team: RwLock::new(None),
            pending_join: Mutex::new(None),
            attempts: AtomicU64::new(0),
        })
    }

    /// Subscribe to mirrored snapshots.
    pub fn snapshots(&self) -> watch::Receiver<Option<GameState>> {
        self.snapshots.subscribe()
    }

    /// Subscribe to join handshake progress.
    pub fn join_phase(&self) -> watch::Receiver<JoinPhase> {
        self.join_phase.subscribe()
    }

    /// Team this device is bound to, once a join was confirmed.
    pub async fn my_team_id(&self) -> Option<Uuid> {
        *self.my_team.read().await
    }

    /// Whether the mirrored snapshot says it is this device's turn.
    pub async fn is_my_turn(&self) -> bool {
        let my_team = *self.my_team.read().await;
        let snapshot = self.snapshots.borrow();
        match (&*snapshot, my_team) {
            (Some(state), Some(team_id)) => state.current_team_id == Some(team_id),
            _ => false,
        }
    }

    /// Reload a previously confirmed team binding.
    pub async fn resume(&self) -> Result<Option<Uuid>, ServiceError> {
        let Some(bytes) = self.store.load(TEAM_ID_KEY).await? else {
            return Ok(None);
        };
        let team_id = String::from_utf8(bytes)
            .ok()
            .and_then(|raw| raw.trim().parse::<Uuid>().ok());
        if let Some(team_id) = team_id {
            self.my_team.write().await.replace(team_id);
        }
        Ok(team_id)
    }

    /// Ask the host to join with `team_name` and wait for the directed
    /// confirmation.
    ///
    /// At most one join is pending per client; a new attempt supersedes the
    /// previous one, whose caller gets an error. The request itself cannot
    /// be retracted once sent — if the confirmation arrives after the
    /// timeout it is absorbed by the event loop and the binding still
    /// happens, it just no longer resolves this call.
    pub async fn join(&self, team_name: &str) -> Result<TeamJoined, ServiceError> {
        self.join_phase.send_replace(JoinPhase::AwaitingConnection);
        if !self.channel.is_connected() {
            self.join_phase.send_replace(JoinPhase::Failed);
            return Err(ServiceError::NotConnected);
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let (resolve, confirmed) = oneshot::channel();
        {
            let mut pending = self.pending_join.lock().await;
            // Dropping a superseded sender wakes its waiting caller.
            pending.replace(PendingJoin { attempt, resolve });
        }

        if let Err(err) = self.channel.send(Message::TeamJoin(TeamJoin::Request {
            team_name: team_name.to_string(),
        })) {
            self.join_phase.send_replace(JoinPhase::Failed);
            self.clear_pending(attempt).await;
            return Err(err.into());
        }
        self.join_phase.send_replace(JoinPhase::AwaitingConfirmation);

        match timeout(self.join_timeout, confirmed).await {
            Ok(Ok(confirmation)) => {
                self.join_phase.send_replace(JoinPhase::Joined);
                Ok(confirmation)
            }
            Ok(Err(_)) => {
                debug!("join attempt superseded by a newer one");
                Err(ServiceError::InvalidState("join attempt superseded".into()))
            }
            Err(_) => {
                self.clear_pending(attempt).await;
                self.join_phase.send_replace(JoinPhase::TimedOut);
                Err(ServiceError::Timeout)
            }
        }
    }

    /// Submit a placement guess for the current song.
    pub fn submit_guess(&self, guess: Guess) -> Result<(), ServiceError> {
        self.channel.send(Message::Guess(guess)).map_err(Into::into)
    }

    /// Ask the host to pass this team's turn.
    pub fn request_pass(&self) -> Result<(), ServiceError> {
        self.channel.send(Message::Pass {}).map_err(Into::into)
    }

    /// Tell the host the team wants the next song.
    pub fn request_continue(&self) -> Result<(), ServiceError> {
        self.channel.send(Message::Continue {}).map_err(Into::into)
    }

    /// Spawn the event loop mirroring broadcasts and resolving handshakes.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut events = session.channel.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let ChannelEvent::Message(envelope) = event {
                    session.handle_message(envelope).await;
                }
            }
            debug!("client channel closed; event loop ending");
        })
    }

    async fn handle_message(&self, envelope: Envelope) {
        match envelope.message {
            Message::GameState(state) => {
                // Last broadcast wins; the mirror is never patched.
                self.snapshots.send_replace(Some(state));
            }
            Message::TeamJoined(confirmation) => {
                if confirmation.sender_id != self.channel.device_id() {
                    // Addressed to a different peer on the shared channel.
                    return;
                }
                self.bind_team(confirmation).await;
            }
            // Intents are host concerns; snapshots from other clients never
            // exist. Everything else is ignorable by design.
            _ => {}
        }
    }

    /// Record the confirmed binding and resolve the pending join, if one is
    /// still waiting. A confirmation that arrives after a timeout has no
    /// future to resolve but still binds the mirror, so a retry from this
    /// device converges on the same team.
    async fn bind_team(&self, confirmation: TeamJoined) {
        info!(team = %confirmation.team_name, "join confirmed");
        self.my_team.write().await.replace(confirmation.team_id);

        if let Err(err) = self
            .store
            .save(
                TEAM_ID_KEY,
                confirmation.team_id.to_string().into_bytes(),
            )
            .await
        {
            warn!(error = %err, "failed to persist team binding");
        }

        let pending = self.pending_join.lock().await.take();
        match pending {
            Some(pending) => {
                let _ = pending.resolve.send(confirmation);
            }
            None => {
                debug!("confirmation arrived with no pending join; binding only");
            }
        }
    }

    /// Remove the pending join if it still belongs to `attempt`; a newer
    /// attempt keeps its own entry.
    async fn clear_pending(&self, attempt: u64) {
        let mut pending = self.pending_join.lock().await;
        if pending.as_ref().is_some_and(|p| p.attempt == attempt) {
            pending.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::MemoryKv,
        session::HostSession,
        songs::{SongQuery, SongSource, SongSourceError},
        state::{
            game::{MusicFilter, Song},
            machine,
        },
        transport::BroadcastHub,
    };

    struct NoSongs;

    impl SongSource for NoSongs {
        fn find_song(
            &self,
            _query: SongQuery,
        ) -> BoxFuture<'static, Result<Song, SongSourceError>> {
            Box::pin(async { Err(SongSourceError::NotFound) })
        }
    }

    fn host_on(hub: &BroadcastHub, code: &str) -> Arc<HostSession> {
        HostSession::new(
            Arc::new(hub.connect(code, "host-device")),
            Arc::new(MemoryKv::new()),
            Arc::new(NoSongs),
            AppConfig::default(),
        )
    }

    fn client_on(hub: &BroadcastHub, code: &str, device: &str) -> Arc<ClientSession> {
        ClientSession::with_timeout(
            Arc::new(hub.connect(code, device)),
            Arc::new(MemoryKv::new()),
            Duration::from_secs(1),
        )
    }

    async fn wait_for_snapshot(client: &ClientSession) -> GameState {
        let mut snapshots = client.snapshots();
        timeout(Duration::from_secs(1), async {
            loop {
                if let Some(state) = snapshots.borrow_and_update().clone() {
                    return state;
                }
                snapshots.changed().await.expect("snapshot channel closed");
            }
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    #[tokio::test]
    async fn join_handshake_binds_the_client_to_its_team() {
        let hub = BroadcastHub::default();
        let host = host_on(&hub, "ABC234");
        host.create_game(MusicFilter::default()).await.unwrap();
        host.run();

        let client = client_on(&hub, "ABC234", "team-device");
        client.run();

        let confirmation = client.join("Reds").await.unwrap();
        assert_eq!(confirmation.team_name, "Reds");
        assert_eq!(client.my_team_id().await, Some(confirmation.team_id));
        assert_eq!(*client.join_phase().borrow(), JoinPhase::Joined);

        let snapshot = wait_for_snapshot(&client).await;
        assert!(snapshot.teams.contains_key(&confirmation.team_id));
    }

    #[tokio::test]
    async fn join_without_a_connection_fails_terminally() {
        let hub = BroadcastHub::default();
        let client = client_on(&hub, "ABC234", "team-device");
        client.run();
        client.channel.close();

        let err = client.join("Reds").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotConnected));
        assert_eq!(*client.join_phase().borrow(), JoinPhase::Failed);
    }

    #[tokio::test]
    async fn join_times_out_when_nobody_confirms() {
        let hub = BroadcastHub::default();
        let client = ClientSession::with_timeout(
            Arc::new(hub.connect("ABC234", "team-device")),
            Arc::new(MemoryKv::new()),
            Duration::from_millis(50),
        );
        client.run();

        let err = client.join("Reds").await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout));
        assert_eq!(*client.join_phase().borrow(), JoinPhase::TimedOut);
        assert_eq!(client.my_team_id().await, None);
    }

    #[tokio::test]
    async fn a_new_join_supersedes_the_pending_one() {
        let hub = BroadcastHub::default();
        let client = ClientSession::with_timeout(
            Arc::new(hub.connect("ABC234", "team-device")),
            Arc::new(MemoryKv::new()),
            Duration::from_secs(5),
        );
        client.run();

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.join("Reds").await })
        };
        // Let the first attempt register its pending join before replacing it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.join("Still Reds").await })
        };

        let first_err = first.await.unwrap().unwrap_err();
        assert!(matches!(first_err, ServiceError::InvalidState(_)));
        second.abort();
    }

    #[tokio::test]
    async fn confirmations_for_other_devices_are_ignored() {
        let hub = BroadcastHub::default();
        let client = client_on(&hub, "ABC234", "team-device");
        client.run();

        let imposter = hub.connect("ABC234", "imposter-device");
        imposter
            .send(Message::TeamJoined(TeamJoined {
                team_id: Uuid::new_v4(),
                team_name: "Not yours".to_string(),
                team_color: "#000000".to_string(),
                sender_id: "someone-else".to_string(),
            }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.my_team_id().await, None);
        assert_eq!(*client.join_phase().borrow(), JoinPhase::Idle);
    }

    #[tokio::test]
    async fn late_confirmation_after_timeout_still_binds_the_team() {
        let hub = BroadcastHub::default();
        let client = ClientSession::with_timeout(
            Arc::new(hub.connect("ABC234", "team-device")),
            Arc::new(MemoryKv::new()),
            Duration::from_millis(50),
        );
        client.run();

        let err = client.join("Reds").await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout));

        // The request could not be retracted; the host answers late.
        let team_id = Uuid::new_v4();
        let late_host = hub.connect("ABC234", "late-host-device");
        late_host
            .send(Message::TeamJoined(TeamJoined {
                team_id,
                team_name: "Reds".to_string(),
                team_color: "#EF4444".to_string(),
                sender_id: "team-device".to_string(),
            }))
            .unwrap();

        timeout(Duration::from_secs(1), async {
            loop {
                if client.my_team_id().await == Some(team_id) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("late confirmation never bound the team");
        // The attempt stays terminal; only an explicit retry changes it.
        assert_eq!(*client.join_phase().borrow(), JoinPhase::TimedOut);
    }

    #[tokio::test]
    async fn late_joiner_converges_within_one_round_trip() {
        let hub = BroadcastHub::default();
        let host = host_on(&hub, "ABC234");

        // Host already mid-game with two teams before the client exists.
        let palette = AppConfig::default();
        let mut state = machine::create_session(MusicFilter::default());
        (state, _) = machine::add_team(&state, "Reds", palette.colors());
        (state, _) = machine::add_team(&state, "Blues", palette.colors());
        let state = machine::start_session(&state);
        host.commit(state).await.unwrap();
        host.run();
        let host_snapshot = host.snapshot().await.unwrap();

        // Connecting alone fires the presence-triggered state request; the
        // mirror converges without any application-level join.
        let client = client_on(&hub, "ABC234", "latecomer-device");
        client.run();

        let mirrored = wait_for_snapshot(&client).await;
        assert_eq!(mirrored, host_snapshot);
        assert_eq!(host.snapshot().await.unwrap(), host_snapshot);
        assert!(!client.is_my_turn().await);
    }

    #[tokio::test]
    async fn my_turn_tracks_the_mirrored_snapshot() {
        let hub = BroadcastHub::default();
        let host = host_on(&hub, "ABC234");
        host.create_game(MusicFilter::default()).await.unwrap();
        host.run();

        let client = client_on(&hub, "ABC234", "team-device");
        client.run();
        let confirmation = client.join("Reds").await.unwrap();

        host.start_game().await.unwrap();
        timeout(Duration::from_secs(1), async {
            loop {
                if client.is_my_turn().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("turn never reached the mirror");
        assert_eq!(client.my_team_id().await, Some(confirmation.team_id));
    }

    #[tokio::test]
    async fn resume_restores_a_persisted_team_binding() {
        let hub = BroadcastHub::default();
        let store: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let team_id = Uuid::new_v4();
        store
            .save(TEAM_ID_KEY, team_id.to_string().into_bytes())
            .await
            .unwrap();

        let client = ClientSession::new(Arc::new(hub.connect("ABC234", "team-device")), store);
        assert_eq!(client.resume().await.unwrap(), Some(team_id));
        assert_eq!(client.my_team_id().await, Some(team_id));
    }
}
