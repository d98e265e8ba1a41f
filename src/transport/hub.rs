use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{ChannelEvent, ChannelEvents, GameChannel, PresenceEvent, PresenceKind, TransportError};
use crate::{
    dto::{Envelope, Message, send_timestamp_ms},
    state::game::normalize_code,
};

/// Events buffered per topic before slow receivers start lagging.
const DEFAULT_TOPIC_CAPACITY: usize = 64;

/// In-process topic broker: one broadcast channel per game code.
///
/// Topics are created on first attach and live for the process lifetime;
/// a session is a handful of topics at most, so no eviction is needed.
pub struct BroadcastHub {
    topics: DashMap<String, broadcast::Sender<ChannelEvent>>,
    capacity: usize,
}

impl BroadcastHub {
    /// Construct a hub whose topics buffer `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Attach a device to the topic for `code`, announcing its presence to
    /// peers already subscribed.
    ///
    /// The returned channel is subscribed before the announcement goes out,
    /// so the device cannot miss a reaction to its own arrival.
    pub fn connect(&self, code: &str, device_id: &str) -> HubChannel {
        let sender = self.topic(&normalize_code(code));
        let initial = sender.subscribe();

        let channel = HubChannel {
            sender,
            device_id: device_id.to_string(),
            connected: AtomicBool::new(true),
            initial: Mutex::new(Some(initial)),
        };
        channel.announce(PresenceKind::Joined);
        channel
    }

    /// Number of topics with at least one live subscriber.
    pub fn active_topics(&self) -> usize {
        self.topics
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .count()
    }

    fn topic(&self, code: &str) -> broadcast::Sender<ChannelEvent> {
        self.topics
            .entry(format!("game:{code}"))
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

/// A device's live attachment to one hub topic.
pub struct HubChannel {
    sender: broadcast::Sender<ChannelEvent>,
    device_id: String,
    connected: AtomicBool,
    /// Subscription taken at attach time, handed to the first `subscribe`
    /// call so no event between attach and subscribe is lost.
    initial: Mutex<Option<broadcast::Receiver<ChannelEvent>>>,
}

impl HubChannel {
    /// Best-effort presence announcement; peers may not exist yet.
    fn announce(&self, kind: PresenceKind) {
        let _ = self.sender.send(ChannelEvent::Presence(PresenceEvent {
            kind,
            device_id: self.device_id.clone(),
        }));
    }
}

impl GameChannel for HubChannel {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let envelope = Envelope {
            message,
            sender_id: self.device_id.clone(),
            timestamp: send_timestamp_ms(),
        };
        // A send with no subscribers is not a failure: delivery is
        // best-effort and peers recover through snapshot re-broadcasts.
        let _ = self.sender.send(ChannelEvent::Message(envelope));
        Ok(())
    }

    fn subscribe(&self) -> ChannelEvents {
        let receiver = self
            .initial
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .unwrap_or_else(|| self.sender.subscribe());
        ChannelEvents::new(receiver, self.device_id.clone())
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.announce(PresenceKind::Left);
        }
    }
}

impl Drop for HubChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::TeamJoin;

    #[tokio::test]
    async fn peers_receive_each_others_messages_but_not_their_own() {
        let hub = BroadcastHub::default();
        let host = hub.connect("ABC234", "host-device");
        let team = hub.connect("abc234", "team-device");

        let mut host_events = host.subscribe();
        let mut team_events = team.subscribe();

        host.send(Message::Pass {}).unwrap();
        team.send(Message::TeamJoin(TeamJoin::Request {
            team_name: "Reds".to_string(),
        }))
        .unwrap();

        // The host sees only the team's message, despite lower-case join code.
        match host_events.next().await.unwrap() {
            ChannelEvent::Presence(presence) => {
                assert_eq!(presence.kind, PresenceKind::Joined);
                assert_eq!(presence.device_id, "team-device");
            }
            other => panic!("expected team presence, got {other:?}"),
        }
        match host_events.next().await.unwrap() {
            ChannelEvent::Message(envelope) => {
                assert_eq!(envelope.sender_id, "team-device");
            }
            other => panic!("expected team message, got {other:?}"),
        }

        // The team sees only the host's message.
        match team_events.next().await.unwrap() {
            ChannelEvent::Message(envelope) => {
                assert_eq!(envelope.sender_id, "host-device");
                assert_eq!(envelope.message, Message::Pass {});
            }
            other => panic!("expected host message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_announces_presence_left_and_rejects_sends() {
        let hub = BroadcastHub::default();
        let host = hub.connect("ABC234", "host-device");
        let mut host_events = host.subscribe();

        let team = hub.connect("ABC234", "team-device");
        team.close();
        assert_eq!(team.send(Message::Pass {}), Err(TransportError::NotConnected));
        // Closing twice announces only once.
        team.close();
        drop(team);

        match host_events.next().await.unwrap() {
            ChannelEvent::Presence(presence) => assert_eq!(presence.kind, PresenceKind::Joined),
            other => panic!("expected join, got {other:?}"),
        }
        match host_events.next().await.unwrap() {
            ChannelEvent::Presence(presence) => {
                assert_eq!(presence.kind, PresenceKind::Left);
                assert_eq!(presence.device_id, "team-device");
            }
            other => panic!("expected single leave, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn topics_are_isolated_by_code() {
        let hub = BroadcastHub::default();
        let here = hub.connect("ABC234", "here-device");
        let elsewhere = hub.connect("XYZ789", "elsewhere-device");

        let mut here_events = here.subscribe();
        elsewhere.send(Message::Pass {}).unwrap();
        here.send(Message::Continue {}).unwrap();

        // Nothing arrives: the foreign topic never reaches us, and both our
        // own send and our own presence are skipped.
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), here_events.next()).await;
        assert!(nothing.is_err(), "expected no event, got {nothing:?}");
    }
}
