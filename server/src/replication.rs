//! Server-to-observer propagation of authoritative state.
//!
//! The channel never touches game state itself. It drains the events the
//! [`AuthorityStore`] queued, packs them in write order into `Replicate`
//! packets and hands those to the network sender task. Because events are
//! forwarded in the order they were written and carry per-field versions,
//! observers see each field's writes in FIFO order and can drop duplicates.
//!
//! Client requests travel the other way: the network layer buffers them,
//! the match re-validates and re-applies them as [`Role::Server`], and the
//! resulting events come back out through this channel together with the
//! sequence number of the last request processed for each player.

use crate::authority::AuthorityStore;
use log::{debug, error};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tpk_shared::{
    Announcement, EntityId, Field, FieldValue, ObjectiveSnapshot, Packet, PhaseSnapshot, PlayerId,
    ReplicationEvent,
};

/// Upper bound on events per `Replicate` datagram.
pub const MAX_EVENTS_PER_PACKET: usize = 48;

/// Messages sent from the game loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    SendToClient {
        packet: Packet,
        client_id: PlayerId,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<PlayerId>,
    },
}

pub struct ReplicationChannel {
    game_tx: mpsc::UnboundedSender<GameMessage>,
    observers: BTreeSet<PlayerId>,
    last_processed_request: HashMap<PlayerId, u32>,
    events_sent: u64,
}

impl ReplicationChannel {
    pub fn new(game_tx: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self {
            game_tx,
            observers: BTreeSet::new(),
            last_processed_request: HashMap::new(),
            events_sent: 0,
        }
    }

    pub fn add_observer(&mut self, player: PlayerId) {
        self.observers.insert(player);
    }

    pub fn remove_observer(&mut self, player: PlayerId) {
        self.observers.remove(&player);
        self.last_processed_request.remove(&player);
    }

    pub fn observers(&self) -> Vec<PlayerId> {
        self.observers.iter().copied().collect()
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    /// Records the highest request sequence applied for `player`.
    pub fn acknowledge(&mut self, player: PlayerId, sequence: u32) {
        let entry = self.last_processed_request.entry(player).or_insert(0);
        *entry = (*entry).max(sequence);
    }

    pub fn last_processed_request(&self, player: PlayerId) -> Option<u32> {
        self.last_processed_request.get(&player).copied()
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent
    }

    /// Sends the current acknowledgements to one player without any events.
    pub fn send_acks(&mut self, player: PlayerId) {
        self.send_events(Vec::new(), Some(player));
    }

    /// Delivers one authoritative update to every observer.
    pub fn propagate(&mut self, entity: EntityId, field: Field, value: FieldValue, version: u64) {
        self.send_events(
            vec![ReplicationEvent {
                entity,
                field,
                value,
                version,
            }],
            None,
        );
    }

    /// Drains the store's queued events and broadcasts them in write order.
    pub fn flush(&mut self, store: &mut AuthorityStore) -> usize {
        let events = store.drain_outbound();
        let count = events.len();
        if count > 0 {
            debug!("Replicating {} field updates", count);
            self.send_events(events, None);
        }
        count
    }

    /// Sends the complete replicated state, to one player or to everyone.
    ///
    /// Observers apply snapshot events through the same versioned path as
    /// live updates, so a snapshot repairs anything lost in transit without
    /// disturbing fields that are already current. The roster lets them
    /// drop entities whose despawn never arrived.
    pub fn send_snapshot(
        &mut self,
        to: Option<PlayerId>,
        store: &AuthorityStore,
        allocated_below: EntityId,
        phase: PhaseSnapshot,
        objective: ObjectiveSnapshot,
    ) {
        self.send_events(store.snapshot(), to);
        self.send(
            Packet::Roster {
                live: store.entity_ids(),
                allocated_below,
            },
            to,
        );
        self.send(Packet::Phase(phase), to);
        self.send(Packet::Objective(objective), to);
    }

    pub fn publish_phase(&mut self, phase: PhaseSnapshot) {
        self.send(Packet::Phase(phase), None);
    }

    pub fn publish_objective(&mut self, objective: ObjectiveSnapshot) {
        self.send(Packet::Objective(objective), None);
    }

    /// Tells observers an entity no longer exists.
    pub fn despawn(&mut self, entity: EntityId) {
        self.send(Packet::Despawn { entity }, None);
    }

    pub fn announce(&mut self, announcement: Announcement) {
        self.send(Packet::Announcement(announcement), None);
    }

    fn send_events(&mut self, events: Vec<ReplicationEvent>, to: Option<PlayerId>) {
        if events.is_empty() {
            // Still let owners learn their requests were processed.
            self.send(
                Packet::Replicate {
                    events,
                    last_processed_request: self.last_processed_request.clone(),
                },
                to,
            );
            return;
        }

        for chunk in events.chunks(MAX_EVENTS_PER_PACKET) {
            self.events_sent += chunk.len() as u64;
            self.send(
                Packet::Replicate {
                    events: chunk.to_vec(),
                    last_processed_request: self.last_processed_request.clone(),
                },
                to,
            );
        }
    }

    fn send(&self, packet: Packet, to: Option<PlayerId>) {
        let message = match to {
            Some(client_id) => GameMessage::SendToClient { packet, client_id },
            None => {
                if self.observers.is_empty() {
                    return;
                }
                GameMessage::BroadcastPacket {
                    packet,
                    exclude: None,
                }
            }
        };

        if let Err(e) = self.game_tx.send(message) {
            error!("Failed to queue replication packet: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpk_shared::{HeroType, MatchPhase, ObjectiveState, Rarity, Role, Vec3};

    fn channel() -> (ReplicationChannel, mpsc::UnboundedReceiver<GameMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = ReplicationChannel::new(tx);
        channel.add_observer(1);
        (channel, rx)
    }

    fn replicated_events(rx: &mut mpsc::UnboundedReceiver<GameMessage>) -> Vec<ReplicationEvent> {
        let mut all = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                GameMessage::BroadcastPacket {
                    packet: Packet::Replicate { events, .. },
                    ..
                }
                | GameMessage::SendToClient {
                    packet: Packet::Replicate { events, .. },
                    ..
                } => all.extend(events),
                _ => {}
            }
        }
        all
    }

    #[test]
    fn test_flush_preserves_write_order() {
        let (mut channel, mut rx) = channel();
        let mut store = AuthorityStore::new();
        store
            .insert_entity(1, Role::Server, vec![(Field::Score, FieldValue::Int(0))])
            .unwrap();
        for score in [10, 20, 30] {
            store
                .write(1, Field::Score, FieldValue::Int(score), Role::Server)
                .unwrap();
        }

        assert_eq!(channel.flush(&mut store), 4);
        let events = replicated_events(&mut rx);
        let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(events[3].value, FieldValue::Int(30));
        assert_eq!(store.pending_events(), 0);
    }

    #[test]
    fn test_flush_with_nothing_queued_sends_nothing() {
        let (mut channel, mut rx) = channel();
        let mut store = AuthorityStore::new();
        assert_eq!(channel.flush(&mut store), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_broadcast_without_observers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = ReplicationChannel::new(tx);
        channel.propagate(1, Field::Health, FieldValue::Int(50), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_propagate_carries_acks() {
        let (mut channel, mut rx) = channel();
        channel.acknowledge(1, 5);
        channel.acknowledge(1, 3);
        channel.propagate(2, Field::Health, FieldValue::Int(50), 2);

        match rx.try_recv().unwrap() {
            GameMessage::BroadcastPacket {
                packet:
                    Packet::Replicate {
                        events,
                        last_processed_request,
                    },
                exclude,
            } => {
                assert_eq!(exclude, None);
                assert_eq!(events.len(), 1);
                assert_eq!(last_processed_request.get(&1), Some(&5));
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_large_snapshots_are_chunked() {
        let (mut channel, mut rx) = channel();
        let mut store = AuthorityStore::new();
        for id in 1..=8 {
            store
                .insert_entity(id, Role::Server, AuthorityStore::hero_fields(HeroType::King))
                .unwrap();
        }

        let phase = PhaseSnapshot {
            phase: MatchPhase::WaitingForPlayers,
            countdown: -1,
            prephase_ui_visible: true,
            version: 0,
        };
        let objective = ObjectiveSnapshot {
            instance: 9,
            rarity: Rarity::Common,
            state: ObjectiveState::Free,
            position: Vec3::default(),
            version: 1,
        };
        channel.send_snapshot(Some(1), &store, 10, phase, objective);

        let mut replicate_packets = 0;
        let mut total_events = 0;
        let mut saw_phase = false;
        let mut saw_objective = false;
        let mut roster = None;
        while let Ok(message) = rx.try_recv() {
            match message {
                GameMessage::SendToClient { packet, client_id } => {
                    assert_eq!(client_id, 1);
                    match packet {
                        Packet::Replicate { events, .. } => {
                            assert!(events.len() <= MAX_EVENTS_PER_PACKET);
                            replicate_packets += 1;
                            total_events += events.len();
                        }
                        Packet::Phase(_) => saw_phase = true,
                        Packet::Objective(_) => saw_objective = true,
                        Packet::Roster {
                            live,
                            allocated_below,
                        } => roster = Some((live, allocated_below)),
                        other => panic!("Unexpected packet {:?}", other),
                    }
                }
                other => panic!("Unexpected message {:?}", other),
            }
        }

        assert_eq!(total_events, 8 * AuthorityStore::hero_fields(HeroType::King).len());
        assert!(replicate_packets > 1);
        assert!(saw_phase && saw_objective);
        assert_eq!(roster, Some(((1..=8).collect::<Vec<_>>(), 10)));
    }

    #[test]
    fn test_snapshot_packet_fits_datagram() {
        let events: Vec<ReplicationEvent> = (0..MAX_EVENTS_PER_PACKET as u32)
            .map(|i| ReplicationEvent {
                entity: i,
                field: Field::Hero,
                value: FieldValue::Hero(HeroType::Armoured),
                version: u64::MAX,
            })
            .collect();
        let mut acks = HashMap::new();
        for player in 0..16 {
            acks.insert(player, u32::MAX);
        }

        let packet = Packet::Replicate {
            events,
            last_processed_request: acks,
        };
        let size = bincode::serialize(&packet).unwrap().len();
        assert!(size < 2048, "Replicate packet of {} bytes too large", size);
    }

    #[test]
    fn test_send_acks_without_events() {
        let (mut channel, mut rx) = channel();
        channel.acknowledge(1, 4);
        channel.send_acks(1);

        match rx.try_recv().unwrap() {
            GameMessage::SendToClient {
                packet:
                    Packet::Replicate {
                        events,
                        last_processed_request,
                    },
                client_id,
            } => {
                assert_eq!(client_id, 1);
                assert!(events.is_empty());
                assert_eq!(last_processed_request.get(&1), Some(&4));
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_remove_observer_forgets_acks() {
        let (mut channel, _rx) = channel();
        channel.acknowledge(1, 9);
        channel.remove_observer(1);
        assert_eq!(channel.last_processed_request(1), None);
        assert!(!channel.has_observers());
    }
}
