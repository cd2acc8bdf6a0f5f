use crate::game::ClientGameState;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};
use tpk_shared::{HeroType, MatchPhase, Mutation, Packet, PROTOCOL_VERSION};

/// How often an otherwise idle client pings the server.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Headless arena client: keeps a replica in sync and submits requests.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,

    game_state: ClientGameState,
    hero: Option<HeroType>,
    last_countdown: i32,

    fake_ping_ms: u64,

    prediction_enabled: bool,
    reconciliation_enabled: bool,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        hero: Option<HeroType>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            game_state: ClientGameState::new(),
            hero,
            last_countdown: -1,
            fake_ping_ms,
            prediction_enabled: true,
            reconciliation_enabled: true,
        })
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends a request and predicts its local effect.
    pub async fn send_request(&mut self, mutation: Mutation) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            return Ok(());
        }

        let sequence = self
            .game_state
            .record_request(mutation, self.prediction_enabled);
        debug!("Sending request {}: {:?}", sequence, mutation);
        self.send_packet(&Packet::Request { sequence, mutation }).await
    }

    async fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected {
                client_id,
                entity_id,
            } => {
                info!("Connected! Client ID: {}, hero entity {}", client_id, entity_id);
                self.game_state.set_identity(client_id, entity_id);
                self.connected = true;

                if let Some(hero) = self.hero {
                    if let Err(e) = self.send_request(Mutation::SelectHero { hero }).await {
                        error!("Error selecting hero: {}", e);
                    }
                }
            }

            Packet::Replicate {
                events,
                last_processed_request,
            } => {
                let applied = self.game_state.apply_replicate(
                    &events,
                    &last_processed_request,
                    self.reconciliation_enabled,
                );
                if applied > 0 {
                    debug!("Applied {} of {} replicated updates", applied, events.len());
                }
            }

            Packet::Despawn { entity } => self.game_state.despawn(entity),

            Packet::Roster {
                live,
                allocated_below,
            } => {
                let removed = self.game_state.apply_roster(&live, allocated_below);
                if removed > 0 {
                    debug!("Snapshot removed {} stale entities", removed);
                }
            }

            Packet::Phase(snapshot) => {
                if self.game_state.observe_phase(snapshot) {
                    self.log_countdown();
                }
            }

            Packet::Objective(snapshot) => {
                if self.game_state.observe_objective(snapshot) {
                    debug!("Artifact {} is {:?}", snapshot.instance, snapshot.state);
                }
            }

            Packet::Announcement(announcement) => {
                info!("{:?}", announcement);
                self.game_state.push_announcement(announcement);
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.game_state.reset();
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    /// Logs the prephase countdown every ten steps and on the last few.
    fn log_countdown(&mut self) {
        let countdown = self.game_state.countdown();
        if countdown == self.last_countdown {
            return;
        }
        self.last_countdown = countdown;

        if self.game_state.phase() == MatchPhase::RoomFull && (countdown % 10 == 0 || countdown <= 5) {
            info!("Match starts in {}", countdown);
        }
    }

    fn log_status(&self) {
        let state = &self.game_state;
        info!(
            "Phase {:?} | health {:?} | pending requests {} | replica {} entities",
            state.phase(),
            state.local_health(),
            state.pending_requests(),
            state.confirmed.len()
        );
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
        let mut status_interval = interval(Duration::from_secs(5));

        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => self.handle_packet(packet).await,
                                Err(e) => warn!("Dropping malformed packet: {}", e),
                            }

                            if !self.connected && self.game_state.client_id.is_some() {
                                break;
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },

                _ = status_interval.tick() => {
                    if self.connected {
                        self.log_status();
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Leaving match");
                    break;
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tpk_shared::{Field, FieldValue, ReplicationEvent};

    #[test]
    fn test_invalid_server_address() {
        let result = tokio_test::block_on(Client::new("not-an-address", 0, None));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_requests_before_connect_are_ignored() {
        let mut client = Client::new("127.0.0.1:9", 0, None).await.unwrap();
        assert!(!client.is_connected());

        client.send_request(Mutation::Heal { amount: 5 }).await.unwrap();
        assert_eq!(client.game_state().pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_connected_packet_selects_hero() {
        let mut client = Client::new("127.0.0.1:9", 0, Some(HeroType::Wizard))
            .await
            .unwrap();

        client
            .handle_packet(Packet::Connected {
                client_id: 3,
                entity_id: 12,
            })
            .await;

        assert!(client.is_connected());
        assert_eq!(client.game_state().client_id, Some(3));
        assert_eq!(client.game_state().pending_requests(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_packet() {
        let mut client = Client::new("127.0.0.1:9", 0, None).await.unwrap();
        client
            .handle_packet(Packet::Connected {
                client_id: 1,
                entity_id: 1,
            })
            .await;
        client
            .handle_packet(Packet::Disconnected {
                reason: "Server shutting down".to_string(),
            })
            .await;

        assert!(!client.is_connected());
        assert!(client.game_state().confirmed.is_empty());
        assert_eq!(client.game_state().entity_id, None);
    }

    #[tokio::test]
    async fn test_roster_packet_drops_departed_entities() {
        let mut client = Client::new("127.0.0.1:9", 0, None).await.unwrap();
        let events: Vec<ReplicationEvent> = [1, 2]
            .into_iter()
            .map(|entity| ReplicationEvent {
                entity,
                field: Field::Health,
                value: FieldValue::Int(100),
                version: 1,
            })
            .collect();
        client
            .handle_packet(Packet::Replicate {
                events,
                last_processed_request: HashMap::new(),
            })
            .await;

        client
            .handle_packet(Packet::Roster {
                live: vec![2],
                allocated_below: 3,
            })
            .await;

        assert_eq!(client.game_state().confirmed.entity_ids(), vec![2]);
    }
}
