//! Server network layer handling UDP communications and match loop coordination

use crate::client_manager::ClientManager;
use crate::game::{Match, MatchConfig};
use crate::replication::GameMessage;
use crate::spawns::{ArenaSpawns, SpawnLocator};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tpk_shared::{Packet, PlayerId, PROTOCOL_VERSION};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: PlayerId },
    Shutdown,
}

/// Main server coordinating networking and the authoritative match
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game: Match,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        config: MatchConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_spawns(addr, tick_duration, max_clients, config, Box::new(ArenaSpawns::new())).await
    }

    pub async fn with_spawns(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        config: MatchConfig,
        spawns: Box<dyn SpawnLocator + Send + Sync>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game: Match::new(config, spawns, game_tx),
            tick_duration,
            server_tx,
            server_rx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for asking a running server to stop.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::SendToClient { packet, client_id } => {
                        let addr = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addr(client_id)
                        };

                        match addr {
                            Some(addr) => {
                                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await
                                {
                                    error!("Failed to send to client {}: {}", client_id, e);
                                }
                            }
                            None => debug!("Dropping packet for departed client {}", client_id),
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Replies directly to an address that may not be a registered client
    async fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        let data = match serialize(&packet) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode reply to {}: {}", addr, e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&data, addr).await {
            error!("Failed to send packet to {}: {}", addr, e);
        }
    }

    async fn remove_client(&mut self, client_id: PlayerId) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id);
        }
        if let Err(e) = self.game.on_leave(client_id) {
            debug!("Client {} had no hero to remove: {}", client_id, e);
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_packet(response, addr).await;
                    return;
                }

                // Remove existing connection if present
                let existing_client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.remove_client(existing_id).await;
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr)
                };

                let Some(client_id) = client_id else {
                    let response = Packet::Disconnected {
                        reason: "Server full".to_string(),
                    };
                    self.send_packet(response, addr).await;
                    return;
                };

                match self.game.on_join(client_id, Instant::now()) {
                    Ok(entity_id) => {
                        let response = Packet::Connected {
                            client_id,
                            entity_id,
                        };
                        self.send_packet(response, addr).await;
                    }
                    Err(e) => {
                        warn!("Client {} could not join: {}", client_id, e);
                        {
                            let mut clients = self.clients.write().await;
                            clients.remove_client(&client_id);
                        }
                        let response = Packet::Disconnected {
                            reason: e.to_string(),
                        };
                        self.send_packet(response, addr).await;
                    }
                }
            }

            Packet::Request { sequence, mutation } => {
                let mut clients = self.clients.write().await;
                match clients.find_client_by_addr(addr) {
                    Some(client_id) => {
                        clients.add_request(client_id, sequence, mutation);
                    }
                    None => debug!("Request from unknown address {}", addr),
                }
            }

            Packet::Heartbeat => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.touch(client_id);
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    self.remove_client(client_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Applies every buffered request in order and records the acknowledgements
    async fn process_requests(&mut self, now: Instant) {
        let requests = {
            let mut clients = self.clients.write().await;
            clients.take_ordered_requests()
        };

        if requests.is_empty() {
            return;
        }

        let mut processed = Vec::with_capacity(requests.len());
        for (client_id, sequence, mutation) in requests {
            // Failures are logged by the match; the request still counts as processed.
            let _ = self.game.handle_request(client_id, sequence, mutation, now);
            processed.push((client_id, sequence));
        }

        let mut clients = self.clients.write().await;
        for (client_id, sequence) in processed {
            clients.mark_request_processed(client_id, sequence);
        }
    }

    async fn shutdown(&mut self) {
        self.game.teardown();

        let client_addrs = {
            let clients = self.clients.read().await;
            clients.get_client_addrs()
        };
        for (_, addr) in client_addrs {
            let response = Packet::Disconnected {
                reason: "Server shutting down".to_string(),
            };
            self.send_packet(response, addr).await;
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            if let Err(e) = self.game.on_leave(client_id) {
                                debug!("Timed out client {} had no hero: {}", client_id, e);
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            self.shutdown().await;
                            break;
                        }
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    self.shutdown().await;
                    break;
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.process_requests(now).await;
                    self.game.tick(now);

                    // Periodic performance monitoring
                    if self.game.tick % 60 == 0 {
                        let client_count = {
                            let clients = self.clients.read().await;
                            clients.len()
                        };

                        if client_count > 0 {
                            debug!("Tick {}: {} clients, {:.1}Hz, phase {:?}",
                                   self.game.tick, client_count, 1.0 / dt, self.game.phase().phase());
                        }
                    }
                },
            }
        }

        Ok(())
    }

    pub fn game(&self) -> &Match {
        &self.game
    }
}
