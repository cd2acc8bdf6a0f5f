//! Client connection management and request queuing for the arena server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Request buffering with duplicate and stale sequence rejection
//! - Fair cross-client ordering that keeps each client's requests in sequence
//! - Capacity limits and address tracking
//!
//! The client manager never applies a request itself. It hands ordered
//! requests to the match, which re-validates them as the server.

use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tpk_shared::{Mutation, PlayerId};

/// Default silence after which a client is dropped.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A buffered request waiting for the next server tick
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub sequence: u32,
    pub mutation: Mutation,
    /// Arrival stamp used to interleave clients fairly
    received: u64,
}

/// Represents a connected client and their request state
///
/// Each client maintains:
/// - Connection metadata (ID, address, last activity)
/// - The highest request sequence already processed
/// - Buffered requests sorted by sequence
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: PlayerId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest request sequence number we've processed
    pub last_processed_request: u32,
    /// Buffered requests waiting to be processed
    pub pending_requests: Vec<PendingRequest>,
}

impl Client {
    /// Creates a new client with the given ID and network address
    pub fn new(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_processed_request: 0,
            pending_requests: Vec::new(),
        }
    }

    /// Buffers a request unless its sequence was already processed or queued
    ///
    /// Returns `false` for duplicates and stale retransmissions.
    fn add_request(&mut self, sequence: u32, mutation: Mutation, received: u64) -> bool {
        self.last_seen = Instant::now();

        if sequence <= self.last_processed_request
            || self.pending_requests.iter().any(|r| r.sequence == sequence)
        {
            return false;
        }

        self.pending_requests.push(PendingRequest {
            sequence,
            mutation,
            received,
        });
        // Sort by sequence to handle out-of-order packet delivery
        self.pending_requests.sort_by_key(|r| r.sequence);
        true
    }

    /// Marks the client as alive without queuing anything
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients and their buffered requests
pub struct ClientManager {
    clients: HashMap<PlayerId, Client>,
    next_client_id: PlayerId,
    max_clients: usize,
    timeout: Duration,
    arrivals: u64,
}

impl ClientManager {
    /// Creates a manager accepting at most `max_clients` connections
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout: CLIENT_TIMEOUT,
            arrivals: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers a new client, returning its ID or `None` when full
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        // Enforce server capacity limits
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &PlayerId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get_client_addr(&self, client_id: PlayerId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Queues a request for a known client
    ///
    /// Returns `false` if the client is unknown or the request is a
    /// duplicate or stale retransmission.
    pub fn add_request(&mut self, client_id: PlayerId, sequence: u32, mutation: Mutation) -> bool {
        let received = self.arrivals;
        let Some(client) = self.clients.get_mut(&client_id) else {
            return false;
        };

        let queued = client.add_request(sequence, mutation, received);
        if queued {
            self.arrivals += 1;
        } else {
            debug!("Dropped repeated request {} from client {}", sequence, client_id);
        }
        queued
    }

    pub fn touch(&mut self, client_id: PlayerId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
        }
    }

    /// Takes every pending request in processing order
    ///
    /// Each client's requests come out in sequence order. Across clients the
    /// arrival stamps decide, so one chatty client cannot starve another.
    pub fn take_ordered_requests(&mut self) -> Vec<(PlayerId, u32, Mutation)> {
        let mut all_requests: Vec<(u64, PlayerId, u32, Mutation)> = Vec::new();

        for (client_id, client) in &mut self.clients {
            let mut stamps: Vec<u64> = client.pending_requests.iter().map(|r| r.received).collect();
            stamps.sort_unstable();

            for (request, stamp) in client.pending_requests.drain(..).zip(stamps) {
                all_requests.push((stamp, *client_id, request.sequence, request.mutation));
            }
        }

        all_requests.sort_by_key(|(stamp, ..)| *stamp);
        all_requests
            .into_iter()
            .map(|(_, client_id, sequence, mutation)| (client_id, sequence, mutation))
            .collect()
    }

    pub fn mark_request_processed(&mut self, client_id: PlayerId, sequence: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_processed_request = client.last_processed_request.max(sequence);
        }
    }

    pub fn get_last_processed_requests(&self) -> HashMap<PlayerId, u32> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.last_processed_request))
            .collect()
    }

    /// Removes and returns clients that have been silent for too long
    pub fn check_timeouts(&mut self) -> Vec<PlayerId> {
        let timeout = self.timeout;
        let timed_out: Vec<PlayerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        // Remove timed-out clients
        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(PlayerId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
