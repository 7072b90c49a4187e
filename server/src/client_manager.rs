//! Client connection management and input queuing for the multiplayer server
//!
//! This module handles the server-side management of connected clients, including:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Per-client input queues applied in sequence order
//! - Round-trip time estimates used by lag compensation
//! - Client capacity and duplicate connection enforcement
//!
//! The client manager is the session registry: every other subsystem refers to
//! a connection by the client id handed out here.

use log::info;
use shared::protocol::MovementInput;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use thiserror::Error;

use crate::input_validation::InputRejection;
use crate::lag_compensation::LatencySource;

/// Weight of a new RTT sample in the smoothed estimate
const RTT_SMOOTHING: f64 = 0.2;

/// Why a connection attempt was refused
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionRejection {
    #[error("Server full")]
    ServerFull,
    #[error("Already connected from this address")]
    DuplicateConnection,
    #[error("Protocol version mismatch (client {client}, server {server})")]
    VersionMismatch { client: u32, server: u32 },
}

impl ConnectionRejection {
    /// Code carried in `Packet::ConnectionRejected`
    pub fn code(&self) -> u16 {
        match self {
            ConnectionRejection::ServerFull => 1,
            ConnectionRejection::DuplicateConnection => 2,
            ConnectionRejection::VersionMismatch { .. } => 3,
        }
    }
}

/// Represents a connected client and their input state
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Server time we last received any packet from this client
    pub last_seen: f64,
    /// Smoothed round-trip time in seconds, once measured
    pub rtt: Option<f64>,
    /// Newest sequence accepted into the queue
    pub last_accepted_sequence: u32,
    /// Frame of the newest accepted input
    pub last_input_frame: Option<u32>,
    /// Highest input sequence number applied to the simulation
    pub last_processed_input: u32,
    /// Validated inputs waiting for the next tick, oldest first
    pub pending_inputs: VecDeque<MovementInput>,
    /// Newest cast or attack request id seen
    pub last_request_id: u32,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, now: f64) -> Self {
        Self {
            id,
            addr,
            last_seen: now,
            rtt: None,
            last_accepted_sequence: 0,
            last_input_frame: None,
            last_processed_input: 0,
            pending_inputs: VecDeque::new(),
            last_request_id: 0,
        }
    }

    /// Queues an already validated input. Sequences only move forward, so
    /// the queue stays ordered without sorting.
    pub fn add_input(&mut self, input: MovementInput, max_pending: usize) -> Result<(), InputRejection> {
        if self.pending_inputs.len() >= max_pending {
            return Err(InputRejection::QueueFull);
        }
        self.last_accepted_sequence = input.sequence;
        self.last_input_frame = Some(input.frame);
        self.pending_inputs.push_back(input);
        Ok(())
    }

    /// Request ids are never 0 and strictly increase, so each request is
    /// answered at most once
    pub fn accept_request_id(&mut self, request_id: u32) -> bool {
        if request_id == 0 || request_id <= self.last_request_id {
            return false;
        }
        self.last_request_id = request_id;
        true
    }

    pub fn is_timed_out(&self, now: f64, timeout: f64) -> bool {
        now - self.last_seen > timeout
    }

    pub fn record_rtt_sample(&mut self, sample: f64) {
        if !sample.is_finite() || sample < 0.0 {
            return;
        }
        self.rtt = Some(match self.rtt {
            Some(rtt) => rtt + (sample - rtt) * RTT_SMOOTHING,
            None => sample,
        });
    }
}

/// Manages all connected clients and their input processing
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection; an address that is already connected is
    /// rejected rather than merged into the existing session
    pub fn add_client(&mut self, addr: SocketAddr, now: f64) -> Result<u32, ConnectionRejection> {
        if self.find_client_by_addr(addr).is_some() {
            return Err(ConnectionRejection::DuplicateConnection);
        }
        if self.clients.len() >= self.max_clients {
            return Err(ConnectionRejection::ServerFull);
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr, now));

        Ok(client_id)
    }

    pub fn remove_client(&mut self, client_id: u32) -> Option<Client> {
        let removed = self.clients.remove(&client_id);
        if let Some(client) = &removed {
            info!("Client {} disconnected", client.id);
        }
        removed
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    pub fn touch(&mut self, client_id: u32, now: f64) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = client.last_seen.max(now);
        }
    }

    pub fn add_input(
        &mut self,
        client_id: u32,
        input: MovementInput,
        max_pending: usize,
    ) -> Result<(), InputRejection> {
        match self.clients.get_mut(&client_id) {
            Some(client) => client.add_input(input, max_pending),
            None => Ok(()),
        }
    }

    /// False for unknown clients and for zero, replayed or stale request ids
    pub fn accept_request_id(&mut self, client_id: u32, request_id: u32) -> bool {
        self.clients
            .get_mut(&client_id)
            .map_or(false, |client| client.accept_request_id(request_id))
    }

    /// Removes up to `max` of a client's oldest pending inputs
    pub fn take_inputs(&mut self, client_id: u32, max: usize) -> Vec<MovementInput> {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                let count = max.min(client.pending_inputs.len());
                client.pending_inputs.drain(..count).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn mark_input_processed(&mut self, client_id: u32, sequence: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_processed_input = client.last_processed_input.max(sequence);
        }
    }

    pub fn record_rtt_sample(&mut self, client_id: u32, sample: f64) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.record_rtt_sample(sample);
        }
    }

    /// Removes clients silent for longer than `timeout` and returns their ids
    pub fn check_timeouts(&mut self, now: f64, timeout: f64) -> Vec<u32> {
        let mut timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(now, timeout))
            .map(|(id, _)| *id)
            .collect();
        timed_out.sort_unstable();

        for client_id in &timed_out {
            self.remove_client(*client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        let mut addrs: Vec<(u32, SocketAddr)> = self
            .clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect();
        addrs.sort_unstable_by_key(|(id, _)| *id);
        addrs
    }

    /// Client ids in ascending order, the order inputs are applied each tick
    pub fn client_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl LatencySource for ClientManager {
    fn rtt(&self, client_id: u32) -> Option<f64> {
        self.clients.get(&client_id).and_then(|client| client.rtt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec2;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn input(sequence: u32) -> MovementInput {
        MovementInput::new(Vec2::X, false, false, sequence, 0.0, sequence)
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(1, test_addr(), 3.0);

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, test_addr());
        assert_eq!(client.last_processed_input, 0);
        assert!(client.pending_inputs.is_empty());
        assert!(client.rtt.is_none());
    }

    #[test]
    fn test_request_ids_must_increase() {
        let mut manager = ClientManager::new(4);
        let id = manager.add_client(test_addr(), 0.0).unwrap();

        assert!(!manager.accept_request_id(id, 0));
        assert!(manager.accept_request_id(id, 5));
        assert!(!manager.accept_request_id(id, 5));
        assert!(!manager.accept_request_id(id, 3));
        assert!(manager.accept_request_id(id, 6));
        assert!(!manager.accept_request_id(99, 7));
        assert_eq!(manager.get(id).unwrap().last_request_id, 6);
    }

    #[test]
    fn test_client_timeout() {
        let client = Client::new(1, test_addr(), 0.0);

        assert!(!client.is_timed_out(1.0, 5.0));
        assert!(client.is_timed_out(5.5, 5.0));
    }

    #[test]
    fn test_add_client() {
        let mut manager = ClientManager::new(2);

        let client_id = manager.add_client(test_addr(), 0.0).unwrap();
        assert_eq!(client_id, 1);
        assert_eq!(manager.len(), 1);
        assert!(!manager.is_empty());
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);

        assert!(manager.add_client(test_addr(), 0.0).is_ok());
        assert_eq!(
            manager.add_client(test_addr2(), 0.0),
            Err(ConnectionRejection::ServerFull)
        );
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut manager = ClientManager::new(4);

        let first = manager.add_client(test_addr(), 0.0).unwrap();
        assert_eq!(
            manager.add_client(test_addr(), 1.0),
            Err(ConnectionRejection::DuplicateConnection)
        );
        assert_eq!(manager.find_client_by_addr(test_addr()), Some(first));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let client_id = manager.add_client(test_addr(), 0.0).unwrap();

        assert!(manager.remove_client(client_id).is_some());
        assert!(manager.remove_client(client_id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = ClientManager::new(2);
        let client_id1 = manager.add_client(test_addr(), 0.0).unwrap();
        manager.add_client(test_addr2(), 0.0).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));

        let unknown_addr: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown_addr), None);
    }

    #[test]
    fn test_inputs_taken_in_order_and_bounded() {
        let mut manager = ClientManager::new(2);
        let id = manager.add_client(test_addr(), 0.0).unwrap();

        for sequence in 1..=5 {
            manager.add_input(id, input(sequence), 64).unwrap();
        }

        let taken: Vec<u32> = manager.take_inputs(id, 2).iter().map(|i| i.sequence).collect();
        assert_eq!(taken, vec![1, 2]);
        let taken: Vec<u32> = manager.take_inputs(id, 10).iter().map(|i| i.sequence).collect();
        assert_eq!(taken, vec![3, 4, 5]);
        assert_eq!(manager.get(id).unwrap().last_accepted_sequence, 5);
    }

    #[test]
    fn test_pending_queue_is_bounded() {
        let mut manager = ClientManager::new(2);
        let id = manager.add_client(test_addr(), 0.0).unwrap();

        manager.add_input(id, input(1), 2).unwrap();
        manager.add_input(id, input(2), 2).unwrap();
        assert_eq!(
            manager.add_input(id, input(3), 2),
            Err(InputRejection::QueueFull)
        );
        assert_eq!(manager.get(id).unwrap().last_accepted_sequence, 2);
    }

    #[test]
    fn test_rtt_smoothing() {
        let mut manager = ClientManager::new(2);
        let id = manager.add_client(test_addr(), 0.0).unwrap();
        assert_eq!(manager.rtt(id), None);

        manager.record_rtt_sample(id, 0.1);
        assert_approx_eq!(manager.rtt(id).unwrap(), 0.1, 1e-9);

        manager.record_rtt_sample(id, 0.2);
        assert_approx_eq!(manager.rtt(id).unwrap(), 0.12, 1e-9);

        manager.record_rtt_sample(id, f64::NAN);
        assert_approx_eq!(manager.rtt(id).unwrap(), 0.12, 1e-9);
    }

    #[test]
    fn test_check_timeouts_removes_silent_clients() {
        let mut manager = ClientManager::new(3);
        let quiet = manager.add_client(test_addr(), 0.0).unwrap();
        let active = manager.add_client(test_addr2(), 0.0).unwrap();
        manager.touch(active, 4.0);

        assert_eq!(manager.check_timeouts(6.0, 5.0), vec![quiet]);
        assert!(manager.get(quiet).is_none());
        assert!(manager.get(active).is_some());
    }
}
