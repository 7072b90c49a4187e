//! Session lifecycle shared by the client and server binaries
//!
//! [`ConnectionManager`] owns the connection state and decides what the
//! transport should do next. It performs no I/O itself: every public operation
//! returns [`ConnectionAction`]s for the caller to execute, and the caller
//! reports transport outcomes back through the `on_*` methods. Time-driven
//! behavior (reconnect attempts, handshake timeouts) is scheduled on a
//! [`TimerQueue`] and fired from [`ConnectionManager::poll`].
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     |             | lost (client)
//!                     v             v
//!                   Error <--- Reconnecting
//! ```

use log::{info, warn};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;

use crate::config::ReconnectConfig;
use crate::events::{EventBus, Subscription, SubscriptionId};
use crate::timers::{TimerId, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Server and local client in one process
    Host,
    /// Dedicated server
    Server,
    Client,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("failed to start host: {0}")]
    HostStartFailed(String),
    #[error("failed to start server: {0}")]
    ServerStartFailed(String),
    #[error("failed to start client: {0}")]
    ClientStartFailed(String),
    #[error("a connection is already active or in progress")]
    DuplicateConnection,
    #[error("connection attempt too soon, retry in {remaining:.1}s")]
    RapidReconnect { remaining: f64 },
    #[error("gave up after {0} reconnection attempts")]
    MaxReconnectAttempts(u32),
    #[error("ping of {rtt_ms:.0}ms exceeds the {limit_ms:.0}ms limit")]
    HighPing { rtt_ms: f64, limit_ms: f64 },
    #[error("server rejected connection ({code}): {reason}")]
    Rejected { code: u16, reason: String },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("only a host or server may do this")]
    NotAuthoritative,
    #[error("kicked by server: {0}")]
    Kicked(String),
}

impl ConnectionError {
    /// Stable numeric code for UI and logs
    pub fn code(&self) -> u16 {
        match self {
            ConnectionError::HostStartFailed(_) => 100,
            ConnectionError::ServerStartFailed(_) => 101,
            ConnectionError::ClientStartFailed(_) => 102,
            ConnectionError::DuplicateConnection => 103,
            ConnectionError::RapidReconnect { .. } => 104,
            ConnectionError::MaxReconnectAttempts(_) => 105,
            ConnectionError::HighPing { .. } => 106,
            ConnectionError::Rejected { .. } => 107,
            ConnectionError::ConnectionLost(_) => 108,
            ConnectionError::NotAuthoritative => 109,
            ConnectionError::Kicked(_) => 110,
        }
    }
}

/// Work the transport must carry out on behalf of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    StartServer { port: u16 },
    Connect { addr: SocketAddr },
    CloseTransport,
    Kick { client_id: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Error(ConnectionError),
    ReconnectScheduled {
        attempt: u32,
        at: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scheduled {
    ReconnectAttempt,
    ConnectTimeout,
}

pub struct ConnectionManager {
    config: ReconnectConfig,
    state: ConnectionState,
    role: Option<ConnectionRole>,
    target: Option<SocketAddr>,
    last_user_attempt: Option<f64>,
    reconnect_attempts: u32,
    timers: TimerQueue<Scheduled>,
    pending: Vec<TimerId>,
    last_error: Option<ConnectionError>,
    high_ping: bool,
    local_client_id: Option<u32>,
    events: EventBus<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            role: None,
            target: None,
            last_user_attempt: None,
            reconnect_attempts: 0,
            timers: TimerQueue::new(),
            pending: Vec::new(),
            last_error: None,
            high_ping: false,
            local_client_id: None,
            events: EventBus::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Option<ConnectionRole> {
        self.role
    }

    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn local_client_id(&self) -> Option<u32> {
        self.local_client_id
    }

    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    pub fn subscribe(&mut self) -> Subscription<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Runs a server and connects a local client to it
    pub fn start_host(
        &mut self,
        port: u16,
        now: f64,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.begin_user_attempt(now)?;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        self.role = Some(ConnectionRole::Host);
        self.target = Some(addr);
        self.transition(ConnectionState::Connecting);
        self.arm_connect_timeout(now);
        info!("Starting host on port {}", port);
        Ok(vec![
            ConnectionAction::StartServer { port },
            ConnectionAction::Connect { addr },
        ])
    }

    /// Runs a dedicated server; completes on [`Self::on_transport_started`]
    pub fn start_server(
        &mut self,
        port: u16,
        now: f64,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.begin_user_attempt(now)?;
        self.role = Some(ConnectionRole::Server);
        self.target = None;
        self.transition(ConnectionState::Connecting);
        info!("Starting dedicated server on port {}", port);
        Ok(vec![ConnectionAction::StartServer { port }])
    }

    pub fn start_client(
        &mut self,
        address: &str,
        port: u16,
        now: f64,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let ip: IpAddr = match address.parse() {
            Ok(ip) => ip,
            Err(_) => {
                let err = ConnectionError::ClientStartFailed(format!("invalid address '{address}'"));
                self.report(err.clone());
                return Err(err);
            }
        };
        self.begin_user_attempt(now)?;
        let addr = SocketAddr::new(ip, port);
        self.role = Some(ConnectionRole::Client);
        self.target = Some(addr);
        self.transition(ConnectionState::Connecting);
        self.arm_connect_timeout(now);
        info!("Connecting to {}", addr);
        Ok(vec![ConnectionAction::Connect { addr }])
    }

    /// User-requested shutdown; cancels any reconnection in flight
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.cancel_timers();
        self.reconnect_attempts = 0;
        self.local_client_id = None;
        self.high_ping = false;
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        self.transition(ConnectionState::Disconnected);
        vec![ConnectionAction::CloseTransport]
    }

    pub fn kick(&mut self, client_id: u32, reason: &str) -> Result<ConnectionAction, ConnectionError> {
        let authoritative = matches!(
            self.role,
            Some(ConnectionRole::Host) | Some(ConnectionRole::Server)
        ) && self.state == ConnectionState::Connected;

        if !authoritative {
            return Err(ConnectionError::NotAuthoritative);
        }
        Ok(ConnectionAction::Kick {
            client_id,
            reason: reason.to_string(),
        })
    }

    /// Dedicated server socket is bound
    pub fn on_transport_started(&mut self) {
        if self.role == Some(ConnectionRole::Server) && self.state == ConnectionState::Connecting {
            self.transition(ConnectionState::Connected);
        }
    }

    /// Handshake completed
    pub fn on_connected(&mut self, client_id: u32) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            return;
        }
        self.cancel_timers();
        self.reconnect_attempts = 0;
        self.local_client_id = Some(client_id);
        self.transition(ConnectionState::Connected);
    }

    /// Socket bind or handshake send failed before a session existed
    pub fn on_start_failed(&mut self, reason: &str, now: f64) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Reconnecting {
            return self.on_attempt_failed(now);
        }
        let err = match self.role {
            Some(ConnectionRole::Host) => ConnectionError::HostStartFailed(reason.to_string()),
            Some(ConnectionRole::Server) => ConnectionError::ServerStartFailed(reason.to_string()),
            _ => ConnectionError::ClientStartFailed(reason.to_string()),
        };
        self.fail(err)
    }

    pub fn on_rejected(&mut self, code: u16, reason: &str) -> Vec<ConnectionAction> {
        self.fail(ConnectionError::Rejected {
            code,
            reason: reason.to_string(),
        })
    }

    pub fn on_kicked(&mut self, reason: &str) -> Vec<ConnectionAction> {
        self.fail(ConnectionError::Kicked(reason.to_string()))
    }

    /// An established session dropped; clients try to get it back
    pub fn on_connection_lost(&mut self, reason: &str, now: f64) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        self.local_client_id = None;

        if self.role != Some(ConnectionRole::Client) || self.target.is_none() {
            return self.fail(ConnectionError::ConnectionLost(reason.to_string()));
        }

        warn!("Connection lost: {}", reason);
        self.last_error = Some(ConnectionError::ConnectionLost(reason.to_string()));
        self.events
            .publish(ConnectionEvent::Error(ConnectionError::ConnectionLost(
                reason.to_string(),
            )));
        self.reconnect_attempts = 0;
        self.transition(ConnectionState::Reconnecting);
        self.schedule_reconnect(now);
        vec![ConnectionAction::CloseTransport]
    }

    /// Edge-triggered: one event each time RTT crosses above the limit
    pub fn report_rtt(&mut self, rtt: f64) {
        if rtt > self.config.max_allowed_ping {
            if !self.high_ping {
                self.high_ping = true;
                self.report(ConnectionError::HighPing {
                    rtt_ms: rtt * 1000.0,
                    limit_ms: self.config.max_allowed_ping * 1000.0,
                });
            }
        } else {
            self.high_ping = false;
        }
    }

    /// Fires due reconnect attempts and handshake timeouts
    pub fn poll(&mut self, now: f64) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        for scheduled in self.timers.pop_due(now) {
            match scheduled {
                Scheduled::ReconnectAttempt => {
                    if self.state != ConnectionState::Reconnecting {
                        continue;
                    }
                    let Some(addr) = self.target else {
                        continue;
                    };
                    self.reconnect_attempts += 1;
                    info!(
                        "Reconnection attempt {}/{} to {}",
                        self.reconnect_attempts, self.config.max_attempts, addr
                    );
                    self.arm_connect_timeout(now);
                    actions.push(ConnectionAction::Connect { addr });
                }
                Scheduled::ConnectTimeout => match self.state {
                    ConnectionState::Connecting => {
                        actions.extend(self.on_start_failed("handshake timed out", now));
                    }
                    ConnectionState::Reconnecting => {
                        actions.extend(self.on_attempt_failed(now));
                    }
                    _ => {}
                },
            }
        }
        self.pending.retain(|id| self.timers.is_pending(*id));
        actions
    }

    fn on_attempt_failed(&mut self, now: f64) -> Vec<ConnectionAction> {
        self.cancel_timers();
        if self.reconnect_attempts >= self.config.max_attempts {
            return self.fail(ConnectionError::MaxReconnectAttempts(self.reconnect_attempts));
        }
        self.schedule_reconnect(now);
        Vec::new()
    }

    fn begin_user_attempt(&mut self, now: f64) -> Result<(), ConnectionError> {
        if let Some(last) = self.last_user_attempt {
            let elapsed = now - last;
            if elapsed < self.config.cooldown {
                let err = ConnectionError::RapidReconnect {
                    remaining: self.config.cooldown - elapsed,
                };
                self.report(err.clone());
                return Err(err);
            }
        }

        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            let err = ConnectionError::DuplicateConnection;
            self.report(err.clone());
            return Err(err);
        }

        // A new request supersedes a reconnection in flight
        self.cancel_timers();
        self.last_user_attempt = Some(now);
        self.reconnect_attempts = 0;
        self.last_error = None;
        self.high_ping = false;
        Ok(())
    }

    fn schedule_reconnect(&mut self, now: f64) {
        let at = now + self.config.interval;
        let id = self.timers.schedule(at, Scheduled::ReconnectAttempt);
        self.pending.push(id);
        self.events.publish(ConnectionEvent::ReconnectScheduled {
            attempt: self.reconnect_attempts + 1,
            at,
        });
    }

    fn arm_connect_timeout(&mut self, now: f64) {
        let id = self
            .timers
            .schedule(now + self.config.connect_timeout, Scheduled::ConnectTimeout);
        self.pending.push(id);
    }

    fn cancel_timers(&mut self) {
        for id in self.pending.drain(..) {
            self.timers.cancel(id);
        }
    }

    fn fail(&mut self, err: ConnectionError) -> Vec<ConnectionAction> {
        self.cancel_timers();
        self.local_client_id = None;
        self.report(err);
        if self.state == ConnectionState::Error {
            return Vec::new();
        }
        self.transition(ConnectionState::Error);
        vec![ConnectionAction::CloseTransport]
    }

    fn report(&mut self, err: ConnectionError) {
        warn!("Connection error {}: {}", err.code(), err);
        self.last_error = Some(err.clone());
        self.events.publish(ConnectionEvent::Error(err));
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Connection state {} -> {}", from, to);
        self.state = to;
        self.events.publish(ConnectionEvent::StateChanged { from, to });
    }
}
