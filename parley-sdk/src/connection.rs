//! Connection lifecycle state machine.
//!
//! The machine does no I/O. Each trigger (`connect`, `handshake_succeeded`,
//! `connection_lost`, `timer_fired`, ...) checks its pre-state, moves to the
//! post-state and returns the [`Action`]s the driver must carry out: dial,
//! arm or cancel the reconnect timer, pull history, close the socket, emit
//! events. The driver in [`crate::client`] serializes all triggers on one
//! task.
//!
//! ```text
//! Disconnected --connect()-------------> Connecting
//! Connecting   --handshake ok----------> Open
//! Connecting   --handshake fail/timeout-> Reconnecting
//! Open         --remote close / error--> Reconnecting
//! Open         --disconnect()----------> Closing --> Disconnected
//! Reconnecting --timer fires-----------> Connecting
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::auth::{AuthTokenGateway, Credential};
use crate::backoff::ReconnectPolicy;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::feed::FeedEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub next_delay: Duration,
}

/// Identifies one armed reconnect timer. A firing with a stale id is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Identifies one dial. Results for a stale attempt are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

/// Side effects requested by a transition, in order.
#[derive(Debug, Clone)]
pub enum Action {
    Dial {
        attempt: AttemptId,
        credential: Credential,
    },
    AbortDial {
        attempt: AttemptId,
    },
    ScheduleReconnect {
        timer: TimerId,
        delay: Duration,
    },
    CancelReconnect {
        timer: TimerId,
    },
    PullHistory,
    CloseSocket,
    Emit(Event),
}

#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    reconnect: ReconnectState,
    pending_timer: Option<TimerId>,
    in_flight: Option<AttemptId>,
    /// Set once the session has gone through `Reconnecting`; the next `Open`
    /// re-pulls history.
    resuming: bool,
    next_id: u64,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl ConnectionStateMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            reconnect: ReconnectState::default(),
            pending_timer: None,
            in_flight: None,
            resuming: false,
            next_id: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.reconnect
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    pub fn in_flight(&self) -> Option<AttemptId> {
        self.in_flight
    }

    /// Start a session. History is pulled alongside the first dial.
    ///
    /// Fails with [`Error::NotAuthenticated`] (state unchanged) when the
    /// gateway holds no credential, and with [`Error::AlreadyConnecting`]
    /// while a dial is in flight. In any other live state this is a no-op.
    pub fn connect(&mut self, gateway: &AuthTokenGateway) -> Result<Vec<Action>> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => return Err(Error::AlreadyConnecting),
            other => {
                tracing::debug!(state = %other, "connect ignored, session already live");
                return Ok(Vec::new());
            }
        }
        let credential = gateway.credential()?;

        let mut actions = Vec::new();
        self.resuming = false;
        self.transition(ConnectionState::Connecting, &mut actions);
        actions.push(Action::PullHistory);
        self.dial(credential, &mut actions);
        Ok(actions)
    }

    /// The dial for `attempt` completed its handshake.
    pub fn handshake_succeeded(&mut self, attempt: AttemptId) -> Vec<Action> {
        if !self.is_current(attempt) {
            tracing::debug!(?attempt, "ignoring stale handshake");
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.in_flight = None;
        self.reconnect = ReconnectState::default();
        self.transition(ConnectionState::Open, &mut actions);
        actions.push(Action::Emit(Event::Connected));
        if std::mem::take(&mut self.resuming) {
            actions.push(Action::PullHistory);
        }
        actions
    }

    /// The dial for `attempt` failed or timed out.
    pub fn handshake_failed(&mut self, attempt: AttemptId, reason: &str) -> Vec<Action> {
        if !self.is_current(attempt) {
            return Vec::new();
        }
        tracing::debug!(reason, "handshake failed");
        self.in_flight = None;
        let mut actions = Vec::new();
        self.enter_reconnecting(&mut actions);
        actions
    }

    /// The dial for `attempt` was refused because of the credential.
    pub fn handshake_rejected(&mut self, attempt: AttemptId, reason: &str) -> Vec<Action> {
        if !self.is_current(attempt) {
            return Vec::new();
        }
        self.authentication_rejected(reason)
    }

    /// The open stream closed or errored.
    pub fn connection_lost(&mut self, reason: &str) -> Vec<Action> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }
        tracing::info!(reason, "live stream lost");
        let mut actions = vec![Action::CloseSocket];
        self.enter_reconnecting(&mut actions);
        actions
    }

    /// The reconnect timer fired. Only the currently armed timer moves the
    /// machine back to `Connecting`.
    pub fn timer_fired(&mut self, timer: TimerId, gateway: &AuthTokenGateway) -> Vec<Action> {
        if self.state != ConnectionState::Reconnecting || self.pending_timer != Some(timer) {
            tracing::debug!(?timer, "ignoring stale reconnect timer");
            return Vec::new();
        }
        self.pending_timer = None;
        let mut actions = Vec::new();
        self.redial(gateway, &mut actions);
        actions
    }

    /// Foreground/visibility trigger: if a reconnect is waiting on its timer,
    /// cancel the timer and dial now. The attempt count is kept.
    pub fn check_liveness(&mut self, gateway: &AuthTokenGateway) -> Vec<Action> {
        let Some(timer) = self.pending_timer.filter(|_| self.state == ConnectionState::Reconnecting)
        else {
            return Vec::new();
        };
        tracing::info!(attempt = self.reconnect.attempt_count, "liveness check, reconnecting now");
        self.pending_timer = None;
        let mut actions = vec![Action::CancelReconnect { timer }];
        self.redial(gateway, &mut actions);
        actions
    }

    /// Caller-initiated end of the session. Cancels any pending timer or dial;
    /// nothing reconnects until the next `connect()`.
    pub fn disconnect(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Closing => return actions,
            ConnectionState::Open => {
                self.transition(ConnectionState::Closing, &mut actions);
                actions.push(Action::CloseSocket);
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.cancel_pending(&mut actions);
            }
        }
        self.reset();
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions.push(Action::Emit(Event::Disconnected {
            reason: "disconnected by user".to_string(),
        }));
        actions
    }

    /// The server rejected the credential (live-stream handshake or history
    /// fetch). Ends the session without scheduling a reconnect.
    pub fn authentication_rejected(&mut self, reason: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == ConnectionState::Disconnected {
            return actions;
        }
        tracing::warn!(reason, "credential rejected");
        if self.state == ConnectionState::Open {
            actions.push(Action::CloseSocket);
        }
        self.cancel_pending(&mut actions);
        self.reset();
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions.push(Action::Emit(Event::AuthFailed {
            reason: reason.to_string(),
        }));
        actions
    }

    /// Parse an inbound payload. Payloads outside `Open` are dropped.
    pub fn inbound(&self, payload: &str, received_at: DateTime<Utc>) -> Result<Option<FeedEntry>> {
        if self.state != ConnectionState::Open {
            return Ok(None);
        }
        FeedEntry::parse(payload, received_at).map(Some)
    }

    fn is_current(&self, attempt: AttemptId) -> bool {
        self.state == ConnectionState::Connecting && self.in_flight == Some(attempt)
    }

    fn redial(&mut self, gateway: &AuthTokenGateway, actions: &mut Vec<Action>) {
        match gateway.credential() {
            Ok(credential) => {
                self.transition(ConnectionState::Connecting, actions);
                self.dial(credential, actions);
            }
            Err(_) => {
                self.reset();
                self.transition(ConnectionState::Disconnected, actions);
                actions.push(Action::Emit(Event::Disconnected {
                    reason: "credential cleared".to_string(),
                }));
            }
        }
    }

    fn dial(&mut self, credential: Credential, actions: &mut Vec<Action>) {
        let attempt = AttemptId(self.fresh_id());
        self.in_flight = Some(attempt);
        actions.push(Action::Dial { attempt, credential });
    }

    fn enter_reconnecting(&mut self, actions: &mut Vec<Action>) {
        let attempt = self.reconnect.attempt_count.saturating_add(1);
        let delay = self.policy.next_delay(attempt);
        self.reconnect = ReconnectState {
            attempt_count: attempt,
            next_delay: delay,
        };
        self.resuming = true;
        self.transition(ConnectionState::Reconnecting, actions);

        let timer = TimerId(self.fresh_id());
        self.pending_timer = Some(timer);
        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        actions.push(Action::Emit(Event::ReconnectScheduled { attempt, delay }));
        actions.push(Action::ScheduleReconnect { timer, delay });
    }

    fn cancel_pending(&mut self, actions: &mut Vec<Action>) {
        if let Some(timer) = self.pending_timer.take() {
            actions.push(Action::CancelReconnect { timer });
        }
        if let Some(attempt) = self.in_flight.take() {
            actions.push(Action::AbortDial { attempt });
        }
    }

    fn reset(&mut self) {
        self.reconnect = ReconnectState::default();
        self.resuming = false;
        self.pending_timer = None;
        self.in_flight = None;
    }

    fn transition(&mut self, to: ConnectionState, actions: &mut Vec<Action>) {
        let from = std::mem::replace(&mut self.state, to);
        tracing::debug!(%from, %to, "connection state");
        actions.push(Action::Emit(Event::StateChanged { from, to }));
    }

    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
