//! Signaling channel state machine with exponential-backoff reconnection
//!
//! The channel does no I/O. The driver opens the socket when told to
//! (`connect()` or a `Connect` action from `poll`), reports what happened
//! through `on_open` / `on_close` / `on_error`, and writes whatever
//! `drain_outbound` hands it.
//!
//! ```text
//! Disconnected ─connect─► Connecting ─open─► Open
//!                             ▲                │ close / error
//!                             │ poll (due)     ▼
//!                        Reconnecting ◄── Closed | Errored ──(attempts > max)──► Failed
//! ```

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored,
    /// Waiting for the backoff timer
    Reconnecting,
    /// Reconnection attempts exhausted; terminal until `connect` is called again
    Failed,
}

/// What the driver should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingAction {
    Connect { attempt: u32 },
}

/// Connectivity changes reported to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingEvent {
    Opened,
    /// An open channel dropped; a reconnection is scheduled
    Lost { retry_in: Duration },
    /// A connection attempt failed; another is scheduled
    RetryScheduled { attempt: u32, retry_in: Duration },
    GaveUp,
}

#[derive(Debug)]
pub struct SignalingChannel {
    policy: ReconnectPolicy,
    state: SignalingState,
    attempt: u32,
    retry_at: Option<Instant>,
    outbound: VecDeque<Vec<u8>>,
}

impl SignalingChannel {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: SignalingState::Disconnected,
            attempt: 0,
            retry_at: None,
            outbound: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SignalingState::Open
    }

    /// Reconnection attempts since the channel was last open
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Starts the first connection. Returns false when the channel is
    /// already connecting or open.
    pub fn connect(&mut self) -> bool {
        match self.state {
            SignalingState::Disconnected | SignalingState::Failed => {
                info!("Signaling connecting");
                self.state = SignalingState::Connecting;
                self.attempt = 0;
                self.retry_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn on_open(&mut self) -> Option<SignalingEvent> {
        if self.state != SignalingState::Connecting {
            debug!("Ignoring open while {:?}", self.state);
            return None;
        }
        info!("Signaling open");
        self.state = SignalingState::Open;
        self.attempt = 0;
        self.retry_at = None;
        Some(SignalingEvent::Opened)
    }

    pub fn on_close(&mut self, now: Instant) -> Option<SignalingEvent> {
        self.handle_failure(now, SignalingState::Closed)
    }

    pub fn on_error(&mut self, now: Instant, reason: &str) -> Option<SignalingEvent> {
        warn!("Signaling error: {}", reason);
        self.handle_failure(now, SignalingState::Errored)
    }

    fn handle_failure(&mut self, now: Instant, failed_state: SignalingState) -> Option<SignalingEvent> {
        let was_open = match self.state {
            SignalingState::Open => true,
            SignalingState::Connecting => false,
            // Stopped, already waiting, or terminal: nothing to schedule
            _ => return None,
        };

        self.state = failed_state;
        self.outbound.clear();
        self.attempt += 1;

        if self.attempt > self.policy.max_attempts {
            warn!(
                "Signaling gave up after {} reconnection attempts",
                self.policy.max_attempts
            );
            self.state = SignalingState::Failed;
            self.retry_at = None;
            return Some(SignalingEvent::GaveUp);
        }

        let retry_in = self.policy.delay_for(self.attempt);
        self.retry_at = Some(now + retry_in);
        self.state = SignalingState::Reconnecting;
        info!(
            "Signaling reconnect attempt {} in {:?}",
            self.attempt, retry_in
        );

        Some(if was_open {
            SignalingEvent::Lost { retry_in }
        } else {
            SignalingEvent::RetryScheduled {
                attempt: self.attempt,
                retry_in,
            }
        })
    }

    /// Fires the reconnection timer when it is due
    pub fn poll(&mut self, now: Instant) -> Option<SignalingAction> {
        match (self.state, self.retry_at) {
            (SignalingState::Reconnecting, Some(at)) if now >= at => {
                self.state = SignalingState::Connecting;
                self.retry_at = None;
                Some(SignalingAction::Connect {
                    attempt: self.attempt,
                })
            }
            _ => None,
        }
    }

    /// Stops the channel and cancels any pending reconnection
    pub fn stop(&mut self) {
        info!("Signaling stopped");
        self.state = SignalingState::Disconnected;
        self.retry_at = None;
        self.attempt = 0;
        self.outbound.clear();
    }

    /// Queues a frame for the driver. Frames sent while not open are dropped.
    pub fn send(&mut self, frame: Vec<u8>) -> bool {
        if self.state != SignalingState::Open {
            debug!("Dropping signaling frame while {:?}", self.state);
            return false;
        }
        self.outbound.push_back(frame);
        true
    }

    pub fn drain_outbound(&mut self) -> Vec<Vec<u8>> {
        self.outbound.drain(..).collect()
    }
}
