//! One remote participant: negotiation state, delivery tiers, RTT and
//! throughput bookkeeping.
//!
//! `Peer` is the only place a connection state changes. Callers drive it
//! with negotiation input (remote SDP, remote candidates) and transport
//! events; it decides whether the input is valid for the current state.

use log::{debug, info};
use shared::{Channel, PlayerId, Token};
use std::time::{Duration, Instant};

use crate::error::{NetError, NetResult};
use crate::transport::{IceCandidate, PeerTransport, SessionDescription, TransportEvent};

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

/// Connection lifecycle of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Created,
    /// Offer/answer exchange in flight
    Negotiating,
    /// Descriptions applied, waiting for ICE
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

impl PeerState {
    pub fn name(self) -> &'static str {
        match self {
            PeerState::Created => "created",
            PeerState::Negotiating => "negotiating",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnecting => "disconnecting",
            PeerState::Closed => "closed",
        }
    }
}

struct PendingPing {
    sequence: u32,
    sent_at: Instant,
}

pub struct Peer {
    token: Token,
    state: PeerState,
    transport: Box<dyn PeerTransport>,
    player: Option<PlayerId>,
    joined: bool,
    remote_description_set: bool,
    /// Candidates that arrived before the remote description
    pending_candidates: Vec<IceCandidate>,

    rtt: Option<Duration>,
    pending_ping: Option<PendingPing>,
    next_ping_sequence: u32,
    last_ping_at: Option<Instant>,

    bytes_sent: u64,
    bytes_received: u64,
    window_sent: u64,
    window_received: u64,
    sent_per_second: u64,
    received_per_second: u64,
    window_started: Instant,
}

impl Peer {
    pub fn new(token: Token, transport: Box<dyn PeerTransport>, now: Instant) -> Self {
        Self {
            token,
            state: PeerState::Created,
            transport,
            player: None,
            joined: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            rtt: None,
            pending_ping: None,
            next_ping_sequence: 1,
            last_ping_at: None,
            bytes_sent: 0,
            bytes_received: 0,
            window_sent: 0,
            window_received: 0,
            sent_per_second: 0,
            received_per_second: 0,
            window_started: now,
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    pub fn player(&self) -> Option<PlayerId> {
        self.player
    }

    pub fn bind_player(&mut self, player: PlayerId) {
        self.player = Some(player);
    }

    /// Joined peers receive entity replication
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn set_joined(&mut self, joined: bool) {
        self.joined = joined;
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes per second (sent, received) over the last full window
    pub fn throughput(&self) -> (u64, u64) {
        (self.sent_per_second, self.received_per_second)
    }

    fn invalid(&self, action: &'static str) -> NetError {
        NetError::InvalidPeerState {
            token: self.token,
            action,
            state: self.state.name(),
        }
    }

    /// Initiator side: produce the offer to tunnel to the remote peer
    pub fn start_offer(&mut self) -> NetResult<SessionDescription> {
        if self.state != PeerState::Created {
            return Err(self.invalid("create an offer"));
        }
        let offer = self.transport.create_offer()?;
        self.state = PeerState::Negotiating;
        Ok(offer)
    }

    /// Applies a remote SDP. The session role decides how it is read: the
    /// host always answers an offer, a non-host always treats it as the
    /// answer to its own offer. Returns the answer to send back, if any.
    pub fn apply_remote_description(
        &mut self,
        desc: &SessionDescription,
        is_host: bool,
    ) -> NetResult<Option<SessionDescription>> {
        let answer = if is_host {
            if self.state != PeerState::Created {
                return Err(self.invalid("accept an offer"));
            }
            Some(self.transport.accept_offer(desc)?)
        } else {
            if self.state != PeerState::Negotiating {
                return Err(self.invalid("accept an answer"));
            }
            self.transport.accept_answer(desc)?;
            None
        };

        self.remote_description_set = true;
        self.state = PeerState::Connecting;

        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.transport.add_ice_candidate(&candidate)?;
        }

        Ok(answer)
    }

    /// Applies a remote candidate now, or queues it until the remote
    /// description is in place
    pub fn add_remote_candidate(&mut self, candidate: IceCandidate) -> NetResult<()> {
        if self.state == PeerState::Closed {
            return Err(self.invalid("add a candidate"));
        }
        if self.remote_description_set {
            self.transport.add_ice_candidate(&candidate)
        } else {
            debug!("Queueing early candidate for {}", self.token);
            self.pending_candidates.push(candidate);
            Ok(())
        }
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Next event from the transport, applying connection-state changes
    pub fn poll_transport(&mut self) -> Option<TransportEvent> {
        let event = self.transport.poll_event()?;
        match &event {
            TransportEvent::Connected if self.state != PeerState::Closed => {
                info!("Peer {} connected", self.token);
                self.state = PeerState::Connected;
            }
            TransportEvent::Failed(_) | TransportEvent::Closed => self.close(),
            TransportEvent::Data(_, data) => self.record_received(data.len()),
            _ => {}
        }
        Some(event)
    }

    pub fn send(&mut self, channel: Channel, data: &[u8]) -> NetResult<()> {
        if !matches!(self.state, PeerState::Connected | PeerState::Disconnecting) {
            return Err(self.invalid("send"));
        }
        self.transport.send(channel, data)?;
        self.bytes_sent += data.len() as u64;
        self.window_sent += data.len() as u64;
        Ok(())
    }

    pub fn record_received(&mut self, len: usize) {
        self.bytes_received += len as u64;
        self.window_received += len as u64;
    }

    /// Starts a ping if the peer is connected and `interval` has passed
    /// since the last one. Returns the sequence number to send.
    pub fn next_ping(&mut self, now: Instant, interval: Duration) -> Option<u32> {
        if !self.is_connected() {
            return None;
        }
        if let Some(last) = self.last_ping_at {
            if now.duration_since(last) < interval {
                return None;
            }
        }

        let sequence = self.next_ping_sequence;
        self.next_ping_sequence = self.next_ping_sequence.wrapping_add(1);
        self.last_ping_at = Some(now);
        self.pending_ping = Some(PendingPing {
            sequence,
            sent_at: now,
        });
        Some(sequence)
    }

    /// Records the RTT for a ping response. Stale or unknown sequence
    /// numbers are ignored.
    pub fn complete_ping(&mut self, sequence: u32, now: Instant) -> Option<Duration> {
        match &self.pending_ping {
            Some(ping) if ping.sequence == sequence => {
                let rtt = now.duration_since(ping.sent_at);
                self.rtt = Some(rtt);
                self.pending_ping = None;
                Some(rtt)
            }
            _ => None,
        }
    }

    pub fn has_pending_ping(&self) -> bool {
        self.pending_ping.is_some()
    }

    /// Closes the one-second byte counter window once it has elapsed
    pub fn roll_throughput(&mut self, now: Instant) {
        if now.duration_since(self.window_started) < THROUGHPUT_WINDOW {
            return;
        }
        self.sent_per_second = self.window_sent;
        self.received_per_second = self.window_received;
        self.window_sent = 0;
        self.window_received = 0;
        self.window_started = now;
    }

    pub fn begin_disconnect(&mut self) {
        if self.state != PeerState::Closed {
            self.state = PeerState::Disconnecting;
        }
    }

    /// Tears the connection down and cancels any outstanding ping
    pub fn close(&mut self) {
        if self.state == PeerState::Closed {
            return;
        }
        debug!("Closing peer {}", self.token);
        self.transport.close();
        self.state = PeerState::Closed;
        self.pending_ping = None;
        self.pending_candidates.clear();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("token", &self.token)
            .field("state", &self.state)
            .field("player", &self.player)
            .field("joined", &self.joined)
            .field("rtt", &self.rtt)
            .finish()
    }
}
