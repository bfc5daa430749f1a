//! The networking core a game drives once per frame
//!
//! `NetworkNode` owns every component and both dispatch registries. It does
//! no I/O: the driver feeds it signaling frames and connectivity changes,
//! calls [`NetworkNode::frame`] on every tick, and writes out whatever
//! [`NetworkNode::take_signaling_outbound`] returns. Everything the game
//! needs to react to comes back through [`NetworkNode::poll_event`].

use log::{debug, info, warn};
use shared::protocol::begin_frame;
use shared::{
    Channel, CommandRegistry, DispatchOutcome, PeerCommand, PlayerId, SignalingCommand, Token,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::NetConfig;
use crate::entity::{EntityFactory, SceneSet};
use crate::error::{NetError, NetResult};
use crate::negotiation;
use crate::peer::{Peer, PeerState};
use crate::peer_registry::PeerRegistry;
use crate::replication::{self, ReplicationService, SendReport};
use crate::session::{self, Match, Session};
use crate::signaling::{SignalingAction, SignalingChannel, SignalingEvent, SignalingState};
use crate::transport::{TransportEvent, TransportFactory};

/// Everything the game hears about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    SignalingOpened,
    SignalingLost { retry_in: Duration },
    SignalingRetry { attempt: u32, retry_in: Duration },
    /// Reconnection attempts exhausted; nothing retries after this
    SignalingGaveUp,
    /// The rendezvous server assigned us a token
    Welcome(Token),
    Notification(String),
    OnlinePlayers(u32),
    LobbyChat { from: Token, text: String },
    IdentityReceived { token: Token, player: PlayerId },
    IdentityTimedOut(Token),
    PeerConnected(Token),
    PeerDisconnected(Token),
    NegotiationFailed(Token),
    JoinAccepted { host: PlayerId },
    JoinRejected,
    PlayerJoined(PlayerId),
    PlayerLeft(PlayerId),
    SnapshotComplete,
    /// The host went away
    MatchEnded,
    LeftMatch { timed_out: bool },
    GameEvent {
        from: PlayerId,
        channel: Channel,
        payload: Vec<u8>,
    },
    Chat { from: PlayerId, text: String },
}

/// Where a peer message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Inbound {
    pub(crate) token: Token,
    pub(crate) channel: Channel,
}

pub(crate) type SignalingHandlers = CommandRegistry<SignalingCommand, NodeState, (), NetError>;
pub(crate) type PeerHandlers = CommandRegistry<PeerCommand, NodeState, Inbound, NetError>;

/// State shared by every handler
pub(crate) struct NodeState {
    pub(crate) config: NetConfig,
    pub(crate) local: PlayerId,
    pub(crate) own_token: Option<Token>,
    /// Time of the call currently being handled
    pub(crate) now: Instant,
    pub(crate) peers: PeerRegistry,
    pub(crate) transports: Box<dyn TransportFactory>,
    pub(crate) signaling: SignalingChannel,
    pub(crate) replication: ReplicationService,
    pub(crate) scenes: SceneSet,
    pub(crate) factory: EntityFactory,
    pub(crate) session: Session,
    pub(crate) events: VecDeque<NodeEvent>,
    /// Peer messages that arrived inside signaling `Relay` frames
    pub(crate) relayed: VecDeque<(Token, Channel, Vec<u8>)>,
}

impl NodeState {
    pub(crate) fn is_host(&self) -> bool {
        self.session
            .roster
            .as_ref()
            .map_or(false, |roster| roster.host_id() == self.local)
    }

    pub(crate) fn emit(&mut self, event: NodeEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn peer_mut(&mut self, token: &Token) -> NetResult<&mut Peer> {
        self.peers
            .get_mut(token)
            .ok_or(NetError::UnknownToken(*token))
    }

    /// The player behind a peer that has joined the match
    pub(crate) fn joined_player(&self, token: &Token) -> NetResult<PlayerId> {
        let peer = self.peers.get(token).ok_or(NetError::UnknownToken(*token))?;
        match peer.player() {
            Some(player) if peer.is_joined() => Ok(player),
            _ => Err(NetError::NotJoined(*token)),
        }
    }

    /// Rejects `what` unless it came from the host of the match we joined
    pub(crate) fn host_sender(&self, token: &Token, what: &'static str) -> NetResult<()> {
        let sender = self.joined_player(token)?;
        match &self.session.roster {
            Some(roster) if roster.host_id() == sender && roster.host_id() != self.local => Ok(()),
            _ => Err(NetError::NotFromHost(what)),
        }
    }
}

/// Sends `frame` to every connected, joined peer except `except`
pub(crate) fn broadcast(
    peers: &mut PeerRegistry,
    except: Option<&Token>,
    channel: Channel,
    frame: &[u8],
) -> usize {
    let mut sent = 0;
    for peer in peers.list_mut() {
        if !peer.is_connected() || !peer.is_joined() || Some(peer.token()) == except {
            continue;
        }
        match peer.send(channel, frame) {
            Ok(()) => sent += 1,
            Err(e) => warn!("Broadcast to {} failed: {}", peer.token(), e),
        }
    }
    sent
}

pub struct NetworkNode {
    state: NodeState,
    signaling_handlers: SignalingHandlers,
    peer_handlers: PeerHandlers,
}

impl NetworkNode {
    pub fn new(
        config: NetConfig,
        local: PlayerId,
        transports: Box<dyn TransportFactory>,
        scenes: SceneSet,
        factory: EntityFactory,
    ) -> Self {
        let mut signaling_handlers = CommandRegistry::new("signaling");
        register_lobby_signaling(&mut signaling_handlers);
        negotiation::register_signaling(&mut signaling_handlers);
        session::register_signaling(&mut signaling_handlers);

        let mut peer_handlers = CommandRegistry::new("peer");
        negotiation::register(&mut peer_handlers);
        replication::register(&mut peer_handlers);
        session::register(&mut peer_handlers);
        register_game_messages(&mut peer_handlers);

        info!(
            "Node for player {} ready ({} signaling / {} peer handlers)",
            local,
            signaling_handlers.len(),
            peer_handlers.len()
        );

        let state = NodeState {
            signaling: SignalingChannel::new(config.reconnect),
            replication: ReplicationService::new(config.sync_interval()),
            session: Session::new(config.identity_timeout()),
            config,
            local,
            own_token: None,
            now: Instant::now(),
            peers: PeerRegistry::new(),
            transports,
            scenes,
            factory,
            events: VecDeque::new(),
            relayed: VecDeque::new(),
        };

        Self {
            state,
            signaling_handlers,
            peer_handlers,
        }
    }

    pub fn local_player(&self) -> PlayerId {
        self.state.local
    }

    pub fn own_token(&self) -> Option<Token> {
        self.state.own_token
    }

    pub fn config(&self) -> &NetConfig {
        &self.state.config
    }

    pub fn is_host(&self) -> bool {
        self.state.is_host()
    }

    pub fn roster(&self) -> Option<&Match> {
        self.state.session.roster.as_ref()
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.state.peers
    }

    pub fn scenes(&self) -> &SceneSet {
        &self.state.scenes
    }

    pub fn scenes_mut(&mut self) -> &mut SceneSet {
        &mut self.state.scenes
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.state.signaling.state()
    }

    pub fn poll_event(&mut self) -> Option<NodeEvent> {
        self.state.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        self.state.events.drain(..).collect()
    }

    // Signaling connectivity, reported by the driver

    pub fn connect_signaling(&mut self) -> bool {
        self.state.signaling.connect()
    }

    pub fn on_signaling_open(&mut self) {
        let event = self.state.signaling.on_open();
        self.signaling_event(event);
    }

    pub fn on_signaling_closed(&mut self, now: Instant) {
        let event = self.state.signaling.on_close(now);
        self.signaling_event(event);
    }

    pub fn on_signaling_error(&mut self, now: Instant, reason: &str) {
        let event = self.state.signaling.on_error(now, reason);
        self.signaling_event(event);
    }

    /// Tells the driver when to dial again
    pub fn poll_signaling(&mut self, now: Instant) -> Option<SignalingAction> {
        self.state.signaling.poll(now)
    }

    pub fn stop_signaling(&mut self) {
        self.state.signaling.stop();
    }

    fn signaling_event(&mut self, event: Option<SignalingEvent>) {
        let event = match event {
            Some(SignalingEvent::Opened) => NodeEvent::SignalingOpened,
            Some(SignalingEvent::Lost { retry_in }) => NodeEvent::SignalingLost { retry_in },
            Some(SignalingEvent::RetryScheduled { attempt, retry_in }) => {
                NodeEvent::SignalingRetry { attempt, retry_in }
            }
            Some(SignalingEvent::GaveUp) => NodeEvent::SignalingGaveUp,
            None => return,
        };
        self.state.emit(event);
    }

    /// Frames waiting to be written to the signaling connection
    pub fn take_signaling_outbound(&mut self) -> Vec<Vec<u8>> {
        self.flush_transport_frames();
        self.state.signaling.drain_outbound()
    }

    /// Handles one frame read from the signaling connection
    pub fn handle_signaling_frame(&mut self, now: Instant, frame: &[u8]) -> DispatchOutcome {
        self.state.now = now;
        let outcome = self
            .signaling_handlers
            .dispatch_frame(&mut self.state, &(), frame);
        self.pump_transports();
        self.drain_relayed();
        self.flush_transport_frames();
        outcome
    }

    // Session

    pub fn host_match(&mut self) -> NetResult<()> {
        session::host(&mut self.state)
    }

    /// Introduces ourselves to `host_token` and asks to join its match
    pub fn join_match(&mut self, now: Instant, host_token: Token) -> NetResult<()> {
        self.state.now = now;
        let result = session::join(&mut self.state, host_token, now);
        self.flush_transport_frames();
        result
    }

    pub fn connect_to(&mut self, now: Instant, token: Token) -> NetResult<()> {
        self.state.now = now;
        let result = negotiation::connect(&mut self.state, token, now);
        self.flush_transport_frames();
        result
    }

    pub fn expect_identity(&mut self, now: Instant, token: Token) {
        self.state.now = now;
        session::expect_identity(&mut self.state, token, now);
    }

    /// Starts a graceful departure; `LeftMatch` follows once every peer
    /// acknowledged or the timeout passed
    pub fn leave_match(&mut self, now: Instant) -> NetResult<()> {
        self.state.now = now;
        let result = session::leave(&mut self.state, now);
        self.flush_transport_frames();
        result
    }

    // Game traffic

    /// Sends an opaque game event to every joined peer
    pub fn send_event(&mut self, channel: Channel, payload: &[u8]) -> usize {
        let mut writer = begin_frame(PeerCommand::EventData);
        writer.write_bytes(payload);
        let sent = broadcast(&mut self.state.peers, None, channel, writer.as_bytes());
        self.flush_transport_frames();
        sent
    }

    pub fn send_chat(&mut self, text: &str) -> usize {
        let mut writer = begin_frame(PeerCommand::ChatMessage);
        writer.write_var_str(text);
        let sent = broadcast(
            &mut self.state.peers,
            None,
            Channel::ReliableOrdered,
            writer.as_bytes(),
        );
        self.flush_transport_frames();
        sent
    }

    /// Chat with someone we only know by token, through the server
    pub fn send_lobby_chat(&mut self, token: &Token, text: &str) -> bool {
        let mut writer = begin_frame(SignalingCommand::ChatMessage);
        token.write(&mut writer);
        writer.write_var_str(text);
        self.state.signaling.send(writer.into_bytes())
    }

    /// Per-frame tick: transport events, relayed traffic, pings,
    /// replication, pruning and the session timers
    pub fn frame(&mut self, now: Instant) -> SendReport {
        self.state.now = now;
        self.pump_transports();
        self.drain_relayed();
        negotiation::send_pings(&mut self.state, now);

        let state = &mut self.state;
        let report = match (&state.session.roster, &state.session.disconnect) {
            (Some(roster), None) => state.replication.send_pass(
                now,
                &state.local,
                roster,
                &mut state.scenes,
                &mut state.peers,
            ),
            _ => SendReport::default(),
        };
        let pruned = state.scenes.prune_removed();
        if pruned > 0 {
            debug!("Pruned {} removed entities", pruned);
        }

        for peer in state.peers.list_mut() {
            peer.roll_throughput(now);
        }
        session::expire_identities(state, now);
        session::poll_disconnect(state, now);
        self.flush_transport_frames();
        report
    }

    fn flush_transport_frames(&mut self) {
        while let Some(frame) = self.state.transports.poll_signaling() {
            self.state.signaling.send(frame);
        }
    }

    fn pump_transports(&mut self) {
        for token in self.state.peers.tokens() {
            loop {
                let (event, was_up) = match self.state.peers.get_mut(&token) {
                    Some(peer) => {
                        let was_up =
                            matches!(peer.state(), PeerState::Connected | PeerState::Disconnecting);
                        (peer.poll_transport(), was_up)
                    }
                    None => break,
                };
                match event {
                    Some(event) => self.on_transport_event(token, event, was_up),
                    None => break,
                }
            }
        }
    }

    fn on_transport_event(&mut self, token: Token, event: TransportEvent, was_up: bool) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                negotiation::send_candidate(&mut self.state, &token, &candidate);
            }
            TransportEvent::Connected => session::on_peer_connected(&mut self.state, token),
            TransportEvent::Failed(reason) if !was_up => {
                warn!("Transport to {} failed: {}", token, reason);
                negotiation::fail(&mut self.state, &token);
            }
            TransportEvent::Failed(reason) => {
                warn!("Transport to {} failed: {}", token, reason);
                session::peer_lost(&mut self.state, &token);
            }
            TransportEvent::Closed => session::peer_lost(&mut self.state, &token),
            TransportEvent::Data(channel, data) => {
                self.dispatch_peer(token, channel, &data);
            }
        }
    }

    fn drain_relayed(&mut self) {
        while let Some((token, channel, payload)) = self.state.relayed.pop_front() {
            match self.state.peers.get_mut(&token) {
                Some(peer) => peer.record_received(payload.len()),
                None => {
                    debug!("Dropping relayed message from unknown token {}", token);
                    continue;
                }
            }
            self.dispatch_peer(token, channel, &payload);
        }
    }

    fn dispatch_peer(&mut self, token: Token, channel: Channel, data: &[u8]) -> DispatchOutcome {
        self.peer_handlers
            .dispatch_frame(&mut self.state, &Inbound { token, channel }, data)
    }
}

fn register_lobby_signaling(handlers: &mut SignalingHandlers) {
    handlers.register("lobby", SignalingCommand::Welcome, |state, _, reader| {
        let token = Token::read(reader)?;
        info!("Rendezvous server assigned token {}", token);
        state.own_token = Some(token);
        state.emit(NodeEvent::Welcome(token));
        Ok(())
    });
    handlers.register("lobby", SignalingCommand::Notification, |state, _, reader| {
        let text = reader.read_var_str()?;
        info!("Server: {}", text);
        state.emit(NodeEvent::Notification(text));
        Ok(())
    });
    handlers.register("lobby", SignalingCommand::OnlinePlayers, |state, _, reader| {
        let count = reader.read_u32()?;
        state.emit(NodeEvent::OnlinePlayers(count));
        Ok(())
    });
    handlers.register("lobby", SignalingCommand::ChatMessage, |state, _, reader| {
        let from = Token::read(reader)?;
        let text = reader.read_var_str()?;
        state.emit(NodeEvent::LobbyChat { from, text });
        Ok(())
    });
}

fn register_game_messages(handlers: &mut PeerHandlers) {
    handlers.register("game", PeerCommand::EventData, |state, src, reader| {
        let from = state.joined_player(&src.token)?;
        let payload = reader.read_remaining().to_vec();
        state.emit(NodeEvent::GameEvent {
            from,
            channel: src.channel,
            payload,
        });
        Ok(())
    });
    handlers.register("game", PeerCommand::ChatMessage, |state, src, reader| {
        let from = state.joined_player(&src.token)?;
        let text = reader.read_var_str()?;
        state.emit(NodeEvent::Chat { from, text });
        Ok(())
    });
}
