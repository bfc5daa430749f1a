//! Match roster, identity handshake, disconnection monitor and the join flow
//!
//! The join flow runs over peer channels once a connection is up:
//!
//! ```text
//! joiner                               host
//!   │ ── JoinRequest(player) ───────────► │ slots, identity check
//!   │ ◄── JoinResponse(roster) ────────── │ bind player, mark joined
//!   │ ◄── EntityData × n ──────────────── │ snapshot
//!   │ ◄── SnapshotEnd ─────────────────── │
//!   │ ── SnapshotAck ───────────────────► │
//! ```
//!
//! Every other joined peer hears about the newcomer through
//! `PlayerConnection`.

use log::{debug, info, warn};
use shared::protocol::{begin_frame, identity_frame};
use shared::{ByteReader, Channel, PeerCommand, PlayerId, Token};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::error::{NetError, NetResult};
use crate::negotiation;
use crate::node::{broadcast, Inbound, NodeEvent, NodeState, PeerHandlers, SignalingHandlers};
use crate::replication::ReplicationService;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub is_host: bool,
    /// Last measured round trip to the host
    pub ping: Option<Duration>,
}

impl Player {
    fn new(id: PlayerId, is_host: bool) -> Self {
        Self {
            id,
            is_host,
            ping: None,
        }
    }
}

/// The roster of the match this node takes part in
#[derive(Debug, Clone)]
pub struct Match {
    slots: u8,
    host: PlayerId,
    players: Vec<Player>,
}

impl Match {
    /// A match hosted by `host`, with only the host in it
    pub fn hosted(host: PlayerId, slots: u8) -> Self {
        Self {
            slots,
            host,
            players: vec![Player::new(host, true)],
        }
    }

    /// A match as described by the host's `JoinResponse`
    pub fn joined(host: PlayerId, slots: u8, players: &[PlayerId]) -> Self {
        let mut roster = Self::hosted(host, slots);
        for id in players {
            roster.insert(*id);
        }
        roster
    }

    pub fn host_id(&self) -> PlayerId {
        self.host
    }

    pub fn slots(&self) -> u8 {
        self.slots
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.slots as usize
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.player(id).is_some()
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == *id)
    }

    fn insert(&mut self, id: PlayerId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.players.push(Player::new(id, id == self.host));
        true
    }

    /// Adds a player if there is a free slot
    pub fn add_player(&mut self, id: PlayerId) -> bool {
        if self.is_full() {
            return false;
        }
        self.insert(id)
    }

    pub fn remove_player(&mut self, id: &PlayerId) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == *id)?;
        Some(self.players.remove(index))
    }

    pub fn set_ping(&mut self, id: &PlayerId, ping: Duration) -> bool {
        match self.players.iter_mut().find(|p| p.id == *id) {
            Some(player) => {
                player.ping = Some(ping);
                true
            }
            None => false,
        }
    }

    /// Median round trip in milliseconds across non-host players with a
    /// measurement
    pub fn median_ping(&self) -> Option<f64> {
        let mut pings: Vec<f64> = self
            .players
            .iter()
            .filter(|p| !p.is_host)
            .filter_map(|p| p.ping)
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        if pings.is_empty() {
            return None;
        }
        pings.sort_by(|a, b| a.total_cmp(b));
        let mid = pings.len() / 2;
        Some(if pings.len() % 2 == 0 {
            (pings[mid - 1] + pings[mid]) / 2.0
        } else {
            pings[mid]
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    Pending { since: Instant },
    Received(PlayerId),
}

/// How an inbound `PlayerIdentity` relates to what we asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityReceipt {
    Expected,
    /// The remote side introduced itself first; we owe it our identity
    Unsolicited,
    Duplicate,
}

/// Per-token identity exchange over signaling
#[derive(Debug)]
pub struct IdentityHandshake {
    timeout: Duration,
    entries: HashMap<Token, IdentityState>,
}

impl IdentityHandshake {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: HashMap::new(),
        }
    }

    pub fn expect(&mut self, token: Token, now: Instant) {
        if matches!(self.entries.get(&token), Some(IdentityState::Received(_))) {
            return;
        }
        self.entries
            .insert(token, IdentityState::Pending { since: now });
    }

    pub fn receive(&mut self, token: Token, player: PlayerId) -> IdentityReceipt {
        let receipt = match self.entries.get(&token) {
            Some(IdentityState::Pending { .. }) => IdentityReceipt::Expected,
            Some(IdentityState::Received(_)) => return IdentityReceipt::Duplicate,
            None => IdentityReceipt::Unsolicited,
        };
        self.entries.insert(token, IdentityState::Received(player));
        receipt
    }

    pub fn state(&self, token: &Token) -> Option<IdentityState> {
        self.entries.get(token).copied()
    }

    pub fn player_for(&self, token: &Token) -> Option<PlayerId> {
        match self.entries.get(token) {
            Some(IdentityState::Received(player)) => Some(*player),
            _ => None,
        }
    }

    /// Drops pending entries older than the timeout
    pub fn expire(&mut self, now: Instant) -> Vec<Token> {
        let timeout = self.timeout;
        let expired: Vec<Token> = self
            .entries
            .iter()
            .filter_map(|(token, state)| match state {
                IdentityState::Pending { since } if now.duration_since(*since) >= timeout => {
                    Some(*token)
                }
                _ => None,
            })
            .collect();
        for token in &expired {
            self.entries.remove(token);
        }
        expired
    }

    pub fn forget(&mut self, token: &Token) {
        self.entries.remove(token);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// Every peer acknowledged
    Complete,
    TimedOut { missing: Vec<Token> },
}

/// Tracks `GracefulDisconnect` acknowledgements while leaving a match
#[derive(Debug)]
pub struct DisconnectMonitor {
    expected: HashSet<Token>,
    deadline: Instant,
}

impl DisconnectMonitor {
    pub fn new(expected: impl IntoIterator<Item = Token>, deadline: Instant) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            deadline,
        }
    }

    pub fn acknowledge(&mut self, token: &Token) -> bool {
        self.expected.remove(token)
    }

    pub fn remaining(&self) -> usize {
        self.expected.len()
    }

    pub fn poll(&self, now: Instant) -> Option<DisconnectOutcome> {
        if self.expected.is_empty() {
            Some(DisconnectOutcome::Complete)
        } else if now >= self.deadline {
            Some(DisconnectOutcome::TimedOut {
                missing: self.expected.iter().copied().collect(),
            })
        } else {
            None
        }
    }
}

/// Session bookkeeping owned by the node
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) roster: Option<Match>,
    pub(crate) identities: IdentityHandshake,
    pub(crate) disconnect: Option<DisconnectMonitor>,
    /// Host token we asked to join, until its `JoinResponse` arrives
    pub(crate) joining: Option<Token>,
}

impl Session {
    pub(crate) fn new(identity_timeout: Duration) -> Self {
        Self {
            roster: None,
            identities: IdentityHandshake::new(identity_timeout),
            disconnect: None,
            joining: None,
        }
    }
}

fn join_request_frame(player: &PlayerId) -> Vec<u8> {
    let mut writer = begin_frame(PeerCommand::JoinRequest);
    player.write(&mut writer);
    writer.into_bytes()
}

fn join_response_frame(accepted: bool, roster: &Match) -> Vec<u8> {
    let mut writer = begin_frame(PeerCommand::JoinResponse);
    writer.write_bool(accepted);
    roster.host_id().write(&mut writer);
    writer.write_u8(roster.slots());
    let players = &roster.players()[..roster.len().min(u8::MAX as usize)];
    writer.write_u8(players.len() as u8);
    for player in players {
        player.id.write(&mut writer);
    }
    writer.into_bytes()
}

pub(crate) fn player_connection_frame(player: &PlayerId, connected: bool) -> Vec<u8> {
    let mut writer = begin_frame(PeerCommand::PlayerConnection);
    player.write(&mut writer);
    writer.write_bool(connected);
    writer.into_bytes()
}

pub(crate) fn player_ping_frame(player: &PlayerId, ping: Duration) -> Vec<u8> {
    let mut writer = begin_frame(PeerCommand::PlayerPing);
    player.write(&mut writer);
    writer.write_u16(ping.as_millis().min(u16::MAX as u128) as u16);
    writer.into_bytes()
}

/// Starts hosting a match
pub(crate) fn host(state: &mut NodeState) -> NetResult<()> {
    if state.session.roster.is_some() {
        return Err(NetError::AlreadyInMatch);
    }
    info!("Hosting a match with {} slots", state.config.match_slots);
    state.session.roster = Some(Match::hosted(state.local, state.config.match_slots));
    Ok(())
}

/// Introduces ourselves to `token` and waits for its identity
pub(crate) fn expect_identity(state: &mut NodeState, token: Token, now: Instant) {
    state.session.identities.expect(token, now);
    state.signaling.send(identity_frame(&token, &state.local));
}

/// Connects to the host behind `host_token` and asks to join once the link
/// is up
pub(crate) fn join(state: &mut NodeState, host_token: Token, now: Instant) -> NetResult<()> {
    if state.session.roster.is_some() {
        return Err(NetError::AlreadyInMatch);
    }
    expect_identity(state, host_token, now);
    state.session.joining = Some(host_token);
    negotiation::connect(state, host_token, now)
}

/// Tells every connected peer we are leaving and starts the monitor
pub(crate) fn leave(state: &mut NodeState, now: Instant) -> NetResult<()> {
    if state.session.disconnect.is_some() {
        return Ok(());
    }
    if state.session.roster.is_none() && state.peers.is_empty() {
        return Err(NetError::NoMatch);
    }

    let frame = begin_frame(PeerCommand::GracefulDisconnect).into_bytes();
    let mut expected = Vec::new();
    for peer in state.peers.list_mut() {
        if !peer.is_connected() {
            continue;
        }
        match peer.send(Channel::ReliableOrdered, &frame) {
            Ok(()) => {
                peer.begin_disconnect();
                expected.push(*peer.token());
            }
            Err(e) => warn!("Could not tell {} we are leaving: {}", peer.token(), e),
        }
    }

    info!("Leaving match; waiting for {} acknowledgements", expected.len());
    state.session.joining = None;
    state.session.disconnect = Some(DisconnectMonitor::new(
        expected,
        now + state.config.disconnect_timeout(),
    ));
    Ok(())
}

/// Finalises a pending leave once every peer answered or the deadline passed
pub(crate) fn poll_disconnect(state: &mut NodeState, now: Instant) {
    let outcome = match state.session.disconnect.as_ref().and_then(|m| m.poll(now)) {
        Some(outcome) => outcome,
        None => return,
    };

    let timed_out = match outcome {
        DisconnectOutcome::Complete => false,
        DisconnectOutcome::TimedOut { missing } => {
            warn!(
                "Disconnect timed out; {} peers never acknowledged",
                missing.len()
            );
            true
        }
    };

    state.session.disconnect = None;
    state.session.roster = None;
    state.session.identities.clear();
    state.peers.clear();
    info!("Left match");
    state.emit(NodeEvent::LeftMatch { timed_out });
}

pub(crate) fn expire_identities(state: &mut NodeState, now: Instant) {
    for token in state.session.identities.expire(now) {
        warn!("No identity from {} before the timeout", token);
        state.emit(NodeEvent::IdentityTimedOut(token));
    }
}

pub(crate) fn on_peer_connected(state: &mut NodeState, token: Token) {
    state.emit(NodeEvent::PeerConnected(token));
    if state.session.joining != Some(token) {
        return;
    }
    let frame = join_request_frame(&state.local);
    if let Some(peer) = state.peers.get_mut(&token) {
        match peer.send(Channel::ReliableOrdered, &frame) {
            Ok(()) => info!("Asked {} to join its match", token),
            Err(e) => warn!("Join request to {} failed: {}", token, e),
        }
    }
}

/// Tears down a peer that went away and settles the roster
pub(crate) fn peer_lost(state: &mut NodeState, token: &Token) {
    let mut peer = match state.peers.remove(token) {
        Some(peer) => peer,
        None => return,
    };
    peer.close();
    state.session.identities.forget(token);
    if let Some(monitor) = state.session.disconnect.as_mut() {
        monitor.acknowledge(token);
    }
    if state.session.joining == Some(*token) {
        state.session.joining = None;
    }
    state.emit(NodeEvent::PeerDisconnected(*token));

    let player = match peer.player() {
        Some(player) if peer.is_joined() => player,
        _ => return,
    };
    let roster = match state.session.roster.as_mut() {
        Some(roster) => roster,
        None => return,
    };

    if roster.host_id() == state.local {
        if roster.remove_player(&player).is_none() {
            return;
        }
        let released = ReplicationService::release_owner(&mut state.scenes, &player);
        info!(
            "Player {} left; released {} entities",
            player, released
        );
        broadcast(
            &mut state.peers,
            None,
            Channel::ReliableOrdered,
            &player_connection_frame(&player, false),
        );
        state.emit(NodeEvent::PlayerLeft(player));
    } else if roster.host_id() == player {
        warn!("Lost the match host {}", player);
        state.session.roster = None;
        let retired = ReplicationService::retire_remote(&mut state.scenes, &state.local);
        debug!("Retired {} entities from the ended match", retired);
        state.emit(NodeEvent::PlayerLeft(player));
        state.emit(NodeEvent::MatchEnded);
    }
}

pub(crate) fn register_signaling(handlers: &mut SignalingHandlers) {
    handlers.register(
        "session",
        shared::SignalingCommand::PlayerIdentity,
        |state, _, reader| {
            let origin = Token::read(reader)?;
            let player = PlayerId::read(reader)?;
            match state.session.identities.receive(origin, player) {
                IdentityReceipt::Duplicate => {
                    debug!("Duplicate identity from {}", origin);
                    return Ok(());
                }
                IdentityReceipt::Unsolicited => {
                    state.signaling.send(identity_frame(&origin, &state.local));
                }
                IdentityReceipt::Expected => {}
            }
            info!("Token {} belongs to player {}", origin, player);
            state.emit(NodeEvent::IdentityReceived {
                token: origin,
                player,
            });
            Ok(())
        },
    );
}

pub(crate) fn register(handlers: &mut PeerHandlers) {
    handlers.register("session", PeerCommand::JoinRequest, on_join_request);
    handlers.register("session", PeerCommand::JoinResponse, on_join_response);
    handlers.register("session", PeerCommand::PlayerConnection, on_player_connection);
    handlers.register("session", PeerCommand::SnapshotEnd, |state, src, _| {
        state.host_sender(&src.token, "SnapshotEnd")?;
        let ack = begin_frame(PeerCommand::SnapshotAck).into_bytes();
        state.peer_mut(&src.token)?.send(Channel::ReliableOrdered, &ack)?;
        state.emit(NodeEvent::SnapshotComplete);
        Ok(())
    });
    handlers.register("session", PeerCommand::SnapshotAck, |state, src, _| {
        let player = state.joined_player(&src.token)?;
        info!("Player {} finished loading the snapshot", player);
        Ok(())
    });
    handlers.register("session", PeerCommand::PlayerPing, |state, src, reader| {
        state.host_sender(&src.token, "PlayerPing")?;
        let player = PlayerId::read(reader)?;
        let ping = Duration::from_millis(reader.read_u16()? as u64);
        if let Some(roster) = state.session.roster.as_mut() {
            roster.set_ping(&player, ping);
        }
        Ok(())
    });
    handlers.register(
        "session",
        PeerCommand::GracefulDisconnect,
        on_graceful_disconnect,
    );
}

fn on_join_request(state: &mut NodeState, src: &Inbound, reader: &mut ByteReader<'_>) -> NetResult<()> {
    let player = PlayerId::read(reader)?;
    let roster = state.session.roster.as_mut().ok_or(NetError::NoMatch)?;
    if roster.host_id() != state.local {
        return Err(NetError::NotHost("JoinRequest"));
    }
    if let Some(peer) = state.peers.get(&src.token) {
        if peer.is_joined() || peer.player().is_some() {
            return Err(NetError::InvalidPeerState {
                token: src.token,
                action: "join",
                state: "already joined",
            });
        }
    }

    let accepted = match state.session.identities.player_for(&src.token) {
        Some(vouched) if vouched != player => {
            warn!(
                "Token {} introduced itself as {} but asked to join as {}",
                src.token, vouched, player
            );
            false
        }
        _ => !roster.contains(&player) && roster.add_player(player),
    };

    let peer = state
        .peers
        .get_mut(&src.token)
        .ok_or(NetError::UnknownToken(src.token))?;
    peer.send(
        Channel::ReliableOrdered,
        &join_response_frame(accepted, roster),
    )?;
    if !accepted {
        info!("Rejected join request from {}", player);
        return Ok(());
    }

    peer.bind_player(player);
    let sent = ReplicationService::send_snapshot(&state.scenes, peer)?;
    peer.set_joined(true);
    info!("Player {} joined; sent {} entities", player, sent);

    broadcast(
        &mut state.peers,
        Some(&src.token),
        Channel::ReliableOrdered,
        &player_connection_frame(&player, true),
    );
    state.emit(NodeEvent::PlayerJoined(player));
    Ok(())
}

fn on_join_response(state: &mut NodeState, src: &Inbound, reader: &mut ByteReader<'_>) -> NetResult<()> {
    let accepted = reader.read_bool()?;
    let host = PlayerId::read(reader)?;
    let slots = reader.read_u8()?;
    let count = reader.read_u8()?;
    let players = (0..count)
        .map(|_| PlayerId::read(reader))
        .collect::<Result<Vec<_>, _>>()?;

    if state.session.joining != Some(src.token) {
        return Err(NetError::NotFromHost("JoinResponse"));
    }
    state.session.joining = None;

    if !accepted {
        info!("Host {} rejected our join request", host);
        if let Some(mut peer) = state.peers.remove(&src.token) {
            peer.close();
        }
        state.emit(NodeEvent::JoinRejected);
        return Ok(());
    }

    let peer = state.peer_mut(&src.token)?;
    peer.bind_player(host);
    peer.set_joined(true);

    let mut roster = Match::joined(host, slots, &players);
    if !roster.contains(&state.local) {
        roster.insert(state.local);
    }
    info!("Joined match of {} ({} players)", host, roster.len());
    state.session.roster = Some(roster);
    state.emit(NodeEvent::JoinAccepted { host });
    Ok(())
}

fn on_player_connection(
    state: &mut NodeState,
    src: &Inbound,
    reader: &mut ByteReader<'_>,
) -> NetResult<()> {
    state.host_sender(&src.token, "PlayerConnection")?;
    let player = PlayerId::read(reader)?;
    let connected = reader.read_bool()?;
    let roster = state.session.roster.as_mut().ok_or(NetError::NoMatch)?;

    if connected {
        if roster.add_player(player) {
            state.emit(NodeEvent::PlayerJoined(player));
        }
    } else if roster.remove_player(&player).is_some() {
        state.emit(NodeEvent::PlayerLeft(player));
    }
    Ok(())
}

fn on_graceful_disconnect(state: &mut NodeState, src: &Inbound, _: &mut ByteReader<'_>) -> NetResult<()> {
    if let Some(monitor) = state.session.disconnect.as_mut() {
        if monitor.acknowledge(&src.token) {
            debug!("{} acknowledged our departure", src.token);
            if let Some(mut peer) = state.peers.remove(&src.token) {
                peer.close();
            }
        }
        return Ok(());
    }

    info!("Peer {} is leaving", src.token);
    if let Some(peer) = state.peers.get_mut(&src.token) {
        let ack = begin_frame(PeerCommand::GracefulDisconnect).into_bytes();
        if let Err(e) = peer.send(Channel::ReliableOrdered, &ack) {
            warn!("Could not acknowledge departure of {}: {}", src.token, e);
        }
        peer.begin_disconnect();
    }
    peer_lost(state, &src.token);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::entity::tests::{position_entity, position_factory};
    use crate::entity::{Scene, SceneSet};
    use crate::peer::tests::{connected_peer, Recorder};
    use crate::peer_registry::PeerRegistry;
    use crate::relay::RelayTransportFactory;
    use crate::signaling::SignalingChannel;
    use assert_approx_eq::assert_approx_eq;
    use shared::NetId;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn node_state(local: PlayerId) -> NodeState {
        let config = NetConfig::default();
        NodeState {
            signaling: SignalingChannel::new(config.reconnect),
            replication: ReplicationService::new(config.sync_interval()),
            session: Session::new(config.identity_timeout()),
            config,
            local,
            own_token: None,
            now: Instant::now(),
            peers: PeerRegistry::new(),
            transports: Box::new(RelayTransportFactory::new()),
            scenes: SceneSet::new().with_scene(Scene::new(1)),
            factory: position_factory(),
            events: VecDeque::new(),
            relayed: VecDeque::new(),
        }
    }

    /// Adds a connected peer and returns its token and wire
    fn add_peer(state: &mut NodeState) -> (Token, Rc<RefCell<Recorder>>) {
        let (peer, wire) = connected_peer(state.now);
        let token = *peer.token();
        state.peers.insert(peer);
        (token, wire)
    }

    fn request_join(state: &mut NodeState, token: Token, player: &PlayerId) -> NetResult<()> {
        let frame = join_request_frame(player);
        let src = Inbound {
            token,
            channel: Channel::ReliableOrdered,
        };
        on_join_request(state, &src, &mut ByteReader::new(&frame[1..]))
    }

    #[test]
    fn test_joined_peer_cannot_join_again() {
        let mut state = node_state(NetId::random());
        host(&mut state).unwrap();
        let (token, wire) = add_peer(&mut state);

        let first = NetId::random();
        request_join(&mut state, token, &first).unwrap();
        let sent = wire.borrow().sent.len();
        assert_eq!(state.peers.get(&token).unwrap().player(), Some(first));

        let second = NetId::random();
        let result = request_join(&mut state, token, &second);
        assert!(matches!(result, Err(NetError::InvalidPeerState { .. })));

        let roster = state.session.roster.as_ref().unwrap();
        assert_eq!(roster.len(), 2);
        assert!(roster.contains(&first));
        assert!(!roster.contains(&second));
        assert_eq!(state.peers.get(&token).unwrap().player(), Some(first));
        assert_eq!(wire.borrow().sent.len(), sent);
        assert_eq!(
            state.events.drain(..).collect::<Vec<_>>(),
            vec![NodeEvent::PlayerJoined(first)]
        );
    }

    #[test]
    fn test_losing_host_retires_its_entities() {
        let host_id = NetId::random();
        let local = NetId::random();
        let mut state = node_state(local);
        state.session.roster = Some(Match::joined(host_id, 4, &[host_id, local]));
        let (token, _) = add_peer(&mut state);
        {
            let peer = state.peers.get_mut(&token).unwrap();
            peer.bind_player(host_id);
            peer.set_joined(true);
        }

        let hosts = position_entity(0.0, 0.0).with_owner(host_id);
        let unowned = position_entity(1.0, 1.0);
        let ours = position_entity(2.0, 2.0).with_owner(local);
        let ids = [*hosts.id(), *unowned.id(), *ours.id()];
        let scene = state.scenes.get_mut(1).unwrap();
        scene.insert(hosts);
        scene.insert(unowned);
        scene.insert(ours);

        peer_lost(&mut state, &token);

        assert!(state.session.roster.is_none());
        for id in &ids[..2] {
            let entity = state.scenes.find(id).unwrap();
            assert!(!entity.is_active());
            assert!(entity.is_removed());
        }
        assert!(state.scenes.find(&ids[2]).unwrap().is_active());
        assert!(state.events.contains(&NodeEvent::MatchEnded));
    }

    #[test]
    fn test_roster_slots_and_membership() {
        let host = NetId::random();
        let mut roster = Match::hosted(host, 2);
        assert!(roster.player(&host).unwrap().is_host);

        let guest = NetId::random();
        assert!(roster.add_player(guest));
        assert!(!roster.add_player(guest));
        assert!(roster.is_full());
        assert!(!roster.add_player(NetId::random()));

        assert_eq!(roster.remove_player(&guest).map(|p| p.id), Some(guest));
        assert!(!roster.is_full());
    }

    #[test]
    fn test_joined_roster_marks_host() {
        let host = NetId::random();
        let a = NetId::random();
        let roster = Match::joined(host, 4, &[host, a]);
        assert_eq!(roster.len(), 2);
        assert!(roster.player(&host).unwrap().is_host);
        assert!(!roster.player(&a).unwrap().is_host);
    }

    #[test]
    fn test_median_ping_ignores_host_and_unmeasured() {
        let host = NetId::random();
        let mut roster = Match::hosted(host, 8);
        assert_eq!(roster.median_ping(), None);

        let ids: Vec<PlayerId> = (0..4).map(|_| NetId::random()).collect();
        for id in &ids {
            roster.add_player(*id);
        }
        roster.set_ping(&host, Duration::from_millis(1));
        roster.set_ping(&ids[0], Duration::from_millis(40));
        roster.set_ping(&ids[1], Duration::from_millis(10));
        roster.set_ping(&ids[2], Duration::from_millis(30));
        assert_approx_eq!(roster.median_ping().unwrap(), 30.0);

        roster.set_ping(&ids[3], Duration::from_millis(25));
        assert_approx_eq!(roster.median_ping().unwrap(), 27.5);
    }

    #[test]
    fn test_identity_handshake_receipts() {
        let now = Instant::now();
        let mut handshake = IdentityHandshake::new(Duration::from_secs(1));
        let token = NetId::random();
        let player = NetId::random();

        handshake.expect(token, now);
        assert!(matches!(handshake.state(&token), Some(IdentityState::Pending { .. })));
        assert_eq!(handshake.receive(token, player), IdentityReceipt::Expected);
        assert_eq!(handshake.player_for(&token), Some(player));
        assert_eq!(handshake.receive(token, player), IdentityReceipt::Duplicate);

        let stranger = NetId::random();
        assert_eq!(handshake.receive(stranger, player), IdentityReceipt::Unsolicited);
    }

    #[test]
    fn test_identity_handshake_timeout() {
        let start = Instant::now();
        let mut handshake = IdentityHandshake::new(Duration::from_millis(500));
        let slow = NetId::random();
        let quick = NetId::random();
        handshake.expect(slow, start);
        handshake.expect(quick, start);
        handshake.receive(quick, NetId::random());

        assert!(handshake.expire(start + Duration::from_millis(499)).is_empty());
        assert_eq!(handshake.expire(start + Duration::from_millis(500)), vec![slow]);
        assert_eq!(handshake.state(&slow), None);
        assert!(handshake.player_for(&quick).is_some());
    }

    #[test]
    fn test_disconnect_monitor_finishes_early() {
        let start = Instant::now();
        let a = NetId::random();
        let b = NetId::random();
        let mut monitor = DisconnectMonitor::new([a, b], start + Duration::from_secs(3));

        assert_eq!(monitor.poll(start), None);
        assert!(monitor.acknowledge(&a));
        assert!(!monitor.acknowledge(&a));
        assert_eq!(monitor.poll(start), None);
        assert!(monitor.acknowledge(&b));
        assert_eq!(monitor.poll(start), Some(DisconnectOutcome::Complete));
    }

    #[test]
    fn test_disconnect_monitor_forces_on_timeout() {
        let start = Instant::now();
        let a = NetId::random();
        let monitor = DisconnectMonitor::new([a], start + Duration::from_secs(3));
        assert_eq!(
            monitor.poll(start + Duration::from_secs(3)),
            Some(DisconnectOutcome::TimedOut { missing: vec![a] })
        );
        assert_eq!(
            DisconnectMonitor::new(Vec::<Token>::new(), start).poll(start),
            Some(DisconnectOutcome::Complete)
        );
    }

    #[test]
    fn test_join_response_layout() {
        let host = NetId::random();
        let guest = NetId::random();
        let roster = Match::joined(host, 3, &[guest]);
        let frame = join_response_frame(true, &roster);

        let mut reader = ByteReader::new(&frame);
        assert_eq!(reader.read_u8().unwrap(), PeerCommand::JoinResponse as u8);
        assert!(reader.read_bool().unwrap());
        assert_eq!(PlayerId::read(&mut reader).unwrap(), host);
        assert_eq!(reader.read_u8().unwrap(), 3);
        assert_eq!(reader.read_u8().unwrap(), 2);
        assert_eq!(PlayerId::read(&mut reader).unwrap(), host);
        assert_eq!(PlayerId::read(&mut reader).unwrap(), guest);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_player_ping_saturates() {
        let player = NetId::random();
        let frame = player_ping_frame(&player, Duration::from_secs(120));
        let mut reader = ByteReader::new(&frame[1 + 32..]);
        assert_eq!(reader.read_u16().unwrap(), u16::MAX);
    }
}
