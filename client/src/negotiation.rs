//! Link setup and upkeep: offer/answer and candidates carried in signaling
//! tunnels, relayed peer traffic, and ping round trips
//!
//! Role decides how an inbound description is read. A host answers any
//! offer and creates peers for tokens it has not seen; a non-host only
//! accepts answers to offers it made.

use log::{debug, info, warn};
use shared::protocol::{begin_frame, tunnel_frame};
use shared::{ByteReader, Channel, CodecError, PeerCommand, SignalingCommand, Token, TunnelKind};
use std::time::Instant;

use crate::error::{NetError, NetResult};
use crate::node::{broadcast, NodeEvent, NodeState, PeerHandlers, SignalingHandlers};
use crate::peer::Peer;
use crate::session::player_ping_frame;
use crate::transport::{IceCandidate, SessionDescription};

/// Creates a peer for `token` and tunnels our offer to it
pub(crate) fn connect(state: &mut NodeState, token: Token, now: Instant) -> NetResult<()> {
    let transport = state.transports.create(&token);
    let mut peer = Peer::new(token, transport, now);
    let offer = peer.start_offer()?;
    let json = serde_json::to_string(&offer)?;
    state.peers.insert(peer);
    state
        .signaling
        .send(tunnel_frame(&token, TunnelKind::SessionDescription, &json));
    info!("Offered a connection to {}", token);
    Ok(())
}

/// Drops a peer whose negotiation cannot continue
pub(crate) fn fail(state: &mut NodeState, token: &Token) {
    if let Some(mut peer) = state.peers.remove(token) {
        peer.close();
    }
    if state.session.joining == Some(*token) {
        state.session.joining = None;
    }
    warn!("Negotiation with {} failed", token);
    state.emit(NodeEvent::NegotiationFailed(*token));
}

/// The host takes any token; everyone else only talks to peers it created
fn ensure_peer(state: &mut NodeState, token: Token) -> NetResult<()> {
    if state.peers.contains(&token) {
        return Ok(());
    }
    if !state.is_host() || state.session.disconnect.is_some() {
        return Err(NetError::UnknownToken(token));
    }
    let transport = state.transports.create(&token);
    state.peers.insert(Peer::new(token, transport, state.now));
    info!("Incoming connection from {}", token);
    Ok(())
}

fn on_tunnel(state: &mut NodeState, _: &(), reader: &mut ByteReader<'_>) -> NetResult<()> {
    let origin = Token::read(reader)?;
    let kind = TunnelKind::try_from(reader.read_u8()?)?;
    let json = std::str::from_utf8(reader.read_remaining()).map_err(|_| CodecError::InvalidUtf8)?;
    let is_host = state.is_host();

    match kind {
        TunnelKind::SessionDescription => {
            let desc: SessionDescription = serde_json::from_str(json)?;
            ensure_peer(state, origin)?;
            let applied = state.peer_mut(&origin)?.apply_remote_description(&desc, is_host);
            match applied {
                Ok(Some(answer)) => {
                    let json = serde_json::to_string(&answer)?;
                    state
                        .signaling
                        .send(tunnel_frame(&origin, TunnelKind::SessionDescription, &json));
                    debug!("Answered offer from {}", origin);
                }
                Ok(None) => debug!("Applied answer from {}", origin),
                Err(e @ NetError::InvalidPeerState { .. }) => return Err(e),
                Err(e) => {
                    fail(state, &origin);
                    return Err(e);
                }
            }
        }
        TunnelKind::IceCandidate => {
            let candidate: IceCandidate = serde_json::from_str(json)?;
            ensure_peer(state, origin)?;
            let added = state.peer_mut(&origin)?.add_remote_candidate(candidate);
            match added {
                Ok(()) => {}
                Err(e @ NetError::InvalidPeerState { .. }) => return Err(e),
                Err(e) => {
                    fail(state, &origin);
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}

/// Forwards a local candidate to the remote side
pub(crate) fn send_candidate(state: &mut NodeState, token: &Token, candidate: &IceCandidate) {
    match serde_json::to_string(candidate) {
        Ok(json) => {
            state
                .signaling
                .send(tunnel_frame(token, TunnelKind::IceCandidate, &json));
        }
        Err(e) => warn!("Could not encode candidate for {}: {}", token, e),
    }
}

fn ping_frame(command: PeerCommand, sequence: u32) -> Vec<u8> {
    let mut writer = begin_frame(command);
    writer.write_u32(sequence);
    writer.into_bytes()
}

/// Pings every connected peer whose interval has elapsed
pub(crate) fn send_pings(state: &mut NodeState, now: Instant) {
    let interval = state.config.ping_interval();
    for peer in state.peers.list_mut() {
        if let Some(sequence) = peer.next_ping(now, interval) {
            if let Err(e) = peer.send(
                Channel::UnreliableUnordered,
                &ping_frame(PeerCommand::PingRequest, sequence),
            ) {
                debug!("Ping to {} failed: {}", peer.token(), e);
            }
        }
    }
}

pub(crate) fn register_signaling(handlers: &mut SignalingHandlers) {
    handlers.register("negotiation", SignalingCommand::Tunnel, on_tunnel);
    handlers.register("negotiation", SignalingCommand::Relay, |state, _, reader| {
        let origin = Token::read(reader)?;
        let channel = Channel::try_from(reader.read_u8()?)?;
        let payload = reader.read_remaining().to_vec();
        state.relayed.push_back((origin, channel, payload));
        Ok(())
    });
}

pub(crate) fn register(handlers: &mut PeerHandlers) {
    handlers.register("negotiation", PeerCommand::PingRequest, |state, src, reader| {
        let sequence = reader.read_u32()?;
        state.peer_mut(&src.token)?.send(
            Channel::UnreliableUnordered,
            &ping_frame(PeerCommand::PingResponse, sequence),
        )
    });
    handlers.register("negotiation", PeerCommand::PingResponse, |state, src, reader| {
        let sequence = reader.read_u32()?;
        let now = state.now;
        let peer = state.peer_mut(&src.token)?;
        let rtt = match peer.complete_ping(sequence, now) {
            Some(rtt) => rtt,
            None => {
                debug!("Stale ping response {} from {}", sequence, src.token);
                return Ok(());
            }
        };
        let player = peer.player();

        let local = state.local;
        let roster = match state.session.roster.as_mut() {
            Some(roster) => roster,
            None => return Ok(()),
        };
        if roster.host_id() == local {
            if let Some(player) = player {
                roster.set_ping(&player, rtt);
                broadcast(
                    &mut state.peers,
                    Some(&src.token),
                    Channel::UnreliableUnordered,
                    &player_ping_frame(&player, rtt),
                );
            }
        } else if player == Some(roster.host_id()) {
            roster.set_ping(&local, rtt);
        }
        Ok(())
    });
}
