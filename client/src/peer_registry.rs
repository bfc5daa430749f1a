//! Token → Peer collection

use log::{info, warn};
use shared::{PlayerId, Token};
use std::collections::HashMap;

use crate::peer::Peer;

/// All known peers, keyed by signaling token.
///
/// Iteration order is unspecified.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<Token, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `peer` under its token. A peer already registered under the
    /// same token is closed before it is replaced.
    pub fn insert(&mut self, peer: Peer) {
        let token = *peer.token();
        if let Some(mut previous) = self.peers.insert(token, peer) {
            warn!("Replacing existing peer {}; closing the old connection", token);
            previous.close();
        } else {
            info!("Registered peer {}", token);
        }
    }

    /// Removes the peer without closing it; the caller owns teardown
    pub fn remove(&mut self, token: &Token) -> Option<Peer> {
        self.peers.remove(token)
    }

    pub fn get(&self, token: &Token) -> Option<&Peer> {
        self.peers.get(token)
    }

    pub fn get_mut(&mut self, token: &Token) -> Option<&mut Peer> {
        self.peers.get_mut(token)
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.peers.contains_key(token)
    }

    pub fn list(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn list_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.peers.keys().copied().collect()
    }

    pub fn find_by_player(&self, player: &PlayerId) -> Option<&Peer> {
        self.peers.values().find(|p| p.player().as_ref() == Some(player))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Closes and removes every peer
    pub fn clear(&mut self) {
        for (_, mut peer) in self.peers.drain() {
            peer.close();
        }
    }
}
