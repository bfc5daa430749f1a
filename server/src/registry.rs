//! Token → connection bookkeeping for the rendezvous server
//!
//! Each accepted socket gets a fresh random token. Outbound frames go through
//! the connection's unbounded channel to its writer task, so the owning loop
//! never awaits a slow socket.

use log::info;
use shared::{NetId, Token};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct Connection {
    pub token: Token,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl Connection {
    /// Queues a frame; false once the writer task is gone
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.sender.send(frame).is_ok()
    }
}

pub struct ConnectionRegistry {
    connections: HashMap<Token, Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Registers a connection under a new token, or `None` when full
    pub fn add(&mut self, addr: SocketAddr, sender: mpsc::UnboundedSender<Vec<u8>>) -> Option<Token> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let mut token = NetId::random();
        while self.connections.contains_key(&token) {
            token = NetId::random();
        }

        info!("Connection {} from {}", token, addr);
        self.connections.insert(
            token,
            Connection {
                token,
                addr,
                connected_at: Instant::now(),
                sender,
            },
        );
        Some(token)
    }

    pub fn remove(&mut self, token: &Token) -> bool {
        if let Some(connection) = self.connections.remove(token) {
            info!(
                "Connection {} closed after {:?}",
                token,
                connection.connected_at.elapsed()
            );
            true
        } else {
            false
        }
    }

    pub fn get(&self, token: &Token) -> Option<&Connection> {
        self.connections.get(token)
    }

    /// Sends `frame` to every connection; returns how many accepted it
    pub fn broadcast(&self, frame: &[u8]) -> usize {
        self.connections
            .values()
            .filter(|connection| connection.send(frame.to_vec()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }
}
