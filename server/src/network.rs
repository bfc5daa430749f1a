//! Rendezvous server network layer: TCP accept loop and frame routing

use crate::error::RendezvousError;
use crate::registry::ConnectionRegistry;
use crate::router::{notification_frame, online_players_frame, route, welcome_frame, Route};
use log::{debug, error, info, warn};
use shared::framing::{read_frame, write_frame};
use shared::Token;
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const WELCOME_TEXT: &str = "Connected to rendezvous server";
pub const FULL_TEXT: &str = "Server is full";

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    FrameReceived { token: Token, frame: Vec<u8> },
    Disconnected { token: Token },
}

/// Brokers introductions between participants. Owns the registry; the
/// per-connection tasks only move bytes.
pub struct Server {
    listener: TcpListener,
    registry: ConnectionRegistry,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(addr: &str, max_connections: usize) -> Result<Self, RendezvousError> {
        let listener = TcpListener::bind(addr).await?;
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        info!(
            "Rendezvous server listening on {} (max {} connections)",
            listener.local_addr()?,
            max_connections
        );

        Ok(Self {
            listener,
            registry: ConnectionRegistry::new(max_connections),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RendezvousError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    fn spawn_reader(&self, token: Token, mut reader: OwnedReadHalf) {
        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if server_tx
                            .send(ServerMessage::FrameReceived { token, frame })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Read from {} failed: {}", token, e);
                        break;
                    }
                }
            }
            let _ = server_tx.send(ServerMessage::Disconnected { token });
        });
    }

    fn spawn_writer(
        token: Token,
        mut writer: OwnedWriteHalf,
        mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!("Write to {} failed: {}", token, e);
                    break;
                }
            }
            debug!("Writer for {} finished", token);
        });
    }

    async fn handle_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }
        let (reader, mut writer) = stream.into_split();

        if self.registry.is_full() {
            warn!("Rejecting {}: server full", addr);
            let _ = write_frame(&mut writer, &notification_frame(FULL_TEXT)).await;
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let token = match self.registry.add(addr, tx) {
            Some(token) => token,
            None => return,
        };
        Self::spawn_writer(token, writer, rx);
        self.spawn_reader(token, reader);

        if let Some(connection) = self.registry.get(&token) {
            connection.send(welcome_frame(&token));
            connection.send(notification_frame(WELCOME_TEXT));
        }
        self.broadcast_online_players();
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::FrameReceived { token, frame } => self.handle_frame(token, &frame),
            ServerMessage::Disconnected { token } => {
                if self.registry.remove(&token) {
                    self.broadcast_online_players();
                }
            }
        }
    }

    fn handle_frame(&mut self, origin: Token, frame: &[u8]) {
        match route(&origin, frame) {
            Ok(Route::Forward { target, frame }) => match self.registry.get(&target) {
                Some(connection) => {
                    if !connection.send(frame) {
                        debug!("Dropping frame for {}: writer closed", target);
                    }
                }
                None => debug!("Dropping frame from {} for unknown token {}", origin, target),
            },
            Ok(Route::Drop(command)) => {
                warn!("{} sent server-only command {:?}", origin, command)
            }
            Err(e) => warn!("Malformed frame from {}: {}", origin, e),
        }
    }

    fn broadcast_online_players(&self) {
        let count = self.registry.len() as u32;
        debug!("{} participants online", count);
        self.registry.broadcast(&online_players_frame(count));
    }

    /// Runs the accept and routing loop until the listener fails
    pub async fn run(&mut self) -> Result<(), RendezvousError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.handle_accept(stream, addr).await,
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            return Err(e.into());
                        }
                    }
                },

                Some(message) = self.server_rx.recv() => {
                    self.handle_message(message);
                },
            }
        }
    }
}
