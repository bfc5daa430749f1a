//! Tokio driver: owns the TCP connection to the rendezvous server and runs
//! the node's frame loop
//!
//! The node stays single-threaded. A spawned task reads length-prefixed
//! frames off the socket and hands them over an mpsc channel; everything
//! else (dispatch, ticks, writes) happens on the loop in [`Driver::run`].

use log::{debug, error, info, warn};
use shared::framing::{read_frame, write_frame};
use shared::CodecError;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::error::{NetError, NetResult};
use crate::node::{NetworkNode, NodeEvent};
use crate::signaling::{SignalingAction, SignalingState};

/// Longest a single dial to the rendezvous server may hold up the loop
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Game-side hooks called by the driver loop
pub trait Game {
    /// Called for every node event; return false to stop the loop
    fn on_event(&mut self, _node: &mut NetworkNode, _event: &NodeEvent) -> bool {
        true
    }

    /// Called once per tick before the node's own frame
    fn on_tick(&mut self, _node: &mut NetworkNode, _now: Instant) {}
}

struct Connection {
    writer: OwnedWriteHalf,
    frames: mpsc::UnboundedReceiver<Result<Vec<u8>, CodecError>>,
    reader: JoinHandle<()>,
}

impl Connection {
    async fn open(addr: &str, limit: Duration) -> io::Result<Self> {
        let stream = within(limit, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        let (mut read_half, writer) = stream.into_split();
        let (tx, frames) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(frame)) => {
                        if tx.send(Ok(frame)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            writer,
            frames,
            reader,
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn within<T>(limit: Duration, fut: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect timed out after {:?}", limit),
        )),
    }
}

async fn next_frame(connection: &mut Option<Connection>) -> Option<Result<Vec<u8>, CodecError>> {
    match connection {
        Some(connection) => connection.frames.recv().await,
        None => std::future::pending().await,
    }
}

pub struct Driver {
    node: NetworkNode,
    server_addr: String,
    tick: Duration,
    connect_timeout: Duration,
}

impl Driver {
    pub fn new(node: NetworkNode, server_addr: impl Into<String>, tick_rate: u32) -> Self {
        Self {
            node,
            server_addr: server_addr.into(),
            tick: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = limit;
        self
    }

    pub fn node(&self) -> &NetworkNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut NetworkNode {
        &mut self.node
    }

    pub fn into_node(self) -> NetworkNode {
        self.node
    }

    /// Runs until the game stops the loop or signaling gives up
    pub async fn run<G: Game>(&mut self, game: &mut G) -> NetResult<()> {
        info!("Connecting to rendezvous server at {}", self.server_addr);
        self.node.connect_signaling();

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut connection: Option<Connection> = None;
        let mut dial = true;

        loop {
            if dial && connection.is_none() {
                dial = false;
                match Connection::open(&self.server_addr, self.connect_timeout).await {
                    Ok(opened) => {
                        connection = Some(opened);
                        self.node.on_signaling_open();
                    }
                    Err(e) => self.node.on_signaling_error(Instant::now(), &e.to_string()),
                }
            }

            tokio::select! {
                frame = next_frame(&mut connection) => {
                    let now = Instant::now();
                    match frame {
                        Some(Ok(frame)) => {
                            self.node.handle_signaling_frame(now, &frame);
                        }
                        Some(Err(e)) => {
                            warn!("Signaling read failed: {}", e);
                            connection = None;
                            self.node.on_signaling_error(now, &e.to_string());
                        }
                        None => {
                            info!("Rendezvous server closed the connection");
                            connection = None;
                            self.node.on_signaling_closed(now);
                        }
                    }
                },

                _ = ticker.tick() => {
                    let now = Instant::now();
                    game.on_tick(&mut self.node, now);
                    self.node.frame(now);
                    if let Some(SignalingAction::Connect { attempt }) = self.node.poll_signaling(now) {
                        debug!("Reconnecting to rendezvous server (attempt {})", attempt);
                        dial = true;
                    }
                },
            }

            let outbound = self.node.take_signaling_outbound();
            let mut write_error = None;
            if let Some(open) = connection.as_mut() {
                for frame in &outbound {
                    if let Err(e) = write_frame(&mut open.writer, frame).await {
                        write_error = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = write_error {
                error!("Signaling write failed: {}", e);
                connection = None;
                self.node.on_signaling_error(Instant::now(), &e.to_string());
            }

            while let Some(event) = self.node.poll_event() {
                let keep_going = game.on_event(&mut self.node, &event);
                if event == NodeEvent::SignalingGaveUp {
                    return Err(NetError::Transport(
                        "signaling reconnection attempts exhausted".to_string(),
                    ));
                }
                if !keep_going {
                    self.node.stop_signaling();
                    return Ok(());
                }
            }

            if self.node.signaling_state() == SignalingState::Failed {
                return Err(NetError::Transport(
                    "signaling reconnection attempts exhausted".to_string(),
                ));
            }
        }
    }
}
