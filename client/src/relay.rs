//! Peer transport that tunnels every channel through the rendezvous server.
//!
//! Used when no direct path exists (and by the headless binary). Negotiation
//! still runs the normal offer/answer/candidate exchange so the peer state
//! machine is identical; the transport reports `Connected` once a remote
//! description and one remote candidate have been applied. All three tiers
//! ride the ordered signaling stream, which satisfies each tier's guarantees.

use log::debug;
use shared::protocol::relay_frame;
use shared::{Channel, Token};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{NetError, NetResult};
use crate::transport::{
    IceCandidate, PeerTransport, SdpKind, SessionDescription, TransportEvent, TransportFactory,
};

pub const RELAY_SDP: &str = "v=0\r\na=relay\r\n";
pub const RELAY_CANDIDATE: &str = "candidate:relay 1 tcp 0 rendezvous 0 typ relay";

type Outbox = Rc<RefCell<VecDeque<Vec<u8>>>>;

pub struct RelayTransport {
    token: Token,
    outbox: Outbox,
    events: VecDeque<TransportEvent>,
    remote_description: bool,
    remote_candidate: bool,
    connected: bool,
    closed: bool,
}

impl RelayTransport {
    fn new(token: Token, outbox: Outbox) -> Self {
        Self {
            token,
            outbox,
            events: VecDeque::new(),
            remote_description: false,
            remote_candidate: false,
            connected: false,
            closed: false,
        }
    }

    fn local_candidate() -> IceCandidate {
        IceCandidate {
            candidate: RELAY_CANDIDATE.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    fn check_open(&self) -> NetResult<()> {
        if self.closed {
            return Err(NetError::Transport(format!("relay to {} is closed", self.token)));
        }
        Ok(())
    }

    fn check_sdp(desc: &SessionDescription, kind: SdpKind) -> NetResult<()> {
        if desc.kind != kind || desc.sdp != RELAY_SDP {
            return Err(NetError::Transport(format!(
                "relay cannot apply {:?} description",
                desc.kind
            )));
        }
        Ok(())
    }

    fn maybe_connect(&mut self) {
        if self.remote_description && self.remote_candidate && !self.connected {
            debug!("Relay to {} established", self.token);
            self.connected = true;
            self.events.push_back(TransportEvent::Connected);
        }
    }
}

impl PeerTransport for RelayTransport {
    fn create_offer(&mut self) -> NetResult<SessionDescription> {
        self.check_open()?;
        self.events
            .push_back(TransportEvent::LocalCandidate(Self::local_candidate()));
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: RELAY_SDP.to_string(),
        })
    }

    fn accept_offer(&mut self, offer: &SessionDescription) -> NetResult<SessionDescription> {
        self.check_open()?;
        Self::check_sdp(offer, SdpKind::Offer)?;
        self.remote_description = true;
        self.events
            .push_back(TransportEvent::LocalCandidate(Self::local_candidate()));
        self.maybe_connect();
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: RELAY_SDP.to_string(),
        })
    }

    fn accept_answer(&mut self, answer: &SessionDescription) -> NetResult<()> {
        self.check_open()?;
        Self::check_sdp(answer, SdpKind::Answer)?;
        self.remote_description = true;
        self.maybe_connect();
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> NetResult<()> {
        self.check_open()?;
        if candidate.candidate != RELAY_CANDIDATE {
            return Err(NetError::Transport(format!(
                "relay cannot use candidate {:?}",
                candidate.candidate
            )));
        }
        self.remote_candidate = true;
        self.maybe_connect();
        Ok(())
    }

    fn send(&mut self, channel: Channel, data: &[u8]) -> NetResult<()> {
        if !self.connected {
            return Err(NetError::Transport(format!(
                "relay to {} is not connected",
                self.token
            )));
        }
        self.outbox
            .borrow_mut()
            .push_back(relay_frame(&self.token, channel, data));
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn close(&mut self) {
        self.closed = true;
        self.connected = false;
    }
}

/// Builds [`RelayTransport`]s sharing one outbound frame queue
#[derive(Default)]
pub struct RelayTransportFactory {
    outbox: Outbox,
}

impl RelayTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportFactory for RelayTransportFactory {
    fn create(&mut self, token: &Token) -> Box<dyn PeerTransport> {
        Box::new(RelayTransport::new(*token, Rc::clone(&self.outbox)))
    }

    fn poll_signaling(&mut self) -> Option<Vec<u8>> {
        self.outbox.borrow_mut().pop_front()
    }
}
