//! Transport seam between a [`Peer`](crate::peer::Peer) and whatever moves
//! its bytes (a WebRTC stack, the signaling relay, a test double).
//!
//! Transports are polled: negotiation results that would be asynchronous in
//! a browser stack surface later as [`TransportEvent`]s.

use serde::{Deserialize, Serialize};
use shared::{Channel, Token};

use crate::error::NetResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP blob as carried in Tunnel(SessionDescription) JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// ICE candidate as carried in Tunnel(IceCandidate) JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local candidate to forward to the remote side through the tunnel
    LocalCandidate(IceCandidate),
    Connected,
    Failed(String),
    Closed,
    Data(Channel, Vec<u8>),
}

/// One connection to one remote participant
pub trait PeerTransport {
    fn create_offer(&mut self) -> NetResult<SessionDescription>;

    /// Applies a remote offer and produces the answer to send back
    fn accept_offer(&mut self, offer: &SessionDescription) -> NetResult<SessionDescription>;

    fn accept_answer(&mut self, answer: &SessionDescription) -> NetResult<()>;

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> NetResult<()>;

    fn send(&mut self, channel: Channel, data: &[u8]) -> NetResult<()>;

    fn poll_event(&mut self) -> Option<TransportEvent>;

    fn close(&mut self);
}

/// Builds a transport for a newly created peer
pub trait TransportFactory {
    fn create(&mut self, token: &Token) -> Box<dyn PeerTransport>;

    /// Frames the transports need carried over the signaling channel
    fn poll_signaling(&mut self) -> Option<Vec<u8>> {
        None
    }
}
