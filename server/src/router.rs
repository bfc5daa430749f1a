//! Frame routing between connected participants
//!
//! Addressed frames carry the target token right after the command byte.
//! The server swaps it for the sender's token before forwarding, so the
//! receiver always learns who it is talking to. Frames only the server may
//! emit (`Welcome`, `Notification`, `OnlinePlayers`) are dropped when a
//! participant sends them.

use shared::protocol::begin_frame;
use shared::{ByteReader, CodecError, SignalingCommand, Token, ID_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Forward { target: Token, frame: Vec<u8> },
    Drop(SignalingCommand),
}

pub fn route(origin: &Token, frame: &[u8]) -> Result<Route, CodecError> {
    let mut reader = ByteReader::new(frame);
    let command = SignalingCommand::try_from(reader.read_u8()?)?;

    match command {
        SignalingCommand::Tunnel
        | SignalingCommand::PlayerIdentity
        | SignalingCommand::Relay
        | SignalingCommand::ChatMessage => {
            let target = Token::read(&mut reader)?;
            let mut forwarded = frame.to_vec();
            forwarded[1..1 + ID_LEN].copy_from_slice(origin.as_bytes());
            Ok(Route::Forward {
                target,
                frame: forwarded,
            })
        }
        SignalingCommand::Notification
        | SignalingCommand::OnlinePlayers
        | SignalingCommand::Welcome => Ok(Route::Drop(command)),
    }
}

pub fn welcome_frame(token: &Token) -> Vec<u8> {
    let mut writer = begin_frame(SignalingCommand::Welcome);
    token.write(&mut writer);
    writer.into_bytes()
}

pub fn notification_frame(text: &str) -> Vec<u8> {
    let mut writer = begin_frame(SignalingCommand::Notification);
    writer.write_var_str(text);
    writer.into_bytes()
}

pub fn online_players_frame(count: u32) -> Vec<u8> {
    let mut writer = begin_frame(SignalingCommand::OnlinePlayers);
    writer.write_u32(count);
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{identity_frame, relay_frame, tunnel_frame};
    use shared::{Channel, NetId, TunnelKind};

    #[test]
    fn test_tunnel_target_is_rewritten_to_origin() {
        let origin = NetId::random();
        let target = NetId::random();
        let frame = tunnel_frame(&target, TunnelKind::IceCandidate, "{}");

        match route(&origin, &frame).unwrap() {
            Route::Forward {
                target: routed,
                frame: forwarded,
            } => {
                assert_eq!(routed, target);
                assert_eq!(forwarded, tunnel_frame(&origin, TunnelKind::IceCandidate, "{}"));
            }
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn test_identity_and_relay_are_forwarded() {
        let origin = NetId::random();
        let target = NetId::random();
        let player = NetId::random();

        let routed = route(&origin, &identity_frame(&target, &player)).unwrap();
        assert_eq!(
            routed,
            Route::Forward {
                target,
                frame: identity_frame(&origin, &player)
            }
        );

        let routed = route(&origin, &relay_frame(&target, Channel::ReliableOrdered, &[9])).unwrap();
        assert_eq!(
            routed,
            Route::Forward {
                target,
                frame: relay_frame(&origin, Channel::ReliableOrdered, &[9])
            }
        );
    }

    #[test]
    fn test_server_only_frames_are_dropped() {
        let origin = NetId::random();
        assert_eq!(
            route(&origin, &welcome_frame(&NetId::random())).unwrap(),
            Route::Drop(SignalingCommand::Welcome)
        );
        assert_eq!(
            route(&origin, &online_players_frame(4)).unwrap(),
            Route::Drop(SignalingCommand::OnlinePlayers)
        );
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        let origin = NetId::random();
        assert!(route(&origin, &[]).is_err());
        assert!(route(&origin, &[99]).is_err());
        assert!(route(&origin, &[SignalingCommand::Tunnel as u8, 1, 2, 3]).is_err());
    }
}
