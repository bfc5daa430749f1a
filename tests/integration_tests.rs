//! Integration tests for the networking core
//!
//! These tests run several nodes against each other. Most route signaling
//! frames through an in-memory switchboard that uses the server's own router;
//! the last module runs the real rendezvous server over TCP.

use client::entity::{EntityFactory, EntityPayload, Scene, SceneSet, SyncedEntity};
use client::relay::RelayTransportFactory;
use client::{NetConfig, NetworkNode, NodeEvent};
use server::router::{route, welcome_frame, Route};
use shared::{ByteReader, ByteWriter, Channel, CodecError, NetId, PlayerId, Token};
use std::any::Any;
use std::time::{Duration, Instant};

const WORLD: u8 = 0;
const POSITION: u8 = 3;

#[derive(Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

impl EntityPayload for Position {
    fn serialize(&self, writer: &mut ByteWriter) {
        writer.write_f32(self.x);
        writer.write_f32(self.y);
    }

    fn synchronize(&mut self, reader: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.x = reader.read_f32()?;
        self.y = reader.read_f32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn new_node(config: NetConfig) -> NetworkNode {
    NetworkNode::new(
        config,
        NetId::random(),
        Box::new(RelayTransportFactory::new()),
        SceneSet::new().with_scene(Scene::new(WORLD)),
        EntityFactory::new().with(POSITION, || Box::new(Position::default())),
    )
}

fn position_of(node: &NetworkNode, id: &NetId) -> Option<(f32, f32)> {
    node.scenes()
        .get(WORLD)
        .and_then(|scene| scene.get(id))
        .and_then(|entity| entity.payload_as::<Position>())
        .map(|p| (p.x, p.y))
}

/// Stands in for the rendezvous server: every node's outbound frames are
/// routed with the server's router and handed to the target node
struct Switchboard {
    nodes: Vec<(Token, NetworkNode)>,
    now: Instant,
}

impl Switchboard {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            now: Instant::now(),
        }
    }

    fn add(&mut self, config: NetConfig) -> usize {
        let token = NetId::random();
        let mut node = new_node(config);
        node.connect_signaling();
        node.on_signaling_open();
        node.handle_signaling_frame(self.now, &welcome_frame(&token));
        node.drain_events();
        self.nodes.push((token, node));
        self.nodes.len() - 1
    }

    fn token(&self, index: usize) -> Token {
        self.nodes[index].0
    }

    fn player(&self, index: usize) -> PlayerId {
        self.nodes[index].1.local_player()
    }

    fn node(&mut self, index: usize) -> &mut NetworkNode {
        &mut self.nodes[index].1
    }

    /// Routes outbound frames until every queue is empty
    fn deliver(&mut self) {
        for _ in 0..64 {
            let mut in_flight = Vec::new();
            for (token, node) in self.nodes.iter_mut() {
                for frame in node.take_signaling_outbound() {
                    in_flight.push((*token, frame));
                }
            }
            if in_flight.is_empty() {
                return;
            }

            for (origin, frame) in in_flight {
                let (target, frame) = match route(&origin, &frame) {
                    Ok(Route::Forward { target, frame }) => (target, frame),
                    _ => continue,
                };
                let now = self.now;
                if let Some((_, node)) = self.nodes.iter_mut().find(|(t, _)| *t == target) {
                    node.handle_signaling_frame(now, &frame);
                }
            }
        }
        panic!("signaling traffic never settled");
    }

    /// Advances time by one tick, runs every node's frame and delivers
    fn tick(&mut self) {
        self.now += Duration::from_millis(16);
        let now = self.now;
        for (_, node) in self.nodes.iter_mut() {
            node.frame(now);
        }
        self.deliver();
    }

    fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    fn join(&mut self, guest: usize, host: usize) {
        let now = self.now;
        let host_token = self.token(host);
        self.node(guest).join_match(now, host_token).unwrap();
        self.deliver();
        self.run(4);
    }
}

/// MATCH LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// A guest joins through negotiation, identity exchange and snapshot
    #[test]
    fn guest_joins_hosted_match() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let guest = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();

        board.join(guest, host);

        let host_player = board.player(host);
        let guest_player = board.player(guest);
        let guest_events = board.node(guest).drain_events();
        assert!(guest_events.contains(&NodeEvent::JoinAccepted { host: host_player }));
        assert!(guest_events.contains(&NodeEvent::SnapshotComplete));
        assert!(guest_events.contains(&NodeEvent::IdentityReceived {
            token: board.token(host),
            player: host_player
        }));

        let host_events = board.node(host).drain_events();
        assert!(host_events.contains(&NodeEvent::PlayerJoined(guest_player)));

        let roster = board.node(guest).roster().unwrap();
        assert_eq!(roster.host_id(), host_player);
        assert!(roster.contains(&guest_player));
        assert!(!board.node(guest).is_host());
        assert_eq!(board.node(host).roster().unwrap().len(), 2);
    }

    /// Existing guests learn about newcomers from the host
    #[test]
    fn third_player_is_announced() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let a = board.add(NetConfig::default());
        let b = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();

        board.join(a, host);
        board.node(a).drain_events();
        board.join(b, host);

        let b_player = board.player(b);
        assert!(board
            .node(a)
            .drain_events()
            .contains(&NodeEvent::PlayerJoined(b_player)));
        assert_eq!(board.node(a).roster().unwrap().len(), 3);
        let a_player = board.player(a);
        assert!(board.node(b).roster().unwrap().contains(&a_player));
    }

    /// A full match turns the next guest away
    #[test]
    fn full_match_rejects_guest() {
        let mut board = Switchboard::new();
        let config = NetConfig {
            match_slots: 2,
            ..NetConfig::default()
        };
        let host = board.add(config.clone());
        let a = board.add(config.clone());
        let b = board.add(config);
        board.node(host).host_match().unwrap();

        board.join(a, host);
        board.join(b, host);

        assert!(board.node(b).drain_events().contains(&NodeEvent::JoinRejected));
        assert!(board.node(b).roster().is_none());
        assert!(board.node(b).peers().is_empty());
        assert_eq!(board.node(host).roster().unwrap().len(), 2);
    }

    /// A guest leaving is acknowledged and announced to the others
    #[test]
    fn guest_leaves_gracefully() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let a = board.add(NetConfig::default());
        let b = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();
        board.join(a, host);
        board.join(b, host);
        board.node(a).drain_events();
        board.node(host).drain_events();

        let now = board.now;
        board.node(b).leave_match(now).unwrap();
        board.deliver();
        board.run(2);

        let b_player = board.player(b);
        assert!(board
            .node(b)
            .drain_events()
            .contains(&NodeEvent::LeftMatch { timed_out: false }));
        assert!(board.node(b).roster().is_none());
        assert!(board
            .node(host)
            .drain_events()
            .contains(&NodeEvent::PlayerLeft(b_player)));
        assert!(board
            .node(a)
            .drain_events()
            .contains(&NodeEvent::PlayerLeft(b_player)));
        assert_eq!(board.node(host).roster().unwrap().len(), 2);
    }

    /// Guests see the match end when the host leaves
    #[test]
    fn host_leaving_ends_match() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let a = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();
        board.join(a, host);

        let host_player = board.player(host);
        let id = NetId::random();
        let entity = SyncedEntity::new(id, POSITION, Box::new(Position::default()))
            .with_owner(host_player);
        board.node(host).scenes_mut().get_mut(WORLD).unwrap().insert(entity);
        board.tick();
        assert!(board.node(a).scenes().find(&id).is_some());
        board.node(a).drain_events();

        let now = board.now;
        board.node(host).leave_match(now).unwrap();
        board.deliver();
        board.run(2);

        assert!(board
            .node(host)
            .drain_events()
            .contains(&NodeEvent::LeftMatch { timed_out: false }));
        let events = board.node(a).drain_events();
        assert!(events.contains(&NodeEvent::MatchEnded));
        assert!(board.node(a).roster().is_none());
        assert!(board
            .node(a)
            .scenes()
            .find(&id)
            .map_or(true, |entity| !entity.is_active()));
    }
}

/// ENTITY REPLICATION TESTS
mod replication_tests {
    use super::*;

    /// Host-owned entities reach guests and their removal follows
    #[test]
    fn host_entity_lifecycle() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let guest = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();
        board.join(guest, host);

        let host_player = board.player(host);
        let id = NetId::random();
        let entity = SyncedEntity::new(id, POSITION, Box::new(Position { x: 1.0, y: 2.0 }))
            .with_owner(host_player);
        board.node(host).scenes_mut().get_mut(WORLD).unwrap().insert(entity);
        board.tick();

        let local = board
            .node(guest)
            .scenes()
            .get(WORLD)
            .and_then(|scene| scene.get(&id))
            .map(|entity| (entity.owner(), entity.type_tag()));
        assert_eq!(local, Some((Some(host_player), POSITION)));
        assert_eq!(position_of(board.node(guest), &id), Some((1.0, 2.0)));

        board
            .node(host)
            .scenes_mut()
            .get_mut(WORLD)
            .and_then(|scene| scene.get_mut(&id))
            .unwrap()
            .deactivate();
        let now = board.now + Duration::from_millis(16);
        board.node(host).frame(now);
        board.deliver();

        let removed = board
            .node(guest)
            .scenes()
            .get(WORLD)
            .and_then(|scene| scene.get(&id))
            .map(|entity| (entity.is_active(), entity.is_removed()));
        assert_eq!(removed, Some((false, true)));

        board.tick();
        assert!(board.node(guest).scenes().find(&id).is_none());
        assert!(board.node(host).scenes().find(&id).is_none());
    }

    /// A guest's entity travels to the other guest through the host
    #[test]
    fn guest_entity_is_relayed_by_host() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let a = board.add(NetConfig::default());
        let b = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();
        board.join(a, host);
        board.join(b, host);

        let a_player = board.player(a);
        let id = NetId::random();
        let entity = SyncedEntity::new(id, POSITION, Box::new(Position { x: 5.0, y: 0.0 }))
            .with_owner(a_player);
        board.node(a).scenes_mut().get_mut(WORLD).unwrap().insert(entity);
        board.run(2);

        assert_eq!(position_of(board.node(host), &id), Some((5.0, 0.0)));
        assert_eq!(position_of(board.node(b), &id), Some((5.0, 0.0)));

        if let Some(entity) = board
            .node(a)
            .scenes_mut()
            .get_mut(WORLD)
            .and_then(|scene| scene.get_mut(&id))
        {
            if let Some(position) = entity.payload_as_mut::<Position>() {
                position.x = 6.5;
            }
            entity.mark_dirty(false);
        }
        board.run(2);

        assert_eq!(position_of(board.node(b), &id), Some((6.5, 0.0)));
        assert_eq!(
            board.node(b).scenes().find(&id).and_then(|e| e.owner()),
            Some(a_player)
        );
    }

    /// Late joiners receive existing entities in the join snapshot
    #[test]
    fn snapshot_carries_existing_entities() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let guest = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();

        let host_player = board.player(host);
        let id = NetId::random();
        let entity = SyncedEntity::new(id, POSITION, Box::new(Position { x: 3.0, y: 4.0 }))
            .with_owner(host_player);
        board.node(host).scenes_mut().get_mut(WORLD).unwrap().insert(entity);
        board.run(3);

        board.join(guest, host);
        assert_eq!(position_of(board.node(guest), &id), Some((3.0, 4.0)));
    }

    /// Entities owned by a departed guest are retired on the host
    #[test]
    fn departed_owner_releases_entities() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let a = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();
        board.join(a, host);

        let a_player = board.player(a);
        let id = NetId::random();
        let entity = SyncedEntity::new(id, POSITION, Box::new(Position::default()))
            .with_owner(a_player);
        board.node(a).scenes_mut().get_mut(WORLD).unwrap().insert(entity);
        board.run(2);
        assert_eq!(
            board.node(host).scenes().find(&id).and_then(|e| e.owner()),
            Some(a_player)
        );

        let now = board.now;
        board.node(a).leave_match(now).unwrap();
        board.deliver();
        board.run(2);

        assert!(board.node(host).scenes().find(&id).is_none());
    }
}

/// GAME TRAFFIC TESTS
mod traffic_tests {
    use super::*;

    /// Events and chat reach joined peers tagged with the sender
    #[test]
    fn events_and_chat_reach_host() {
        let mut board = Switchboard::new();
        let host = board.add(NetConfig::default());
        let guest = board.add(NetConfig::default());
        board.node(host).host_match().unwrap();
        board.join(guest, host);
        board.node(host).drain_events();

        let guest_player = board.player(guest);
        assert_eq!(board.node(guest).send_event(Channel::UnreliableUnordered, &[1, 2, 3]), 1);
        assert_eq!(board.node(guest).send_chat("gg"), 1);
        board.deliver();

        let events = board.node(host).drain_events();
        assert!(events.contains(&NodeEvent::GameEvent {
            from: guest_player,
            channel: Channel::UnreliableUnordered,
            payload: vec![1, 2, 3],
        }));
        assert!(events.contains(&NodeEvent::Chat {
            from: guest_player,
            text: "gg".to_string(),
        }));
    }

    /// Lobby chat goes through the server to a bare token
    #[test]
    fn lobby_chat_between_tokens() {
        let mut board = Switchboard::new();
        let a = board.add(NetConfig::default());
        let b = board.add(NetConfig::default());

        let b_token = board.token(b);
        assert!(board.node(a).send_lobby_chat(&b_token, "anyone up for a match?"));
        board.deliver();

        assert_eq!(
            board.node(b).drain_events(),
            vec![NodeEvent::LobbyChat {
                from: board.token(a),
                text: "anyone up for a match?".to_string(),
            }]
        );
    }
}

/// REAL SERVER TESTS
mod server_tests {
    use super::*;
    use client::driver::{Driver, Game};
    use server::network::Server;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::time::timeout;

    struct Host {
        token: Rc<Cell<Option<Token>>>,
        joined: Option<PlayerId>,
    }

    impl Game for Host {
        fn on_event(&mut self, _node: &mut NetworkNode, event: &NodeEvent) -> bool {
            match event {
                NodeEvent::Welcome(token) => self.token.set(Some(*token)),
                NodeEvent::PlayerJoined(player) => {
                    self.joined = Some(*player);
                    return false;
                }
                _ => {}
            }
            true
        }
    }

    struct Guest {
        host_token: Rc<Cell<Option<Token>>>,
        asked: bool,
        accepted: bool,
    }

    impl Game for Guest {
        fn on_event(&mut self, _node: &mut NetworkNode, event: &NodeEvent) -> bool {
            match event {
                NodeEvent::JoinAccepted { .. } => self.accepted = true,
                NodeEvent::SnapshotComplete => return false,
                _ => {}
            }
            true
        }

        fn on_tick(&mut self, node: &mut NetworkNode, now: Instant) {
            if self.asked || node.own_token().is_none() {
                return;
            }
            if let Some(host) = self.host_token.get() {
                self.asked = true;
                node.join_match(now, host).unwrap();
            }
        }
    }

    /// Two nodes find each other through the rendezvous server and join
    #[tokio::test]
    async fn join_through_rendezvous_server() {
        let mut server = Server::bind("127.0.0.1:0", 16).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let server_task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let shared_token = Rc::new(Cell::new(None));
        let mut host_node = new_node(NetConfig::default());
        host_node.host_match().unwrap();
        let mut host_driver = Driver::new(host_node, addr.clone(), 100);
        let mut host_game = Host {
            token: Rc::clone(&shared_token),
            joined: None,
        };

        let mut guest_driver = Driver::new(new_node(NetConfig::default()), addr, 100);
        let mut guest_game = Guest {
            host_token: shared_token,
            asked: false,
            accepted: false,
        };

        let result = timeout(Duration::from_secs(10), async {
            tokio::join!(
                host_driver.run(&mut host_game),
                guest_driver.run(&mut guest_game)
            )
        })
        .await;
        server_task.abort();

        let (host_result, guest_result) = result.expect("match setup timed out");
        assert!(host_result.is_ok());
        assert!(guest_result.is_ok());
        assert!(guest_game.accepted);
        assert_eq!(host_game.joined, Some(guest_driver.node().local_player()));
    }
}
