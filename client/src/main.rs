use clap::Parser;
use client::config::NetConfig;
use client::driver::{Driver, Game};
use client::entity::{EntityFactory, EntityPayload, Scene, SceneSet, SyncedEntity};
use client::node::{NetworkNode, NodeEvent};
use client::relay::RelayTransportFactory;
use log::{error, info, warn};
use shared::{ByteReader, ByteWriter, CodecError, NetId, Token};
use std::any::Any;
use std::time::Instant;

const WORLD_SCENE: u8 = 0;
const BEACON_TYPE: u8 = 1;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rendezvous server address
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// JSON file with networking settings
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Frames per second of the network loop
    #[arg(short = 't', long, default_value = "30")]
    tick_rate: u32,

    /// Host a match instead of waiting for a token to join
    #[arg(long, conflicts_with = "join")]
    host: bool,

    /// Token of the host to join
    #[arg(short = 'j', long)]
    join: Option<String>,

    /// Player id to use (random when omitted)
    #[arg(short = 'p', long)]
    player: Option<String>,
}

/// A point that drifts around so there is something to replicate
#[derive(Debug, Default)]
struct Beacon {
    x: f32,
    y: f32,
}

impl EntityPayload for Beacon {
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

struct Demo {
    join: Option<Token>,
    beacon: Option<NetId>,
    started: Instant,
}

impl Game for Demo {
    fn on_event(&mut self, node: &mut NetworkNode, event: &NodeEvent) -> bool {
        match event {
            NodeEvent::Welcome(token) => {
                info!("Our token is {}", token);
                if let Some(host) = self.join.take() {
                    if let Err(e) = node.join_match(Instant::now(), host) {
                        error!("Could not join {}: {}", host, e);
                        return false;
                    }
                }
            }
            NodeEvent::PlayerJoined(player) => info!("{} joined", player),
            NodeEvent::PlayerLeft(player) => info!("{} left", player),
            NodeEvent::JoinRejected => {
                warn!("The host rejected us");
                return false;
            }
            NodeEvent::MatchEnded | NodeEvent::LeftMatch { .. } => return false,
            NodeEvent::Chat { from, text } => info!("<{}> {}", from, text),
            other => info!("{:?}", other),
        }
        true
    }

    fn on_tick(&mut self, node: &mut NetworkNode, now: Instant) {
        let local = node.local_player();
        if node.is_host() && self.beacon.is_none() {
            let beacon = SyncedEntity::new(NetId::random(), BEACON_TYPE, Box::new(Beacon::default()))
                .with_owner(local);
            self.beacon = Some(*beacon.id());
            if let Some(scene) = node.scenes_mut().get_mut(WORLD_SCENE) {
                scene.insert(beacon);
            }
        }

        let id = match self.beacon {
            Some(id) => id,
            None => return,
        };
        let t = now.duration_since(self.started).as_secs_f32();
        if let Some(entity) = node
            .scenes_mut()
            .get_mut(WORLD_SCENE)
            .and_then(|scene| scene.get_mut(&id))
        {
            if let Some(beacon) = entity.payload_as_mut::<Beacon>() {
                beacon.x = t.cos() * 100.0;
                beacon.y = t.sin() * 100.0;
            }
            entity.mark_dirty(false);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => NetConfig::from_file(path)?,
        None => NetConfig::default(),
    };
    let player = match &args.player {
        Some(id) => NetId::from_str_padded(id)?,
        None => NetId::random(),
    };
    let join = args
        .join
        .as_deref()
        .map(NetId::from_str_padded)
        .transpose()?;

    info!("Starting node for player {}", player);
    info!("Rendezvous server: {}", args.server);

    let factory = EntityFactory::new().with(BEACON_TYPE, || Box::new(Beacon::default()));
    let scenes = SceneSet::new().with_scene(Scene::new(WORLD_SCENE));
    let mut node = NetworkNode::new(
        config,
        player,
        Box::new(RelayTransportFactory::new()),
        scenes,
        factory,
    );
    if args.host {
        node.host_match()?;
    }

    let mut demo = Demo {
        join,
        beacon: None,
        started: Instant::now(),
    };
    let mut driver = Driver::new(node, args.server, args.tick_rate);
    driver.run(&mut demo).await?;

    info!("Node stopped");
    Ok(())
}
