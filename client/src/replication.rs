//! Entity replication: the per-frame send pass, join snapshots and the
//! `EntityData` receive path
//!
//! Message layout:
//! `[EntityData][scene:1][state:1][type:1][owner:32][entity:32][payload…]`
//!
//! Delivery tier per message:
//! - removed entity → reliable-unordered
//! - `must_sync_reliably` → reliable-ordered
//! - otherwise → unreliable-unordered
//!
//! Non-hosts only talk to the host, which relays everything it receives to
//! the other participants on its next pass.

use log::{debug, trace, warn};
use shared::protocol::begin_frame;
use shared::{ByteReader, Channel, EntityState, NetId, PeerCommand, PlayerId};
use std::time::{Duration, Instant};

use crate::entity::{EntityFactory, SceneSet, SyncedEntity};
use crate::error::{NetError, NetResult};
use crate::node::PeerHandlers;
use crate::peer::Peer;
use crate::peer_registry::PeerRegistry;
use crate::session::Match;

/// Counters for one send pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Entities serialized this pass
    pub entities: usize,
    /// Messages handed to peers
    pub messages: usize,
}

/// What an inbound `EntityData` did to the local scenes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Created,
    Updated,
    Removed,
    /// Removal of an entity we never had
    Ignored,
}

#[derive(Debug)]
pub struct ReplicationService {
    sync_interval: Duration,
    last_full_sync: Option<Instant>,
}

impl ReplicationService {
    pub fn new(sync_interval: Duration) -> Self {
        Self {
            sync_interval,
            last_full_sync: None,
        }
    }

    pub fn select_channel(entity: &SyncedEntity) -> Channel {
        if entity.is_removed() {
            Channel::ReliableUnordered
        } else if entity.flags().must_sync_reliably {
            Channel::ReliableOrdered
        } else {
            Channel::UnreliableUnordered
        }
    }

    pub fn encode(scene_tag: u8, entity: &SyncedEntity) -> Vec<u8> {
        let mut writer = begin_frame(PeerCommand::EntityData);
        writer.write_u8(scene_tag);
        writer.write_u8(entity.state().into());
        writer.write_u8(entity.type_tag());
        NetId::write_optional(entity.owner().as_ref(), &mut writer);
        entity.id().write(&mut writer);
        entity.payload().serialize(&mut writer);
        writer.into_bytes()
    }

    /// Sends every entity that is dirty, or all of them once the periodic
    /// window has elapsed, to each connected joined peer except the owner.
    /// Removed entities are left for the caller to prune.
    pub fn send_pass(
        &mut self,
        now: Instant,
        local: &PlayerId,
        roster: &Match,
        scenes: &mut SceneSet,
        peers: &mut PeerRegistry,
    ) -> SendReport {
        let periodic = match self.last_full_sync {
            Some(at) if now.duration_since(at) < self.sync_interval => false,
            _ => {
                self.last_full_sync = Some(now);
                true
            }
        };
        let host = roster.host_id();
        let is_host = host == *local;
        let mut report = SendReport::default();

        for scene in scenes.iter_mut() {
            let tag = scene.tag();
            for entity in scene.iter_mut() {
                if entity.is_host_assignable() && entity.owner().is_none() {
                    debug!("Assigning entity {} to host {}", entity.id(), host);
                    entity.set_owner(Some(host));
                    entity.mark_dirty(true);
                }

                if entity.owner() != Some(*local) && !is_host {
                    continue;
                }
                if !entity.is_dirty() && !periodic {
                    continue;
                }
                if !entity.is_active() {
                    entity.set_removed();
                }

                let channel = Self::select_channel(entity);
                let message = Self::encode(tag, entity);
                report.entities += 1;

                for peer in peers.list_mut() {
                    if !peer.is_connected() || !peer.is_joined() {
                        continue;
                    }
                    if peer.player().is_some() && peer.player() == entity.owner() {
                        continue;
                    }
                    match peer.send(channel, &message) {
                        Ok(()) => report.messages += 1,
                        Err(e) => warn!("Entity {} to {} failed: {}", entity.id(), peer.token(), e),
                    }
                }

                entity.clear_flags();
            }
        }

        if report.messages > 0 {
            trace!(
                "Send pass: {} entities, {} messages",
                report.entities,
                report.messages
            );
        }
        report
    }

    /// Sends every active entity reliably to a newly joined peer, then
    /// `SnapshotEnd`
    pub fn send_snapshot(scenes: &SceneSet, peer: &mut Peer) -> NetResult<usize> {
        let mut sent = 0;
        for scene in scenes.iter() {
            for entity in scene.iter().filter(|e| e.is_active() && !e.is_removed()) {
                peer.send(Channel::ReliableOrdered, &Self::encode(scene.tag(), entity))?;
                sent += 1;
            }
        }
        let end = begin_frame(PeerCommand::SnapshotEnd).into_bytes();
        peer.send(Channel::ReliableOrdered, &end)?;
        Ok(sent)
    }

    /// Applies one `EntityData` body from a peer bound to `sender`.
    ///
    /// The claimed owner must be the sender, unless the sender is the match
    /// host relaying for someone else. Only the host may send unowned
    /// entities, and an existing entity only changes hands through the host.
    /// On the host, accepted updates are marked dirty so the next
    /// pass relays them.
    pub fn receive(
        sender: PlayerId,
        channel: Channel,
        reader: &mut ByteReader<'_>,
        local: &PlayerId,
        roster: &Match,
        scenes: &mut SceneSet,
        factory: &EntityFactory,
    ) -> NetResult<ReceiveOutcome> {
        let scene_tag = reader.read_u8()?;
        let state = EntityState::try_from(reader.read_u8()?)?;
        let type_tag = reader.read_u8()?;
        let owner = NetId::read_optional(reader)?;
        let id = NetId::read(reader)?;

        let from_host = sender == roster.host_id();
        let local_is_host = roster.host_id() == *local;
        if owner != Some(sender) && !from_host {
            return Err(NetError::OwnerMismatch {
                claimed: owner.unwrap_or(NetId::EMPTY),
                actual: Some(sender),
            });
        }

        let scene = scenes
            .get_mut(scene_tag)
            .ok_or(NetError::UnknownScene(scene_tag))?;

        match state {
            EntityState::Active => {
                if let Some(entity) = scene.get_mut(&id) {
                    Self::check_current_owner(entity, owner, from_host)?;
                    entity.payload_mut().synchronize(reader)?;
                    if from_host {
                        entity.set_owner(owner);
                    }
                    if local_is_host {
                        entity.mark_dirty(channel == Channel::ReliableOrdered);
                    }
                    return Ok(ReceiveOutcome::Updated);
                }

                if let Some(owner) = owner {
                    if !roster.contains(&owner) {
                        return Err(NetError::UnknownPlayer(owner));
                    }
                }
                let payload = factory
                    .create(type_tag)
                    .ok_or(NetError::UnknownEntityType(type_tag))?;
                let mut entity = SyncedEntity::new(id, type_tag, payload);
                entity.set_owner(owner);
                entity.payload_mut().synchronize(reader)?;
                if !local_is_host {
                    entity.clear_flags();
                }
                debug!("Created entity {} (type {}) owned by {:?}", id, type_tag, owner);
                scene.insert(entity);
                Ok(ReceiveOutcome::Created)
            }
            EntityState::Inactive => match scene.get_mut(&id) {
                Some(entity) => {
                    Self::check_current_owner(entity, owner, from_host)?;
                    entity.deactivate();
                    entity.set_removed();
                    if !local_is_host {
                        entity.clear_flags();
                    }
                    Ok(ReceiveOutcome::Removed)
                }
                None => Ok(ReceiveOutcome::Ignored),
            },
        }
    }

    /// Only the current owner may touch an existing entity; unowned ones
    /// belong to the host until it assigns them
    fn check_current_owner(
        entity: &SyncedEntity,
        claimed: Option<PlayerId>,
        from_host: bool,
    ) -> NetResult<()> {
        if from_host || (entity.owner().is_some() && claimed == entity.owner()) {
            return Ok(());
        }
        Err(NetError::OwnerMismatch {
            claimed: claimed.unwrap_or(NetId::EMPTY),
            actual: entity.owner(),
        })
    }

    /// Hands back what a departed player owned: host-assignable entities
    /// become unowned (the next pass gives them to the host), the rest are
    /// deactivated
    pub fn release_owner(scenes: &mut SceneSet, player: &PlayerId) -> usize {
        let mut released = 0;
        for scene in scenes.iter_mut() {
            for entity in scene.iter_mut().filter(|e| e.owner() == Some(*player)) {
                if entity.is_host_assignable() {
                    entity.set_owner(None);
                } else {
                    entity.deactivate();
                }
                released += 1;
            }
        }
        released
    }

    /// Removes every entity the local player does not own, as if each had
    /// arrived Inactive. Returns how many were retired
    pub fn retire_remote(scenes: &mut SceneSet, local: &PlayerId) -> usize {
        let mut retired = 0;
        for scene in scenes.iter_mut() {
            for entity in scene
                .iter_mut()
                .filter(|e| e.owner() != Some(*local) && !e.is_removed())
            {
                entity.deactivate();
                entity.set_removed();
                entity.clear_flags();
                retired += 1;
            }
        }
        retired
    }
}

pub(crate) fn register(handlers: &mut PeerHandlers) {
    handlers.register("replication", PeerCommand::EntityData, |state, src, reader| {
        let sender = state.joined_player(&src.token)?;
        let roster = state.session.roster.as_ref().ok_or(NetError::NoMatch)?;
        let outcome = ReplicationService::receive(
            sender,
            src.channel,
            reader,
            &state.local,
            roster,
            &mut state.scenes,
            &state.factory,
        )?;
        trace!("EntityData from {}: {:?}", sender, outcome);
        Ok(())
    });
}
