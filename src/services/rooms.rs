//! Channel membership and fan-out
//!
//! Two channel kinds exist: the single office channel observing every
//! courier, and one channel per package under observation. Membership
//! is ephemeral; it lives exactly as long as the owning connection.
//!
//! Publishing snapshots the membership under the lock, then pushes to
//! each member's writer queue after release. Pushes never block: slow
//! members drop the message, closed members are pruned.

use crate::domain::protocol::{ConnectionHandle, ConnectionId, DeliveryOutcome, ServerMessage};
use crate::domain::types::PackageId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Broadcast channel identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Global office channel (every courier)
    AllCouriers,
    /// Per-package merchant channel
    Package(PackageId),
}

impl Channel {
    /// Stable channel name for logging; package channels derive
    /// deterministically from the package id
    pub fn name(&self) -> String {
        match self {
            Channel::AllCouriers => "office.couriers.locations".to_string(),
            Channel::Package(package_id) => {
                format!("merchant.package.{package_id}.location")
            }
        }
    }
}

/// Result of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
pub struct RoomRouter {
    rooms: RwLock<FxHashMap<Channel, FxHashMap<ConnectionId, ConnectionHandle>>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent membership add
    pub fn subscribe(&self, channel: Channel, handle: ConnectionHandle) {
        let mut rooms = self.rooms.write();
        rooms.entry(channel).or_default().insert(handle.id().clone(), handle);
    }

    /// Remove the connection from every channel; empty channels are dropped
    pub fn unsubscribe_all(&self, connection_id: &ConnectionId) {
        let mut rooms = self.rooms.write();
        rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    /// Deliver `message` to every current member of `channel`.
    ///
    /// Members joining after this call do not receive the message;
    /// the on-join snapshot compensates. Closed members found along the
    /// way are pruned.
    pub fn publish(&self, channel: Channel, message: &ServerMessage) -> PublishOutcome {
        let members: Vec<ConnectionHandle> = {
            let rooms = self.rooms.read();
            match rooms.get(&channel) {
                Some(members) => members.values().cloned().collect(),
                None => return PublishOutcome::default(),
            }
        };

        let mut outcome = PublishOutcome::default();
        let mut closed: Vec<ConnectionId> = Vec::new();

        for member in &members {
            match member.send(message.clone()) {
                DeliveryOutcome::Delivered => outcome.delivered += 1,
                DeliveryOutcome::Dropped => {
                    outcome.dropped += 1;
                    debug!(
                        channel = %channel.name(),
                        connection_id = %member.id(),
                        "publish_dropped_slow_client"
                    );
                }
                DeliveryOutcome::Closed => closed.push(member.id().clone()),
            }
        }

        if !closed.is_empty() {
            let mut rooms = self.rooms.write();
            if let Some(members) = rooms.get_mut(&channel) {
                for id in &closed {
                    members.remove(id);
                }
                if members.is_empty() {
                    rooms.remove(&channel);
                }
            }
        }

        outcome
    }

    pub fn member_count(&self, channel: Channel) -> usize {
        self.rooms.read().get(&channel).map_or(0, |members| members.len())
    }

    /// Number of package channels with at least one member
    pub fn package_channel_count(&self) -> usize {
        self.rooms
            .read()
            .keys()
            .filter(|channel| matches!(channel, Channel::Package(_)))
            .count()
    }
}
