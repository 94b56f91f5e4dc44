//! Broadcast/routing engine
//!
//! The central orchestrator: accepts a position update, folds it into
//! the last-position cache, publishes to the office channel, gates the
//! package channel on delivery status, and hands the sample to the
//! store forwarder. The office publish is unconditional and happens
//! before any upstream call; no upstream failure can block it.


use crate::domain::protocol::{ConnectionHandle, ConnectionId, ServerMessage};
use crate::domain::types::{CourierId, CourierPosition, LocationUpdate, PackageId, RelayError};
use crate::infra::metrics::Metrics;
use crate::io::store::StoreSender;
use crate::services::cache::LocationCache;
use crate::services::registry::ConnectionRegistry;
use crate::services::rooms::{Channel, RoomRouter};
use crate::services::status::StatusResolver;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct BroadcastEngine {
    cache: LocationCache,
    registry: ConnectionRegistry,
    rooms: RoomRouter,
    status: StatusResolver,
    store: StoreSender,
    metrics: Arc<Metrics>,
}

impl BroadcastEngine {
    pub fn new(status: StatusResolver, store: StoreSender, metrics: Arc<Metrics>) -> Self {
        Self {
            cache: LocationCache::new(),
            registry: ConnectionRegistry::new(),
            rooms: RoomRouter::new(),
            status,
            store,
            metrics,
        }
    }

    /// Handle one inbound position update to completion.
    ///
    /// Returns the accepted position for the sender's acknowledgement
    /// echo. Rejection leaves every table untouched.
    pub async fn handle_update(
        &self,
        update: LocationUpdate,
    ) -> Result<CourierPosition, RelayError> {
        let start = Instant::now();

        let position = match update.into_position() {
            Ok(position) => position,
            Err(e) => {
                self.metrics.record_invalid_payload();
                return Err(e);
            }
        };

        self.cache.put(position.courier_id, position.clone());

        let outcome = self
            .rooms
            .publish(Channel::AllCouriers, &ServerMessage::LocationUpdate(position.clone()));
        self.metrics.record_office_broadcast();
        self.metrics.record_client_messages_dropped(outcome.dropped as u64);

        if let Some(package_id) = position.package_id {
            if self.status.resolve(package_id).await.is_eligible() {
                let outcome = self.rooms.publish(
                    Channel::Package(package_id),
                    &ServerMessage::LocationUpdate(position.clone()),
                );
                self.metrics.record_package_broadcast();
                self.metrics.record_client_messages_dropped(outcome.dropped as u64);
                debug!(
                    courier_id = %position.courier_id,
                    package_id = %package_id,
                    delivered = outcome.delivered,
                    "package_channel_broadcast"
                );
            }
        }

        self.store.forward(position.clone());

        self.metrics.record_update_handled(start.elapsed().as_micros() as u64);
        debug!(
            courier_id = %position.courier_id,
            latitude = position.latitude,
            longitude = position.longitude,
            package_id = position.package_id.map(|p| p.0),
            "location_update_broadcast"
        );

        Ok(position)
    }

    /// Office dashboard join: subscribe, then send the one-time snapshot
    /// of every cached position (possibly empty) so the new viewer is
    /// not blind until the next update.
    pub fn join_office(&self, handle: &ConnectionHandle) {
        self.rooms.subscribe(Channel::AllCouriers, handle.clone());
        let snapshot = self.cache.list_all();
        let count = snapshot.len();
        handle.send(ServerMessage::LocationAll(snapshot));
        info!(connection_id = %handle.id(), couriers = count, "office_joined");
    }

    /// Merchant join: subscribe to the package channel and send the
    /// cached position for that package when one exists. An unknown
    /// package is not an error; there is simply no snapshot.
    pub fn join_merchant(&self, handle: &ConnectionHandle, package_id: PackageId) {
        self.rooms.subscribe(Channel::Package(package_id), handle.clone());
        if let Some(position) = self.cache.find_by_package(package_id) {
            handle.send(ServerMessage::LocationUpdate(position));
        }
        info!(connection_id = %handle.id(), package_id = %package_id, "merchant_joined");
    }

    /// Courier registration is independent of position updates and
    /// triggers no broadcast.
    pub fn register_courier(&self, courier_id: CourierId, handle: &ConnectionHandle) {
        self.registry.register(courier_id, handle.clone());
        info!(connection_id = %handle.id(), courier_id = %courier_id, "courier_registered");
    }

    /// Disconnect cleanup: registration and channel memberships go,
    /// the courier's cached position stays visible to viewers.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        self.registry.unregister_by_handle(connection_id);
        self.rooms.unsubscribe_all(connection_id);
        debug!(connection_id = %connection_id, "connection_cleaned_up");
    }

    pub fn lookup_courier(&self, courier_id: CourierId) -> Option<ConnectionHandle> {
        self.registry.lookup(courier_id)
    }

    pub fn cached_positions(&self) -> usize {
        self.cache.len()
    }

    pub fn registered_couriers(&self) -> usize {
        self.registry.len()
    }

    pub fn package_channel_count(&self) -> usize {
        self.rooms.package_channel_count()
    }
}
