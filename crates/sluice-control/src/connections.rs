//! Worker-address exchange bookkeeping.
//!
//! When networked execution is enabled, every distributed instance owns
//! one transport worker address per flattened partition. Clients register
//! all of their addresses in a single call; the table issues one tag per
//! address, in partition order, and the tag list is the client's handle
//! on its registrations. Disconnect revokes an instance's addresses in
//! bulk through the underlying [`TaggedRegistry`].
//!
//! Wire encoding of the exchange stays outside this crate.

use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;

use crate::registry::{ClientInstanceId, TaggedRegistry};
use crate::tag::Tag;

/// Opaque transport worker address, exchanged out of band.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerAddress(Vec<u8>);

impl WorkerAddress {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Server-side table of registered worker addresses, keyed by tag.
///
/// An address entry exists exactly as long as its instance's registry
/// mapping does. The address map's mutex doubles as the table-wide
/// lock: every operation holds it for its full duration, so the
/// registry and the map never observe each other mid-update. Lock
/// order is the address map first, then the registry's internal lock.
pub struct ConnectionTable {
    registry: TaggedRegistry,
    addresses: Mutex<HashMap<Tag, WorkerAddress>>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            registry: TaggedRegistry::new(),
            addresses: Mutex::new(HashMap::new()),
        }
    }

    /// Registers every worker address of `instance_id`, returning one
    /// tag per address in the order given (partition order by
    /// convention).
    pub fn register_addresses(
        &self,
        instance_id: ClientInstanceId,
        addresses: Vec<WorkerAddress>,
    ) -> Vec<Tag> {
        let mut table = self.addresses.lock();
        let tags: Vec<Tag> = addresses
            .into_iter()
            .map(|address| {
                let tag = self.registry.register_instance_id(instance_id);
                table.insert(tag, address);
                tag
            })
            .collect();
        debug!(
            "instance {instance_id} registered {} worker address(es)",
            tags.len()
        );
        tags
    }

    /// The address registered under `tag`, or `None` when the tag is
    /// unknown or already revoked.
    pub fn worker_address(&self, tag: Tag) -> Option<WorkerAddress> {
        let table = self.addresses.lock();
        if !self.registry.is_registered(tag) {
            return None;
        }
        table.get(&tag).cloned()
    }

    /// Revokes every address of `instance_id`. Used on disconnect; a
    /// repeat call is a no-op.
    pub fn drop_instance(&self, instance_id: ClientInstanceId) {
        let mut table = self.addresses.lock();
        let tags = self.registry.tags_for_instance_id(instance_id);
        self.registry.drop_instance(instance_id);
        for tag in tags {
            table.remove(&tag);
        }
    }

    /// Clears the whole table. Used on teardown/reset.
    pub fn drop_all(&self) {
        let mut table = self.addresses.lock();
        self.registry.drop_all();
        table.clear();
    }

    pub fn tag_count(&self) -> usize {
        self.registry.tag_count()
    }

    pub fn tag_count_for_instance_id(&self, instance_id: ClientInstanceId) -> usize {
        self.registry.tag_count_for_instance_id(instance_id)
    }

    pub fn address_count(&self) -> usize {
        self.addresses.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(byte: u8) -> WorkerAddress {
        WorkerAddress::from_bytes(vec![byte; 4])
    }

    #[test]
    fn tags_are_returned_in_partition_order() {
        let table = ConnectionTable::new();
        let tags = table.register_addresses(1, vec![address(0), address(1), address(2)]);

        assert_eq!(tags.len(), 3);
        assert!(tags.windows(2).all(|pair| pair[0] < pair[1]));
        for (i, tag) in tags.iter().enumerate() {
            assert_eq!(table.worker_address(*tag), Some(address(i as u8)));
        }
    }

    #[test]
    fn disconnect_revokes_only_that_instance() {
        let table = ConnectionTable::new();
        let tags_a = table.register_addresses(1, vec![address(10), address(11)]);
        let tags_b = table.register_addresses(2, vec![address(20)]);

        table.drop_instance(1);

        for tag in &tags_a {
            assert_eq!(table.worker_address(*tag), None);
        }
        assert_eq!(table.worker_address(tags_b[0]), Some(address(20)));
        assert_eq!(table.tag_count(), 1);
        assert_eq!(table.address_count(), 1);

        // Repeated disconnect is a silent no-op.
        table.drop_instance(1);
        assert_eq!(table.tag_count(), 1);
    }

    #[test]
    fn addresses_die_with_their_registry_mapping() {
        let table = ConnectionTable::new();
        let tags = table.register_addresses(7, vec![address(9)]);
        assert_eq!(table.worker_address(tags[0]), Some(address(9)));

        table.drop_instance(7);

        // The tag is still issuer-valid, but its mapping is gone, so the
        // address must be unreachable.
        assert_eq!(table.worker_address(tags[0]), None);
        assert_eq!(table.address_count(), 0);
        assert_eq!(table.tag_count(), 0);
    }

    #[test]
    fn concurrent_disconnect_never_orphans_addresses() {
        use std::sync::Arc;

        let table = Arc::new(ConnectionTable::new());

        let registrar = {
            let table = table.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    table.register_addresses(1, vec![address(1), address(2)]);
                }
            })
        };
        let dropper = {
            let table = table.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    table.drop_instance(1);
                }
            })
        };
        registrar.join().unwrap();
        dropper.join().unwrap();

        // Whatever the interleaving, the registry and the address map
        // agree, and one final disconnect empties both.
        assert_eq!(table.address_count(), table.tag_count());
        table.drop_instance(1);
        assert_eq!(table.address_count(), 0);
        assert_eq!(table.tag_count(), 0);
    }

    #[test]
    fn foreign_tags_resolve_to_none() {
        let table = ConnectionTable::new();
        table.register_addresses(1, vec![address(1)]);
        let other = ConnectionTable::new();
        let foreign = other.register_addresses(1, vec![address(2)])[0];

        assert_eq!(table.worker_address(foreign), None);
    }
}
