//! Tagged identity registry.
//!
//! Tracks which [`Tag`]s belong to which connected client instance. Per-tag
//! lifecycle is `unregistered → registered → dropped` and never cycles:
//! tag counters are not reused, so a dropped tag can never be registered
//! again.

use std::collections::HashMap;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::tag::{Tag, TagIssuer};

/// Dense control-plane id of a connected remote instance.
pub type ClientInstanceId = u64;

/// Capability interface over tag ownership, implemented by registry
/// variants and selected by composition.
pub trait TagRegistry: Send + Sync {
    /// Allocates a tag owned by `owner`. Never blocks, never fails.
    fn allocate_tag(&self, owner: ClientInstanceId) -> Tag;

    /// Releases every tag owned by `owner`.
    fn release_tag_for_owner(&self, owner: ClientInstanceId);

    /// Releases one tag; silent no-op if it is unknown or expired.
    fn release_tag(&self, tag: Tag);
}

#[derive(Default)]
struct RegistryState {
    /// Owner → owned tags, insertion-ordered.
    instance_tags: HashMap<ClientInstanceId, Vec<Tag>>,
    /// Reverse index so single-tag drops need no scan.
    tag_owner: HashMap<Tag, ClientInstanceId>,
}

/// The server-side registry of tags scoped to connected instances.
///
/// Mutated concurrently by many connection-handling tasks; all mutation
/// happens under one mutex so `drop_instance` can never interleave with
/// `register_instance_id` or `drop_tag` and expose a partially updated
/// mapping.
pub struct TaggedRegistry {
    issuer: TagIssuer,
    state: Mutex<RegistryState>,
}

impl Default for TaggedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaggedRegistry {
    pub fn new() -> Self {
        Self {
            issuer: TagIssuer::new(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Allocates the next tag and records it against `instance_id`.
    pub fn register_instance_id(&self, instance_id: ClientInstanceId) -> Tag {
        let tag = self.issuer.next_tag();
        let mut state = self.state.lock();
        state.instance_tags.entry(instance_id).or_default().push(tag);
        state.tag_owner.insert(tag, instance_id);
        debug!("registered tag {tag:#x} for instance {instance_id}");
        tag
    }

    /// Removes one `(instance, tag)` mapping.
    ///
    /// A tag that was already dropped, or that belongs to a different
    /// registry generation, is a silent no-op: disconnect races are
    /// expected here, never errors.
    pub fn drop_tag(&self, tag: Tag) {
        let mut state = self.state.lock();
        match state.tag_owner.remove(&tag) {
            Some(owner) => {
                if let Some(tags) = state.instance_tags.get_mut(&owner) {
                    tags.retain(|&t| t != tag);
                    if tags.is_empty() {
                        state.instance_tags.remove(&owner);
                    }
                }
                debug!("dropped tag {tag:#x} owned by instance {owner}");
            }
            None => trace!("drop_tag({tag:#x}): unknown tag, ignoring"),
        }
    }

    /// Removes every tag owned by `instance_id` in O(k) of that
    /// instance's own tag count. Used on disconnect.
    pub fn drop_instance(&self, instance_id: ClientInstanceId) {
        let mut state = self.state.lock();
        if let Some(tags) = state.instance_tags.remove(&instance_id) {
            debug!(
                "dropping instance {instance_id}: revoking {} tag(s)",
                tags.len()
            );
            for tag in tags {
                state.tag_owner.remove(&tag);
            }
        }
    }

    /// Clears every mapping. Used on teardown/reset.
    pub fn drop_all(&self) {
        let mut state = self.state.lock();
        state.instance_tags.clear();
        state.tag_owner.clear();
    }

    /// True iff `tag` was minted by this registry instance.
    ///
    /// Stays true after the tag is dropped; use
    /// [`TaggedRegistry::is_registered`] for liveness.
    pub fn valid_tag(&self, tag: Tag) -> bool {
        self.issuer.valid_tag(tag)
    }

    /// True iff `tag` currently maps to an owner, i.e. was registered
    /// and has not been dropped.
    pub fn is_registered(&self, tag: Tag) -> bool {
        self.state.lock().tag_owner.contains_key(&tag)
    }

    pub fn tag_count(&self) -> usize {
        self.state.lock().tag_owner.len()
    }

    pub fn tag_count_for_instance_id(&self, instance_id: ClientInstanceId) -> usize {
        self.state
            .lock()
            .instance_tags
            .get(&instance_id)
            .map_or(0, Vec::len)
    }

    /// Snapshot of the tags currently owned by `instance_id`, in
    /// registration order.
    pub fn tags_for_instance_id(&self, instance_id: ClientInstanceId) -> Vec<Tag> {
        self.state
            .lock()
            .instance_tags
            .get(&instance_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn issuer(&self) -> &TagIssuer {
        &self.issuer
    }
}

impl TagRegistry for TaggedRegistry {
    fn allocate_tag(&self, owner: ClientInstanceId) -> Tag {
        self.register_instance_id(owner)
    }

    fn release_tag_for_owner(&self, owner: ClientInstanceId) {
        self.drop_instance(owner)
    }

    fn release_tag(&self, tag: Tag) {
        self.drop_tag(tag)
    }
}
