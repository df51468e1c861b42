/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Node registry: the mapping from node name to `Node` record.
//!
//! Owned by the surrounding daemon in the general case (routing table
//! construction and teardown are out of scope, spec.md §1) but this crate
//! provides the registry type itself since something has to hold the
//! `Arc<Node>`s the rest of the crate reads and mutates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::crypto::PacketContext;

/// Anti-replay window width, in sequence numbers behind `received_seqno`.
///
/// A `u64` bitmap: bit `i` set means "seqno `received_seqno - i` has been seen".
pub const LATE_WINDOW_BITS: u32 = 64;

/// Anti-replay "late packet" bitmap, reset whenever the upstream key is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct LateWindow(u64);

impl LateWindow {
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn is_set(&self, bit: u32) -> bool {
        bit < LATE_WINDOW_BITS && (self.0 & (1u64 << bit)) != 0
    }

    pub fn set(&mut self, bit: u32) {
        if bit < LATE_WINDOW_BITS {
            self.0 |= 1u64 << bit;
        }
    }
}

/// The algorithm parameters and derived encryption context negotiated for one node's packet key.
///
/// Bundling `packet_ctx` with the raw key and its parameters makes invariant
/// (I1) — `valid_key ⇒ key ≠ ∅ ∧ packet_ctx initialized` — structural: a
/// `KeyMaterial` cannot exist without both.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub key: Vec<u8>,
    pub cipher_id: u32,
    pub digest_id: u32,
    pub mac_length: i32,
    pub compression: u8,
    pub packet_ctx: PacketContext,
}

impl KeyMaterial {
    pub fn key_length(&self) -> usize {
        self.key.len()
    }
}

/// `valid_key` / `waiting_for_key` status bits, independent of whether stale
/// key material is still resident (spec.md §4.3.2: `KEY_CHANGED` clears these
/// bits but does not erase `key`).
#[derive(Debug, Default)]
pub struct KeyStatus {
    valid_key: AtomicBool,
    waiting_for_key: AtomicBool,
}

impl KeyStatus {
    pub fn valid_key(&self) -> bool {
        self.valid_key.load(Ordering::Acquire)
    }

    pub fn waiting_for_key(&self) -> bool {
        self.waiting_for_key.load(Ordering::Acquire)
    }

    pub(crate) fn set_valid_key(&self, v: bool) {
        self.valid_key.store(v, Ordering::Release);
    }

    pub(crate) fn set_waiting_for_key(&self, v: bool) {
        self.waiting_for_key.store(v, Ordering::Release);
    }
}

/// A known participant in the mesh.
///
/// Cyclic ownership (a connection knows its peer `Node`; a `Node` may know
/// its direct connection) is avoided by never storing owning references
/// between nodes and connections — `next_hop` and `connection` are both
/// `Weak`, per Design Note spec.md §9.
pub struct Node {
    pub name: String,
    pub hostname: Mutex<String>,

    /// Neighbor toward which traffic for this node is forwarded. For a
    /// direct peer this is a weak reference to the node itself.
    next_hop: Mutex<Weak<Node>>,

    /// The meta-connection to this node, when it is a direct peer.
    connection: Mutex<Option<Weak<dyn crate::transport::MetaConnection + Send + Sync>>>,

    key_material: Mutex<Option<KeyMaterial>>,
    pub status: KeyStatus,

    pub received_seqno: AtomicU64,
    pub sent_seqno: AtomicU64,
    pub late: Mutex<LateWindow>,
}

impl Node {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: Mutex::new(hostname.into()),
            next_hop: Mutex::new(Weak::new()),
            connection: Mutex::new(None),
            key_material: Mutex::new(None),
            status: KeyStatus::default(),
            received_seqno: AtomicU64::new(0),
            sent_seqno: AtomicU64::new(0),
            late: Mutex::new(LateWindow::default()),
        }
    }

    /// A node with a valid key from the moment it is constructed — used for
    /// `self`, whose local packet key is always already known (spec.md §3).
    pub fn new_self(name: impl Into<String>, hostname: impl Into<String>, key: KeyMaterial) -> Arc<Self> {
        let n = Arc::new(Self::new(name, hostname));
        *n.key_material.lock() = Some(key);
        n.status.set_valid_key(true);
        *n.next_hop.lock() = Arc::downgrade(&n);
        n
    }

    pub fn next_hop(&self) -> Option<Arc<Node>> {
        self.next_hop.lock().upgrade()
    }

    pub fn set_next_hop(&self, hop: &Arc<Node>) {
        *self.next_hop.lock() = Arc::downgrade(hop);
    }

    pub fn connection(&self) -> Option<Arc<dyn crate::transport::MetaConnection + Send + Sync>> {
        self.connection.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_connection(&self, conn: &Arc<dyn crate::transport::MetaConnection + Send + Sync>) {
        *self.connection.lock() = Some(Arc::downgrade(conn));
    }

    pub fn clear_connection(&self) {
        *self.connection.lock() = None;
    }

    pub fn key_material(&self) -> Option<KeyMaterial> {
        self.key_material.lock().clone()
    }

    pub(crate) fn install_key_material(&self, km: KeyMaterial) {
        *self.key_material.lock() = Some(km);
    }

    /// Reset anti-replay state for a requester that is about to be issued a
    /// fresh key (spec.md §4.3.4 step 3): the requester will begin numbering
    /// from zero once it installs the key we are about to ship.
    pub(crate) fn reset_replay_state(&self) {
        self.received_seqno.store(0, Ordering::Release);
        self.late.lock().reset();
    }
}

/// Mapping from node name to `Node` record.
///
/// A `Node` is created when the routing layer first learns of it and
/// destroyed when the routing layer drops it (spec.md §3, "Lifecycle");
/// `insert`/`remove` are this crate's hooks for that out-of-scope lifecycle.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<String, Arc<Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { nodes: DashMap::new() }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name).map(|e| e.value().clone())
    }

    pub fn insert(&self, node: Arc<Node>) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.remove(name).map(|(_, n)| n)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_window_set_and_reset() {
        let mut w = LateWindow::default();
        assert!(!w.is_set(3));
        w.set(3);
        assert!(w.is_set(3));
        w.reset();
        assert!(!w.is_set(3));
    }

    #[test]
    fn registry_insert_lookup_remove() {
        let reg = NodeRegistry::new();
        let a = Arc::new(Node::new("a", "a.example"));
        reg.insert(a.clone());
        assert!(reg.lookup("a").is_some());
        assert!(reg.lookup("b").is_none());
        assert_eq!(reg.len(), 1);
        reg.remove("a");
        assert!(reg.lookup("a").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn next_hop_self_for_direct_peer() {
        let km = KeyMaterial { key: vec![0u8; 4], cipher_id: 0, digest_id: 0, mac_length: 0, compression: 0, packet_ctx: PacketContext(vec![0u8; 4]) };
        let me = Node::new_self("me", "localhost", km);
        assert!(me.status.valid_key());
        assert!(Arc::ptr_eq(&me.next_hop().unwrap(), &me));
    }
}
