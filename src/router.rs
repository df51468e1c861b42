/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Request router: next-hop resolution and flood-forwarding with duplicate suppression.
//!
//! The routing table that maps a destination node to its next-hop
//! meta-connection is out of scope (spec.md §1) — by the time this crate
//! runs, `Node::next_hop` already points at the right neighbor. What this
//! module owns is the flood-forwarding fan-out and its dedup filter.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::node::{Node, NodeRegistry};
use crate::transport::MetaConnection;

/// External contract consumed by the key-state machine (spec.md §4.2).
pub trait RequestRouter {
    /// Resolve a name to a registered `Node`.
    fn lookup(&self, name: &str) -> Option<Arc<Node>>;

    /// Meta-connection toward `node`'s next hop. Must not be called with `node = self`.
    fn next_hop_connection(&self, node: &Arc<Node>) -> Option<Arc<dyn MetaConnection + Send + Sync>>;

    /// Deliver `raw_line` to every meta-peer except `origin`, suppressing duplicates.
    fn forward(&self, origin: &Arc<dyn MetaConnection + Send + Sync>, raw_line: &str) -> Result<(), TransportError>;

    /// Whether `raw_line` has already been seen within the dedup window.
    fn seen_already(&self, raw_line: &str) -> bool;
}

/// Bounded FIFO of recently seen flood fingerprints.
///
/// The fingerprint window's exact size is a policy decision for the
/// surrounding protocol (spec.md §4.2); this is a reasonable bounded default.
struct DedupWindow {
    seen: std::collections::HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self { seen: std::collections::HashSet::with_capacity(capacity), order: VecDeque::with_capacity(capacity), capacity }
    }

    fn fingerprint(raw_line: &str) -> u64 {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        raw_line.hash(&mut h);
        h.finish()
    }

    /// Returns `true` if `raw_line` was already present; otherwise records it.
    fn check_and_insert(&mut self, raw_line: &str) -> bool {
        let fp = Self::fingerprint(raw_line);
        if self.seen.contains(&fp) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(fp);
        self.order.push_back(fp);
        false
    }
}

/// Reference `RequestRouter` over a `NodeRegistry` and an explicit peer set.
///
/// Next-hop resolution simply reads `Node::next_hop` / `Node::connection`,
/// since the routing table that populates those fields lives outside this
/// crate; `forward` fans out to every entry in `peers` except the origin.
pub struct MeshRouter {
    registry: Arc<NodeRegistry>,
    peers: parking_lot::RwLock<Vec<Arc<dyn MetaConnection + Send + Sync>>>,
    dedup: Mutex<DedupWindow>,
}

impl MeshRouter {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_dedup_capacity(registry, 4096)
    }

    pub fn with_dedup_capacity(registry: Arc<NodeRegistry>, dedup_capacity: usize) -> Self {
        Self { registry, peers: parking_lot::RwLock::new(Vec::new()), dedup: Mutex::new(DedupWindow::new(dedup_capacity)) }
    }

    pub fn add_peer(&self, conn: Arc<dyn MetaConnection + Send + Sync>) {
        self.peers.write().push(conn);
    }

    pub fn remove_peer(&self, name: &str) {
        self.peers.write().retain(|c| c.peer_name() != name);
    }
}

impl RequestRouter for MeshRouter {
    fn lookup(&self, name: &str) -> Option<Arc<Node>> {
        self.registry.lookup(name)
    }

    fn next_hop_connection(&self, node: &Arc<Node>) -> Option<Arc<dyn MetaConnection + Send + Sync>> {
        node.next_hop()?.connection()
    }

    fn forward(&self, origin: &Arc<dyn MetaConnection + Send + Sync>, raw_line: &str) -> Result<(), TransportError> {
        // Dedup is `seen_already`'s job alone (spec.md §4.2, §4.3.2 step 2);
        // the caller has already inserted this line's fingerprint before
        // calling `forward`, so checking again here would find it and
        // silently drop every flood before it reached a single peer.
        for peer in self.peers.read().iter() {
            if peer.peer_name() == origin.peer_name() {
                continue;
            }
            peer.send_line(raw_line)?;
        }
        Ok(())
    }

    fn seen_already(&self, raw_line: &str) -> bool {
        self.dedup.lock().check_and_insert(raw_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingConnection {
        name: String,
        sent: Rc<RefCell<Vec<String>>>,
    }

    // Test-only: satisfies Send + Sync so it can live behind Arc<dyn ...>; never
    // actually shared across threads in these single-threaded unit tests.
    unsafe impl Send for RecordingConnection {}
    unsafe impl Sync for RecordingConnection {}

    impl MetaConnection for RecordingConnection {
        fn send_line(&self, line: &str) -> Result<(), TransportError> {
            self.sent.borrow_mut().push(line.to_string());
            Ok(())
        }

        fn peer_name(&self) -> &str {
            &self.name
        }

        fn peer_hostname(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn forward_skips_origin() {
        let registry = Arc::new(NodeRegistry::new());
        let router = MeshRouter::new(registry);

        let a_log = Rc::new(RefCell::new(Vec::new()));
        let b_log = Rc::new(RefCell::new(Vec::new()));
        let c_log = Rc::new(RefCell::new(Vec::new()));
        let a: Arc<dyn MetaConnection + Send + Sync> = Arc::new(RecordingConnection { name: "a".into(), sent: a_log.clone() });
        let b: Arc<dyn MetaConnection + Send + Sync> = Arc::new(RecordingConnection { name: "b".into(), sent: b_log.clone() });
        let c: Arc<dyn MetaConnection + Send + Sync> = Arc::new(RecordingConnection { name: "c".into(), sent: c_log.clone() });
        router.add_peer(a.clone());
        router.add_peer(b.clone());
        router.add_peer(c.clone());

        router.forward(&a, "3 n1 origin").unwrap();
        assert_eq!(a_log.borrow().len(), 0);
        assert_eq!(b_log.borrow().len(), 1);
        assert_eq!(c_log.borrow().len(), 1);

        // `forward` itself never dedups (that is `seen_already`'s sole job,
        // called once by the caller before `forward` — spec.md §4.3.2 steps
        // 2 and 5); calling it again with the same line fans out again.
        router.forward(&a, "3 n1 origin").unwrap();
        assert_eq!(b_log.borrow().len(), 2);
        assert_eq!(c_log.borrow().len(), 2);
    }

    #[test]
    fn seen_already_dedups_independently_of_forward() {
        let registry = Arc::new(NodeRegistry::new());
        let router = MeshRouter::new(registry);

        assert!(!router.seen_already("3 n1 origin"));
        assert!(router.seen_already("3 n1 origin"));

        // A distinct line (e.g. a fresh nonce) is not suppressed.
        assert!(!router.seen_already("3 n2 origin"));
    }

    /// Mirrors the caller contract `on_key_changed` relies on (spec.md
    /// §4.3.2 steps 2 and 5): check `seen_already` once, then call
    /// `forward` unconditionally when it returns `false`.
    #[test]
    fn caller_contract_checks_seen_already_then_forwards() {
        let registry = Arc::new(NodeRegistry::new());
        let router = MeshRouter::new(registry);

        let a_log = Rc::new(RefCell::new(Vec::new()));
        let b_log = Rc::new(RefCell::new(Vec::new()));
        let a: Arc<dyn MetaConnection + Send + Sync> = Arc::new(RecordingConnection { name: "a".into(), sent: a_log.clone() });
        let b: Arc<dyn MetaConnection + Send + Sync> = Arc::new(RecordingConnection { name: "b".into(), sent: b_log.clone() });
        router.add_peer(a.clone());
        router.add_peer(b.clone());

        let line = "3 n1 origin";
        if !router.seen_already(line) {
            router.forward(&a, line).unwrap();
        }
        assert_eq!(b_log.borrow().len(), 1);

        // Redelivery: `seen_already` now reports true, so `forward` is never
        // called and nobody re-receives the line.
        if !router.seen_already(line) {
            router.forward(&a, line).unwrap();
        }
        assert_eq!(b_log.borrow().len(), 1);
    }
}
