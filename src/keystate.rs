/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The key-state machine: owns the per-`Node` key record and processes
//! `KEY_CHANGED`, `REQ_KEY` and `ANS_KEY` (spec.md §4.3). This is the heart
//! of the crate — everything else exists to support these six functions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore;

use crate::codec;
use crate::config::Limits;
use crate::crypto::{CipherShape, CryptoProvider};
use crate::error::{HandleError, MalformedPeer, Request};
use crate::node::{KeyMaterial, Node, NodeRegistry};
use crate::router::RequestRouter;
use crate::transport::{DataPlane, MetaConnection};

type Conn = Arc<dyn MetaConnection + Send + Sync>;

/// Context threaded through every handler instead of the global statics the
/// original daemon used (spec.md §9, "Global mutable state").
pub struct KeyExchange<R: RequestRouter, D: DataPlane, C: CryptoProvider> {
    registry: Arc<NodeRegistry>,
    router: R,
    data_plane: D,
    crypto: C,
    limits: Limits,
    self_name: String,
    /// True iff any remote node has ever requested our packet key since startup.
    my_key_used: AtomicBool,
}

impl<R: RequestRouter, D: DataPlane, C: CryptoProvider> KeyExchange<R, D, C> {
    pub fn new(registry: Arc<NodeRegistry>, router: R, data_plane: D, crypto: C, limits: Limits, self_name: impl Into<String>) -> Self {
        Self { registry, router, data_plane, crypto, limits, self_name: self_name.into(), my_key_used: AtomicBool::new(false) }
    }

    pub fn my_key_used(&self) -> bool {
        self.my_key_used.load(Ordering::Acquire)
    }

    fn self_node(&self) -> Option<Arc<Node>> {
        self.registry.lookup(&self.self_name)
    }

    // ---- KEY_CHANGED ----------------------------------------------------

    /// Announce that `node`'s key changed, on `conn`.
    ///
    /// A no-op when `node` is `self` and nobody has ever asked for our key
    /// (spec.md §4.3.1) — there is nobody downstream caching it yet.
    pub fn send_key_changed(&self, conn: &Conn, node: &Arc<Node>) -> Result<(), crate::error::TransportError> {
        if node.name == self.self_name && !self.my_key_used() {
            return Ok(());
        }
        let mut nonce_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce_hex = crate::hex::encode(&nonce_bytes);
        let line = codec::encode_key_changed(&nonce_hex, &node.name);
        log::trace!("-> KEY_CHANGED {} {}", nonce_hex, node.name);
        conn.send_line(&line)
    }

    /// Handle an inbound `KEY_CHANGED` line.
    pub fn on_key_changed(&self, conn: &Conn, raw_line: &str) -> Result<(), HandleError> {
        let parsed = codec::parse_key_changed(raw_line, &self.limits)
            .map_err(|e| MalformedPeer::new(Request::KeyChanged, conn.peer_name(), conn.peer_hostname(), e.0).logged())?;

        if self.router.seen_already(raw_line) {
            return Ok(());
        }

        let origin = self
            .registry
            .lookup(&parsed.origin_name)
            .ok_or_else(|| MalformedPeer::new(Request::KeyChanged, conn.peer_name(), conn.peer_hostname(), "origin does not exist").with_name(&parsed.origin_name).logged())?;

        origin.status.set_valid_key(false);
        origin.status.set_waiting_for_key(false);
        log::debug!("key changed for {}, flooding onward", origin.name);

        self.router.forward(conn, raw_line).map_err(HandleError::from)?;
        Ok(())
    }

    // ---- REQ_KEY ----------------------------------------------------------

    /// Emit `REQ_KEY from to` on `conn`.
    ///
    /// Does **not** set `to.status.waiting_for_key` — the data plane sets
    /// that bit before calling, per spec.md §9's note on the original
    /// source's behavior. Callers that skip this will trigger duplicate
    /// `REQ_KEY` storms.
    pub fn send_req_key(&self, conn: &Conn, from: &Arc<Node>, to: &Arc<Node>) -> Result<(), crate::error::TransportError> {
        let line = codec::encode_req_key(&from.name, &to.name);
        log::trace!("-> REQ_KEY {} {}", from.name, to.name);
        conn.send_line(&line)
    }

    /// Handle an inbound `REQ_KEY` line.
    pub fn on_req_key(&self, conn: &Conn, raw_line: &str) -> Result<(), HandleError> {
        let parsed = codec::parse_req_key(raw_line, &self.limits)
            .map_err(|e| MalformedPeer::new(Request::ReqKey, conn.peer_name(), conn.peer_hostname(), e.0).logged())?;

        let from = self
            .registry
            .lookup(&parsed.from_name)
            .ok_or_else(|| MalformedPeer::new(Request::ReqKey, conn.peer_name(), conn.peer_hostname(), "origin does not exist in our connection list").with_name(&parsed.from_name).logged())?;
        let to = self
            .registry
            .lookup(&parsed.to_name)
            .ok_or_else(|| MalformedPeer::new(Request::ReqKey, conn.peer_name(), conn.peer_hostname(), "destination does not exist in our connection list").with_name(&parsed.to_name).logged())?;

        if to.name == self.self_name {
            self.my_key_used.store(true, Ordering::Release);
            from.reset_replay_state();
            let me = self.self_node().ok_or_else(|| MalformedPeer::new(Request::ReqKey, conn.peer_name(), conn.peer_hostname(), "local node missing from registry").logged())?;
            self.send_ans_key(conn, &me, &from).map_err(HandleError::from)?;
        } else {
            let next_conn = self
                .router
                .next_hop_connection(&to)
                .ok_or_else(|| crate::error::TransportError(format!("no next-hop connection toward {}", to.name)))?;
            self.send_req_key(&next_conn, &from, &to).map_err(HandleError::from)?;
        }

        Ok(())
    }

    // ---- ANS_KEY ------------------------------------------------------------

    /// Emit an `ANS_KEY` for `from`'s current key, addressed to `to`, on `conn`.
    pub fn send_ans_key(&self, conn: &Conn, from: &Arc<Node>, to: &Arc<Node>) -> Result<(), crate::error::TransportError> {
        let km = from.key_material().ok_or_else(|| crate::error::TransportError(format!("{} has no key material to answer with", from.name)))?;
        let key_hex = crate::hex::encode(&km.key);
        let line = codec::encode_ans_key(&from.name, &to.name, &key_hex, km.cipher_id, km.digest_id, km.mac_length, km.compression);
        log::trace!("-> ANS_KEY {} {} (cipher={} digest={})", from.name, to.name, km.cipher_id, km.digest_id);
        conn.send_line(&line)
    }

    /// Handle an inbound `ANS_KEY` line.
    pub fn on_ans_key(&self, conn: &Conn, raw_line: &str) -> Result<(), HandleError> {
        let parsed = codec::parse_ans_key(raw_line, &self.limits)
            .map_err(|e| MalformedPeer::new(Request::AnsKey, conn.peer_name(), conn.peer_hostname(), e.0).logged())?;

        let from = self
            .registry
            .lookup(&parsed.from_name)
            .ok_or_else(|| MalformedPeer::new(Request::AnsKey, conn.peer_name(), conn.peer_hostname(), "origin does not exist in our connection list").with_name(&parsed.from_name).logged())?;
        let to = self
            .registry
            .lookup(&parsed.to_name)
            .ok_or_else(|| MalformedPeer::new(Request::AnsKey, conn.peer_name(), conn.peer_hostname(), "destination does not exist in our connection list").with_name(&parsed.to_name).logged())?;

        if to.name != self.self_name {
            // Intermediate nodes never cache a foreign key; forward the
            // bytes verbatim so flood-style fingerprints downstream never
            // see reformatted whitespace or numbers (spec.md §9).
            let next_conn = self
                .router
                .next_hop_connection(&to)
                .ok_or_else(|| crate::error::TransportError(format!("no next-hop connection toward {}", to.name)))?;
            next_conn.send_line(raw_line).map_err(HandleError::from)?;
            return Ok(());
        }

        // Decode into a freshly sized buffer; never reuse the hex source as
        // the destination (spec.md §9, diverging from the original's
        // `hex2bin(from->key, from->key, ...)`).
        let key_bytes = crate::hex::decode(&parsed.key_hex).expect("codec already validated hex");

        let packet_ctx = if parsed.cipher_id != 0 {
            let shape = self
                .crypto
                .cipher_by_id(parsed.cipher_id)
                .ok_or_else(|| MalformedPeer::new(Request::AnsKey, conn.peer_name(), conn.peer_hostname(), "uses unknown cipher").with_name(&from.name).logged())?;
            if key_bytes.len() != shape.key_len + shape.iv_len {
                return Err(MalformedPeer::new(Request::AnsKey, conn.peer_name(), conn.peer_hostname(), "uses wrong keylength").with_name(&from.name).logged().into());
            }
            self.crypto.init_encrypt_context(shape, &key_bytes)
        } else {
            self.crypto.init_encrypt_context(CipherShape { key_len: 0, iv_len: 0 }, &key_bytes)
        };

        if parsed.digest_id != 0 {
            let shape = self
                .crypto
                .digest_by_id(parsed.digest_id)
                .ok_or_else(|| MalformedPeer::new(Request::AnsKey, conn.peer_name(), conn.peer_hostname(), "uses unknown digest").with_name(&from.name).logged())?;
            if parsed.mac_length < 0 || parsed.mac_length as usize > shape.output_size {
                return Err(MalformedPeer::new(Request::AnsKey, conn.peer_name(), conn.peer_hostname(), "uses bogus MAC length").with_name(&from.name).logged().into());
            }
        }

        let km = KeyMaterial { key: key_bytes, cipher_id: parsed.cipher_id, digest_id: parsed.digest_id, mac_length: parsed.mac_length, compression: parsed.compression, packet_ctx };

        from.install_key_material(km);
        from.status.set_valid_key(true);
        from.status.set_waiting_for_key(false);
        from.sent_seqno.store(0, Ordering::Release);

        log::debug!("installed key from {} (cipher={} digest={} mac_length={} compression={})", from.name, parsed.cipher_id, parsed.digest_id, parsed.mac_length, parsed.compression);

        self.data_plane.flush_queue(&from.name);

        Ok(())
    }
}
