/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! External collaborators for sending lines and flushing queued packets.
//!
//! TCP connection establishment, authentication and the data-plane packet
//! buffer are all out of scope (spec.md §1); these traits are the seam this
//! crate calls through to reach them.

use crate::error::TransportError;

/// An authenticated meta-connection to a direct peer.
///
/// Writing a line never blocks this crate's handlers (spec.md §5): the
/// transport layer is expected to buffer outbound bytes itself.
pub trait MetaConnection {
    /// Write one newline-delimited request line.
    fn send_line(&self, line: &str) -> Result<(), TransportError>;

    /// Name of the peer at the other end, for diagnostics.
    fn peer_name(&self) -> &str;

    /// Hostname of the peer at the other end, for diagnostics.
    fn peer_hostname(&self) -> &str;
}

/// The data-plane packet queue that buffers outbound packets until a key is known.
pub trait DataPlane {
    /// Drain any packets buffered while waiting for `node`'s key.
    fn flush_queue(&self, node_name: &str);
}

/// A `DataPlane` that has nothing queued. Useful for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDataPlane;

impl DataPlane for NullDataPlane {
    fn flush_queue(&self, _node_name: &str) {}
}
