/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Error types for the key-exchange core.
//!
//! Two kinds only, per design: a peer that violates the protocol is
//! `MalformedPeer`, a send that failed at the transport is
//! `TransportError`. There is intentionally no catch-all variant.

use std::fmt;

/// Which of the three request kinds a `MalformedPeer` was raised against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    KeyChanged,
    ReqKey,
    AnsKey,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Request::KeyChanged => "KEY_CHANGED",
            Request::ReqKey => "REQ_KEY",
            Request::AnsKey => "ANS_KEY",
        })
    }
}

/// A meta-peer violated the protocol. The caller must close the meta-connection
/// this was raised on; the peer will be rediscovered through the routing layer.
#[derive(Debug, Clone)]
pub struct MalformedPeer {
    pub request: Request,
    pub peer_name: String,
    pub peer_hostname: String,
    /// The offending origin/destination node name, when the violation names one.
    pub offending_name: Option<String>,
    pub reason: &'static str,
}

impl MalformedPeer {
    pub(crate) fn new(request: Request, peer_name: &str, peer_hostname: &str, reason: &'static str) -> Self {
        Self { request, peer_name: peer_name.to_string(), peer_hostname: peer_hostname.to_string(), offending_name: None, reason }
    }

    pub(crate) fn with_name(mut self, name: &str) -> Self {
        self.offending_name = Some(name.to_string());
        self
    }

    /// Log this condition at `error!` and return self, mirroring the single
    /// diagnostic line `protocol_key.c` emits via `logger(LOG_ERR, ...)`.
    pub(crate) fn logged(self) -> Self {
        match &self.offending_name {
            Some(n) => log::error!("got bad {} from {} ({}): {} (name: {})", self.request, self.peer_name, self.peer_hostname, self.reason, n),
            None => log::error!("got bad {} from {} ({}): {}", self.request, self.peer_name, self.peer_hostname, self.reason),
        }
        self
    }
}

impl fmt::Display for MalformedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} from {} ({}): {}", self.request, self.peer_name, self.peer_hostname, self.reason)?;
        if let Some(n) = &self.offending_name {
            write!(f, " (name: {})", n)?;
        }
        Ok(())
    }
}

impl std::error::Error for MalformedPeer {}

/// The underlying meta-connection send failed. Not retried by this crate.
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// Outcome of handling an inbound request line.
#[derive(Debug, Clone)]
pub enum HandleError {
    Malformed(MalformedPeer),
    Transport(TransportError),
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::Malformed(e) => e.fmt(f),
            HandleError::Transport(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for HandleError {}

impl From<MalformedPeer> for HandleError {
    fn from(e: MalformedPeer) -> Self {
        HandleError::Malformed(e)
    }
}

impl From<TransportError> for HandleError {
    fn from(e: TransportError) -> Self {
        HandleError::Transport(e)
    }
}
