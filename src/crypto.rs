/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Algorithm resolution by numeric id.
//!
//! This module does not implement any cipher or digest — it only resolves a
//! wire-level numeric identifier to the shape (`key_len`, `iv_len`,
//! `output_size`) the key-state machine needs to validate `ANS_KEY`, and it
//! asks a `CryptoProvider` to build the opaque `PacketContext` the data plane
//! will later use. The actual symmetric crypto is an external collaborator.

/// Shape of a resolved cipher: how many key bytes and IV bytes it consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherShape {
    pub key_len: usize,
    pub iv_len: usize,
}

/// Shape of a resolved digest: its native MAC output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestShape {
    pub output_size: usize,
}

/// Opaque, initialized symmetric-encryption context for a peer's packet key.
///
/// Constructed only by `CryptoProvider::init_encrypt_context`; the key-state
/// machine never inspects its contents, only that it exists (which is what
/// makes `status.valid_key` structurally imply "packet_ctx initialized").
#[derive(Debug, Clone)]
pub struct PacketContext(pub(crate) Vec<u8>);

/// External collaborator: resolves cipher/digest ids and builds encryption contexts.
///
/// A numeric id of `0` always means "none" and is handled by the key-state
/// machine directly; this trait is only consulted for nonzero ids.
pub trait CryptoProvider: Send + Sync {
    /// Resolve a nonzero cipher id. `None` means "unknown cipher" (fatal).
    fn cipher_by_id(&self, id: u32) -> Option<CipherShape>;

    /// Resolve a nonzero digest id. `None` means "unknown digest" (fatal).
    fn digest_by_id(&self, id: u32) -> Option<DigestShape>;

    /// Split `key_bytes` into key and IV per `shape` and initialize a context.
    ///
    /// `key_bytes.len()` is guaranteed by the caller to equal
    /// `shape.key_len + shape.iv_len`.
    fn init_encrypt_context(&self, shape: CipherShape, key_bytes: &[u8]) -> PacketContext;
}

/// A `CryptoProvider` that treats every nonzero id as unknown.
///
/// Useful for tests and for daemons that only ever run in "no encryption"
/// mode (`cipher_id == 0 && digest_id == 0`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCipherProvider;

impl CryptoProvider for NoCipherProvider {
    fn cipher_by_id(&self, _id: u32) -> Option<CipherShape> {
        None
    }

    fn digest_by_id(&self, _id: u32) -> Option<DigestShape> {
        None
    }

    fn init_encrypt_context(&self, _shape: CipherShape, key_bytes: &[u8]) -> PacketContext {
        PacketContext(key_bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cipher_provider_resolves_nothing() {
        let p = NoCipherProvider;
        assert!(p.cipher_by_id(1).is_none());
        assert!(p.digest_by_id(1).is_none());
    }

    #[test]
    fn no_cipher_provider_context_carries_key_bytes_through() {
        let p = NoCipherProvider;
        let ctx = p.init_encrypt_context(CipherShape { key_len: 0, iv_len: 0 }, &[1, 2, 3]);
        assert_eq!(ctx.0, vec![1, 2, 3]);
    }
}
