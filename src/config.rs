/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Tunable limits for the wire codec.
//!
//! Stands in for `protocol_key.c`'s compile-time `MAX_STRING_SIZE`. This
//! crate never reads a config file itself — the embedding daemon's config
//! loader (out of scope) is expected to deserialize a `Limits` the same way
//! it deserializes any other section of its local configuration.

use serde::Deserialize;

/// Highest valid value of the `COMPRESSION` field, per spec.
pub const MAX_COMPRESSION: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum length, in bytes, of a node name field (`FROM_NAME`, `TO_NAME`, `ORIGIN_NAME`).
    pub max_name_len: usize,
    /// Maximum length, in bytes, of a full request line.
    pub max_line_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_name_len: 255,
            max_line_len: 4096,
        }
    }
}
