/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Wire format for the three key-exchange request lines (spec.md §4.1).
//!
//! Request lines are whitespace-separated fields beginning with a numeric
//! opcode. Strings are bounded by `Limits::max_name_len`; binary blobs travel
//! as lowercase hex. Parsing never panics and never produces partial output:
//! any deviation from the wire format is a clean `CodecError`.

use crate::config::{Limits, MAX_COMPRESSION};
use crate::hex;

/// Opcode values used by this crate's own encoder.
///
/// The surrounding meta-protocol assigns the real numeric opcodes (spec.md
/// §4.1 calls them "opaque"); these are this crate's stable defaults and are
/// only compared against, never interpreted further.
pub const OPCODE_KEY_CHANGED: u32 = 20;
pub const OPCODE_REQ_KEY: u32 = 21;
pub const OPCODE_ANS_KEY: u32 = 22;

/// A syntax-level wire format violation. Carries no peer context — the
/// caller (the key-state machine) attaches peer name/hostname to build a
/// `MalformedPeer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecError(pub &'static str);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChanged {
    pub nonce_hex: String,
    pub origin_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqKey {
    pub from_name: String,
    pub to_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnsKey {
    pub from_name: String,
    pub to_name: String,
    pub key_hex: String,
    pub cipher_id: u32,
    pub digest_id: u32,
    pub mac_length: i32,
    pub compression: u8,
}

fn check_name(field: &str, limits: &Limits) -> Result<(), CodecError> {
    if field.is_empty() {
        return Err(CodecError("empty name"));
    }
    if field.len() > limits.max_name_len {
        return Err(CodecError("name too long"));
    }
    if !field.chars().all(|c| c.is_ascii_graphic()) {
        return Err(CodecError("name has non-printable characters"));
    }
    Ok(())
}

fn parse_opcode(field: &str, expected: u32) -> Result<(), CodecError> {
    let got: u32 = field.parse().map_err(|_| CodecError("malformed opcode"))?;
    if got != expected {
        return Err(CodecError("opcode mismatch"));
    }
    Ok(())
}

pub fn encode_key_changed(nonce_hex: &str, origin_name: &str) -> String {
    format!("{} {} {}", OPCODE_KEY_CHANGED, nonce_hex, origin_name)
}

pub fn parse_key_changed(line: &str, limits: &Limits) -> Result<KeyChanged, CodecError> {
    if line.len() > limits.max_line_len {
        return Err(CodecError("line too long"));
    }
    let mut fields = line.split_whitespace();
    let opcode = fields.next().ok_or(CodecError("missing opcode"))?;
    parse_opcode(opcode, OPCODE_KEY_CHANGED)?;
    let nonce_hex = fields.next().ok_or(CodecError("missing nonce"))?;
    let origin_name = fields.next().ok_or(CodecError("missing origin name"))?;
    if fields.next().is_some() {
        return Err(CodecError("too many fields"));
    }
    if hex::decode(nonce_hex).is_none() {
        return Err(CodecError("nonce is not valid hex"));
    }
    check_name(origin_name, limits)?;
    Ok(KeyChanged { nonce_hex: nonce_hex.to_string(), origin_name: origin_name.to_string() })
}

pub fn encode_req_key(from_name: &str, to_name: &str) -> String {
    format!("{} {} {}", OPCODE_REQ_KEY, from_name, to_name)
}

pub fn parse_req_key(line: &str, limits: &Limits) -> Result<ReqKey, CodecError> {
    if line.len() > limits.max_line_len {
        return Err(CodecError("line too long"));
    }
    let mut fields = line.split_whitespace();
    let opcode = fields.next().ok_or(CodecError("missing opcode"))?;
    parse_opcode(opcode, OPCODE_REQ_KEY)?;
    let from_name = fields.next().ok_or(CodecError("missing from name"))?;
    let to_name = fields.next().ok_or(CodecError("missing to name"))?;
    if fields.next().is_some() {
        return Err(CodecError("too many fields"));
    }
    check_name(from_name, limits)?;
    check_name(to_name, limits)?;
    Ok(ReqKey { from_name: from_name.to_string(), to_name: to_name.to_string() })
}

#[allow(clippy::too_many_arguments)]
pub fn encode_ans_key(from_name: &str, to_name: &str, key_hex: &str, cipher_id: u32, digest_id: u32, mac_length: i32, compression: u8) -> String {
    format!("{} {} {} {} {} {} {} {}", OPCODE_ANS_KEY, from_name, to_name, key_hex, cipher_id, digest_id, mac_length, compression)
}

pub fn parse_ans_key(line: &str, limits: &Limits) -> Result<AnsKey, CodecError> {
    if line.len() > limits.max_line_len {
        return Err(CodecError("line too long"));
    }
    let mut fields = line.split_whitespace();
    let opcode = fields.next().ok_or(CodecError("missing opcode"))?;
    parse_opcode(opcode, OPCODE_ANS_KEY)?;
    let from_name = fields.next().ok_or(CodecError("missing from name"))?;
    let to_name = fields.next().ok_or(CodecError("missing to name"))?;
    let key_hex = fields.next().ok_or(CodecError("missing key"))?;
    let cipher_id = fields.next().ok_or(CodecError("missing cipher id"))?;
    let digest_id = fields.next().ok_or(CodecError("missing digest id"))?;
    let mac_length = fields.next().ok_or(CodecError("missing mac length"))?;
    let compression = fields.next().ok_or(CodecError("missing compression"))?;
    if fields.next().is_some() {
        return Err(CodecError("too many fields"));
    }

    check_name(from_name, limits)?;
    check_name(to_name, limits)?;

    if hex::decode(key_hex).is_none() {
        return Err(CodecError("key is not valid hex"));
    }

    let cipher_id: u32 = cipher_id.parse().map_err(|_| CodecError("malformed cipher id"))?;
    let digest_id: u32 = digest_id.parse().map_err(|_| CodecError("malformed digest id"))?;

    let mac_length: i64 = mac_length.parse().map_err(|_| CodecError("malformed mac length"))?;
    if mac_length < 0 {
        return Err(CodecError("negative mac length"));
    }
    let mac_length: i32 = mac_length.try_into().map_err(|_| CodecError("mac length out of range"))?;

    let compression: i64 = compression.parse().map_err(|_| CodecError("malformed compression"))?;
    if !(0..=MAX_COMPRESSION as i64).contains(&compression) {
        return Err(CodecError("compression out of range"));
    }

    Ok(AnsKey { from_name: from_name.to_string(), to_name: to_name.to_string(), key_hex: key_hex.to_string(), cipher_id, digest_id, mac_length, compression: compression as u8 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn key_changed_round_trip() {
        let line = encode_key_changed("deadbeef", "node-a");
        let parsed = parse_key_changed(&line, &limits()).unwrap();
        assert_eq!(parsed.nonce_hex, "deadbeef");
        assert_eq!(parsed.origin_name, "node-a");
    }

    #[test]
    fn req_key_round_trip() {
        let line = encode_req_key("a", "c");
        let parsed = parse_req_key(&line, &limits()).unwrap();
        assert_eq!(parsed, ReqKey { from_name: "a".into(), to_name: "c".into() });
    }

    #[test]
    fn ans_key_round_trip() {
        let line = encode_ans_key("b", "a", "aabbcc", 1, 2, 16, 9);
        let parsed = parse_ans_key(&line, &limits()).unwrap();
        assert_eq!(parsed.from_name, "b");
        assert_eq!(parsed.to_name, "a");
        assert_eq!(parsed.key_hex, "aabbcc");
        assert_eq!(parsed.cipher_id, 1);
        assert_eq!(parsed.digest_id, 2);
        assert_eq!(parsed.mac_length, 16);
        assert_eq!(parsed.compression, 9);
    }

    #[test]
    fn ans_key_rejects_negative_mac_length() {
        let line = format!("{} b a 00 0 0 -1 0", OPCODE_ANS_KEY);
        assert_eq!(parse_ans_key(&line, &limits()), Err(CodecError("negative mac length")));
    }

    #[test]
    fn ans_key_rejects_out_of_range_compression() {
        let line = encode_ans_key("b", "a", "00", 0, 0, 0, 12);
        assert_eq!(parse_ans_key(&line, &limits()), Err(CodecError("compression out of range")));
        let line = format!("{} b a 00 0 0 0 -1", OPCODE_ANS_KEY);
        assert_eq!(parse_ans_key(&line, &limits()), Err(CodecError("compression out of range")));
    }

    #[test]
    fn ans_key_rejects_non_hex_key() {
        let line = encode_ans_key("b", "a", "zz", 0, 0, 0, 0);
        assert_eq!(parse_ans_key(&line, &limits()), Err(CodecError("key is not valid hex")));
    }

    #[test]
    fn ans_key_rejects_wrong_field_count() {
        let line = format!("{} b a 00 0 0 0", OPCODE_ANS_KEY);
        assert_eq!(parse_ans_key(&line, &limits()), Err(CodecError("missing compression")));
        let line = format!("{} b a 00 0 0 0 0 0", OPCODE_ANS_KEY);
        assert_eq!(parse_ans_key(&line, &limits()), Err(CodecError("too many fields")));
    }

    #[test]
    fn req_key_rejects_overlong_name() {
        let mut tight = limits();
        tight.max_name_len = 2;
        let line = encode_req_key("abc", "c");
        assert_eq!(parse_req_key(&line, &tight), Err(CodecError("name too long")));
    }

    #[test]
    fn opcode_mismatch_is_rejected() {
        let line = encode_req_key("a", "c");
        assert_eq!(parse_key_changed(&line, &limits()), Err(CodecError("opcode mismatch")));
    }
}
