//! Deterministic remote event IDs.
//!
//! Google only accepts event IDs drawn from base32hex (`0-9`, `a-v`), between
//! 5 and 1024 characters long. Deriving the ID from the local key lets a
//! create be retried without an existence check: a second create with the same
//! ID comes back as a conflict instead of a duplicate event.

use sha2::{Digest, Sha256};

/// base32hex, lowercase.
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Shortest ID the provider accepts.
pub const MIN_ID_LENGTH: usize = 5;

/// Longest ID the provider accepts.
pub const DEFAULT_MAX_ID_LENGTH: usize = 1024;

/// Map an opaque local identifier to a provider-legal event ID.
///
/// The SHA-256 digest of `local_event_id` is packed five bits per symbol; a
/// trailing partial group is filled with zero bits. Results shorter than
/// [`MIN_ID_LENGTH`] are padded with `'0'`, then the whole string is cut to
/// `max_length`.
pub fn derive_remote_id(local_event_id: &str, max_length: usize) -> String {
    let digest = Sha256::digest(local_event_id.as_bytes());
    pad_and_truncate(encode_base32hex(&digest), max_length)
}

fn pad_and_truncate(mut id: String, max_length: usize) -> String {
    while id.len() < MIN_ID_LENGTH {
        id.push('0');
    }
    id.truncate(max_length);
    id
}

fn encode_base32hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
        // Only the low `bits` bits are still pending.
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    out
}

/// True when `id` only uses characters the provider accepts for event IDs.
#[cfg(test)]
fn is_valid_remote_id(id: &str) -> bool {
    (MIN_ID_LENGTH..=DEFAULT_MAX_ID_LENGTH).contains(&id.len())
        && id.bytes().all(|b| ALPHABET.contains(&b))
}
