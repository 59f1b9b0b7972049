//! Verify-key and token helpers

use rand::Rng;
use subtle::ConstantTimeEq;

const VERIFY_KEY_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a freshly issued client verify key
pub const VERIFY_KEY_LEN: usize = 16;

/// Lowercase hex MD5 of `input` (always 32 ASCII bytes)
///
/// Used for the server-version proof, for verify keys presented on the wire
/// and for matching P2P passwords.
#[must_use]
pub fn md5_hex(input: impl AsRef<[u8]>) -> String {
    format!("{:x}", md5::compute(input))
}

/// Constant-time comparison of two byte slices
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Whether `presented` is the wire digest of `verify_key`
#[must_use]
pub fn verify_key_matches(verify_key: &str, presented: &[u8]) -> bool {
    constant_time_eq(md5_hex(verify_key).as_bytes(), presented)
}

/// Random lowercase alphanumeric verify key
#[must_use]
pub fn generate_verify_key() -> String {
    let mut rng = rand::thread_rng();
    (0..VERIFY_KEY_LEN)
        .map(|_| VERIFY_KEY_ALPHABET[rng.gen_range(0..VERIFY_KEY_ALPHABET.len())] as char)
        .collect()
}
