//! Password scramble algorithms.

use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Length of the challenge used by `mysql_native_password`.
pub const NATIVE_CHALLENGE_LEN: usize = 20;

/// Drop a single trailing NUL from a challenge.
///
/// Servers send the 20-byte nonce followed by a terminator that is not part of
/// the challenge.
#[must_use]
pub fn trim_zero_byte(data: &[u8]) -> &[u8] {
    match data.split_last() {
        Some((0, rest)) => rest,
        _ => data,
    }
}

/// `mysql_native_password` response:
/// `SHA1(password) XOR SHA1(challenge[..20] + SHA1(SHA1(password)))`.
///
/// An empty password yields an empty response.
#[must_use]
pub fn native_password(challenge: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = &challenge[..challenge.len().min(NATIVE_CHALLENGE_LEN)];

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// `caching_sha2_password` scramble:
/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + nonce)`.
///
/// An empty password yields an empty response.
#[must_use]
pub fn caching_sha2(nonce: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let digest1 = Sha256::digest(password.as_bytes());
    let digest2 = Sha256::digest(digest1);
    let mut hasher = Sha256::new();
    hasher.update(digest2);
    hasher.update(nonce);
    let digest3 = hasher.finalize();

    digest1.iter().zip(digest3.iter()).map(|(a, b)| a ^ b).collect()
}

/// The password as a NUL-terminated UTF-8 string.
#[must_use]
pub fn clear_password(password: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(password.len() + 1);
    bytes.extend_from_slice(password.as_bytes());
    bytes.push(0);
    bytes
}

/// NUL-terminated password XORed with the repeating challenge, the plaintext
/// for RSA password encryption.
#[must_use]
pub fn xor_password(password: &str, challenge: &[u8]) -> Vec<u8> {
    let mut bytes = clear_password(password);
    if challenge.is_empty() {
        return bytes;
    }
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte ^= challenge[i % challenge.len()];
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_trim_zero_byte() {
        assert_eq!(trim_zero_byte(b"abc\0"), b"abc");
        assert_eq!(trim_zero_byte(b"abc"), b"abc");
        assert_eq!(trim_zero_byte(b""), b"");
    }

    #[test]
    fn test_native_password_empty() {
        assert!(native_password(b"01234567890123456789", "").is_empty());
    }

    #[test]
    fn test_native_password_structure() {
        let challenge = b"01234567890123456789\0";
        let response = native_password(challenge, "secret");
        assert_eq!(response.len(), 20);
        // Only the first 20 bytes of the challenge take part.
        assert_eq!(response, native_password(&challenge[..20], "secret"));
        assert_ne!(response, native_password(b"abcdefghijabcdefghij", "secret"));
    }

    #[test]
    fn test_native_password_recovers_stage1() {
        // A server holding SHA1(SHA1(password)) can recover SHA1(password).
        let challenge = b"abcdefghijklmnopqrst";
        let response = native_password(challenge, "pass");
        let stage1 = Sha1::digest(b"pass");
        let stage2 = Sha1::digest(stage1);
        let mut hasher = Sha1::new();
        hasher.update(challenge);
        hasher.update(stage2);
        let mask = hasher.finalize();
        let recovered: Vec<u8> = response.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(hex(&recovered), hex(&stage1));
    }

    #[test]
    fn test_caching_sha2() {
        let nonce = b"abcdefghijklmnopqrst";
        let response = caching_sha2(nonce, "pass");
        assert_eq!(response.len(), 32);
        assert!(caching_sha2(nonce, "").is_empty());
    }

    #[test]
    fn test_clear_and_xor_password() {
        assert_eq!(clear_password("ab"), b"ab\0");
        let xored = xor_password("ab", &[1, 2]);
        assert_eq!(xored, vec![b'a' ^ 1, b'b' ^ 2, 1]);
        assert_eq!(xor_password("ab", &[]), b"ab\0");
    }
}
