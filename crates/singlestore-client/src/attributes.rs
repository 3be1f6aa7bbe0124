//! Connection attributes sent in the handshake response.

use bytes::{BufMut, Bytes, BytesMut};
use mysql_protocol::codec::{lenenc_int_len, write_lenenc_bytes, write_lenenc_int};
use once_cell::sync::Lazy;

/// Client name reported as `_client_name`.
pub const CLIENT_NAME: &str = "SingleStore Rust Connector";

static CLIENT_PAIRS: Lazy<Vec<(&'static str, String)>> = Lazy::new(|| {
    vec![
        ("_client_name", CLIENT_NAME.to_string()),
        ("_client_version", env!("CARGO_PKG_VERSION").to_string()),
        ("_os", std::env::consts::OS.to_string()),
        ("_os_details", std::env::consts::FAMILY.to_string()),
        ("_platform", std::env::consts::ARCH.to_string()),
        ("_pid", std::process::id().to_string()),
    ]
});

/// Encode the attribute blob: a length-encoded total followed by
/// length-encoded key/value strings.
///
/// `program_name` is added when `application_name` is non-empty. `extra`
/// holds user pairs as `key:value` separated by commas.
#[must_use]
pub fn encode(application_name: &str, extra: &str) -> Bytes {
    let mut body = BytesMut::with_capacity(256);
    let mut pair = |key: &str, value: &str| {
        write_lenenc_bytes(&mut body, key.as_bytes());
        write_lenenc_bytes(&mut body, value.as_bytes());
    };

    for (key, value) in CLIENT_PAIRS.iter() {
        pair(key, value);
    }
    if !application_name.is_empty() {
        pair("program_name", application_name);
    }
    for entry in extra.split(',').filter(|e| !e.is_empty()) {
        let (key, value) = entry.split_once(':').unwrap_or((entry, ""));
        pair(key.trim(), value.trim());
    }

    let mut blob = BytesMut::with_capacity(lenenc_int_len(body.len() as u64) + body.len());
    write_lenenc_int(&mut blob, body.len() as u64);
    blob.put_slice(&body);
    blob.freeze()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mysql_protocol::codec::{read_lenenc_bytes, read_lenenc_int_non_null};

    fn decode(blob: Bytes) -> Vec<(String, String)> {
        let mut src = blob;
        let len = read_lenenc_int_non_null(&mut src).unwrap() as usize;
        assert_eq!(len, src.len());
        let mut pairs = Vec::new();
        while !src.is_empty() {
            let key = read_lenenc_bytes(&mut src).unwrap().unwrap();
            let value = read_lenenc_bytes(&mut src).unwrap().unwrap();
            pairs.push((
                String::from_utf8(key.to_vec()).unwrap(),
                String::from_utf8(value.to_vec()).unwrap(),
            ));
        }
        pairs
    }

    #[test]
    fn test_client_pairs() {
        let pairs = decode(encode("", ""));
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["_client_name", "_client_version", "_os", "_os_details", "_platform", "_pid"]
        );
        assert_eq!(pairs[5].1, std::process::id().to_string());
    }

    #[test]
    fn test_program_name_and_extra() {
        let pairs = decode(encode("billing", "team:payments,region:eu"));
        let tail: Vec<_> = pairs[6..].to_vec();
        assert_eq!(
            tail,
            vec![
                ("program_name".to_string(), "billing".to_string()),
                ("team".to_string(), "payments".to_string()),
                ("region".to_string(), "eu".to_string()),
            ]
        );
    }
}
