//! RSA-OAEP password encryption for `sha256_password` and
//! `caching_sha2_password` over insecure channels.

use std::path::Path;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;

use crate::error::AuthError;
use crate::scramble::{trim_zero_byte, xor_password};

/// Parse a server RSA public key in SubjectPublicKeyInfo or PKCS#1 PEM form.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, AuthError> {
    let pem = pem.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AuthError::InvalidPublicKey(e.to_string()))
}

/// Read the server public key from a configured file.
pub fn read_public_key_file(path: &Path) -> Result<String, AuthError> {
    std::fs::read_to_string(path).map_err(|source| AuthError::PublicKeyFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Encrypt `password` for the server: the NUL-terminated password is XORed
/// with the challenge and encrypted with RSA-OAEP (SHA-1).
pub fn encrypt_password(
    public_key_pem: &str,
    password: &str,
    challenge: &[u8],
) -> Result<Vec<u8>, AuthError> {
    let key = parse_public_key(public_key_pem)?;
    let plaintext = xor_password(password, trim_zero_byte(challenge));
    let mut rng = rand::rngs::OsRng;
    key.encrypt(&mut rng, Oaep::new::<Sha1>(), &plaintext)
        .map_err(|e| AuthError::Encryption(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    #[test]
    fn test_encrypt_round_trip() {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let challenge = b"abcdefghijklmnopqrst\0";

        // Server replies often carry a trailing NUL.
        let sent = format!("{pem}\0");
        let encrypted = encrypt_password(&sent, "secret", challenge).unwrap();
        let decrypted = private.decrypt(Oaep::new::<Sha1>(), &encrypted).unwrap();
        assert_eq!(decrypted, xor_password("secret", &challenge[..20]));
    }

    #[test]
    fn test_invalid_key() {
        let err = encrypt_password("not a key", "pw", b"x").unwrap_err();
        assert!(matches!(err, AuthError::InvalidPublicKey(_)));
        assert_eq!(
            err.to_string(),
            "Couldn't load server's RSA public key; try using a secure connection instead."
        );
    }

    #[test]
    fn test_missing_key_file() {
        let err = read_public_key_file(Path::new("/nonexistent/server.pem")).unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Couldn't load server's RSA public key from")
        );
    }
}
