//! Loading CA bundles and client certificates from disk.

use std::io::{self, BufReader};
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::config::{ClientAuth, ClientCertificate};
use crate::error::TlsError;

const BEGIN_CERTIFICATE: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Split a PEM bundle at each `-----BEGIN CERTIFICATE-----` marker.
///
/// The first segment starts at offset zero, so any leading text is returned
/// as its own segment when it precedes the first marker.
#[must_use]
pub fn split_pem_bundle(bundle: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    let mut start = 0;
    while start < bundle.len() {
        let end = find(bundle, start + 1, BEGIN_CERTIFICATE).unwrap_or(bundle.len());
        segments.push(&bundle[start..end]);
        start = end;
    }
    segments
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Parse every certificate in a PEM bundle, skipping unparsable entries.
#[must_use]
pub fn parse_ca_bundle(bundle: &[u8]) -> Vec<CertificateDer<'static>> {
    let mut certificates = Vec::new();
    for (index, segment) in split_pem_bundle(bundle).into_iter().enumerate() {
        let mut reader = segment;
        match rustls_pemfile::certs(&mut reader).next() {
            Some(Ok(cert)) => certificates.push(cert),
            Some(Err(e)) => {
                tracing::warn!(index, error = %e, "skipping unparsable CA certificate");
            }
            None => {
                tracing::warn!(index, "skipping CA bundle segment without a certificate");
            }
        }
    }
    certificates
}

/// Read and parse a CA bundle file.
pub fn load_ca_file(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    tracing::debug!(path = %path.display(), "loading CA certificates");
    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            TlsError::CaFileNotFound(path.to_path_buf())
        } else {
            TlsError::CaFileUnreadable {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    let certificates = parse_ca_bundle(&bytes);
    tracing::debug!(
        path = %path.display(),
        count = certificates.len(),
        "loaded CA certificates"
    );
    Ok(certificates)
}

fn open(path: &Path) -> Result<BufReader<std::fs::File>, TlsError> {
    std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TlsError::CertificateFileNotFound(path.to_path_buf()),
            _ => TlsError::Io(e),
        })
}

/// Load a PEM certificate chain and private key.
pub fn load_pem_identity(certificate_file: &Path, key_file: &Path) -> Result<ClientAuth, TlsError> {
    let certificates = rustls_pemfile::certs(&mut open(certificate_file)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    if certificates.is_empty() {
        return Err(TlsError::InvalidCertificate(format!(
            "no certificates found in '{}'",
            certificate_file.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut open(key_file)?)
        .map_err(|e| TlsError::InvalidPrivateKey(e.to_string()))?
        .ok_or_else(|| {
            TlsError::InvalidPrivateKey(format!("no private key found in '{}'", key_file.display()))
        })?;

    Ok(ClientAuth::new(certificates, key))
}

/// Decode a PKCS#12 archive into a certificate chain and private key.
pub fn parse_pkcs12(der: &[u8], password: Option<&str>) -> Result<ClientAuth, TlsError> {
    let password = password.unwrap_or("");
    let pfx = p12::PFX::parse(der).map_err(|e| TlsError::InvalidPkcs12(format!("{e:?}")))?;
    let certificates = pfx
        .cert_x509_bags(password)
        .map_err(|e| TlsError::InvalidPkcs12(format!("{e:?}")))?;
    let mut keys = pfx
        .key_bags(password)
        .map_err(|e| TlsError::InvalidPkcs12(format!("{e:?}")))?;
    if keys.is_empty() {
        return Err(TlsError::MissingPrivateKey);
    }
    if certificates.is_empty() {
        return Err(TlsError::InvalidCertificate(
            "PKCS#12 archive contains no certificate".into(),
        ));
    }

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(keys.swap_remove(0)));
    let certificates = certificates.into_iter().map(CertificateDer::from).collect();
    Ok(ClientAuth::new(certificates, key))
}

/// Load a PKCS#12 archive from disk.
pub fn load_pkcs12(path: &Path, password: Option<&str>) -> Result<ClientAuth, TlsError> {
    let der = std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TlsError::CertificateFileNotFound(path.to_path_buf()),
        _ => TlsError::Io(e),
    })?;
    parse_pkcs12(&der, password)
}

/// Resolve any client certificate source into loaded credentials.
pub fn resolve_client_certificate(source: &ClientCertificate) -> Result<ClientAuth, TlsError> {
    match source {
        ClientCertificate::Pem {
            certificate_file,
            key_file,
        } => load_pem_identity(certificate_file, key_file),
        ClientCertificate::Pkcs12 { file, password } => load_pkcs12(file, password.as_deref()),
        ClientCertificate::Loaded(auth) => Ok(auth.clone()),
    }
}
