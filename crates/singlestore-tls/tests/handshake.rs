//! TLS handshakes against an in-process rustls server for each SSL mode.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use singlestore_tls::{SslMode, TlsConfig, TlsConnector, TlsError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio_rustls::TlsAcceptor;

struct Server {
    certificate: CertificateDer<'static>,
    acceptor: TlsAcceptor,
}

fn server(names: &[&str]) -> Server {
    let generated =
        rcgen::generate_simple_self_signed(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            .unwrap();
    let certificate = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        generated.signing_key.serialize_der(),
    ));
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![certificate.clone()], key)
    .unwrap();
    Server {
        certificate,
        acceptor: TlsAcceptor::from(Arc::new(config)),
    }
}

async fn handshake(server: &Server, config: TlsConfig, host: &str) -> Result<(), TlsError> {
    let (client_io, server_io) = duplex(64 * 1024);
    let acceptor = server.acceptor.clone();
    let server_task = tokio::spawn(async move {
        if let Ok(mut stream) = acceptor.accept(server_io).await {
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
                let _ = stream.flush().await;
            }
        }
    });

    let connector = TlsConnector::new(config)?;
    let result = connector.connect(client_io, host).await;
    let outcome = match result {
        Ok(mut stream) => {
            stream.write_all(b"ping").await?;
            stream.flush().await?;
            let mut echo = [0u8; 4];
            stream.read_exact(&mut echo).await?;
            assert_eq!(&echo, b"ping");
            Ok(())
        }
        Err(e) => Err(e),
    };
    server_task.await.unwrap();
    outcome
}

#[tokio::test]
async fn required_accepts_self_signed() {
    let server = server(&["localhost"]);
    handshake(&server, TlsConfig::new().ssl_mode(SslMode::Required), "localhost")
        .await
        .unwrap();
}

#[tokio::test]
async fn verify_full_rejects_unknown_issuer() {
    let server = server(&["localhost"]);
    let err = handshake(
        &server,
        TlsConfig::new().ssl_mode(SslMode::VerifyFull),
        "localhost",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TlsError::Authentication(_)));
    assert_eq!(err.to_string(), "SSL Authentication Error");
}

#[tokio::test]
async fn verify_full_with_trusted_root() {
    let server = server(&["localhost"]);
    let config = TlsConfig::new()
        .ssl_mode(SslMode::VerifyFull)
        .add_root_certificate(server.certificate.clone());
    handshake(&server, config, "localhost").await.unwrap();
}

#[tokio::test]
async fn verify_full_rejects_wrong_host_name() {
    let server = server(&["db.internal"]);
    let config = TlsConfig::new()
        .ssl_mode(SslMode::VerifyFull)
        .add_root_certificate(server.certificate.clone());
    let err = handshake(&server, config, "localhost").await.unwrap_err();
    assert!(matches!(err, TlsError::Authentication(_)));
}

#[tokio::test]
async fn verify_ca_ignores_host_name() {
    let server = server(&["db.internal"]);
    let config = TlsConfig::new()
        .ssl_mode(SslMode::VerifyCa)
        .add_root_certificate(server.certificate.clone());
    handshake(&server, config, "localhost").await.unwrap();
}

#[tokio::test]
async fn verify_ca_from_bundle_file() {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let certificate = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        generated.signing_key.serialize_der(),
    ));
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![certificate.clone()], key)
    .unwrap();
    let server = Server {
        certificate,
        acceptor: TlsAcceptor::from(Arc::new(config)),
    };

    let unrelated = rcgen::generate_simple_self_signed(vec!["other".to_string()]).unwrap();
    let path = std::env::temp_dir().join(format!("singlestore-ca-{}.pem", std::process::id()));
    std::fs::write(
        &path,
        format!("{}{}", unrelated.cert.pem(), generated.cert.pem()),
    )
    .unwrap();

    let result = handshake(
        &server,
        TlsConfig::new().ssl_mode(SslMode::VerifyCa).ca_file(&path),
        "localhost",
    )
    .await;
    std::fs::remove_file(&path).unwrap();
    result.unwrap();
}
