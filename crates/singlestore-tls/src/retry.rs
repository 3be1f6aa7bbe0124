//! Legacy TLS retry heuristic.
//!
//! Some yaSSL-based servers fail a TLS 1.2 negotiation from certain client
//! stacks and only succeed when the client offers TLS 1.1 or older. When the
//! configured version set spans both the legacy versions and TLS 1.2 and the
//! handshake fails with an authentication or IO error, connection
//! establishment is retried with only the legacy subset, and the pool
//! remembers that subset for later connections.
//!
//! The trigger is empirical. It is kept here, separate from the connector, so
//! it can be changed or removed without touching the negotiation path.
//!
//! rustls negotiates TLS 1.2 and 1.3 only, so no legacy subset is ever
//! negotiable and [`legacy_retry_versions`] always returns `None` with this
//! connector. The retry loop in session establishment and the pool's
//! remembered `tls_versions` stay wired through it so a connector that can
//! offer TLS 1.0/1.1 only has to change [`TlsVersions::is_negotiable`].

use crate::config::TlsVersions;
use crate::error::TlsError;

/// Whether a failure with `versions` is a candidate for the legacy retry.
#[must_use]
pub fn spans_legacy_and_tls12(versions: TlsVersions) -> bool {
    versions.is_empty()
        || (versions.intersects(TlsVersions::LEGACY) && versions.contains(TlsVersions::TLS12))
}

/// Version set to retry with after `err`, or `None` to surface the error.
///
/// Returns `None` unless the failure looks like the yaSSL negotiation problem
/// and the reduced set can actually be offered by this client. With rustls
/// the reduced set never can, so this is always `None`.
#[must_use]
pub fn legacy_retry_versions(versions: TlsVersions, err: &TlsError) -> Option<TlsVersions> {
    if !spans_legacy_and_tls12(versions) {
        return None;
    }
    if !matches!(err, TlsError::Authentication(_) | TlsError::Io(_)) {
        return None;
    }

    let retry = if versions.is_empty() {
        TlsVersions::LEGACY
    } else {
        versions & TlsVersions::LEGACY
    };
    if !retry.is_negotiable() {
        tracing::debug!(
            ?retry,
            "legacy TLS retry skipped: no offered version is available"
        );
        return None;
    }

    tracing::warn!(?versions, ?retry, error = %err, "retrying TLS negotiation with legacy versions");
    Some(retry)
}
