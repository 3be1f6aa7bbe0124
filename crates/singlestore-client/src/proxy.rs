//! Detection of proxies that hide the real server.
//!
//! Some managed endpoints answer the handshake themselves and report a fixed
//! version string, or route on a `user@server` login. Behind such a proxy the
//! handshake's version and connection id describe the proxy, so the session
//! asks the backend for its real details after logging in.

/// Connection facts available to a [`ProxyDetector`].
#[derive(Debug, Clone, Copy)]
pub struct ProxyContext<'a> {
    /// Host name being connected to.
    pub host: &'a str,
    /// User name from the configuration.
    pub user: &'a str,
    /// Version string from the initial handshake.
    pub server_version: &'a str,
    /// Whether the transport is TCP.
    pub is_tcp: bool,
}

/// Decides whether the handshake came from a proxy.
pub trait ProxyDetector: Send + Sync {
    /// Whether the session should query the backend for its real details.
    fn is_proxy(&self, context: &ProxyContext<'_>) -> bool;
}

/// Recognizes the Azure Database for MySQL gateway.
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureGatewayDetector;

const GATEWAY_VERSIONS: &[&str] = &["5.6.47.0", "5.6.42.0", "5.6.39.0"];

const GATEWAY_HOST_SUFFIXES: &[&str] = &[
    ".mysql.database.azure.com",
    ".database.windows.net",
    ".mysql.database.chinacloudapi.cn",
];

impl ProxyDetector for AzureGatewayDetector {
    fn is_proxy(&self, context: &ProxyContext<'_>) -> bool {
        if GATEWAY_VERSIONS.contains(&context.server_version) {
            return true;
        }
        context.is_tcp
            && context.user.contains('@')
            && GATEWAY_HOST_SUFFIXES
                .iter()
                .any(|suffix| ends_with_ignore_ascii_case(context.host, suffix))
    }
}

/// Host names compare without regard to ASCII case.
fn ends_with_ignore_ascii_case(host: &str, suffix: &str) -> bool {
    let (host, suffix) = (host.as_bytes(), suffix.as_bytes());
    host.len() >= suffix.len() && host[host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(host: &'a str, user: &'a str, version: &'a str) -> ProxyContext<'a> {
        ProxyContext {
            host,
            user,
            server_version: version,
            is_tcp: true,
        }
    }

    #[test]
    fn test_gateway_version() {
        assert!(AzureGatewayDetector.is_proxy(&context("db", "app", "5.6.47.0")));
        assert!(!AzureGatewayDetector.is_proxy(&context("db", "app", "5.7.32")));
    }

    #[test]
    fn test_gateway_host() {
        let detector = AzureGatewayDetector;
        assert!(detector.is_proxy(&context("x.mysql.database.azure.com", "app@x", "8.0.0")));
        assert!(!detector.is_proxy(&context("x.mysql.database.azure.com", "app", "8.0.0")));
        let mut local = context("x.database.windows.net", "app@x", "8.0.0");
        local.is_tcp = false;
        assert!(!detector.is_proxy(&local));
    }

    #[test]
    fn test_gateway_host_ignores_case() {
        let detector = AzureGatewayDetector;
        assert!(detector.is_proxy(&context("X.MySQL.Database.Azure.COM", "app@x", "8.0.0")));
        assert!(detector.is_proxy(&context("db.DATABASE.WINDOWS.NET", "app@db", "8.0.0")));
        assert!(!detector.is_proxy(&context("azure.com", "app@x", "8.0.0")));
        assert!(!ends_with_ignore_ascii_case("net", ".database.windows.net"));
    }
}
