//! Server version parsing.

use core::fmt;

/// A numeric `major.minor.build` version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Build number.
    pub build: u32,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// A server version string together with its parsed numeric prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerVersion {
    original: String,
    version: Version,
}

impl ServerVersion {
    /// First SingleStore version whose `SET NAMES` accepts `utf8mb4`.
    pub const SUPPORTS_UTF8MB4: Version = Version::new(7, 5, 0);

    /// First SingleStore version that implements `COM_RESET_CONNECTION`.
    pub const SUPPORTS_RESET_CONNECTION: Version = Version::new(7, 5, 0);

    /// Parse a version string.
    ///
    /// Up to three dot-separated decimal components are read; parsing stops
    /// at the first character that does not continue the pattern and missing
    /// components are zero.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut parts = [0u32; 3];
        let mut rest = text.as_bytes();
        for (i, part) in parts.iter_mut().enumerate() {
            if i > 0 {
                match rest.split_first() {
                    Some((b'.', tail)) => rest = tail,
                    _ => break,
                }
            }
            let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 {
                break;
            }
            let Some(value) = core::str::from_utf8(&rest[..digits])
                .ok()
                .and_then(|s| s.parse().ok())
            else {
                break;
            };
            *part = value;
            rest = &rest[digits..];
        }
        Self {
            original: text.to_string(),
            version: Version::new(parts[0], parts[1], parts[2]),
        }
    }

    /// Parse raw version bytes from the wire.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// The empty version: `""`, `0.0.0`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            original: String::new(),
            version: Version::default(),
        }
    }

    /// The original string.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The parsed numeric version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let empty = ServerVersion::empty();
        assert_eq!(empty.original(), "");
        assert_eq!(empty.version(), Version::new(0, 0, 0));
    }

    #[test]
    fn test_parse() {
        for (input, expected) in [
            ("5.7.21-log", Version::new(5, 7, 21)),
            ("8.0.13", Version::new(8, 0, 13)),
            ("5.7.25-28", Version::new(5, 7, 25)),
            ("5.7.25-", Version::new(5, 7, 25)),
            ("5.7.25-10.2.3", Version::new(5, 7, 25)),
            ("a.b.c", Version::new(0, 0, 0)),
            ("1", Version::new(1, 0, 0)),
            ("1.", Version::new(1, 0, 0)),
            ("1.2", Version::new(1, 2, 0)),
            ("1.2.", Version::new(1, 2, 0)),
            ("1.2.3", Version::new(1, 2, 3)),
            ("1.2.3.", Version::new(1, 2, 3)),
            ("1.2.3-", Version::new(1, 2, 3)),
        ] {
            let parsed = ServerVersion::parse(input);
            assert_eq!(parsed.version(), expected, "input {input}");
            assert_eq!(parsed.original(), input);
        }
    }

    #[test]
    fn test_ordering() {
        assert!(Version::new(7, 5, 0) > Version::new(7, 3, 12));
        assert!(Version::new(8, 0, 0) >= ServerVersion::SUPPORTS_RESET_CONNECTION);
        assert!(ServerVersion::parse("7.1.2").version() < ServerVersion::SUPPORTS_UTF8MB4);
        assert_eq!(Version::new(8, 1, 2).to_string(), "8.1.2");
    }
}
