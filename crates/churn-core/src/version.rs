//! Backend version parsing and capability gating.

use std::fmt;
use thiserror::Error;

/// Error returned when a server version string cannot be parsed.
#[derive(Debug, Error, PartialEq)]
#[error("failed to parse version {0:?}")]
pub struct VersionError(pub String);

/// Major and minor version of the backend, fetched once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse the leading `major.minor` of a version string such as `4.4.10`
    /// or `7.0.2-rc1`. Anything after the minor number is ignored.
    pub fn parse(version: &str) -> Result<Self, VersionError> {
        let mut parts = version.trim().split('.');
        let major = parts.next().and_then(leading_number);
        let minor = parts.next().and_then(leading_number);

        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Self { major, minor }),
            _ => Err(VersionError(version.to_string())),
        }
    }

    /// Pipeline-style updates and sampled deletes are available from 4.4 on,
    /// except on the 4.x releases other than 4.4.
    pub fn can_update_with_pipeline(&self) -> bool {
        self.major >= 5 || (self.major == 4 && self.minor == 4)
    }

    pub fn can_timeseries(&self) -> bool {
        self.major >= 5
    }

    pub fn ts_can_delete_without_meta(&self) -> bool {
        self.major >= 7
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_patch_version() {
        let v = ServerVersion::parse("4.4.10").unwrap();
        assert_eq!(v, ServerVersion::new(4, 4));
        assert!(v.can_update_with_pipeline());
    }

    #[test]
    fn test_parse_major_minor_only() {
        let v = ServerVersion::parse("5.0").unwrap();
        assert_eq!(v.major, 5);
        assert!(v.can_update_with_pipeline());
    }

    #[test]
    fn test_parse_prerelease_suffix() {
        let v = ServerVersion::parse("7.1.0-rc2").unwrap();
        assert_eq!(v, ServerVersion::new(7, 1));
        assert!(v.ts_can_delete_without_meta());
    }

    #[test]
    fn test_pipeline_gate() {
        assert!(!ServerVersion::new(4, 2).can_update_with_pipeline());
        assert!(ServerVersion::new(4, 4).can_update_with_pipeline());
        assert!(!ServerVersion::new(4, 6).can_update_with_pipeline());
        assert!(ServerVersion::new(5, 3).can_update_with_pipeline());
        assert!(!ServerVersion::new(3, 6).can_update_with_pipeline());
    }

    #[test]
    fn test_timeseries_flags() {
        let v = ServerVersion::new(6, 0);
        assert!(v.can_timeseries());
        assert!(!v.ts_can_delete_without_meta());
        assert!(!ServerVersion::new(4, 4).can_timeseries());
    }

    #[test]
    fn test_malformed_versions() {
        for bad in ["", "5", "abc", "x.4", "4.", ".4"] {
            assert_eq!(
                ServerVersion::parse(bad),
                Err(VersionError(bad.to_string())),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
