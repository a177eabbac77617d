//! KV v2 path handling.
//!
//! Secret paths are carried in their API form, `<mount>/data/<logical>`, because
//! that is the string the mesh's Helm values expect (`consul/data/secret/gossip`).
//! The backend needs the mount and the logical path separately.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{BootstrapError, Result};

/// A parsed KV v2 secret path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KvPath {
    mount: String,
    logical: String,
}

impl KvPath {
    /// Parse an API path of the form `<mount>/data/<logical>`.
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        if segments.len() < 3 {
            return Err(BootstrapError::invalid_path(
                path,
                "expected '<mount>/data/<logical path>'",
            ));
        }

        if let Some(bad) = segments.iter().find(|s| s.is_empty() || **s == "..") {
            return Err(BootstrapError::invalid_path(
                path,
                format!("segment '{}' is not allowed", bad),
            ));
        }

        if segments[1] != "data" {
            return Err(BootstrapError::invalid_path(
                path,
                "second segment must be 'data' for a KV v2 mount",
            ));
        }

        Ok(Self { mount: segments[0].to_string(), logical: segments[2..].join("/") })
    }

    /// Build a path from its parts.
    pub fn new(mount: impl Into<String>, logical: impl Into<String>) -> Self {
        Self { mount: mount.into(), logical: logical.into() }
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn logical(&self) -> &str {
        &self.logical
    }

    /// Metadata path, used when policies need to allow listing or deletion.
    pub fn metadata_path(&self) -> String {
        format!("{}/metadata/{}", self.mount, self.logical)
    }
}

impl fmt::Display for KvPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/data/{}", self.mount, self.logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_gossip_path() {
        let path = KvPath::parse("consul/data/secret/gossip").unwrap();
        assert_eq!(path.mount(), "consul");
        assert_eq!(path.logical(), "secret/gossip");
        assert_eq!(path.to_string(), "consul/data/secret/gossip");
        assert_eq!(path.metadata_path(), "consul/metadata/secret/gossip");
    }

    #[test]
    fn test_parse_rejects_missing_data_segment() {
        let err = KvPath::parse("consul/secret/gossip").unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidPath { .. }));
    }

    #[test]
    fn test_parse_rejects_short_and_traversal_paths() {
        assert!(KvPath::parse("consul/data").is_err());
        assert!(KvPath::parse("consul/data/../root").is_err());
        assert!(KvPath::parse("consul/data//gossip").is_err());
    }

    proptest! {
        #[test]
        fn prop_traversal_anywhere_is_rejected(
            mount in "[a-z][a-z0-9_-]{0,12}",
            before in "[a-z]{1,8}",
            after in "[a-z]{1,8}",
        ) {
            let raw = format!("{}/data/{}/../{}", mount, before, after);
            prop_assert!(KvPath::parse(&raw).is_err());
        }
    }
}
