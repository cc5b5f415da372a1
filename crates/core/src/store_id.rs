//! Hierarchical store identifiers.
//!
//! A store id is one to three `/`-separated lowercase segments
//! (`org/project/area`). Each segment maps to a directory under the data
//! root, so validation here is what keeps tenant ids from escaping the
//! storage tree.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The distinguished store that always exists and cannot be deleted.
pub const DEFAULT_STORE_ID: &str = "default";

/// Maximum number of `/`-separated segments in a store id.
pub const MAX_STORE_ID_SEGMENTS: usize = 3;

/// Maximum total length of a store id.
pub const MAX_STORE_ID_LEN: usize = 128;

/// A validated store identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(String);

impl StoreId {
    /// Parse and validate a store id.
    ///
    /// Ids match `^[a-z0-9][a-z0-9\-/]*[a-z0-9]$` with at most
    /// [`MAX_STORE_ID_SEGMENTS`] segments; every segment must start and
    /// end with an alphanumeric character.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::invalid_input("store id must be non-empty"));
        }
        if raw.len() > MAX_STORE_ID_LEN {
            return Err(Error::invalid_input(format!(
                "store id exceeds {MAX_STORE_ID_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '/')
        {
            return Err(Error::invalid_input(format!(
                "store id '{raw}' contains characters outside [a-z0-9-/]"
            )));
        }

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() > MAX_STORE_ID_SEGMENTS {
            return Err(Error::invalid_input(format!(
                "store id '{raw}' has more than {MAX_STORE_ID_SEGMENTS} segments"
            )));
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(Error::invalid_input(format!(
                    "store id '{raw}' contains an empty segment"
                )));
            }
            let starts_ok = segment
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
            let ends_ok = segment
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
            if !starts_ok || !ends_ok {
                return Err(Error::invalid_input(format!(
                    "store id segment '{segment}' must start and end with [a-z0-9]"
                )));
            }
        }

        Ok(Self(raw.to_string()))
    }

    /// The distinguished default store id.
    pub fn default_store() -> Self {
        Self(DEFAULT_STORE_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_STORE_ID
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Relative directory path for this store under the data root.
    pub fn relative_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StoreId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for StoreId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StoreId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StoreId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_flat_and_hierarchical_ids() {
        for id in ["default", "org", "org/project", "org/project/area", "a-1/b2"] {
            assert!(StoreId::parse(id).is_ok(), "expected '{id}' to parse");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        for id in [
            "",
            "Org",
            "org//project",
            "/org",
            "org/",
            "-org",
            "org-",
            "org/-x/y",
            "a/b/c/d",
            "org_project",
        ] {
            assert!(StoreId::parse(id).is_err(), "expected '{id}' to be rejected");
        }
    }

    #[test]
    fn relative_path_nests_segments() {
        let id = StoreId::parse("org/project").unwrap();
        assert_eq!(id.relative_path(), PathBuf::from("org").join("project"));
    }

    #[test]
    fn default_is_flagged() {
        assert!(StoreId::default_store().is_default());
        assert!(!StoreId::parse("other").unwrap().is_default());
    }
}
