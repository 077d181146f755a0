//! Collection names

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DOWNLOADS: &str = "downloads";
pub const TRAINING: &str = "training";
pub const OFFICES: &str = "offices";
pub const CLINICAL_APPS: &str = "clinicalApps";

/// Name of an independent partition of content items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(String);

impl CollectionName {
    /// Validate a collection name received from outside the process.
    ///
    /// Names are non-empty ASCII alphanumerics plus `-` and `_`, so they can be
    /// used as a URL path segment without escaping.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "collection name must not be empty".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidInput(format!(
                "collection name '{name}' may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used when generating ids for items of this collection.
    pub fn id_prefix(&self) -> &str {
        match self.0.as_str() {
            DOWNLOADS => "download",
            TRAINING => "training",
            OFFICES => "office",
            CLINICAL_APPS => "app",
            other => other,
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CollectionName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for CollectionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_collections() {
        for name in [DOWNLOADS, TRAINING, OFFICES, CLINICAL_APPS] {
            assert_eq!(CollectionName::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn parse_rejects_path_characters() {
        assert!(CollectionName::parse("").is_err());
        assert!(CollectionName::parse("  ").is_err());
        assert!(CollectionName::parse("a/b").is_err());
        assert!(CollectionName::parse("../etc").is_err());
    }

    #[test]
    fn id_prefix_per_collection() {
        assert_eq!(CollectionName::from(OFFICES).id_prefix(), "office");
        assert_eq!(CollectionName::from(CLINICAL_APPS).id_prefix(), "app");
        assert_eq!(CollectionName::from("brochures").id_prefix(), "brochures");
    }
}
