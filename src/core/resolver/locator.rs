//! Source locators
//!
//! A locator is an opaque URI-like string. Its scheme selects the resolution
//! strategy; a locator without a scheme is a path relative to the manifest.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use url::Url;

/// One locator string as written in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

/// Parsed form of a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorTarget {
    /// Scheme-bearing locator (`pg://`, `func://`, `https://`, ...)
    Url(Url),
    /// Local path, absolute or relative to the manifest directory
    Path(PathBuf),
}

impl Locator {
    pub fn new(locator: impl Into<String>) -> Self {
        Locator(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classify the locator
    ///
    /// `file://` locators and strings without a scheme are paths. A
    /// single-letter "scheme" is treated as a Windows drive prefix.
    pub fn target(&self) -> LocatorTarget {
        let raw = self.0.trim();
        if let Some(path) = raw.strip_prefix("file://") {
            return LocatorTarget::Path(PathBuf::from(path));
        }
        match Url::parse(raw) {
            Ok(url) if url.scheme().len() > 1 => LocatorTarget::Url(url),
            _ => LocatorTarget::Path(PathBuf::from(raw)),
        }
    }

    /// Scheme name, if the locator has one
    pub fn scheme(&self) -> Option<String> {
        match self.target() {
            LocatorTarget::Url(url) => Some(url.scheme().to_string()),
            LocatorTarget::Path(_) => None,
        }
    }

    /// File extension of the last path segment (without the dot)
    pub fn extension(&self) -> Option<String> {
        let last = match self.target() {
            LocatorTarget::Path(path) => path.file_name()?.to_str()?.to_string(),
            LocatorTarget::Url(url) => url.path_segments()?.last()?.to_string(),
        };
        let ext = Path::new(&last).extension()?.to_str()?;
        if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(value: &str) -> Self {
        Locator::new(value)
    }
}

/// Ordered, non-empty list of locators for one source
///
/// Written as a bare string when it holds a single locator and as an array
/// otherwise; both forms read back into the same list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locators(Vec<Locator>);

impl Locators {
    /// Build from one or more locators; `None` when the list is empty
    pub fn new(locators: Vec<Locator>) -> Option<Self> {
        if locators.is_empty() {
            None
        } else {
            Some(Locators(locators))
        }
    }

    pub fn single(locator: impl Into<String>) -> Self {
        Locators(vec![Locator::new(locator)])
    }

    pub fn first(&self) -> &Locator {
        &self.0[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Locator> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<'a> IntoIterator for &'a Locators {
    type Item = &'a Locator;
    type IntoIter = std::slice::Iter<'a, Locator>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for Locators {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.len() == 1 {
            self.0[0].serialize(serializer)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Locators {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        let locators = match Repr::deserialize(deserializer)? {
            Repr::One(one) => vec![Locator(one)],
            Repr::Many(many) => many.into_iter().map(Locator).collect(),
        };
        Locators::new(locators)
            .ok_or_else(|| serde::de::Error::custom("uri must contain at least one locator"))
    }
}
