//! Run configuration
//!
//! Loaded from a TOML file; every key is optional. Command-line flags are
//! applied on top by the binary.
//!
//! ```toml
//! strict = true
//! baseline = "adopt-first"
//! workers = 4
//! schema = "builtin"
//! externs = "externs.json"
//!
//! [network]
//! timeout_secs = 30
//!
//! [cache]
//! dir = ".codex-cache"
//! memory_entries = 64
//!
//! [functions_endpoint]
//! url = "http://localhost:8080/invoke"
//! ```

use crate::cache::DEFAULT_MEMORY_ENTRIES;
use crate::error::Result;
use crate::resolver::transport::USER_AGENT;
use crate::source::BaselinePolicy;
use crate::validation::Strictness;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the structural schema comes from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchemaSource {
    #[default]
    Builtin,
    None,
    Path(PathBuf),
}

impl Serialize for SchemaSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SchemaSource::Builtin => serializer.serialize_str("builtin"),
            SchemaSource::None => serializer.serialize_str("none"),
            SchemaSource::Path(path) => serializer.serialize_str(&path.to_string_lossy()),
        }
    }
}

impl<'de> Deserialize<'de> for SchemaSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "builtin" => SchemaSource::Builtin,
            "none" => SchemaSource::None,
            path => SchemaSource::Path(PathBuf::from(path)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            timeout_secs: 30,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disk cache directory; memory-only when unset
    pub dir: Option<PathBuf>,
    pub memory_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: None,
            memory_entries: DEFAULT_MEMORY_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodexConfig {
    /// Abort on the first per-source failure
    pub strict: bool,
    pub baseline: BaselinePolicy,
    /// Concurrent source resolution; 1 means sequential
    pub workers: usize,
    pub schema: SchemaSource,
    /// Resolver descriptor document
    pub externs: Option<PathBuf>,
    /// Function descriptor document
    pub functions: Option<PathBuf>,
    /// Remote alias → base URL document
    pub remotes: Option<PathBuf>,
    pub network: NetworkConfig,
    pub cache: CacheConfig,
    pub functions_endpoint: Option<EndpointConfig>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        CodexConfig {
            strict: true,
            baseline: BaselinePolicy::AdoptFirst,
            workers: 1,
            schema: SchemaSource::Builtin,
            externs: None,
            functions: None,
            remotes: None,
            network: NetworkConfig::default(),
            cache: CacheConfig::default(),
            functions_endpoint: None,
        }
    }
}

impl CodexConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        if let Some(dir) = path.parent() {
            config.rebase(dir);
        }
        Ok(config)
    }

    fn rebase(&mut self, dir: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        let paths = [
            self.externs.as_mut(),
            self.functions.as_mut(),
            self.remotes.as_mut(),
            self.cache.dir.as_mut(),
        ];
        for p in paths.into_iter().flatten() {
            rebase(p);
        }
        if let SchemaSource::Path(p) = &mut self.schema {
            rebase(p);
        }
    }

    pub fn strictness(&self) -> Strictness {
        Strictness::from_relaxed(!self.strict)
    }
}
