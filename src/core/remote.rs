//! Remote cartridge repositories
//!
//! A remotes document maps an alias to a base URL. Packages are published
//! as `<base>/<package>.codex.json` or `<base>/<package>.codex.zip`.

use crate::error::{CodexError, Result};
use crate::resolver::Transport;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Published artifact flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Manifest,
    Archive,
}

impl PackageKind {
    pub fn extension(self) -> &'static str {
        match self {
            PackageKind::Manifest => ".codex.json",
            PackageKind::Archive => ".codex.zip",
        }
    }

    /// Default local file name for a package
    pub fn file_name(self, package: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", package, self.extension()))
    }
}

/// Alias → base URL mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Remotes {
    repos: BTreeMap<String, String>,
}

impl Remotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, alias: impl Into<String>, base: impl Into<String>) -> Self {
        self.repos.insert(alias.into(), base.into());
        self
    }

    /// Load a JSON object of `alias: base_url`
    pub fn load(path: &Path) -> Result<Self> {
        let value: Value = serde_json::from_slice(&std::fs::read(path)?)?;
        let Value::Object(map) = value else {
            return Err(CodexError::schema(
                path.display().to_string(),
                "remotes document must map alias -> base URL",
            ));
        };
        let repos = map
            .into_iter()
            .map(|(alias, base)| {
                let base = match base {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (alias, base)
            })
            .collect();
        Ok(Remotes { repos })
    }

    pub fn base(&self, alias: &str) -> Option<&str> {
        self.repos.get(alias).map(String::as_str)
    }

    /// URL of `package` in the repo named `alias`
    pub fn package_url(&self, alias: &str, package: &str, kind: PackageKind) -> Result<String> {
        let base = self.base(alias).ok_or_else(|| {
            CodexError::resolution(
                format!("{}:{}", alias, package),
                format!("repo alias '{}' not found in remotes mapping", alias),
            )
        })?;
        Ok(format!(
            "{}/{}{}",
            base.trim_end_matches('/'),
            package,
            kind.extension()
        ))
    }

    /// Download a package
    pub fn fetch(
        &self,
        transport: &dyn Transport,
        alias: &str,
        package: &str,
        kind: PackageKind,
    ) -> Result<Vec<u8>> {
        let url = self.package_url(alias, package, kind)?;
        info!("Fetching {}", url);
        transport
            .get(&url, &BTreeMap::new())
            .map_err(|e| CodexError::resolution(url, e))
    }
}
