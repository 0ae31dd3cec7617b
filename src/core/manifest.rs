//! Cartridge manifest document
//!
//! The manifest describes a content cartridge: metadata, provenance,
//! instructions, an ordered list of sources and an opaque list of layers.
//! A manifest is in one of two states:
//! - **reference**: sources carry locators only, `content` is null
//! - **dense**: every source carries its decoded text inline
//!
//! Unknown keys at every level are preserved so that documents written by
//! other tools survive a load/save cycle.

use crate::audit::{timestamp, HistoryEvent, ModificationEntry, ModificationStatus};
use crate::error::{CodexError, Result};
use crate::resolver::Locators;
use crate::text::{self, DEFAULT_ENCODING};
use crate::validation::ExclusionRange;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Manifest format version written by this crate
pub const SPEC_VERSION: &str = "0.1.0";

type Extra = BTreeMap<String, Value>;

/// Cartridge state recorded in `meta.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartridgeState {
    /// Locators only; `lite` is the legacy spelling
    #[default]
    #[serde(alias = "lite")]
    Reference,
    /// Content embedded inline
    Dense,
}

impl std::fmt::Display for CartridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CartridgeState::Reference => f.write_str("reference"),
            CartridgeState::Dense => f.write_str("dense"),
        }
    }
}

/// Cartridge manifest
///
/// # Examples
///
/// ```
/// use codex_cartridge::manifest::{CartridgeState, Manifest, Source};
///
/// let manifest = Manifest::new("Meditations", "Marcus Aurelius", "philosophy")
///     .add_source(Source::new("book-1", "meditations.txt"));
///
/// assert_eq!(manifest.meta.state, CartridgeState::Reference);
/// assert_eq!(manifest.sources.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version (`0.1.x`)
    pub spec_version: String,

    /// Unique cartridge identifier (UUID v4 for new manifests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    pub meta: Meta,

    #[serde(default)]
    pub provenance: Provenance,

    #[serde(default)]
    pub instructions: Instructions,

    /// Sources in declaration order
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Derived layers; opaque to this crate
    #[serde(default)]
    pub layers: Vec<Value>,

    /// Manifest-level audit history
    #[serde(default)]
    pub history: Vec<HistoryEvent>,

    #[serde(default)]
    pub extensions: Extensions,

    #[serde(flatten)]
    pub extra: Extra,
}

/// `meta` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub state: CartridgeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `provenance` block: tool identity and generation profile
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Free-form generation parameters
    #[serde(default)]
    pub logic: Extra,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `instructions` block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_logic: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `extensions` block: capability plug-ins
///
/// Descriptor maps are kept raw so that permissive runs can report and skip
/// malformed entries instead of failing to load the whole manifest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Extensions {
    /// Scheme → resolver descriptor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub externs: Extra,
    /// Function name → function descriptor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: Extra,
    #[serde(flatten)]
    pub other: Extra,
}

/// One declared content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Unique within the manifest
    pub id: String,

    /// Media-type tag (`text`, `markdown`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Ordered locators; content is their concatenation
    pub uri: Locators,

    /// Inline decoded text (dense state)
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Recorded digest (`sha256:<hex>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Pre-declared digest the content must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_digest: Option<String>,

    /// Recorded byte size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    #[serde(default)]
    pub modification_status: ModificationStatus,

    /// Append-only
    #[serde(default)]
    pub modification_history: Vec<ModificationEntry>,

    #[serde(default, skip_serializing_if = "Curation::is_empty")]
    pub curation: Curation,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Curation block produced by upstream boundary detection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Curation {
    #[serde(default)]
    pub exclusions: Vec<ExclusionRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_range: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curated_range: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Curation {
    pub fn is_empty(&self) -> bool {
        self.exclusions.is_empty()
            && self.original_range.is_none()
            && self.curated_range.is_none()
            && self.extra.is_empty()
    }
}

impl Source {
    /// Declare a source with a single locator
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self::with_locators(id, Locators::single(locator))
    }

    pub fn with_locators(id: impl Into<String>, uri: Locators) -> Self {
        Source {
            id: id.into(),
            media_type: Some("text".to_string()),
            uri,
            content: None,
            encoding: None,
            hash: None,
            expected_digest: None,
            size_bytes: None,
            modification_status: ModificationStatus::Clean,
            modification_history: Vec::new(),
            curation: Curation::default(),
            extra: Extra::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>, size_bytes: u64) -> Self {
        self.hash = Some(hash.into());
        self.size_bytes = Some(size_bytes);
        self
    }

    pub fn with_expected_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    pub fn with_exclusion(mut self, range: ExclusionRange) -> Self {
        self.curation.exclusions.push(range);
        self
    }

    /// Declared encoding, or UTF-8
    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or(DEFAULT_ENCODING)
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Inline content encoded with the source's encoding
    pub fn content_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.content
            .as_deref()
            .map(|content| text::encode(content, self.encoding()))
            .transpose()
    }
}

impl Manifest {
    /// Manifest path inside a packaged archive
    pub const ARCHIVE_PATH: &'static str = "codex.json";

    /// Create a new reference-state manifest
    ///
    /// Generates a fresh UUID and stamps creation/provenance times.
    pub fn new(
        name: impl Into<String>,
        author: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let now = timestamp(chrono::Utc::now());

        Manifest {
            spec_version: SPEC_VERSION.to_string(),
            uuid: Some(uuid::Uuid::new_v4().to_string()),
            meta: Meta {
                name: name.clone(),
                author: Some(author.into()),
                category: Some(category.into()),
                version: Some(SPEC_VERSION.to_string()),
                state: CartridgeState::Reference,
                created_by: Some(crate::TOOL_ID.to_string()),
                created_at: Some(now.clone()),
                extra: Extra::new(),
            },
            provenance: Provenance {
                tool: Some(env!("CARGO_PKG_NAME").to_string()),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                generated_at: Some(now),
                profile: Some("default".to_string()),
                logic: Extra::new(),
                extra: Extra::new(),
            },
            instructions: Instructions {
                usage: Some(format!("This cartridge represents '{}'.", name)),
                system_prompt_hint: Some(String::new()),
                layer_logic: Some(String::new()),
                extra: Extra::new(),
            },
            sources: Vec::new(),
            layers: Vec::new(),
            history: Vec::new(),
            extensions: Extensions::default(),
            extra: Extra::new(),
        }
    }

    /// Add a source
    pub fn add_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Register a resolver descriptor under `extensions.externs`
    pub fn add_extern(mut self, scheme: impl Into<String>, descriptor: Value) -> Self {
        self.extensions.externs.insert(scheme.into(), descriptor);
        self
    }

    /// Register a function descriptor under `extensions.functions`
    pub fn add_function(mut self, name: impl Into<String>, descriptor: Value) -> Self {
        self.extensions.functions.insert(name.into(), descriptor);
        self
    }

    /// Look up a source by id
    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Parse a manifest from a JSON value
    ///
    /// Shape errors surface as `SchemaViolation`.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CodexError::schema("$", e.to_string()))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Pretty-printed JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set `meta.state` from the sources' inline content
    ///
    /// Dense only when there is at least one source and every source
    /// carries content.
    pub fn reconcile_state(&mut self) -> CartridgeState {
        let dense = !self.sources.is_empty() && self.sources.iter().all(Source::has_content);
        self.meta.state = if dense {
            CartridgeState::Dense
        } else {
            CartridgeState::Reference
        };
        self.meta.state
    }
}

/// A manifest document read from disk
#[derive(Debug, Clone)]
pub struct Document {
    /// Raw JSON, before any typed parsing
    pub value: Value,
    /// Directory relative locators resolve against
    pub base_dir: PathBuf,
}

impl Document {
    /// Read a `.json` manifest or a packaged `.zip` archive
    pub fn read(path: &Path) -> Result<Self> {
        let value = if is_archive(path) {
            crate::archive::read_manifest_value(path)?
        } else {
            serde_json::from_slice(&std::fs::read(path)?)?
        };
        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Document { value, base_dir })
    }
}

/// True for packaged archive paths
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("zip"))
}

/// Write bytes to `path` through a temp file in the same directory
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write a manifest as pretty JSON, atomically
pub fn write_manifest(manifest: &Manifest, path: &Path) -> Result<()> {
    write_atomic(path, manifest.to_json_pretty()?.as_bytes())?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Cartridge stem of a manifest path
///
/// Strips the longest known suffix: `.dense.codex.json`, `.codex.json`,
/// `.codex.zip`, `.json`, `.zip`.
pub fn cartridge_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".dense.codex.json", ".codex.json", ".codex.zip", ".json", ".zip"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    name
}

/// Default output path next to `input` with the given suffix
pub fn sibling_output(input: &Path, suffix: &str) -> PathBuf {
    input.with_file_name(format!("{}{}", cartridge_stem(input), suffix))
}
