//! Resolver and function descriptors
//!
//! Descriptors are external inputs: they arrive embedded under the manifest's
//! `extensions.externs` / `extensions.functions` or as standalone JSON
//! documents mapping a name to a descriptor object.

use crate::error::{CodexError, Result};
use crate::validation::Strictness;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use validator::Validate;

/// Placeholder substituted with the normalized identifier
pub const ID_PLACEHOLDER: &str = "{id}";

/// Scheme → templated external archive mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ResolverDescriptor {
    /// URL template containing `{id}`
    #[validate(length(min = 1))]
    pub template: String,

    /// Extra request headers sent with every fetch
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Encoding override for fetched bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub encoding: Option<String>,

    /// How the identifier portion of the locator is normalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_style: Option<IdStyle>,
}

/// Identifier normalization applied before template substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStyle {
    /// Use the identifier as written
    Verbatim,
    /// Strip archive path prefixes and file suffixes, keep the digits
    ArchiveDigits,
}

impl ResolverDescriptor {
    pub fn new(template: impl Into<String>) -> Self {
        ResolverDescriptor {
            template: template.into(),
            headers: BTreeMap::new(),
            encoding: None,
            id_style: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Normalization for a scheme: explicit `id_style`, else archive digits
    /// for the `pg` scheme and verbatim for everything else
    pub fn id_style_for(&self, scheme: &str) -> IdStyle {
        self.id_style.unwrap_or(if scheme == "pg" {
            IdStyle::ArchiveDigits
        } else {
            IdStyle::Verbatim
        })
    }

    /// Substitute a normalized identifier into the template
    pub fn expand(&self, scheme: &str, raw_id: &str) -> String {
        let id = match self.id_style_for(scheme) {
            IdStyle::Verbatim => raw_id.to_string(),
            IdStyle::ArchiveDigits => normalize_archive_id(raw_id),
        };
        self.template.replace(ID_PLACEHOLDER, &id)
    }

    fn check(&self, name: &str) -> Result<()> {
        self.validate().map_err(|e| invalid(name, e.to_string()))?;
        if !self.template.contains(ID_PLACEHOLDER) {
            return Err(invalid(name, "template has no {id} placeholder"));
        }
        Ok(())
    }
}

/// Function name → delegated capability mapping
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct FunctionDescriptor {
    /// Target model or implementation identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub model: Option<String>,

    /// Invocation name passed to the capability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub name: Option<String>,

    /// Alternative to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub encoding: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FunctionDescriptor {
    pub fn new(model: impl Into<String>, name: impl Into<String>) -> Self {
        FunctionDescriptor {
            model: Some(model.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Invocation name: `name`, else `id`
    pub fn invocation_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.id.as_deref())
    }

    fn check(&self, name: &str) -> Result<()> {
        self.validate().map_err(|e| invalid(name, e.to_string()))?;
        if self.invocation_name().is_none() {
            return Err(invalid(name, "missing required 'name' or 'id'"));
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> CodexError {
    CodexError::InvalidDescriptor {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Normalize an archive-style identifier
///
/// Strips one known path prefix (`ebooks/`, `files/`, `cache/epub/`), the
/// `pg` and `epub/` markers, a `.txt` suffix and a `-0` edition suffix, then
/// keeps only the digits. Falls back to the cleaned string when it holds no
/// digits at all.
///
/// # Examples
///
/// ```
/// use codex_cartridge::resolver::normalize_archive_id;
///
/// assert_eq!(normalize_archive_id("ebooks/1342"), "1342");
/// assert_eq!(normalize_archive_id("pg1342.txt"), "1342");
/// assert_eq!(normalize_archive_id("files/2701/2701-0.txt"), "27012701");
/// assert_eq!(normalize_archive_id("alice"), "alice");
/// ```
pub fn normalize_archive_id(raw: &str) -> String {
    let mut cleaned = raw.trim().trim_matches('/');
    for prefix in ["ebooks/", "files/", "cache/epub/"] {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest;
            break;
        }
    }
    let mut cleaned = cleaned.replace("pg", "").replace("epub/", "");
    if let Some(rest) = cleaned.strip_suffix(".txt") {
        cleaned = rest.to_string();
    }
    if let Some(rest) = cleaned.strip_suffix("-0") {
        cleaned = rest.to_string();
    }
    let digits: String = cleaned.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        cleaned
    } else {
        digits
    }
}

/// Resolver and function descriptors available to one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorSet {
    pub resolvers: BTreeMap<String, ResolverDescriptor>,
    pub functions: BTreeMap<String, FunctionDescriptor>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, scheme: impl Into<String>, descriptor: ResolverDescriptor) -> Self {
        self.resolvers.insert(scheme.into(), descriptor);
        self
    }

    pub fn with_function(mut self, name: impl Into<String>, descriptor: FunctionDescriptor) -> Self {
        self.functions.insert(name.into(), descriptor);
        self
    }

    /// Build from raw descriptor maps, checking every entry
    ///
    /// Strict mode fails on the first invalid descriptor. Permissive mode
    /// drops invalid entries and returns them as diagnostics.
    pub fn from_raw(
        externs: &BTreeMap<String, Value>,
        functions: &BTreeMap<String, Value>,
        strictness: Strictness,
    ) -> Result<(Self, Vec<CodexError>)> {
        let mut problems = Vec::new();
        let mut set = DescriptorSet::new();

        for (scheme, raw) in externs {
            match parse_entry::<ResolverDescriptor>(scheme, raw).and_then(|d| {
                d.check(scheme)?;
                Ok(d)
            }) {
                Ok(descriptor) => {
                    set.resolvers.insert(scheme.clone(), descriptor);
                }
                Err(e) => reject(e, strictness, &mut problems)?,
            }
        }

        for (name, raw) in functions {
            match parse_entry::<FunctionDescriptor>(name, raw).and_then(|d| {
                d.check(name)?;
                Ok(d)
            }) {
                Ok(descriptor) => {
                    set.functions.insert(name.clone(), descriptor);
                }
                Err(e) => reject(e, strictness, &mut problems)?,
            }
        }

        Ok((set, problems))
    }

    /// Overlay another set; entries in `other` win on name clash
    pub fn merge(&mut self, other: DescriptorSet) {
        self.resolvers.extend(other.resolvers);
        self.functions.extend(other.functions);
    }
}

fn parse_entry<T: DeserializeOwned>(name: &str, raw: &Value) -> Result<T> {
    if !raw.is_object() {
        return Err(invalid(name, "descriptor must be an object"));
    }
    serde_json::from_value(raw.clone()).map_err(|e| invalid(name, e.to_string()))
}

fn reject(error: CodexError, strictness: Strictness, problems: &mut Vec<CodexError>) -> Result<()> {
    if strictness.is_strict() {
        return Err(error);
    }
    warn!("{}", error);
    problems.push(error);
    Ok(())
}

/// Load a JSON document mapping names to raw descriptor objects
pub fn load_descriptor_document(path: &Path) -> Result<BTreeMap<String, Value>> {
    debug!("Loading descriptor document {:?}", path);
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(CodexError::schema(
            path.display().to_string(),
            "descriptor document must be a JSON object",
        )),
    }
}
