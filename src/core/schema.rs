//! Structural validation of manifest documents
//!
//! Runs before any other component touches a manifest. Three checks, in
//! order, each reporting the first violation only:
//! 1. JSON Schema (required keys, value types, nesting)
//! 2. `spec_version` compatibility
//! 3. source id uniqueness
//!
//! A disabled validator skips the schema step; version and id checks
//! still run because later stages depend on them.

use crate::error::{CodexError, Result};
use jsonschema::Validator;
use semver::{Version, VersionReq};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Version requirement accepted for `spec_version`
pub const SUPPORTED_SPEC: &str = "^0.1";

/// Compiled structural validator
pub struct StructuralValidator {
    compiled: Option<Validator>,
}

impl std::fmt::Debug for StructuralValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuralValidator")
            .field("enabled", &self.compiled.is_some())
            .finish()
    }
}

impl StructuralValidator {
    /// Validator using the built-in cartridge schema
    pub fn builtin() -> Result<Self> {
        Self::from_schema(&builtin_schema())
    }

    /// Validator using a schema document on disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let schema: Value = serde_json::from_slice(&std::fs::read(path)?)?;
        Self::from_schema(&schema)
    }

    pub fn from_schema(schema: &Value) -> Result<Self> {
        let compiled = Validator::new(schema)
            .map_err(|e| CodexError::schema("#", format!("failed to compile schema: {}", e)))?;
        Ok(StructuralValidator {
            compiled: Some(compiled),
        })
    }

    /// Validator without a schema
    pub fn disabled() -> Self {
        StructuralValidator { compiled: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Check a raw manifest document
    pub fn check(&self, document: &Value) -> Result<()> {
        match &self.compiled {
            Some(compiled) => {
                if let Err(mut errors) = compiled.validate(document) {
                    if let Some(error) = errors.next() {
                        let path = error.instance_path.to_string();
                        let path = if path.is_empty() { "/".to_string() } else { path };
                        return Err(CodexError::schema(path, error.to_string()));
                    }
                }
            }
            None => debug!("Schema validation disabled; checking version and ids only"),
        }

        check_spec_version(document)?;
        check_unique_ids(document)?;
        debug!("Manifest passed structural validation");
        Ok(())
    }
}

fn check_spec_version(document: &Value) -> Result<()> {
    let found = document
        .get("spec_version")
        .and_then(Value::as_str)
        .ok_or_else(|| CodexError::schema("/spec_version", "missing or not a string"))?;
    let supported = VersionReq::parse(SUPPORTED_SPEC).map_err(|e| CodexError::schema("#", e.to_string()))?;
    let unsupported = || CodexError::UnsupportedVersion {
        found: found.to_string(),
        supported: SUPPORTED_SPEC.to_string(),
    };

    let version = Version::parse(found).map_err(|_| unsupported())?;
    if !supported.matches(&version) {
        return Err(unsupported());
    }
    Ok(())
}

fn check_unique_ids(document: &Value) -> Result<()> {
    let Some(sources) = document.get("sources").and_then(Value::as_array) else {
        return Ok(());
    };
    let mut seen = HashSet::new();
    for (index, source) in sources.iter().enumerate() {
        if let Some(id) = source.get("id").and_then(Value::as_str) {
            if !seen.insert(id) {
                return Err(CodexError::schema(
                    format!("/sources/{}/id", index),
                    format!("duplicate source id '{}'", id),
                ));
            }
        }
    }
    Ok(())
}

/// Built-in cartridge manifest schema
pub fn builtin_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Codex cartridge manifest",
        "type": "object",
        "required": ["spec_version", "meta", "sources"],
        "properties": {
            "spec_version": { "type": "string", "minLength": 1 },
            "uuid": { "type": "string" },
            "meta": { "$ref": "#/definitions/meta" },
            "provenance": { "$ref": "#/definitions/provenance" },
            "instructions": { "type": "object" },
            "sources": {
                "type": "array",
                "items": { "$ref": "#/definitions/source" }
            },
            "layers": { "type": "array" },
            "history": {
                "type": "array",
                "items": { "type": "object" }
            },
            "extensions": {
                "type": "object",
                "properties": {
                    "externs": {
                        "type": "object",
                        "additionalProperties": { "type": "object" }
                    },
                    "functions": {
                        "type": "object",
                        "additionalProperties": { "type": "object" }
                    }
                }
            }
        },
        "definitions": {
            "digest": {
                "type": "string",
                "pattern": "^sha256:[0-9a-f]{64}$"
            },
            "meta": {
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "author": { "type": "string" },
                    "category": { "type": "string" },
                    "version": { "type": "string" },
                    "state": { "enum": ["reference", "dense", "lite"] },
                    "created_by": { "type": "string" },
                    "created_at": { "type": "string" }
                }
            },
            "provenance": {
                "type": "object",
                "properties": {
                    "tool": { "type": "string" },
                    "version": { "type": "string" },
                    "generated_at": { "type": "string" },
                    "profile": { "type": "string" },
                    "logic": { "type": "object" }
                }
            },
            "locator": { "type": "string", "minLength": 1 },
            "source": {
                "type": "object",
                "required": ["id", "uri"],
                "properties": {
                    "id": { "type": "string", "minLength": 1 },
                    "type": { "type": "string" },
                    "uri": {
                        "oneOf": [
                            { "$ref": "#/definitions/locator" },
                            {
                                "type": "array",
                                "minItems": 1,
                                "items": { "$ref": "#/definitions/locator" }
                            }
                        ]
                    },
                    "content": { "type": ["string", "null"] },
                    "encoding": { "type": "string", "minLength": 1 },
                    "hash": { "$ref": "#/definitions/digest" },
                    "expected_digest": { "$ref": "#/definitions/digest" },
                    "size_bytes": { "type": "integer", "minimum": 0 },
                    "modification_status": { "enum": ["clean", "drifted"] },
                    "modification_history": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["checked_at", "status"],
                            "properties": {
                                "checked_at": { "type": "string" },
                                "status": { "enum": ["clean", "drifted", "failed"] }
                            }
                        }
                    },
                    "curation": {
                        "type": "object",
                        "properties": {
                            "exclusions": {
                                "type": "array",
                                "items": { "type": "object" }
                            }
                        }
                    }
                }
            }
        }
    })
}
