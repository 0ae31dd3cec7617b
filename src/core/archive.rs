//! Packaged cartridge archives
//!
//! A dense manifest can be packaged as a single zip file:
//!
//! ```text
//! codex.json              manifest document
//! content/<id><ext>       one file per source with inline content
//! ```
//!
//! The extension comes from the source's first locator (`.txt` when it has
//! none). Content files are a convenience copy; readers always take content
//! from the manifest.

use crate::error::{CodexError, Result};
use crate::manifest::{write_atomic, Manifest, Source};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

/// Directory holding per-source content files
pub const CONTENT_DIR: &str = "content";

/// Extension used when a locator has none
pub const DEFAULT_EXTENSION: &str = "txt";

/// Archive entry name for a source's content
pub fn content_entry_name(source: &Source) -> String {
    let ext = source
        .uri
        .first()
        .extension()
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    format!("{}/{}.{}", CONTENT_DIR, sanitize_id(&source.id), ext)
}

/// Make a source id safe to use as a single path component
fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "source".to_string(),
        _ => cleaned,
    }
}

/// Serialize a manifest and its content files into zip bytes
pub fn package(manifest: &Manifest) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(Manifest::ARCHIVE_PATH, options)?;
    zip.write_all(manifest.to_json_pretty()?.as_bytes())?;

    for source in &manifest.sources {
        let Some(bytes) = source.content_bytes()? else {
            continue;
        };
        let name = content_entry_name(source);
        debug!("Packaging {} ({} bytes)", name, bytes.len());
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Package a manifest and write it atomically to `path`
pub fn write_archive(manifest: &Manifest, path: &Path) -> Result<()> {
    write_atomic(path, &package(manifest)?)?;
    info!("Bundled dense cartridge -> {}", path.display());
    Ok(())
}

/// Read the raw manifest document from an archive
pub fn read_manifest_value(path: &Path) -> Result<Value> {
    let mut archive = ZipArchive::new(std::fs::File::open(path)?)?;
    let mut entry = archive.by_name(Manifest::ARCHIVE_PATH).map_err(|_| {
        CodexError::schema(
            Manifest::ARCHIVE_PATH,
            format!("archive {} has no {}", path.display(), Manifest::ARCHIVE_PATH),
        )
    })?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read every content file in an archive, keyed by entry name
pub fn read_content_entries(path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(std::fs::File::open(path)?)?;
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if !file.name().starts_with(CONTENT_DIR) || file.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        entries.insert(file.name().to_string(), bytes);
    }
    Ok(entries)
}
