//! End-to-end hydrate / dehydrate / verify scenarios on local files

use codex_cartridge::audit::EntryStatus;
use codex_cartridge::digest::tagged_sha256;
use codex_cartridge::error::BoxError;
use codex_cartridge::resolver::{Locators, Transport};
use codex_cartridge::{
    Action, CartridgeState, CodexEngine, CodexError, ExclusionRange, Manifest,
    ModificationStatus, Source, Strictness,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn engine(strictness: Strictness) -> CodexEngine {
    CodexEngine::builder().strictness(strictness).build().unwrap()
}

fn library(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in files {
        fs::write(dir.path().join(name), body).unwrap();
    }
    dir
}

fn book(sources: Vec<Source>) -> Manifest {
    sources
        .into_iter()
        .fold(Manifest::new("Meditations", "Marcus Aurelius", "philosophy"), |m, s| {
            m.add_source(s)
        })
}

#[test]
fn test_hydrate_adopts_first_digest() {
    let dir = library(&[("local.txt", "Waste no more time arguing what a good man should be.")]);
    let manifest = book(vec![Source::new("book-1", "local.txt")]);

    let outcome = engine(Strictness::Strict)
        .hydrate(&manifest, dir.path())
        .unwrap();
    assert!(outcome.report.is_success());

    let source = outcome.manifest.source("book-1").unwrap();
    let bytes = fs::read(dir.path().join("local.txt")).unwrap();
    assert_eq!(source.hash.as_deref(), Some(tagged_sha256(&bytes).as_str()));
    assert_eq!(source.size_bytes, Some(bytes.len() as u64));
    assert_eq!(source.modification_status, ModificationStatus::Clean);
    assert_eq!(source.modification_history.len(), 1);
    assert_eq!(source.content.as_deref(), Some(std::str::from_utf8(&bytes).unwrap()));
    assert_eq!(outcome.manifest.meta.state, CartridgeState::Dense);

    // Input manifest is untouched
    assert!(manifest.sources[0].hash.is_none());
}

#[test]
fn test_rehydrate_after_change_is_drifted() {
    let dir = library(&[("local.txt", "first edition")]);
    let manifest = book(vec![Source::new("book-1", "local.txt")]);
    let first = engine(Strictness::Strict)
        .hydrate(&manifest, dir.path())
        .unwrap();
    let reference = engine(Strictness::Strict)
        .dehydrate(&first.manifest)
        .unwrap()
        .manifest;

    fs::write(dir.path().join("local.txt"), "second edition").unwrap();

    let second = engine(Strictness::Permissive)
        .hydrate(&reference, dir.path())
        .unwrap();
    let source = second.manifest.source("book-1").unwrap();
    assert_eq!(source.modification_status, ModificationStatus::Drifted);
    assert_eq!(second.report.warnings.len(), 1);
    assert!(second.report.is_success());

    let last = source.modification_history.last().unwrap();
    assert_eq!(last.status, EntryStatus::Drifted);
    assert_ne!(last.observed_digest, last.expected_hash);
    // Recorded baseline is never overwritten
    assert_eq!(source.hash, first.manifest.sources[0].hash);

    let err = engine(Strictness::Strict)
        .hydrate(&reference, dir.path())
        .unwrap_err();
    match err {
        CodexError::IntegrityMismatch { source_id, .. } => assert_eq!(source_id, "book-1"),
        other => panic!("expected IntegrityMismatch, got {other}"),
    }
}

#[test]
fn test_multiple_locators_concatenate() {
    let dir = library(&[("a.txt", "Book one."), ("b.txt", "Book two.")]);
    let locators = Locators::new(vec!["a.txt".into(), "b.txt".into()]).unwrap();
    let manifest = book(vec![Source::with_locators("collected", locators)]);

    let outcome = engine(Strictness::Strict)
        .hydrate(&manifest, dir.path())
        .unwrap();
    let source = outcome.manifest.source("collected").unwrap();
    assert_eq!(source.content.as_deref(), Some("Book one.\nBook two."));
    assert_eq!(
        source.hash.as_deref(),
        Some(tagged_sha256(b"Book one.\nBook two.").as_str())
    );
    assert_eq!(outcome.report.fetched, 2);
}

#[test]
fn test_verify_inline_content_without_fetch() {
    let text = "The universe is change; our life is what our thoughts make it.";
    let source = Source::new("book-1", "does-not-exist.txt")
        .with_content(text)
        .with_hash(tagged_sha256(text.as_bytes()), text.len() as u64);
    let manifest = book(vec![source]);
    let dir = tempfile::tempdir().unwrap();

    let outcome = engine(Strictness::Strict)
        .verify(&manifest, dir.path())
        .unwrap();
    assert!(outcome.report.is_success());
    assert_eq!(outcome.report.fetched, 0);
    assert_eq!(
        outcome.manifest.sources[0].modification_status,
        ModificationStatus::Clean
    );
}

#[test]
fn test_verify_is_idempotent() {
    let dir = library(&[("local.txt", "Nothing is worth doing pointlessly.")]);
    let manifest = book(vec![Source::new("book-1", "local.txt")]);
    let engine = engine(Strictness::Strict);
    let dense = engine.hydrate(&manifest, dir.path()).unwrap().manifest;

    let once = engine.verify(&dense, dir.path()).unwrap().manifest;
    let twice = engine.verify(&once, dir.path()).unwrap().manifest;

    let (a, b) = (&once.sources[0], &twice.sources[0]);
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.size_bytes, b.size_bytes);
    assert_eq!(a.modification_status, b.modification_status);
    assert_eq!(a.content, b.content);
    assert_eq!(b.modification_history.len(), a.modification_history.len() + 1);
    // Verify never changes a consistent state
    assert_eq!(twice.meta.state, dense.meta.state);
}

#[test]
fn test_verify_fixes_stale_dense_label() {
    let dir = library(&[("local.txt", "text")]);
    let mut manifest = book(vec![Source::new("book-1", "local.txt")]);
    manifest.meta.state = CartridgeState::Dense;

    let verified = engine(Strictness::Strict)
        .verify(&manifest, dir.path())
        .unwrap()
        .manifest;
    assert!(verified.sources[0].content.is_none());
    assert_eq!(verified.meta.state, CartridgeState::Reference);
}

#[test]
fn test_dehydrate_nulls_content() {
    let dir = library(&[("a.txt", "alpha"), ("b.txt", "beta")]);
    let manifest = book(vec![Source::new("a", "a.txt"), Source::new("b", "b.txt")]);
    let engine = engine(Strictness::Strict);
    let dense = engine.hydrate(&manifest, dir.path()).unwrap().manifest;

    let outcome = engine.dehydrate(&dense).unwrap();
    let reference = &outcome.manifest;
    assert_eq!(reference.meta.state, CartridgeState::Reference);
    for (before, after) in dense.sources.iter().zip(&reference.sources) {
        assert!(after.content.is_none());
        assert_eq!(before.hash, after.hash);
        assert_eq!(before.size_bytes, after.size_bytes);
        assert_eq!(after.modification_status, ModificationStatus::Clean);
    }

    let json = reference.to_value().unwrap();
    assert!(json["sources"][0]["content"].is_null());
}

#[test]
fn test_round_trip_preserves_digests() {
    let dir = library(&[("local.txt", "Dwell on the beauty of life.")]);
    let manifest = book(vec![Source::new("book-1", "local.txt")]);
    let engine = engine(Strictness::Strict);

    let dense = engine.hydrate(&manifest, dir.path()).unwrap().manifest;
    let reference = engine.dehydrate(&dense).unwrap().manifest;
    let again = engine.hydrate(&reference, dir.path()).unwrap().manifest;

    assert_eq!(again.sources[0].hash, dense.sources[0].hash);
    assert_eq!(again.sources[0].size_bytes, dense.sources[0].size_bytes);
    assert_eq!(again.sources[0].content, dense.sources[0].content);
    assert_eq!(again.sources[0].modification_status, ModificationStatus::Clean);
}

#[test]
fn test_permissive_isolates_failures() {
    let dir = library(&[("present.txt", "here")]);
    let manifest = book(vec![
        Source::new("missing", "absent.txt"),
        Source::new("present", "present.txt"),
    ]);

    let outcome = engine(Strictness::Permissive)
        .hydrate(&manifest, dir.path())
        .unwrap();
    assert!(!outcome.report.is_success());
    assert_eq!(outcome.report.failed_sources(), vec!["missing".to_string()]);
    assert!(outcome.report.failures[0].to_string().contains("absent.txt"));

    let missing = outcome.manifest.source("missing").unwrap();
    assert!(missing.content.is_none());
    assert_eq!(
        missing.modification_history.last().map(|e| e.status),
        Some(EntryStatus::Failed)
    );

    let present = outcome.manifest.source("present").unwrap();
    assert_eq!(present.content.as_deref(), Some("here"));

    // Partially hydrated cartridges stay in reference state
    assert_eq!(outcome.manifest.meta.state, CartridgeState::Reference);

    let event = outcome.manifest.history.last().unwrap();
    assert_eq!(event.action, Action::Hydrate);
    assert_eq!(event.failed_sources, vec!["missing".to_string()]);
}

#[test]
fn test_strict_aborts_on_first_failure() {
    let dir = library(&[("present.txt", "here")]);
    let manifest = book(vec![
        Source::new("missing", "absent.txt"),
        Source::new("present", "present.txt"),
    ]);

    let err = engine(Strictness::Strict)
        .hydrate(&manifest, dir.path())
        .unwrap_err();
    assert!(matches!(err, CodexError::ResolutionFailed { ref locator, .. } if locator == "absent.txt"));
}

#[test]
fn test_unknown_function() {
    let manifest = book(vec![Source::new("summary", "func://summarize?chapter=2")]);
    let dir = tempfile::tempdir().unwrap();

    let err = engine(Strictness::Strict)
        .hydrate(&manifest, dir.path())
        .unwrap_err();
    assert!(matches!(err, CodexError::UnknownFunction { ref name } if name == "summarize"));

    let outcome = engine(Strictness::Permissive)
        .hydrate(&manifest, dir.path())
        .unwrap();
    assert_eq!(outcome.report.failed_sources(), vec!["summary".to_string()]);
}

#[test]
fn test_structural_failure_aborts_before_io() {
    let manifest = book(vec![
        Source::new("dup", "absent.txt"),
        Source::new("dup", "absent.txt"),
    ]);
    let dir = tempfile::tempdir().unwrap();

    for strictness in [Strictness::Strict, Strictness::Permissive] {
        let err = engine(strictness)
            .hydrate(&manifest, dir.path())
            .unwrap_err();
        assert!(matches!(err, CodexError::SchemaViolation { .. }), "{err}");
    }
}

#[test]
fn test_exclusion_adjacency() {
    let dir = library(&[("local.txt", "text")]);
    let touching = book(vec![Source::new("book-1", "local.txt")
        .with_exclusion(ExclusionRange::new(10, 20))
        .with_exclusion(ExclusionRange::new(20, 30))]);
    assert!(engine(Strictness::Strict)
        .hydrate(&touching, dir.path())
        .unwrap()
        .report
        .is_success());

    let overlapping = book(vec![Source::new("book-1", "local.txt")
        .with_exclusion(ExclusionRange::new(10, 20))
        .with_exclusion(ExclusionRange::new(15, 25))]);
    let err = engine(Strictness::Strict)
        .hydrate(&overlapping, dir.path())
        .unwrap_err();
    assert!(matches!(err, CodexError::OverlappingRanges { .. }));

    let outcome = engine(Strictness::Permissive)
        .hydrate(&overlapping, dir.path())
        .unwrap();
    assert_eq!(outcome.report.failed_sources(), vec!["book-1".to_string()]);
    // Content is still embedded; the violation only fails the run
    assert!(outcome.manifest.sources[0].content.is_some());

    let statuses: Vec<EntryStatus> = outcome.manifest.sources[0]
        .modification_history
        .iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(statuses, vec![EntryStatus::Failed, EntryStatus::Clean]);
}

#[test]
fn test_validate_reports_inline_drift_without_mutation() {
    let source = Source::new("book-1", "absent.txt")
        .with_content("edited text")
        .with_hash(tagged_sha256(b"original text"), 13);
    let manifest = book(vec![source]);

    let report = engine(Strictness::Permissive).validate(&manifest).unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(manifest.sources[0].modification_history.is_empty());
    assert!(manifest.history.is_empty());

    assert!(matches!(
        engine(Strictness::Strict).validate(&manifest),
        Err(CodexError::IntegrityMismatch { .. })
    ));
}

#[test]
fn test_open_reads_lite_manifest() {
    let dir = library(&[("local.txt", "text")]);
    let path = dir.path().join("book.codex.json");
    fs::write(
        &path,
        r#"{
            "spec_version": "0.1.0",
            "meta": {"name": "Legacy", "state": "lite"},
            "sources": [{"id": "s", "uri": "local.txt", "content": null}]
        }"#,
    )
    .unwrap();

    let engine = engine(Strictness::Strict);
    let (manifest, base_dir) = engine.open(&path).unwrap();
    assert_eq!(manifest.meta.state, CartridgeState::Reference);
    assert_eq!(base_dir, dir.path());

    let dense = engine.hydrate(&manifest, Path::new(&base_dir)).unwrap();
    assert_eq!(dense.manifest.meta.state, CartridgeState::Dense);
    assert_eq!(dense.manifest.to_value().unwrap()["meta"]["state"], "dense");
}

/// Hydrate, strict verify of the dense copy, dehydrate, rehydrate
fn assert_dense_round_trip(engine: &CodexEngine, manifest: &Manifest, base_dir: &Path) -> Manifest {
    let dense = engine.hydrate(manifest, base_dir).unwrap();
    assert!(dense.report.is_success(), "{:?}", dense.report);
    let dense = dense.manifest;
    assert_eq!(dense.meta.state, CartridgeState::Dense);

    let verified = engine.verify(&dense, base_dir).unwrap();
    assert!(verified.report.is_success());
    assert!(verified.report.warnings.is_empty(), "{:?}", verified.report.warnings);
    assert_eq!(verified.report.fetched, 0);

    let reference = engine.dehydrate(&dense).unwrap();
    assert!(reference.report.warnings.is_empty(), "{:?}", reference.report.warnings);
    assert_eq!(
        reference.manifest.sources[0].modification_status,
        ModificationStatus::Clean
    );

    let again = engine.hydrate(&reference.manifest, base_dir).unwrap().manifest;
    assert_eq!(again.sources[0].hash, dense.sources[0].hash);
    assert_eq!(again.sources[0].content, dense.sources[0].content);
    dense
}

#[test]
fn test_declared_latin1_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = b"Marc-Aur\xe8le, caf\xe9";
    fs::write(dir.path().join("latin.txt"), bytes).unwrap();
    let manifest = book(vec![Source::new("book-1", "latin.txt").with_encoding("latin-1")]);

    let dense = assert_dense_round_trip(&engine(Strictness::Strict), &manifest, dir.path());
    let source = &dense.sources[0];
    assert_eq!(source.content.as_deref(), Some("Marc-Aur\u{e8}le, caf\u{e9}"));
    assert_eq!(source.hash.as_deref(), Some(tagged_sha256(bytes).as_str()));
    assert_eq!(source.size_bytes, Some(bytes.len() as u64));
}

#[test]
fn test_declared_utf16_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let bytes: Vec<u8> = "hello".encode_utf16().flat_map(u16::to_le_bytes).collect();
    fs::write(dir.path().join("wide.txt"), &bytes).unwrap();

    for label in ["utf-16le", "utf_16"] {
        let manifest = book(vec![Source::new("book-1", "wide.txt").with_encoding(label)]);
        let dense = assert_dense_round_trip(&engine(Strictness::Strict), &manifest, dir.path());
        assert_eq!(dense.sources[0].content.as_deref(), Some("hello"));
        assert_eq!(dense.sources[0].size_bytes, Some(10));
    }
}

/// Serves `https://fixture/<name>` from a fixed map
struct FixtureTransport {
    files: BTreeMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl Transport for FixtureTransport {
    fn get(&self, url: &str, _: &BTreeMap<String, String>) -> Result<Vec<u8>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| format!("404 for {}", url).into())
    }

    fn post_json(&self, _: &str, _: &Value) -> Result<Vec<u8>, BoxError> {
        Err("unused".into())
    }
}

#[test]
fn test_descriptor_encoding_round_trip() {
    let bytes = b"Pens\xe9es pour moi-m\xeame";
    let transport = Arc::new(FixtureTransport {
        files: BTreeMap::from([("https://fixture/book.txt".to_string(), bytes.to_vec())]),
        calls: AtomicUsize::new(0),
    });
    let engine = CodexEngine::builder()
        .transport(transport.clone())
        .build()
        .unwrap();
    let manifest = book(vec![Source::new("book-1", "lat://book")])
        .add_extern("lat", json!({"template": "https://fixture/{id}.txt", "encoding": "latin_1"}));

    let dense = assert_dense_round_trip(&engine, &manifest, Path::new("."));
    let source = &dense.sources[0];
    assert_eq!(source.content.as_deref(), Some("Pens\u{e9}es pour moi-m\u{ea}me"));
    assert_eq!(source.encoding.as_deref(), Some("latin_1"));
    assert_eq!(source.hash.as_deref(), Some(tagged_sha256(bytes).as_str()));
    // One fetch to hydrate, one to rehydrate; the dense verify used inline content
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}
