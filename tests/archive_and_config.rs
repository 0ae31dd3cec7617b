//! Packaged cartridges and configuration-driven engines

use codex_cartridge::archive::{self, read_content_entries};
use codex_cartridge::manifest::{sibling_output, write_manifest};
use codex_cartridge::{
    CartridgeState, CodexConfig, CodexEngine, ContentCache, EngineBuilder, Manifest, Source,
    Strictness,
};
use httptest::{matchers::*, responders::*, Expectation, Server};
use std::fs;
use std::path::Path;

#[test]
fn test_archive_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("book.md"), "# Book One\n").unwrap();
    fs::write(dir.path().join("notes"), "loose notes").unwrap();

    let manifest = Manifest::new("Meditations", "Marcus Aurelius", "philosophy")
        .add_source(Source::new("ebooks/book-1", "book.md"))
        .add_source(Source::new("notes", "notes"));
    let engine = CodexEngine::builder().build().unwrap();
    let dense = engine.hydrate(&manifest, dir.path()).unwrap().manifest;

    let zip_path = dir.path().join("meditations.codex.zip");
    archive::write_archive(&dense, &zip_path).unwrap();

    let entries = read_content_entries(&zip_path).unwrap();
    assert_eq!(
        entries.keys().cloned().collect::<Vec<_>>(),
        vec!["content/ebooks_book-1.md".to_string(), "content/notes.txt".to_string()]
    );
    assert_eq!(entries["content/ebooks_book-1.md"], b"# Book One\n");

    // Packaged content verifies without touching the original files
    fs::remove_file(dir.path().join("book.md")).unwrap();
    fs::remove_file(dir.path().join("notes")).unwrap();

    let (opened, base_dir) = engine.open(&zip_path).unwrap();
    assert_eq!(opened.meta.state, CartridgeState::Dense);
    assert_eq!(base_dir, dir.path());

    let outcome = engine.verify(&opened, &base_dir).unwrap();
    assert!(outcome.report.is_success());
    assert_eq!(outcome.report.fetched, 0);
}

#[test]
fn test_archive_without_manifest_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.codex.zip");
    let mut zip = zip::ZipWriter::new(fs::File::create(&path).unwrap());
    zip.start_file("content/x.txt", zip::write::FileOptions::default())
        .unwrap();
    std::io::Write::write_all(&mut zip, b"x").unwrap();
    zip.finish().unwrap();

    let engine = CodexEngine::builder().build().unwrap();
    assert!(matches!(
        engine.open(&path),
        Err(codex_cartridge::CodexError::SchemaViolation { .. })
    ));
}

#[test]
fn test_written_manifest_reopens() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("local.txt"), "text").unwrap();
    let input = dir.path().join("book.codex.json");
    write_manifest(
        &Manifest::new("Book", "Anon", "general").add_source(Source::new("s", "local.txt")),
        &input,
    )
    .unwrap();

    let engine = CodexEngine::builder().build().unwrap();
    let (manifest, base_dir) = engine.open(&input).unwrap();
    let dense = engine.hydrate(&manifest, &base_dir).unwrap().manifest;

    let output = sibling_output(&input, ".dense.codex.json");
    assert_eq!(output, dir.path().join("book.dense.codex.json"));
    write_manifest(&dense, &output).unwrap();

    let (reopened, _) = engine.open(&output).unwrap();
    assert_eq!(reopened, dense);
    assert_eq!(reopened.history.len(), 1);
}

fn write_config(dir: &Path, server: &Server, extra: &str) -> CodexConfig {
    let template = format!(
        "{}/texts/{{id}}",
        server.url("").to_string().trim_end_matches('/')
    );
    fs::write(
        dir.join("externs.json"),
        serde_json::json!({ "lib": { "template": template } }).to_string(),
    )
    .unwrap();

    let path = dir.join("codex.toml");
    fs::write(
        &path,
        format!(
            r#"
strict = false
workers = 2
externs = "externs.json"
{extra}

[cache]
dir = "cache"

[network]
timeout_secs = 5
"#
        ),
    )
    .unwrap();
    CodexConfig::load(&path).unwrap()
}

#[test]
fn test_engine_from_config() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/texts/a"))
            .times(1)
            .respond_with(status_code(200).body("alpha")),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/texts/b"))
            .times(1)
            .respond_with(status_code(500)),
    );

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server, "");
    assert_eq!(config.strictness(), Strictness::Permissive);
    assert_eq!(config.cache.dir.as_deref(), Some(dir.path().join("cache").as_path()));

    let engine = EngineBuilder::from_config(&config).unwrap().build().unwrap();
    let manifest = Manifest::new("Library", "Anon", "general")
        .add_source(Source::new("a", "lib://a"))
        .add_source(Source::new("b", "lib://b"));

    let outcome = engine.hydrate(&manifest, dir.path()).unwrap();
    assert_eq!(outcome.report.failed_sources(), vec!["b".to_string()]);
    assert_eq!(outcome.manifest.sources[0].content.as_deref(), Some("alpha"));

    // Successful fetches land in the disk cache under the locator key
    let cached = dir
        .path()
        .join("cache")
        .join(format!("{}.bin", ContentCache::key("lib://a")));
    assert_eq!(fs::read(cached).unwrap(), b"alpha");
    assert!(!dir
        .path()
        .join("cache")
        .join(format!("{}.bin", ContentCache::key("lib://b")))
        .exists());

    // A second engine on the same cache does not refetch `a`
    let again = EngineBuilder::from_config(&config).unwrap().build().unwrap();
    let reference = Manifest::new("Library", "Anon", "general").add_source(Source::new("a", "lib://a"));
    let outcome = again.verify(&reference, dir.path()).unwrap();
    assert!(outcome.report.is_success());
    assert_eq!(outcome.report.fetched, 0);
}

#[test]
fn test_config_disables_schema() {
    let server = Server::run();
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server, r#"schema = "none""#);

    // Missing `sources` is a structural error only when the schema is on
    let path = dir.path().join("bare.codex.json");
    fs::write(&path, r#"{"spec_version": "0.1.0", "meta": {"name": "Bare"}}"#).unwrap();

    let lenient = EngineBuilder::from_config(&config).unwrap().build().unwrap();
    let (manifest, _) = lenient.open(&path).unwrap();
    assert!(manifest.sources.is_empty());

    let strict = CodexEngine::builder().build().unwrap();
    assert!(strict.open(&path).is_err());
}
