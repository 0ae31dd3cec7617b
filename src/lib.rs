//! # Codex Cartridge - Portable Content Cartridges
//!
//! `codex-cartridge` manages cartridge manifests: documents that describe one
//! or more textual sources plus derived metadata. A cartridge moves between
//! two interchangeable states:
//!
//! - **reference**: sources are locators only (local paths, URLs, templated
//!   archive identifiers, delegated function calls)
//! - **dense**: content is embedded inline and integrity-checked
//!
//! Every transition fingerprints content (`sha256:<hex>` + byte size),
//! compares it with the recorded baseline and appends to the source's
//! modification history, so drift in upstream content is never silent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codex_cartridge::{CodexEngine, Manifest, Result, Source};
//! use std::path::Path;
//!
//! # fn main() -> Result<()> {
//! let manifest = Manifest::new("Meditations", "Marcus Aurelius", "philosophy")
//!     .add_source(Source::new("book-1", "meditations.txt"));
//!
//! let engine = CodexEngine::builder().build()?;
//!
//! // Reference -> dense
//! let hydrated = engine.hydrate(&manifest, Path::new("library"))?;
//! assert!(hydrated.report.is_success());
//!
//! // Dense -> reference
//! let reference = engine.dehydrate(&hydrated.manifest)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! Network access and delegated functions are injected, never global:
//!
//! ```rust,no_run
//! use codex_cartridge::resolver::{HttpTransport, UnavailableInvoker};
//! use codex_cartridge::{CodexEngine, ContentCache, Strictness};
//! use std::sync::Arc;
//!
//! # fn main() -> codex_cartridge::Result<()> {
//! let engine = CodexEngine::builder()
//!     .strictness(Strictness::Permissive)
//!     .transport(Arc::new(HttpTransport::new().expect("tls backend")))
//!     .invoker(Arc::new(UnavailableInvoker))
//!     .cache(Arc::new(ContentCache::on_disk(".codex-cache", 64)?))
//!     .workers(4)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Module paths re-exported at the crate root
pub use crate::core::{
    archive, audit, cache, config, digest, engine, error, manifest, remote, resolver, schema,
    source, text, validation,
};

// Re-export the types most callers need
pub use crate::core::{
    audit::{Action, HistoryEvent, ModificationEntry, ModificationStatus},
    cache::ContentCache,
    config::CodexConfig,
    digest::Fingerprint,
    engine::{CodexEngine, EngineBuilder, Issue, Outcome, RunReport},
    error::{CodexError, Result},
    manifest::{CartridgeState, Manifest, Source, SPEC_VERSION},
    source::BaselinePolicy,
    validation::{ExclusionRange, Strictness},
};

/// Tool identity written into history events and new manifests
pub const TOOL_ID: &str = concat!("codex-cart ", env!("CARGO_PKG_VERSION"));
