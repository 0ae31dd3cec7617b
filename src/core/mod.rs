//! Cartridge implementation modules
//!
//! - [`digest`] - content fingerprints (`sha256:<hex>` + size)
//! - [`validation`] - exclusion range checks and merging
//! - [`resolver`] - locator → bytes strategies and their collaborators
//! - [`cache`] - shared content cache keyed by locator
//! - [`source`] - per-source resolution and integrity checks
//! - [`engine`] - hydrate / dehydrate / verify / validate
//! - [`schema`] - structural validation of manifest documents
//! - [`manifest`], [`audit`] - document model and history records
//! - [`archive`] - packaged `.zip` cartridges
//! - [`remote`] - fetching published cartridges
//! - [`config`] - TOML run configuration

pub mod archive;
pub mod audit;
pub mod cache;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod remote;
pub mod resolver;
pub mod schema;
pub mod source;
pub mod text;
pub mod validation;

pub use cache::ContentCache;
pub use digest::Fingerprint;
pub use engine::{CodexEngine, EngineBuilder, Outcome, RunReport};
pub use error::{CodexError, Result};
pub use manifest::{CartridgeState, Manifest, Source};
pub use source::{BaselinePolicy, SourceRecordManager};
pub use validation::Strictness;
