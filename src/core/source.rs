//! Source record manager
//!
//! Obtains the content of one source and checks it against the recorded
//! baseline. Content comes from the inline `content` field when present,
//! otherwise from every locator in declared order (through the cache when
//! one is configured), joined with `\n`.
//!
//! Every call to [`SourceRecordManager::check`] or
//! [`SourceRecordManager::record_failure`] appends exactly one entry to the
//! source's modification history.

use crate::audit::{EntryStatus, ModificationEntry, ModificationStatus};
use crate::cache::{CacheSource, ContentCache};
use crate::digest::Fingerprint;
use crate::error::{CodexError, Result};
use crate::manifest::Source;
use crate::resolver::ResolverRegistry;
use crate::text;
use crate::validation::Strictness;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Separator placed between the content of consecutive locators
pub const LOCATOR_SEPARATOR: &[u8] = b"\n";

/// How a source without a recorded digest is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaselinePolicy {
    /// The first observation becomes the baseline, without a drift flag
    #[default]
    AdoptFirst,
    /// A source must declare `hash` or `expected_digest`
    RequireDeclared,
}

/// Where resolved content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Inline,
    Locators,
}

/// Content obtained for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Bytes that were fingerprinted
    pub bytes: Vec<u8>,
    /// Decoded text
    pub text: String,
    /// Encoding used to decode `bytes`
    pub encoding: String,
    pub origin: Origin,
    /// Locators that reached the resolver (cache misses)
    pub fetched: usize,
}

/// Outcome of one integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub fingerprint: Fingerprint,
    pub status: ModificationStatus,
    /// Human-readable mismatch descriptions; empty when clean
    pub issues: Vec<String>,
}

impl CheckOutcome {
    pub fn is_clean(&self) -> bool {
        self.status == ModificationStatus::Clean
    }
}

/// A single expected-vs-observed mismatch
struct Mismatch {
    field: &'static str,
    expected: String,
    observed: String,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} mismatch (expected {}, observed {})",
            self.field, self.expected, self.observed
        )
    }
}

/// Resolves and checks source records
pub struct SourceRecordManager {
    registry: Arc<ResolverRegistry>,
    cache: Option<Arc<ContentCache>>,
    strictness: Strictness,
    baseline: BaselinePolicy,
}

impl SourceRecordManager {
    pub fn new(registry: Arc<ResolverRegistry>, strictness: Strictness) -> Self {
        SourceRecordManager {
            registry,
            cache: None,
            strictness,
            baseline: BaselinePolicy::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_baseline(mut self, baseline: BaselinePolicy) -> Self {
        self.baseline = baseline;
        self
    }

    /// Same manager with a different strictness
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Obtain the content of `source`
    ///
    /// Inline content wins and never triggers a fetch.
    pub fn resolve(&self, source: &Source, base_dir: &Path) -> Result<Resolved> {
        if let Some(content) = &source.content {
            return Ok(Resolved {
                bytes: text::encode(content, source.encoding())?,
                text: content.clone(),
                encoding: source.encoding().to_string(),
                origin: Origin::Inline,
                fetched: 0,
            });
        }
        self.fetch(source, base_dir)
    }

    /// Resolve every locator of `source`, ignoring inline content
    pub fn fetch(&self, source: &Source, base_dir: &Path) -> Result<Resolved> {
        let mut encoding = source.encoding().to_string();
        let mut bytes = Vec::new();
        let mut fetched = 0;

        for (index, locator) in source.uri.iter().enumerate() {
            let (chunk, override_encoding) = match &self.cache {
                Some(cache) => {
                    let identity = self.registry.cache_identity(locator, base_dir);
                    let (chunk, served) = cache.get_or_fetch(&identity, || {
                        Ok(self.registry.resolve(locator, base_dir, &encoding)?.bytes)
                    })?;
                    if served == CacheSource::Fetched {
                        fetched += 1;
                    } else {
                        debug!("Cache hit for {}", locator);
                    }
                    (chunk, self.registry.encoding_override(locator, base_dir))
                }
                None => {
                    let fetched_chunk = self.registry.resolve(locator, base_dir, &encoding)?;
                    fetched += 1;
                    (fetched_chunk.bytes, fetched_chunk.encoding)
                }
            };

            if let Some(override_encoding) = override_encoding {
                encoding = override_encoding;
            }
            if index > 0 {
                bytes.extend_from_slice(LOCATOR_SEPARATOR);
            }
            bytes.extend_from_slice(&chunk);
        }

        let text = text::decode_lossy(&bytes, &encoding)?;
        Ok(Resolved {
            bytes,
            text,
            encoding,
            origin: Origin::Locators,
            fetched,
        })
    }

    /// Compare observed content with the recorded baseline
    ///
    /// Updates `modification_status`, appends one history entry and fills a
    /// missing `hash`/`size_bytes` when the baseline policy allows it.
    /// Recorded values are never overwritten. In strict mode a mismatch is
    /// returned as an error after the record has been updated.
    pub fn check(&self, source: &mut Source, bytes: &[u8]) -> Result<CheckOutcome> {
        let fingerprint = Fingerprint::of(bytes);
        let mut mismatches = Vec::new();

        if let Some(hash) = &source.hash {
            if *hash != fingerprint.digest {
                mismatches.push(Mismatch {
                    field: "hash",
                    expected: hash.clone(),
                    observed: fingerprint.digest.clone(),
                });
            }
        }
        if let Some(expected) = &source.expected_digest {
            if *expected != fingerprint.digest {
                mismatches.push(Mismatch {
                    field: "expected_digest",
                    expected: expected.clone(),
                    observed: fingerprint.digest.clone(),
                });
            }
        }
        if let Some(size) = source.size_bytes {
            if size != fingerprint.size {
                mismatches.push(Mismatch {
                    field: "size",
                    expected: format!("{} bytes", size),
                    observed: format!("{} bytes", fingerprint.size),
                });
            }
        }

        let undeclared = source.hash.is_none() && source.expected_digest.is_none();
        let missing_baseline = undeclared && self.baseline == BaselinePolicy::RequireDeclared;

        let mut issues: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
        if missing_baseline {
            issues.push("no declared baseline digest".to_string());
        }
        let status = if issues.is_empty() {
            ModificationStatus::Clean
        } else {
            ModificationStatus::Drifted
        };

        let mut entry = ModificationEntry::now(status.into());
        entry.observed_digest = Some(fingerprint.digest.clone());
        entry.observed_size = Some(fingerprint.size);
        entry.expected_hash = source.hash.clone();
        entry.expected_size = source.size_bytes;
        entry.expected_digest = source.expected_digest.clone();
        if !issues.is_empty() {
            entry = entry.with_notes(issues.join("; "));
        }
        source.modification_history.push(entry);
        source.modification_status = status;

        let seed = match self.baseline {
            BaselinePolicy::AdoptFirst => true,
            BaselinePolicy::RequireDeclared => status == ModificationStatus::Clean,
        };
        if seed {
            if source.hash.is_none() {
                debug!("Adopting {} as baseline for {}", fingerprint.digest, source.id);
                source.hash = Some(fingerprint.digest.clone());
            }
            if source.size_bytes.is_none() {
                source.size_bytes = Some(fingerprint.size);
            }
        }

        if status == ModificationStatus::Drifted {
            if self.strictness.is_strict() {
                return Err(match mismatches.into_iter().next() {
                    Some(first) => CodexError::IntegrityMismatch {
                        source_id: source.id.clone(),
                        expected: first.expected,
                        observed: first.observed,
                    },
                    None => CodexError::MissingBaseline {
                        source_id: source.id.clone(),
                        observed: fingerprint.digest,
                    },
                });
            }
            for issue in &issues {
                warn!("Source {}: {}", source.id, issue);
            }
        }

        Ok(CheckOutcome {
            fingerprint,
            status,
            issues,
        })
    }

    /// Record a resolution failure in the source's history
    ///
    /// The modification status is left as it was: nothing was compared.
    pub fn record_failure(&self, source: &mut Source, error: &CodexError) {
        let mut entry = ModificationEntry::now(EntryStatus::Failed).with_notes(error.to_string());
        entry.expected_hash = source.hash.clone();
        entry.expected_size = source.size_bytes;
        entry.expected_digest = source.expected_digest.clone();
        source.modification_history.push(entry);
    }
}
