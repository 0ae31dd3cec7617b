//! Manifest state machine
//!
//! Drives whole-manifest operations:
//! - **validate**: structural check, descriptor check, inline content check
//! - **hydrate**: reference → dense, fetching every source without content
//! - **dehydrate**: dense → reference, always permissive
//! - **verify**: fetch and compare without embedding content
//!
//! Every operation runs the structural validator first and works on a copy
//! of the manifest. The caller receives the updated copy only when the run
//! completes, so an aborted run never leaves a half-updated document.
//!
//! # Failure isolation
//!
//! In permissive mode a failing source is recorded (history entry, report
//! failure) and processing continues. In strict mode the first failure or
//! drift aborts the operation with that error.

use crate::audit::{Action, HistoryEvent};
use crate::cache::ContentCache;
use crate::config::{CodexConfig, SchemaSource};
use crate::error::{CodexError, Result};
use crate::manifest::{Document, Manifest, Source};
use crate::resolver::{
    load_descriptor_document, DescriptorSet, EndpointInvoker, FunctionInvoker, HttpTransport,
    ResolverRegistry, Transport, UnavailableInvoker,
};
use crate::schema::StructuralValidator;
use crate::source::{BaselinePolicy, Origin, Resolved, SourceRecordManager};
use crate::validation::{validate_exclusions, Strictness};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Problem attributed to a source (or to the manifest when `source_id` is
/// `None`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub source_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_id {
            Some(id) => write!(f, "[{}] {}", id, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Summary of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub action: Option<Action>,
    /// Sources examined
    pub processed: usize,
    /// Locators that reached the resolver
    pub fetched: usize,
    /// Failures make the run unsuccessful
    pub failures: Vec<Issue>,
    /// Drift in permissive mode
    pub warnings: Vec<Issue>,
}

impl RunReport {
    fn new(action: Option<Action>) -> Self {
        RunReport {
            action,
            processed: 0,
            fetched: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids of sources with at least one failure, in first-failure order
    pub fn failed_sources(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.failures.iter().filter_map(|f| f.source_id.as_ref()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    fn fail(&mut self, source_id: Option<&str>, message: impl Into<String>) {
        self.failures.push(Issue {
            source_id: source_id.map(str::to_string),
            message: message.into(),
        });
    }

    fn warn(&mut self, source_id: &str, message: impl Into<String>) {
        self.warnings.push(Issue {
            source_id: Some(source_id.to_string()),
            message: message.into(),
        });
    }
}

/// Updated manifest plus the report of the run that produced it
#[derive(Debug, Clone)]
pub struct Outcome {
    pub manifest: Manifest,
    pub report: RunReport,
}

/// Builder for [`CodexEngine`]
pub struct EngineBuilder {
    strictness: Strictness,
    baseline: BaselinePolicy,
    workers: usize,
    schema: Option<StructuralValidator>,
    cache: Option<Arc<ContentCache>>,
    transport: Option<Arc<dyn Transport>>,
    invoker: Option<Arc<dyn FunctionInvoker>>,
    externs: BTreeMap<String, Value>,
    functions: BTreeMap<String, Value>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder {
            strictness: Strictness::Strict,
            baseline: BaselinePolicy::AdoptFirst,
            workers: 1,
            schema: None,
            cache: None,
            transport: None,
            invoker: None,
            externs: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }

    /// Builder preconfigured from a [`CodexConfig`]
    ///
    /// Loads descriptor documents, opens the disk cache and builds the HTTP
    /// transport with the configured timeout.
    pub fn from_config(config: &CodexConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(
            HttpTransport::with_options(config.network.timeout(), &config.network.user_agent)
                .map_err(CodexError::Transport)?,
        );
        let schema = match &config.schema {
            SchemaSource::Builtin => StructuralValidator::builtin()?,
            SchemaSource::None => StructuralValidator::disabled(),
            SchemaSource::Path(path) => StructuralValidator::from_path(path)?,
        };

        let mut builder = EngineBuilder::new()
            .strictness(config.strictness())
            .baseline(config.baseline)
            .workers(config.workers)
            .schema(schema)
            .transport(Arc::clone(&transport));

        if let Some(endpoint) = &config.functions_endpoint {
            builder = builder.invoker(Arc::new(EndpointInvoker::new(&endpoint.url, transport)));
        }
        if let Some(dir) = &config.cache.dir {
            builder = builder.cache(Arc::new(ContentCache::on_disk(
                dir,
                config.cache.memory_entries,
            )?));
        }
        if let Some(path) = &config.externs {
            builder = builder.externs(load_descriptor_document(path)?);
        }
        if let Some(path) = &config.functions {
            builder = builder.functions(load_descriptor_document(path)?);
        }
        Ok(builder)
    }

    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn baseline(mut self, baseline: BaselinePolicy) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn schema(mut self, schema: StructuralValidator) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// External resolver descriptors; they win over the manifest's own
    pub fn externs(mut self, externs: BTreeMap<String, Value>) -> Self {
        self.externs.extend(externs);
        self
    }

    /// External function descriptors; they win over the manifest's own
    pub fn functions(mut self, functions: BTreeMap<String, Value>) -> Self {
        self.functions.extend(functions);
        self
    }

    pub fn build(self) -> Result<CodexEngine> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new().map_err(CodexError::Transport)?),
        };
        let schema = match self.schema {
            Some(schema) => schema,
            None => StructuralValidator::builtin()?,
        };
        Ok(CodexEngine {
            strictness: self.strictness,
            baseline: self.baseline,
            workers: self.workers,
            schema,
            cache: self.cache,
            transport,
            invoker: self.invoker.unwrap_or_else(|| Arc::new(UnavailableInvoker)),
            externs: self.externs,
            functions: self.functions,
        })
    }
}

/// Runs manifest operations with a fixed set of collaborators
pub struct CodexEngine {
    strictness: Strictness,
    baseline: BaselinePolicy,
    workers: usize,
    schema: StructuralValidator,
    cache: Option<Arc<ContentCache>>,
    transport: Arc<dyn Transport>,
    invoker: Arc<dyn FunctionInvoker>,
    externs: BTreeMap<String, Value>,
    functions: BTreeMap<String, Value>,
}

impl CodexEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Read and structurally check a manifest or archive
    ///
    /// Returns the manifest and the directory its relative locators resolve
    /// against.
    pub fn open(&self, path: &Path) -> Result<(Manifest, PathBuf)> {
        let document = Document::read(path)?;
        self.schema.check(&document.value)?;
        let manifest = Manifest::from_value(document.value)?;
        Ok((manifest, document.base_dir))
    }

    fn preflight(&self, manifest: &Manifest) -> Result<()> {
        self.schema.check(&manifest.to_value()?)
    }

    /// Descriptors for one manifest: embedded first, external on top
    fn descriptors(&self, manifest: &Manifest, report: &mut RunReport) -> Result<DescriptorSet> {
        let mut externs = manifest.extensions.externs.clone();
        externs.extend(self.externs.clone());
        let mut functions = manifest.extensions.functions.clone();
        functions.extend(self.functions.clone());

        let (descriptors, problems) = DescriptorSet::from_raw(&externs, &functions, self.strictness)?;
        for problem in problems {
            report.fail(None, problem.to_string());
        }
        debug!(
            "Using {} resolver and {} function descriptors",
            descriptors.resolvers.len(),
            descriptors.functions.len()
        );
        Ok(descriptors)
    }

    fn manager(&self, descriptors: DescriptorSet, strictness: Strictness) -> SourceRecordManager {
        let registry = ResolverRegistry::new(
            descriptors,
            Arc::clone(&self.transport),
            Arc::clone(&self.invoker),
        );
        let manager = SourceRecordManager::new(Arc::new(registry), strictness).with_baseline(self.baseline);
        match &self.cache {
            Some(cache) => manager.with_cache(Arc::clone(cache)),
            None => manager,
        }
    }

    /// Handle a per-source error: abort in strict mode, record otherwise
    fn isolate(
        &self,
        manager: &SourceRecordManager,
        source: &mut Source,
        err: CodexError,
        report: &mut RunReport,
    ) -> Result<()> {
        if manager.strictness().is_strict() || !err.is_per_source() {
            return Err(err);
        }
        error!("Source {}: {}", source.id, err);
        manager.record_failure(source, &err);
        report.fail(Some(&source.id), err.to_string());
        Ok(())
    }

    /// Report exclusion violations and record each one in the source's history
    fn check_exclusions(
        &self,
        manager: &SourceRecordManager,
        source: &mut Source,
        report: &mut RunReport,
    ) -> Result<()> {
        for violation in validate_exclusions(&source.id, &source.curation.exclusions, self.strictness)? {
            manager.record_failure(source, &violation);
            report.fail(Some(&source.id), violation.to_string());
        }
        Ok(())
    }

    /// Resolve sources without inline content on the worker pool
    ///
    /// Returns one slot per source; slots left empty are resolved inline by
    /// the caller. Nothing is fetched when `workers` is 1.
    fn prefetch(
        &self,
        sources: &[Source],
        manager: &SourceRecordManager,
        base_dir: &Path,
    ) -> Vec<Option<Result<Resolved>>> {
        let mut slots: Vec<Option<Result<Resolved>>> = sources.iter().map(|_| None).collect();
        let pending: Vec<usize> = (0..sources.len())
            .filter(|&i| !sources[i].has_content())
            .collect();
        if self.workers <= 1 || pending.len() < 2 {
            return slots;
        }

        let workers = self.workers.min(pending.len());
        debug!("Resolving {} sources on {} workers", pending.len(), workers);

        let (task_tx, task_rx) = crossbeam::channel::unbounded::<usize>();
        let (done_tx, done_rx) = crossbeam::channel::unbounded();
        for index in pending {
            if task_tx.send(index).is_err() {
                break;
            }
        }
        drop(task_tx);

        let joined = crossbeam::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move |_| {
                    for index in task_rx.iter() {
                        let result = manager.fetch(&sources[index], base_dir);
                        if done_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(done_tx);
        if joined.is_err() {
            warn!("A resolver worker panicked; remaining sources resolve sequentially");
        }

        for (index, result) in done_rx.try_iter() {
            slots[index] = Some(result);
        }
        slots
    }

    /// Check structure, descriptors, exclusions and inline content
    ///
    /// Performs no fetch. The manifest is not modified.
    pub fn validate(&self, manifest: &Manifest) -> Result<RunReport> {
        info!("Validating cartridge '{}'", manifest.meta.name);
        self.preflight(manifest)?;

        let mut report = RunReport::new(None);
        let descriptors = self.descriptors(manifest, &mut report)?;
        let manager = self.manager(descriptors, self.strictness);

        let mut scratch = manifest.clone();
        for source in scratch.sources.iter_mut() {
            report.processed += 1;
            self.check_exclusions(&manager, source, &mut report)?;

            let bytes = match source.content_bytes() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    self.isolate(&manager, source, e, &mut report)?;
                    continue;
                }
            };
            let outcome = manager.check(source, &bytes)?;
            if !outcome.is_clean() {
                report.warn(&source.id, outcome.issues.join("; "));
            }
        }

        info!(
            "Validation finished: {} sources, {} failures, {} warnings",
            report.processed,
            report.failures.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Embed the content of every source
    pub fn hydrate(&self, manifest: &Manifest, base_dir: &Path) -> Result<Outcome> {
        info!("Hydrating cartridge '{}'", manifest.meta.name);
        self.run(manifest, base_dir, Action::Hydrate)
    }

    /// Fetch and compare every source without embedding content
    pub fn verify(&self, manifest: &Manifest, base_dir: &Path) -> Result<Outcome> {
        info!("Verifying cartridge '{}'", manifest.meta.name);
        self.run(manifest, base_dir, Action::Verify)
    }

    fn run(&self, manifest: &Manifest, base_dir: &Path, action: Action) -> Result<Outcome> {
        self.preflight(manifest)?;

        let mut working = manifest.clone();
        let mut report = RunReport::new(Some(action));
        let descriptors = self.descriptors(&working, &mut report)?;
        let manager = self.manager(descriptors, self.strictness);
        let mut prefetched = self.prefetch(&working.sources, &manager, base_dir);

        for (index, source) in working.sources.iter_mut().enumerate() {
            report.processed += 1;
            self.check_exclusions(&manager, source, &mut report)?;

            let resolved = prefetched[index]
                .take()
                .unwrap_or_else(|| manager.resolve(source, base_dir));
            let resolved = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.isolate(&manager, source, e, &mut report)?;
                    continue;
                }
            };
            report.fetched += resolved.fetched;

            let outcome = manager.check(source, &resolved.bytes)?;
            if !outcome.is_clean() {
                report.warn(&source.id, outcome.issues.join("; "));
            }

            if action == Action::Hydrate && resolved.origin == Origin::Locators {
                // Keep inline text re-encodable to the bytes that were hashed
                if resolved.encoding != source.encoding() {
                    source.encoding = Some(resolved.encoding);
                }
                source.content = Some(resolved.text);
            }
        }

        working.reconcile_state();
        working
            .history
            .push(HistoryEvent::new(action, report.failed_sources()));

        info!(
            "{} finished: {} sources, {} fetched, {} failures, {} warnings",
            action,
            report.processed,
            report.fetched,
            report.failures.len(),
            report.warnings.len()
        );
        Ok(Outcome {
            manifest: working,
            report,
        })
    }

    /// Strip inline content, recording a final fingerprint for each source
    ///
    /// Drift is reported as a warning whatever the engine's strictness.
    pub fn dehydrate(&self, manifest: &Manifest) -> Result<Outcome> {
        info!("Dehydrating cartridge '{}'", manifest.meta.name);
        self.preflight(manifest)?;

        let mut working = manifest.clone();
        let mut report = RunReport::new(Some(Action::Dehydrate));
        let manager = self.manager(DescriptorSet::new(), Strictness::Permissive);

        for source in working.sources.iter_mut() {
            let bytes = match source.content_bytes() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    // Content stays inline so nothing is lost
                    self.isolate(&manager, source, e, &mut report)?;
                    continue;
                }
            };
            report.processed += 1;

            let outcome = manager.check(source, &bytes)?;
            if !outcome.is_clean() {
                report.warn(&source.id, outcome.issues.join("; "));
            }
            source.content = None;
        }

        working.reconcile_state();
        working
            .history
            .push(HistoryEvent::new(Action::Dehydrate, report.failed_sources()));

        info!(
            "Dehydrate finished: {} sources stripped, {} warnings",
            report.processed,
            report.warnings.len()
        );
        Ok(Outcome {
            manifest: working,
            report,
        })
    }
}
