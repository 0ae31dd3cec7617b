//! Codex Cartridge CLI
//!
//! Create, validate, hydrate, dehydrate, verify and fetch cartridge
//! manifests.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use codex_cartridge::archive;
use codex_cartridge::config::{CacheConfig, CodexConfig, SchemaSource};
use codex_cartridge::manifest::{sibling_output, write_atomic, write_manifest, Manifest};
use codex_cartridge::remote::{PackageKind, Remotes};
use codex_cartridge::resolver::HttpTransport;
use codex_cartridge::{CodexEngine, EngineBuilder, RunReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "codex-cart")]
#[command(about = "Portable content cartridges: hydrate, dehydrate and verify manifests")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new reference-state manifest
    Init {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "Unknown")]
        author: String,
        #[arg(long, default_value = "general")]
        category: String,
        #[arg(long, default_value = "codex.json")]
        out: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check schema, descriptors, exclusions and inline hashes (no fetch)
    Validate {
        /// Manifest (.json) or packaged cartridge (.zip)
        file: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Embed source content (reference -> dense)
    Hydrate {
        file: PathBuf,
        /// Output path (json, or zip with --zip)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Package the dense cartridge as a .codex.zip archive
        #[arg(long)]
        zip: bool,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Strip inline content (dense -> reference)
    Dehydrate {
        file: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip JSON Schema validation
        #[arg(long)]
        no_schema: bool,
    },

    /// Fetch and check sources without embedding content
    Verify {
        file: PathBuf,
        /// Write the manifest with refreshed history to this path
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Download a published cartridge from a remote repo
    Fetch {
        /// Package name without extension
        name: String,
        /// Remote alias from the remotes document
        #[arg(long)]
        repo: String,
        /// Remotes document (alias -> base URL)
        #[arg(long)]
        remotes: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Fetch the .codex.zip archive instead of the manifest
        #[arg(long)]
        zip: bool,
    },
}

/// Flags shared by commands that resolve sources
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Warn instead of failing on drift and per-source errors
    #[arg(long)]
    relaxed: bool,
    /// Resolver descriptor document (scheme -> template)
    #[arg(long)]
    externs: Option<PathBuf>,
    /// Function descriptor document (name -> model/invocation)
    #[arg(long)]
    functions: Option<PathBuf>,
    /// Directory for cached fetches
    #[arg(long)]
    cache: Option<PathBuf>,
    /// Concurrent source resolution
    #[arg(long)]
    workers: Option<usize>,
    /// Skip JSON Schema validation
    #[arg(long)]
    no_schema: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut CodexConfig) {
        if self.relaxed {
            config.strict = false;
        }
        if let Some(externs) = &self.externs {
            config.externs = Some(externs.clone());
        }
        if let Some(functions) = &self.functions {
            config.functions = Some(functions.clone());
        }
        if let Some(dir) = &self.cache {
            config.cache = CacheConfig {
                dir: Some(dir.clone()),
                ..config.cache.clone()
            };
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.no_schema {
            config.schema = SchemaSource::None;
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CodexConfig> {
    match path {
        Some(path) => CodexConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(CodexConfig::default()),
    }
}

fn engine(config: &CodexConfig) -> Result<CodexEngine> {
    Ok(EngineBuilder::from_config(config)?.build()?)
}

/// Log a run report; true when the run succeeded
fn summarize(report: &RunReport) -> bool {
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    for failure in &report.failures {
        error!("{}", failure);
    }
    info!(
        "{} sources processed, {} fetched, {} failures, {} warnings",
        report.processed,
        report.fetched,
        report.failures.len(),
        report.warnings.len()
    );
    report.is_success()
}

fn run(cli: Cli) -> Result<bool> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Init {
            name,
            author,
            category,
            out,
            force,
        } => {
            if out.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", out.display());
            }
            let manifest = Manifest::new(name, author, category);
            write_manifest(&manifest, &out)?;
            Ok(true)
        }

        Command::Validate { file, run } => {
            run.apply(&mut config);
            let engine = engine(&config)?;
            let (manifest, _) = engine.open(&file)?;
            let report = engine.validate(&manifest)?;
            let ok = summarize(&report);
            if ok {
                info!("Manifest is valid");
            }
            Ok(ok)
        }

        Command::Hydrate {
            file,
            out,
            zip,
            run,
        } => {
            run.apply(&mut config);
            let engine = engine(&config)?;
            let (manifest, base_dir) = engine.open(&file)?;
            let outcome = engine.hydrate(&manifest, &base_dir)?;

            if zip {
                let out = out.unwrap_or_else(|| sibling_output(&file, ".codex.zip"));
                archive::write_archive(&outcome.manifest, &out)?;
            } else {
                let out = out.unwrap_or_else(|| sibling_output(&file, ".dense.codex.json"));
                write_manifest(&outcome.manifest, &out)?;
            }
            Ok(summarize(&outcome.report))
        }

        Command::Dehydrate {
            file,
            out,
            no_schema,
        } => {
            if no_schema {
                config.schema = SchemaSource::None;
            }
            let engine = engine(&config)?;
            let (manifest, _) = engine.open(&file)?;
            let outcome = engine.dehydrate(&manifest)?;

            let out = out.unwrap_or_else(|| sibling_output(&file, ".codex.json"));
            write_manifest(&outcome.manifest, &out)?;
            Ok(summarize(&outcome.report))
        }

        Command::Verify { file, out, run } => {
            run.apply(&mut config);
            let engine = engine(&config)?;
            let (manifest, base_dir) = engine.open(&file)?;
            let outcome = engine.verify(&manifest, &base_dir)?;

            if let Some(out) = out {
                write_manifest(&outcome.manifest, &out)?;
            }
            let ok = summarize(&outcome.report);
            if ok {
                info!("Verification passed");
            }
            Ok(ok)
        }

        Command::Fetch {
            name,
            repo,
            remotes,
            out,
            zip,
        } => {
            let Some(remotes_path) = remotes.or(config.remotes.clone()) else {
                bail!("no remotes document given (use --remotes or set `remotes` in the config)");
            };
            let remotes = Remotes::load(&remotes_path)
                .with_context(|| format!("failed to load remotes {}", remotes_path.display()))?;
            let transport =
                HttpTransport::with_options(config.network.timeout(), &config.network.user_agent)
                    .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))?;

            let kind = if zip {
                PackageKind::Archive
            } else {
                PackageKind::Manifest
            };
            let bytes = remotes.fetch(&transport, &repo, &name, kind)?;
            let out = out.unwrap_or_else(|| kind.file_name(&name));
            write_atomic(&out, &bytes)?;
            info!("Wrote {}", out.display());
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
