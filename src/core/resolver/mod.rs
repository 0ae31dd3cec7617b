//! Resolver registry
//!
//! Maps a locator to the bytes it names. Strategies are tried in a fixed
//! order and the first match wins:
//!
//! 1. `func://name?params` → delegated function (must be registered)
//! 2. scheme with a registered [`ResolverDescriptor`] → templated fetch
//! 3. `file://` or scheme-less locator → local file
//! 4. `http://` / `https://` → direct fetch, no extra headers
//!
//! Anything else, and any failing fetch, is `ResolutionFailed`.

pub mod descriptor;
pub mod function;
pub mod locator;
pub mod transport;

pub use descriptor::{
    load_descriptor_document, normalize_archive_id, DescriptorSet, FunctionDescriptor, IdStyle,
    ResolverDescriptor,
};
pub use function::{
    EndpointInvoker, FunctionCall, FunctionInvoker, Invocation, UnavailableInvoker,
};
pub use locator::{Locator, LocatorTarget, Locators};
pub use transport::{HttpTransport, Transport};

use crate::error::{CodexError, Result};
use crate::text;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Scheme reserved for delegated functions
pub const FUNCTION_SCHEME: &str = "func";

/// Resolution strategy chosen for a locator, before any I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Function {
        name: String,
        params: BTreeMap<String, String>,
    },
    External {
        url: String,
        headers: BTreeMap<String, String>,
        encoding: Option<String>,
    },
    Local(PathBuf),
    Network(String),
}

impl Plan {
    /// Encoding the fetched bytes should be decoded with, if overridden
    pub fn encoding_override(&self) -> Option<&str> {
        match self {
            Plan::External { encoding, .. } => encoding.as_deref(),
            _ => None,
        }
    }
}

/// Bytes obtained for one locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub encoding: Option<String>,
}

/// Locator → bytes resolution with injected collaborators
pub struct ResolverRegistry {
    descriptors: DescriptorSet,
    transport: Arc<dyn Transport>,
    invoker: Arc<dyn FunctionInvoker>,
}

impl ResolverRegistry {
    pub fn new(
        descriptors: DescriptorSet,
        transport: Arc<dyn Transport>,
        invoker: Arc<dyn FunctionInvoker>,
    ) -> Self {
        ResolverRegistry {
            descriptors,
            transport,
            invoker,
        }
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// Choose a strategy for `locator` without performing I/O
    pub fn plan(&self, locator: &Locator, base_dir: &Path) -> Result<Plan> {
        let url = match locator.target() {
            LocatorTarget::Path(path) => {
                let path = if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                };
                return Ok(Plan::Local(path));
            }
            LocatorTarget::Url(url) => url,
        };

        let scheme = url.scheme();
        if scheme == FUNCTION_SCHEME {
            let name = match url.host_str() {
                Some(host) if !host.is_empty() => host.to_string(),
                _ => url.path().trim_start_matches('/').to_string(),
            };
            if !self.descriptors.functions.contains_key(&name) {
                return Err(CodexError::UnknownFunction { name });
            }
            let params = url.query_pairs().into_owned().collect();
            return Ok(Plan::Function { name, params });
        }

        if let Some(descriptor) = self.descriptors.resolvers.get(scheme) {
            let raw_id = format!("{}{}", url.host_str().unwrap_or(""), url.path());
            let raw_id = raw_id.trim_start_matches('/');
            return Ok(Plan::External {
                url: descriptor.expand(scheme, raw_id),
                headers: descriptor.headers.clone(),
                encoding: descriptor.encoding.clone(),
            });
        }

        match scheme {
            "http" | "https" => Ok(Plan::Network(url.to_string())),
            other => Err(CodexError::resolution(
                locator.as_str(),
                format!("no resolver registered for scheme '{}'", other),
            )),
        }
    }

    /// Encoding a descriptor imposes on `locator`'s bytes, without I/O
    pub fn encoding_override(&self, locator: &Locator, base_dir: &Path) -> Option<String> {
        match self.plan(locator, base_dir).ok()? {
            Plan::Function { name, .. } => self.descriptors.functions.get(&name)?.encoding.clone(),
            plan => plan.encoding_override().map(str::to_string),
        }
    }

    /// Identity `locator` is cached under
    ///
    /// Local paths are keyed on the resolved file so the same relative
    /// locator under two base directories names two entries. Every other
    /// locator is keyed on its own string.
    pub fn cache_identity(&self, locator: &Locator, base_dir: &Path) -> String {
        match self.plan(locator, base_dir) {
            Ok(Plan::Local(path)) => {
                let path = std::fs::canonicalize(&path).unwrap_or(path);
                format!("file://{}", path.display())
            }
            _ => locator.as_str().to_string(),
        }
    }

    /// Resolve `locator` to bytes
    ///
    /// `encoding` is the source's declared encoding; it is used to turn a
    /// function result into bytes.
    pub fn resolve(&self, locator: &Locator, base_dir: &Path, encoding: &str) -> Result<Fetched> {
        let plan = self.plan(locator, base_dir)?;
        debug!("Resolving {} via {:?}", locator, plan);
        let failed = |cause: crate::error::BoxError| CodexError::resolution(locator.as_str(), cause);

        match plan {
            Plan::Function { name, params } => {
                let descriptor = self
                    .descriptors
                    .functions
                    .get(&name)
                    .ok_or_else(|| CodexError::UnknownFunction { name: name.clone() })?;
                let call = FunctionCall {
                    name: &name,
                    descriptor,
                    params,
                };
                match self.invoker.invoke(&call) {
                    Invocation::Completed(value) => {
                        let encoding = descriptor.encoding.as_deref().unwrap_or(encoding);
                        let bytes = text::encode(&Invocation::text(&value), encoding)?;
                        Ok(Fetched {
                            bytes,
                            encoding: descriptor.encoding.clone(),
                        })
                    }
                    Invocation::Unavailable { reason } => {
                        Err(failed(format!("function unavailable: {}", reason).into()))
                    }
                    Invocation::Failed { reason } => {
                        Err(failed(format!("function failed: {}", reason).into()))
                    }
                }
            }
            Plan::External {
                url,
                headers,
                encoding,
            } => {
                let bytes = self.transport.get(&url, &headers).map_err(failed)?;
                Ok(Fetched { bytes, encoding })
            }
            Plan::Local(path) => {
                let bytes = std::fs::read(&path).map_err(|e| failed(e.into()))?;
                Ok(Fetched {
                    bytes,
                    encoding: None,
                })
            }
            Plan::Network(url) => {
                let bytes = self.transport.get(&url, &BTreeMap::new()).map_err(failed)?;
                Ok(Fetched {
                    bytes,
                    encoding: None,
                })
            }
        }
    }
}
