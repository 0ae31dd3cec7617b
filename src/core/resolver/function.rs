//! Delegated function capability
//!
//! `func://name?key=value` locators are answered by an external capability
//! (typically a small function-calling model). The capability may be absent;
//! that is an explicit [`Invocation::Unavailable`] result, not an error that
//! callers have to catch.

use super::descriptor::FunctionDescriptor;
use super::transport::Transport;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One call to a delegated function
#[derive(Debug, Clone)]
pub struct FunctionCall<'a> {
    /// Name the locator used (`func://<name>`)
    pub name: &'a str,
    pub descriptor: &'a FunctionDescriptor,
    /// Parameters from the locator query string
    pub params: BTreeMap<String, String>,
}

/// Result of invoking a delegated function
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// The capability produced a value
    Completed(Value),
    /// No capability is configured or reachable
    Unavailable { reason: String },
    /// The capability ran and reported an error
    Failed { reason: String },
}

impl Invocation {
    /// Coerce a completed value to text
    ///
    /// Objects yield their `content` or `text` string when present, other
    /// values their JSON text. Plain strings are used verbatim.
    pub fn text(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("content")
                .or_else(|| map.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            other => other.to_string(),
        }
    }
}

/// Capability interface for delegated functions
pub trait FunctionInvoker: Send + Sync {
    fn invoke(&self, call: &FunctionCall<'_>) -> Invocation;
}

/// Invoker used when no capability is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableInvoker;

impl FunctionInvoker for UnavailableInvoker {
    fn invoke(&self, call: &FunctionCall<'_>) -> Invocation {
        Invocation::Unavailable {
            reason: format!(
                "no function capability configured for '{}' (set [functions_endpoint] in the config)",
                call.name
            ),
        }
    }
}

/// Invoker that POSTs `{model, name, params}` to an HTTP endpoint
pub struct EndpointInvoker {
    endpoint: String,
    transport: Arc<dyn Transport>,
}

impl EndpointInvoker {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        EndpointInvoker {
            endpoint: endpoint.into(),
            transport,
        }
    }
}

impl FunctionInvoker for EndpointInvoker {
    fn invoke(&self, call: &FunctionCall<'_>) -> Invocation {
        let body = json!({
            "model": call.descriptor.model,
            "name": call.descriptor.invocation_name().unwrap_or(call.name),
            "params": call.params,
        });
        debug!("Invoking function '{}' at {}", call.name, self.endpoint);

        match self.transport.post_json(&self.endpoint, &body) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => match value.get("error").and_then(Value::as_str) {
                    Some(error) => Invocation::Failed {
                        reason: error.to_string(),
                    },
                    None => Invocation::Completed(value),
                },
                Err(_) => Invocation::Completed(Value::String(
                    String::from_utf8_lossy(&bytes).into_owned(),
                )),
            },
            Err(e) => Invocation::Unavailable {
                reason: format!("function endpoint {} unreachable: {}", self.endpoint, e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    struct CannedTransport(&'static [u8]);

    impl Transport for CannedTransport {
        fn get(&self, _: &str, _: &BTreeMap<String, String>) -> Result<Vec<u8>, BoxError> {
            Err("GET not expected".into())
        }

        fn post_json(&self, _: &str, _: &Value) -> Result<Vec<u8>, BoxError> {
            Ok(self.0.to_vec())
        }
    }

    fn call(descriptor: &FunctionDescriptor) -> FunctionCall<'_> {
        FunctionCall {
            name: "summarize",
            descriptor,
            params: BTreeMap::new(),
        }
    }

    #[test]
    fn test_text_coercion() {
        assert_eq!(Invocation::text(&json!("plain")), "plain");
        assert_eq!(Invocation::text(&json!({"content": "a", "text": "b"})), "a");
        assert_eq!(Invocation::text(&json!({"text": "b"})), "b");
        assert_eq!(Invocation::text(&json!({"other": 1})), r#"{"other":1}"#);
        assert_eq!(Invocation::text(&json!(42)), "42");
    }

    #[test]
    fn test_unavailable_invoker() {
        let descriptor = FunctionDescriptor::new("tiny", "summarize_text");
        assert!(matches!(
            UnavailableInvoker.invoke(&call(&descriptor)),
            Invocation::Unavailable { .. }
        ));
    }

    #[test]
    fn test_endpoint_invoker_outcomes() {
        let descriptor = FunctionDescriptor::new("tiny", "summarize_text");

        let ok = EndpointInvoker::new("http://fn", Arc::new(CannedTransport(b"{\"text\": \"hi\"}")));
        assert_eq!(
            ok.invoke(&call(&descriptor)),
            Invocation::Completed(json!({"text": "hi"}))
        );

        let failed = EndpointInvoker::new("http://fn", Arc::new(CannedTransport(b"{\"error\": \"boom\"}")));
        assert!(matches!(failed.invoke(&call(&descriptor)), Invocation::Failed { .. }));

        let raw = EndpointInvoker::new("http://fn", Arc::new(CannedTransport(b"not json")));
        assert_eq!(
            raw.invoke(&call(&descriptor)),
            Invocation::Completed(json!("not json"))
        );
    }
}
