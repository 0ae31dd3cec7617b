//! Network transport collaborator
//!
//! The resolver never talks to the network directly. It is handed a
//! [`Transport`] at construction so tests can substitute an in-memory fake.
//! Timeouts belong to the transport; there is no retry at this layer.

use crate::error::BoxError;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `User-Agent` header
pub const USER_AGENT: &str = concat!("codex-cart/", env!("CARGO_PKG_VERSION"));

/// Byte transport used for every network fetch
pub trait Transport: Send + Sync {
    /// GET `url` with the given extra headers, returning the response body
    fn get(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<Vec<u8>, BoxError>;

    /// POST a JSON body to `url`, returning the response body
    fn post_json(&self, url: &str, body: &Value) -> Result<Vec<u8>, BoxError>;
}

/// Blocking HTTP transport backed by `reqwest`
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport with the default timeout and user agent
    pub fn new() -> Result<Self, BoxError> {
        Self::with_options(DEFAULT_TIMEOUT, USER_AGENT)
    }

    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self, BoxError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(HttpTransport { client })
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, BoxError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }
    Ok(map)
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<Vec<u8>, BoxError> {
        debug!("GET {} ({} extra headers)", url, headers.len());
        let response = self
            .client
            .get(url)
            .headers(header_map(headers)?)
            .send()?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }

    fn post_json(&self, url: &str, body: &Value) -> Result<Vec<u8>, BoxError> {
        debug!("POST {}", url);
        let response = self.client.post(url).json(body).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    #[test]
    fn test_get_sends_headers() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/files/1342.txt"),
                request::headers(contains(("x-archive-token", "abc"))),
            ])
            .respond_with(status_code(200).body("It is a truth universally acknowledged")),
        );

        let transport = HttpTransport::new().unwrap();
        let mut headers = BTreeMap::new();
        headers.insert("X-Archive-Token".to_string(), "abc".to_string());
        let body = transport
            .get(&server.url("/files/1342.txt").to_string(), &headers)
            .unwrap();
        assert_eq!(body, b"It is a truth universally acknowledged");
    }

    #[test]
    fn test_get_error_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/missing"))
                .respond_with(status_code(404)),
        );

        let transport = HttpTransport::new().unwrap();
        let result = transport.get(&server.url("/missing").to_string(), &BTreeMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_post_json() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/invoke"),
                request::body(json_decoded(eq(json!({"name": "f"})))),
            ])
            .respond_with(json_encoded(json!({"content": "ok"}))),
        );

        let transport = HttpTransport::new().unwrap();
        let body = transport
            .post_json(&server.url("/invoke").to_string(), &json!({"name": "f"}))
            .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["content"], "ok");
    }
}
