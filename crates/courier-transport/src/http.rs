//! JSON-over-HTTP client shared by the HTTP channel adapters.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use courier_core::{TransportError, TransportResult};

/// Longest error body kept in a [`TransportError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// HTTP client bound to a base URL.
///
/// Paths that already start with `http://` or `https://` bypass the base URL,
/// which lets one client talk to a token endpoint and an API host.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a client with a request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves a path against the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Starts a GET request.
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    /// Starts a POST request.
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    /// GETs a path and decodes the JSON response.
    pub async fn get_json(&self, path: &str, bearer: Option<&str>) -> TransportResult<Value> {
        let mut req = self.get(path);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        self.execute(req).await
    }

    /// POSTs a JSON body and decodes the JSON response.
    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> TransportResult<Value> {
        let mut req = self.post(path).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        self.execute(req).await
    }

    /// POSTs an `application/x-www-form-urlencoded` body.
    pub async fn post_form(&self, path: &str, fields: &[(&str, &str)]) -> TransportResult<Value> {
        let req = self
            .post(path)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(encode_form(fields));
        self.execute(req).await
    }

    /// Sends a prepared request and maps failures to [`TransportError`].
    ///
    /// An empty body decodes to `Null`, a non-JSON body to a JSON string.
    pub async fn execute(&self, req: RequestBuilder) -> TransportResult<Value> {
        let resp = req.send().await.map_err(map_reqwest_error)?;
        decode_response(resp).await
    }
}

/// Encodes key/value pairs as a form body.
pub fn encode_form(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

async fn decode_response(resp: Response) -> TransportResult<Value> {
    let status = resp.status();
    let url = resp.url().to_string();
    let text = resp.text().await.map_err(map_reqwest_error)?;

    if !status.is_success() {
        let mut body = text;
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        debug!(url = %url, status = status.as_u16(), "HTTP request failed");
        return Err(TransportError::Http {
            status: status.as_u16(),
            body,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::ConnectionFailed {
            target: err.url().map(|u| u.to_string()).unwrap_or_default(),
            reason: err.to_string(),
        }
    } else {
        TransportError::SendFailed(err.to_string())
    }
}
