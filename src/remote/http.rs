//! `RemoteApi` over HTTP using reqwest.
//!
//! The client keeps a cookie store so the session cookie set by the OTP
//! verification endpoint rides along on later requests.

use super::{Method, RemoteApi};
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// HTTP implementation of [`RemoteApi`].
#[derive(Clone, Debug)]
pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the URL is invalid or the client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::ConfigError(format!("invalid API URL {}: {}", base_url, e)))?;
        // Without a trailing slash `join` would replace the last segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        info!("HTTP API ready at {}", base);
        Ok(HttpApi { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::ConfigError(format!("invalid path {}: {}", path, e)))
    }
}

impl RemoteApi for HttpApi {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let url = self.url(path)?;
        debug!("» GET {} {:?}", url, query);
        let response = self.client.get(url).query(query).send().await?;
        read_body(response).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.url(path)?;
        debug!("» {} {}", method, url);

        let request = match method {
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        };
        let request = match body {
            Some(body) => request.json(&body),
            None => request,
        };

        read_body(request.send().await?).await
    }
}

async fn read_body(response: Response) -> Result<Value> {
    let status = response.status();
    let bytes = response.bytes().await?;

    let body = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else if status.is_success() {
        serde_json::from_slice(&bytes)?
    } else {
        // Error pages are not always JSON; classify by status either way.
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    if status.is_success() {
        Ok(body)
    } else {
        let error = Error::from_status(status.as_u16(), &body);
        debug!("✗ {} -> {}", status, error);
        Err(error)
    }
}
