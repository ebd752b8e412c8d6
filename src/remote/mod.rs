//! The remote collaborator: a JSON REST API.

use crate::error::Result;
use serde_json::Value;
use std::fmt;
use std::future::Future;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpApi;

/// Write verbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Patch => write!(f, "PATCH"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// Trait for the server the sync layer reads from and writes to.
///
/// Paths are relative to the API root (`/products`, `/shops/s1`). Bodies are
/// raw JSON; normalization happens in the caller.
///
/// **ERRORS:** any non-2xx response must come back as `Err`, classified with
/// [`Error::from_status`](crate::Error::from_status). Requests that never got
/// a response are `Error::Network`.
///
/// **SHARING:** one instance serves every client, so methods take `&self`.
pub trait RemoteApi: Send + Sync + 'static {
    /// `GET path?query`.
    fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> impl Future<Output = Result<Value>> + Send;

    /// Write request with an optional JSON body. An empty response body is
    /// `Value::Null`.
    fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> impl Future<Output = Result<Value>> + Send;
}
