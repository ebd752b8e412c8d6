//! Scripted `RemoteApi` for integration tests.

#![allow(dead_code)]

use resource_sync::remote::{Method, RemoteApi};
use resource_sync::{Error, Result};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

/// One request seen by the fake server.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// `None` for GET
    pub method: Option<Method>,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn is_get(&self, path: &str) -> bool {
        self.method.is_none() && self.path == path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn page(&self) -> u32 {
        self.param("page").and_then(|p| p.parse().ok()).unwrap_or(1)
    }
}

/// What the fake server answers, and after how long.
pub struct Reply {
    pub delay: Duration,
    pub result: Result<Value>,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply {
            delay: Duration::ZERO,
            result: Ok(body),
        }
    }

    pub fn status(code: u16, body: Value) -> Self {
        Reply {
            delay: Duration::ZERO,
            result: Err(Error::from_status(code, &body)),
        }
    }

    pub fn after(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

type Handler = dyn Fn(&Request) -> Reply + Send + Sync;

/// Fake server that records every request.
pub struct FakeApi {
    handler: Box<Handler>,
    log: Mutex<Vec<Request>>,
}

impl FakeApi {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        FakeApi {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    pub fn gets(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.is_get(path)).count()
    }

    pub fn writes(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == Some(method) && r.path == path)
            .count()
    }

    async fn answer(&self, request: Request) -> Result<Value> {
        let reply = (self.handler)(&request);
        self.log.lock().unwrap().push(request);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}

impl RemoteApi for FakeApi {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        self.answer(Request {
            method: None,
            path: path.to_string(),
            query: query.to_vec(),
            body: None,
        })
        .await
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        self.answer(Request {
            method: Some(method),
            path: path.to_string(),
            query: Vec::new(),
            body,
        })
        .await
    }
}

/// Body of a paginated list response.
pub fn list_page(ids: &[&str], page: u32, total_pages: u32) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|id| serde_json::json!({ "_id": id, "name": format!("item {}", id) }))
        .collect();
    serde_json::json!({
        "data": data,
        "currentPage": page,
        "totalPages": total_pages,
        "total": u64::from(total_pages) * ids.len() as u64
    })
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
