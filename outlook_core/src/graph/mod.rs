//! Thin Microsoft Graph request layer: OData parameter sets, a request value,
//! and the [`GraphApi`] seam that the mail core talks to.

pub mod client;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::error::ConnectorError;

pub use client::GraphClient;

pub const FILTER: &str = "$filter";
pub const SEARCH: &str = "$search";
pub const ORDER_BY: &str = "$orderby";
pub const SELECT: &str = "$select";
pub const TOP: &str = "$top";
pub const COUNT: &str = "$count";

/// Upper bound on pages followed by [`GraphApi::send_paginated`].
const MAX_PAGES: usize = 50;

/// Ordered OData query parameters. Setting an existing key replaces its
/// value in place, so parameter order stays stable across merges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One Graph call. `path` is relative to the API base (`me/messages`) or, for
/// continuation pages, the absolute `@odata.nextLink`.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub method: Method,
    pub path: String,
    pub query: QueryParams,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl GraphRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: QueryParams::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with("https://") || self.path.starts_with("http://")
    }
}

/// Authenticated access to Microsoft Graph.
///
/// `send` must map 401/403 responses to [`ConnectorError::Authentication`] so
/// callers can tell an auth failure apart from an ordinary API error.
#[async_trait]
pub trait GraphApi: Send + Sync {
    async fn send(&self, request: GraphRequest) -> Result<Value, ConnectorError>;

    /// Collect `value` items across pages, following `@odata.nextLink` until
    /// `max_items` are gathered or no further page exists.
    async fn send_paginated(
        &self,
        request: GraphRequest,
        max_items: usize,
    ) -> Result<Vec<Value>, ConnectorError> {
        let mut items: Vec<Value> = Vec::new();
        if max_items == 0 {
            return Ok(items);
        }
        let headers = request.headers.clone();
        let mut next = Some(request);
        let mut pages = 0usize;

        while let Some(req) = next.take() {
            let page = self.send(req).await?;
            pages += 1;
            if let Some(values) = page.get("value").and_then(|v| v.as_array()) {
                items.extend(values.iter().cloned());
            }
            if items.len() >= max_items || pages >= MAX_PAGES {
                break;
            }
            next = page
                .get("@odata.nextLink")
                .and_then(|v| v.as_str())
                .map(|link| {
                    let mut req = GraphRequest::get(link);
                    req.headers = headers.clone();
                    req
                });
        }

        debug!(pages, items = items.len(), "paginated fetch finished");
        items.truncate(max_items);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut q = QueryParams::new();
        q.set(TOP, "10").set(FILTER, "a eq 1").set(SELECT, "id");
        q.set(FILTER, "b eq 2");
        assert_eq!(q.keys(), vec![TOP, FILTER, SELECT]);
        assert_eq!(q.get(FILTER), Some("b eq 2"));
        assert_eq!(q.remove(TOP).as_deref(), Some("10"));
        assert_eq!(q.get(TOP), None);
    }

    #[test]
    fn request_builders() {
        let req = GraphRequest::get("me/messages")
            .with_header("ConsistencyLevel", "eventual")
            .with_query(QueryParams::new().with(TOP, "5"));
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.header("consistencylevel"), Some("eventual"));
        assert!(!req.is_absolute());
        assert!(GraphRequest::get("https://graph.microsoft.com/v1.0/me/messages?$skip=10").is_absolute());
    }
}
