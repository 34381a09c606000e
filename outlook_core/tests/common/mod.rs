#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use outlook_core::auth_store::MemoryAuthStore;
use outlook_core::config::OutlookConfig;
use outlook_core::connectors::outlook::OutlookConnector;
use outlook_core::error::ConnectorError;
use outlook_core::graph::{GraphApi, GraphRequest};
use outlook_core::oauth::StoredTokenProvider;

type Responder = dyn Fn(&GraphRequest) -> Result<Value, ConnectorError> + Send + Sync;

/// In-memory Graph that records every request and answers from a closure.
pub struct ScriptedGraph {
    requests: Mutex<Vec<GraphRequest>>,
    responder: Box<Responder>,
}

impl ScriptedGraph {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GraphRequest) -> Result<Value, ConnectorError> + Send + Sync + 'static,
    {
        Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn requests(&self) -> Vec<GraphRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GraphApi for ScriptedGraph {
    async fn send(&self, request: GraphRequest) -> Result<Value, ConnectorError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(&request)
    }
}

pub fn page(items: Vec<Value>) -> Value {
    json!({ "value": items })
}

pub fn message(id: &str, subject: &str) -> Value {
    json!({
        "id": id,
        "subject": subject,
        "from": {"emailAddress": {"name": "Ann Lee", "address": "a@b.com"}},
        "receivedDateTime": "2024-05-01T09:30:00Z",
        "isRead": false,
        "hasAttachments": false
    })
}

pub fn messages(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| message(&format!("m{}", i), &format!("Subject {}", i)))
        .collect()
}

pub fn folder(id: &str, name: &str, children: u32) -> Value {
    json!({
        "id": id,
        "displayName": name,
        "parentFolderId": "root",
        "childFolderCount": children,
        "totalItemCount": 3,
        "unreadItemCount": 1
    })
}

pub fn connector(graph: Arc<ScriptedGraph>) -> OutlookConnector {
    let tokens = Arc::new(StoredTokenProvider::new(
        "outlook",
        Arc::new(MemoryAuthStore::new()),
    ));
    OutlookConnector::with_api(OutlookConfig::default(), graph, tokens)
}
