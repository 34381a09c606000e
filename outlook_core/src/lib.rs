// src/lib.rs
pub mod auth;
pub mod auth_store;
pub mod capabilities;
pub mod config;
pub mod connectors;
pub mod error;
pub mod graph;
pub mod mail;
pub mod mcp_server;
pub mod oauth;
pub mod transport;
pub mod utils;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, InitializeRequestParam,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, Prompt, ProtocolVersion, ReadResourceRequestParam, ResourceContents,
    ServerCapabilities, Tool,
};

use async_trait::async_trait;

use crate::auth::AuthDetails;
pub use crate::capabilities::ConnectorConfigSchema;
use crate::config::OutlookConfig;
use crate::connectors::outlook::OutlookConnector;
use crate::error::ConnectorError;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique connector name, used as the tool-name prefix (`outlook/search_emails`).
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Key under which credentials are kept in the auth store.
    fn credential_provider(&self) -> &'static str {
        self.name()
    }

    async fn capabilities(&self) -> ServerCapabilities;

    async fn initialize(
        &self,
        request: InitializeRequestParam,
    ) -> Result<InitializeResult, ConnectorError>;
    async fn list_resources(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult, ConnectorError>;
    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<Vec<ResourceContents>, ConnectorError>;
    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError>;
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError>;
    async fn list_prompts(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult, ConnectorError>;
    async fn get_prompt(&self, name: &str) -> Result<Prompt, ConnectorError>;

    async fn get_auth_details(&self) -> Result<AuthDetails, ConnectorError>;
    async fn set_auth_details(&mut self, details: AuthDetails) -> Result<(), ConnectorError>;
    async fn test_auth(&self) -> Result<(), ConnectorError>;
    fn config_schema(&self) -> ConnectorConfigSchema;
}

pub type SharedConnector = Arc<tokio::sync::Mutex<Box<dyn Connector>>>;

/// Connectors by name. Ordered so tool listings are stable.
pub struct ProviderRegistry {
    pub providers: BTreeMap<String, SharedConnector>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            providers: BTreeMap::new(),
        }
    }

    pub fn register_provider(&mut self, provider: Box<dyn Connector>) {
        self.providers.insert(
            provider.name().to_string(),
            Arc::new(tokio::sync::Mutex::new(provider)),
        );
    }

    pub fn get_provider(&self, name: &str) -> Option<&SharedConnector> {
        self.providers.get(name)
    }

    pub fn list_providers(&self) -> Vec<ServerInfo> {
        self.providers
            .iter()
            .map(|(name, connector)| ServerInfo {
                name: name.clone(),
                description: connector
                    .try_lock()
                    .map(|c| c.description().to_string())
                    .unwrap_or_default(),
            })
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the Outlook connector wired to the live Graph API.
pub fn build_registry(config: &OutlookConfig) -> Result<ProviderRegistry, ConnectorError> {
    let mut registry = ProviderRegistry::new();
    registry.register_provider(Box::new(OutlookConnector::new(config.clone())?));
    Ok(registry)
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
}
