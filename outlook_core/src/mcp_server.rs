use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
    auth::AuthDetails, utils::structured_result_with_text, ConnectorError, ProviderRegistry,
};
use rmcp::model::*;

/// MCP server over the provider registry. Connector tools are exposed as
/// `<connector>/<tool>`, credential helpers as `auth/<connector>/<action>`.
pub struct McpServer {
    registry: Arc<Mutex<ProviderRegistry>>,
}

fn empty_schema() -> Arc<JsonObject> {
    Arc::new(JsonObject::from_iter([
        ("type".to_string(), json!("object")),
        ("properties".to_string(), json!({})),
    ]))
}

fn auth_tool(name: String, description: String, schema: Arc<JsonObject>) -> Tool {
    Tool {
        name: name.into(),
        title: None,
        description: Some(Cow::Owned(description)),
        input_schema: schema,
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

/// Map tool arguments onto string-valued auth details. Non-string scalars are
/// stringified; nested values are dropped.
fn args_to_details(args: JsonObject) -> AuthDetails {
    let mut details = AuthDetails::new();
    for (k, v) in args {
        match v {
            Value::String(s) => {
                details.insert(k, s);
            }
            Value::Number(_) | Value::Bool(_) => {
                details.insert(k, v.to_string());
            }
            _ => {}
        }
    }
    details
}

impl McpServer {
    pub fn new(registry: Arc<Mutex<ProviderRegistry>>) -> Self {
        Self { registry }
    }

    /// Union of the connectors' capabilities.
    pub async fn get_capabilities(&self) -> ServerCapabilities {
        let registry = self.registry.lock().await;
        let mut capabilities = ServerCapabilities::default();
        for connector in registry.providers.values() {
            let conn_caps = connector.lock().await.capabilities().await;
            if conn_caps.tools.is_some() {
                capabilities.tools = conn_caps.tools;
            }
            if conn_caps.resources.is_some() {
                capabilities.resources = conn_caps.resources;
            }
            if conn_caps.prompts.is_some() {
                capabilities.prompts = conn_caps.prompts;
            }
        }
        capabilities
    }

    pub async fn handle_initialize(
        &self,
        request: InitializeRequestParam,
    ) -> Result<InitializeResult, ConnectorError> {
        info!(client = %request.client_info.name, "MCP client initializing");
        let providers = self.registry.lock().await.list_providers();
        let instructions = providers
            .iter()
            .map(|p| format!("{}: {}", p.name, p.description))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: self.get_capabilities().await,
            server_info: Implementation {
                name: "outlook_mcp".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "{}\nSign in first with outlook/auth_start and outlook/auth_poll.",
                instructions
            )),
        })
    }

    pub async fn handle_list_resources(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult, ConnectorError> {
        let registry = self.registry.lock().await;
        let mut all_resources = Vec::new();
        for (name, connector) in registry.providers.iter() {
            match connector.lock().await.list_resources(request.clone()).await {
                Ok(response) => all_resources.extend(response.resources),
                Err(e) => error!(connector = %name, "error listing resources: {}", e),
            }
        }
        Ok(ListResourcesResult {
            resources: all_resources,
            next_cursor: None,
        })
    }

    /// First connector that recognises the URI answers.
    pub async fn handle_read_resource(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<Vec<ResourceContents>, ConnectorError> {
        let registry = self.registry.lock().await;
        for connector in registry.providers.values() {
            match connector.lock().await.read_resource(request.clone()).await {
                Ok(contents) => return Ok(contents),
                Err(ConnectorError::ResourceNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ConnectorError::ResourceNotFound)
    }

    pub async fn handle_list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        let registry = self.registry.lock().await;
        let mut all_tools = Vec::new();

        for (connector_name, connector) in registry.providers.iter() {
            let c = connector.lock().await;
            let tools = match c.list_tools(request.clone()).await {
                Ok(response) => response.tools,
                Err(e) => {
                    error!(connector = %connector_name, "error listing tools: {}", e);
                    continue;
                }
            };
            let schema = c.config_schema();
            drop(c);

            let has_device_flow = tools.iter().any(|t| t.name == "auth_start");
            all_tools.extend(tools.into_iter().map(|mut tool| {
                tool.name = format!("{}/{}", connector_name, tool.name).into();
                tool
            }));

            all_tools.push(auth_tool(
                format!("auth/{}/set", connector_name),
                format!("Set credentials for '{}' (tokens or app registration details).", connector_name),
                Arc::new(schema.to_json_schema()),
            ));
            all_tools.push(auth_tool(
                format!("auth/{}/test", connector_name),
                "Test authentication for the connector.".to_string(),
                empty_schema(),
            ));
            all_tools.push(auth_tool(
                format!("auth/{}/get_schema", connector_name),
                "Return JSON schema for connector credentials.".to_string(),
                empty_schema(),
            ));
            if has_device_flow {
                all_tools.push(auth_tool(
                    format!("auth/{}/start_device", connector_name),
                    "Start device authorization (returns user_code and verification URL).".to_string(),
                    Arc::new(JsonObject::from_iter([
                        ("type".to_string(), json!("object")),
                        (
                            "properties".to_string(),
                            json!({
                                "tenant_id": {"type": "string"},
                                "client_id": {"type": "string"},
                                "scopes": {"type": "string"}
                            }),
                        ),
                    ])),
                ));
                all_tools.push(auth_tool(
                    format!("auth/{}/poll_device", connector_name),
                    "Poll the token endpoint for the device flow using device_code.".to_string(),
                    Arc::new(JsonObject::from_iter([
                        ("type".to_string(), json!("object")),
                        (
                            "properties".to_string(),
                            json!({
                                "tenant_id": {"type": "string"},
                                "client_id": {"type": "string"},
                                "device_code": {"type": "string"}
                            }),
                        ),
                        ("required".to_string(), json!(["device_code"])),
                    ])),
                ));
            }
        }

        Ok(ListToolsResult {
            tools: all_tools,
            next_cursor: None,
        })
    }

    pub async fn handle_call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        let parts: Vec<&str> = request.name.split('/').collect();
        if parts.first() == Some(&"auth") {
            let (provider, action) = match parts.as_slice() {
                [_, provider, action] => (*provider, *action),
                _ => {
                    return Err(ConnectorError::InvalidInput(
                        "Auth tool must be 'auth/<provider>/<action>'".into(),
                    ))
                }
            };
            return self.handle_auth_tool(provider, action, request.arguments).await;
        }

        let (connector_name, tool_name) = match parts.as_slice() {
            [connector, tool] => (*connector, *tool),
            _ => {
                return Err(ConnectorError::InvalidInput(format!(
                    "Tool name must be 'connector/tool' or 'auth/<provider>/<action>', got: {}",
                    request.name
                )))
            }
        };

        let connector = self.connector(connector_name).await?;
        debug!(connector = connector_name, tool = tool_name, "calling tool");
        let c = connector.lock().await;
        c.call_tool(CallToolRequestParam {
            name: tool_name.to_string().into(),
            arguments: request.arguments,
        })
        .await
    }

    async fn connector(&self, name: &str) -> Result<crate::SharedConnector, ConnectorError> {
        self.registry
            .lock()
            .await
            .get_provider(name)
            .cloned()
            .ok_or_else(|| ConnectorError::InvalidInput(format!("Unknown connector: {}", name)))
    }

    async fn handle_auth_tool(
        &self,
        provider: &str,
        action: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, ConnectorError> {
        let connector = self.connector(provider).await?;
        match action {
            "set" => {
                let details = args_to_details(arguments.unwrap_or_default());
                connector.lock().await.set_auth_details(details).await?;
                structured_result_with_text(&json!({"ok": true}), None)
            }
            "test" => {
                connector.lock().await.test_auth().await?;
                structured_result_with_text(&json!({"ok": true}), Some("Authenticated.".into()))
            }
            "get_schema" => {
                let schema = connector.lock().await.config_schema().to_json_schema();
                structured_result_with_text(&json!({"schema": schema}), None)
            }
            "start_device" | "poll_device" => {
                let tool = if action == "start_device" { "auth_start" } else { "auth_poll" };
                connector
                    .lock()
                    .await
                    .call_tool(CallToolRequestParam {
                        name: tool.into(),
                        arguments,
                    })
                    .await
            }
            _ => Err(ConnectorError::ToolNotFound),
        }
    }

    pub async fn handle_list_prompts(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult, ConnectorError> {
        let registry = self.registry.lock().await;
        let mut all_prompts = Vec::new();
        for (connector_name, connector) in registry.providers.iter() {
            match connector.lock().await.list_prompts(request.clone()).await {
                Ok(response) => all_prompts.extend(response.prompts.into_iter().map(|mut p| {
                    p.name = format!("{}/{}", connector_name, p.name);
                    p
                })),
                Err(e) => error!(connector = %connector_name, "error listing prompts: {}", e),
            }
        }
        Ok(ListPromptsResult {
            prompts: all_prompts,
            next_cursor: None,
        })
    }

    pub async fn handle_get_prompt(&self, name: &str) -> Result<Prompt, ConnectorError> {
        let (connector_name, prompt_name) = name.split_once('/').ok_or_else(|| {
            ConnectorError::InvalidInput(format!(
                "Prompt name must be in format 'connector/prompt', got: {}",
                name
            ))
        })?;
        let connector = self.connector(connector_name).await?;
        let mut prompt = connector.lock().await.get_prompt(prompt_name).await?;
        prompt.name = name.to_string();
        Ok(prompt)
    }
}

fn to_value<T: serde::Serialize>(r: Result<T, ConnectorError>) -> Result<Value, Value> {
    r.and_then(|v| serde_json::to_value(v).map_err(ConnectorError::SerdeJson))
        .map_err(|e| e.to_jsonrpc_error())
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, Value> {
    serde_json::from_value(params).map_err(|e| ConnectorError::InvalidParams(e.to_string()).to_jsonrpc_error())
}

/// JSON-RPC message handler for the MCP server
pub struct JsonRpcHandler {
    server: McpServer,
}

impl JsonRpcHandler {
    pub fn new(server: McpServer) -> Self {
        Self { server }
    }

    /// Handle one JSON-RPC message. Notifications (no `id`) get no response.
    pub async fn handle_request(&self, request: Value) -> Option<Value> {
        debug!("Handling JSON-RPC request: {:?}", request);

        let id = request.get("id").cloned();
        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(json!({}));

        if id.is_none() {
            if method.starts_with("notifications/") {
                debug!(method, "notification received");
            } else {
                debug!(method, "ignoring message without id");
            }
            return None;
        }

        let result = match method {
            "ping" => Ok(json!({})),
            "initialize" => match parse_params::<InitializeRequestParam>(params) {
                Ok(req) => to_value(self.server.handle_initialize(req).await),
                Err(e) => Err(e),
            },
            "resources/list" => match parse_params::<Option<PaginatedRequestParam>>(params) {
                Ok(req) => to_value(self.server.handle_list_resources(req).await),
                Err(e) => Err(e),
            },
            "resources/read" => match parse_params::<ReadResourceRequestParam>(params) {
                Ok(req) => to_value(
                    self.server
                        .handle_read_resource(req)
                        .await
                        .map(|contents| json!({"contents": contents})),
                ),
                Err(e) => Err(e),
            },
            "tools/list" => match parse_params::<Option<PaginatedRequestParam>>(params) {
                Ok(req) => to_value(self.server.handle_list_tools(req).await),
                Err(e) => Err(e),
            },
            "tools/call" => match parse_params::<CallToolRequestParam>(params) {
                Ok(req) => to_value(self.server.handle_call_tool(req).await),
                Err(e) => Err(e),
            },
            "prompts/list" => match parse_params::<Option<PaginatedRequestParam>>(params) {
                Ok(req) => to_value(self.server.handle_list_prompts(req).await),
                Err(e) => Err(e),
            },
            "prompts/get" => match params.get("name").and_then(|n| n.as_str()) {
                Some(name) => to_value(self.server.handle_get_prompt(name).await),
                None => Err(
                    ConnectorError::InvalidParams("Missing 'name' parameter".to_string())
                        .to_jsonrpc_error(),
                ),
            },
            _ => Err(ConnectorError::MethodNotFound.to_jsonrpc_error()),
        };

        Some(match result {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id,
            }),
            Err(error) => json!({
                "jsonrpc": "2.0",
                "error": error,
                "id": id,
            }),
        })
    }
}
