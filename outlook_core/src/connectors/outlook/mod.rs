//! Outlook connector: mail, folders, calendar and inbox rules over Microsoft Graph.

mod calendar;
mod mail;
mod rules;

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::*;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::auth::AuthDetails;
use crate::auth_store::{AuthStore, FileAuthStore, MemoryAuthStore};
use crate::capabilities::{ConnectorConfigSchema, Field, FieldType};
use crate::config::OutlookConfig;
use crate::error::ConnectorError;
use crate::graph::{GraphApi, GraphClient, GraphRequest, QueryParams, SELECT};
use crate::oauth::{self, StoredTokenProvider};
use crate::utils::{arg_str, error_result, require_str, structured_result_with_text};
use crate::Connector;

pub const CONNECTOR_NAME: &str = "outlook";

/// Default and maximum for `count` arguments.
pub(crate) const DEFAULT_COUNT: usize = 10;
pub(crate) const MAX_COUNT: usize = 50;

pub struct OutlookConnector {
    api: Arc<dyn GraphApi>,
    tokens: Arc<StoredTokenProvider>,
    config: OutlookConfig,
}

impl OutlookConnector {
    /// Connector backed by the live Graph API. Tokens come from `auth.json`
    /// under the configured auth dir, or from memory when persistence is off.
    pub fn new(config: OutlookConfig) -> Result<Self, ConnectorError> {
        let store: Arc<dyn AuthStore> = if config.persist_tokens {
            Arc::new(FileAuthStore::in_dir(&config.auth_dir()))
        } else {
            Arc::new(MemoryAuthStore::new())
        };
        let tokens = Arc::new(StoredTokenProvider::new(CONNECTOR_NAME, store));
        let api = Arc::new(GraphClient::new(&config, tokens.clone())?);
        Ok(Self::with_api(config, api, tokens))
    }

    /// Connector over any [`GraphApi`], e.g. a scripted one in tests.
    pub fn with_api(
        config: OutlookConfig,
        api: Arc<dyn GraphApi>,
        tokens: Arc<StoredTokenProvider>,
    ) -> Self {
        Self {
            api,
            tokens,
            config,
        }
    }

    pub(crate) fn api(&self) -> &dyn GraphApi {
        self.api.as_ref()
    }

    pub(crate) fn config(&self) -> &OutlookConfig {
        &self.config
    }

    /// Client id from the call, then runtime auth details, then config.
    fn client_id(&self, args: &Map<String, Value>) -> Result<String, ConnectorError> {
        arg_str(args, "client_id")
            .map(str::to_string)
            .or_else(|| self.tokens.merged().get("client_id").cloned())
            .or_else(|| self.config.client_id.clone())
            .ok_or_else(|| {
                ConnectorError::InvalidParams(
                    "client_id is required (pass it or set OUTLOOK_MCP_CLIENT_ID)".to_string(),
                )
            })
    }

    fn tenant_id(&self, args: &Map<String, Value>) -> String {
        arg_str(args, "tenant_id")
            .map(str::to_string)
            .unwrap_or_else(|| self.config.tenant_id.clone())
    }

    async fn auth_start(&self, args: &Map<String, Value>) -> Result<CallToolResult, ConnectorError> {
        let client_id = self.client_id(args)?;
        let tenant = self.tenant_id(args);
        let scopes = arg_str(args, "scopes").unwrap_or(self.config.scopes.as_str());
        let start = oauth::ms_device_authorize(&tenant, &client_id, scopes).await?;
        let text = start.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}. Then call auth_poll with the device_code.",
                start.verification_uri, start.user_code
            )
        });
        structured_result_with_text(&start, Some(text))
    }

    async fn auth_poll(&self, args: &Map<String, Value>) -> Result<CallToolResult, ConnectorError> {
        let client_id = self.client_id(args)?;
        let tenant = self.tenant_id(args);
        let device_code = require_str(args, "device_code")?;

        let tokens = match oauth::ms_device_poll(&tenant, &client_id, device_code).await {
            Ok(t) => t,
            Err(ConnectorError::Authentication(msg)) if msg.contains("authorization_pending") => {
                return structured_result_with_text(
                    &json!({"status": "pending"}),
                    Some("Authorization pending. Finish signing in, then call auth_poll again.".to_string()),
                );
            }
            Err(e) => return Err(e),
        };

        let mut auth = self.tokens.merged();
        tokens.apply_to(&mut auth);
        auth.insert("client_id".to_string(), client_id);
        auth.insert("tenant_id".to_string(), tenant);
        self.tokens
            .store()
            .save(CONNECTOR_NAME, &auth)
            .map_err(|e| ConnectorError::Other(e.to_string()))?;
        info!(persisted = self.config.persist_tokens, "outlook device authorization complete");

        structured_result_with_text(
            &json!({
                "status": "authorized",
                "expires_in": tokens.expires_in,
                "scope": tokens.scope,
            }),
            Some("Signed in to Outlook.".to_string()),
        )
    }

    async fn dispatch(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        match name {
            "list_emails" => self.list_emails(args).await,
            "search_emails" => self.search_emails(args).await,
            "read_email" => self.read_email(args).await,
            "send_email" => self.send_email(args).await,
            "mark_as_read" => self.mark_as_read(args).await,
            "list_folders" => self.list_folders(args).await,
            "create_folder" => self.create_folder(args).await,
            "move_emails" => self.move_emails(args).await,
            "list_events" => self.list_events(args).await,
            "create_event" => self.create_event(args).await,
            "accept_event" => self.respond_to_event(args, "accept").await,
            "decline_event" => self.respond_to_event(args, "decline").await,
            "cancel_event" => self.cancel_event(args).await,
            "delete_event" => self.delete_event(args).await,
            "list_rules" => self.list_rules(args).await,
            "create_rule" => self.create_rule(args).await,
            "auth_start" => self.auth_start(args).await,
            "auth_poll" => self.auth_poll(args).await,
            _ => Err(ConnectorError::ToolNotFound),
        }
    }
}

/// `count` argument clamped to 1..=50, defaulting to 10.
pub(crate) fn count_arg(args: &Map<String, Value>) -> usize {
    crate::utils::arg_u64(args, "count")
        .map(|c| (c as usize).clamp(1, MAX_COUNT))
        .unwrap_or(DEFAULT_COUNT)
}

fn tool(name: &'static str, description: &'static str, schema: Value) -> Tool {
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema: Arc::new(schema.as_object().cloned().unwrap_or_default()),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

fn tool_list() -> Vec<Tool> {
    let folder = json!({"type": "string", "description": "Folder name or alias (inbox, sent, drafts, deleted, junk, archive). Defaults to inbox."});
    let count = json!({"type": "integer", "minimum": 1, "maximum": 50, "description": "Number of emails (default 10)"});
    let event_id = json!({"type": "string", "description": "Event ID"});
    let comment = json!({"type": "string", "description": "Optional message to the organizer or attendees"});
    vec![
        tool(
            "list_emails",
            "List the most recent emails in a folder.",
            json!({"type": "object", "properties": {"folder": folder, "count": count}}),
        ),
        tool(
            "search_emails",
            "Search emails by text, sender, recipient or subject, optionally only unread or with attachments. Tries progressively broader strategies until one returns results.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Free text"},
                    "from": {"type": "string", "description": "Sender name or address"},
                    "to": {"type": "string", "description": "Recipient name or address"},
                    "subject": {"type": "string", "description": "Subject text"},
                    "hasAttachments": {"type": "boolean"},
                    "unreadOnly": {"type": "boolean"},
                    "folder": folder,
                    "count": count
                }
            }),
        ),
        tool(
            "read_email",
            "Read the full content of an email.",
            json!({"type": "object", "properties": {"id": {"type": "string", "description": "Email ID"}}, "required": ["id"]}),
        ),
        tool(
            "send_email",
            "Send an email. Recipient lists are comma-separated; a body starting with <html is sent as HTML.",
            json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "Comma-separated recipients"},
                    "cc": {"type": "string"},
                    "bcc": {"type": "string"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"},
                    "importance": {"type": "string", "enum": ["low", "normal", "high"]},
                    "saveToSentItems": {"type": "boolean"}
                },
                "required": ["to", "subject", "body"]
            }),
        ),
        tool(
            "mark_as_read",
            "Mark an email as read, or unread with isRead=false.",
            json!({"type": "object", "properties": {"id": {"type": "string"}, "isRead": {"type": "boolean"}}, "required": ["id"]}),
        ),
        tool(
            "list_folders",
            "List mail folders as an indented tree.",
            json!({"type": "object", "properties": {"includeItemCounts": {"type": "boolean"}, "includeChildren": {"type": "boolean"}}}),
        ),
        tool(
            "create_folder",
            "Create a mail folder, optionally under a parent folder.",
            json!({"type": "object", "properties": {"name": {"type": "string"}, "parentFolder": {"type": "string"}}, "required": ["name"]}),
        ),
        tool(
            "move_emails",
            "Move emails to another folder.",
            json!({"type": "object", "properties": {"emailIds": {"type": "string", "description": "Comma-separated email IDs"}, "targetFolder": {"type": "string"}}, "required": ["emailIds", "targetFolder"]}),
        ),
        tool(
            "list_events",
            "List upcoming calendar events.",
            json!({"type": "object", "properties": {"count": count}}),
        ),
        tool(
            "create_event",
            "Create a calendar event. Times are local to the configured time zone, e.g. 2024-05-01T09:30:00.",
            json!({
                "type": "object",
                "properties": {
                    "subject": {"type": "string"},
                    "start": {"type": "string"},
                    "end": {"type": "string"},
                    "attendees": {"type": "string", "description": "Comma-separated addresses"},
                    "body": {"type": "string"},
                    "location": {"type": "string"}
                },
                "required": ["subject", "start", "end"]
            }),
        ),
        tool(
            "accept_event",
            "Accept a meeting invitation.",
            json!({"type": "object", "properties": {"eventId": event_id, "comment": comment}, "required": ["eventId"]}),
        ),
        tool(
            "decline_event",
            "Decline a meeting invitation.",
            json!({"type": "object", "properties": {"eventId": event_id, "comment": comment}, "required": ["eventId"]}),
        ),
        tool(
            "cancel_event",
            "Cancel a meeting you organize and notify attendees.",
            json!({"type": "object", "properties": {"eventId": event_id, "comment": comment}, "required": ["eventId"]}),
        ),
        tool(
            "delete_event",
            "Delete a calendar event.",
            json!({"type": "object", "properties": {"eventId": event_id}, "required": ["eventId"]}),
        ),
        tool(
            "list_rules",
            "List inbox rules in execution order.",
            json!({"type": "object", "properties": {"includeDetails": {"type": "boolean"}}}),
        ),
        tool(
            "create_rule",
            "Create an inbox rule. Needs at least one condition (fromAddresses, containsSubject, hasAttachments) and one action (moveToFolder, markAsRead).",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "fromAddresses": {"type": "string", "description": "Comma-separated sender addresses"},
                    "containsSubject": {"type": "string"},
                    "hasAttachments": {"type": "boolean"},
                    "moveToFolder": {"type": "string"},
                    "markAsRead": {"type": "boolean"},
                    "isEnabled": {"type": "boolean"},
                    "sequence": {"type": "integer", "minimum": 1}
                },
                "required": ["name"]
            }),
        ),
        tool(
            "auth_start",
            "Start device authorization (returns user_code and verification URL).",
            json!({
                "type": "object",
                "properties": {
                    "tenant_id": {"type": "string"},
                    "client_id": {"type": "string"},
                    "scopes": {"type": "string", "description": "Space-separated scopes"}
                }
            }),
        ),
        tool(
            "auth_poll",
            "Complete device authorization using the device_code from auth_start.",
            json!({
                "type": "object",
                "properties": {
                    "tenant_id": {"type": "string"},
                    "client_id": {"type": "string"},
                    "device_code": {"type": "string"}
                },
                "required": ["device_code"]
            }),
        ),
    ]
}

#[async_trait]
impl Connector for OutlookConnector {
    fn name(&self) -> &'static str {
        CONNECTOR_NAME
    }

    fn description(&self) -> &'static str {
        "Outlook mail, folders, calendar and inbox rules via Microsoft Graph."
    }

    async fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(Default::default()),
            ..Default::default()
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParam,
    ) -> Result<InitializeResult, ConnectorError> {
        Ok(InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: self.capabilities().await,
            server_info: Implementation {
                name: self.name().to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Sign in with auth_start and auth_poll (device code), then use the mail, calendar and rule tools."
                    .to_string(),
            ),
        })
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult, ConnectorError> {
        Ok(ListResourcesResult {
            resources: vec![],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        _request: ReadResourceRequestParam,
    ) -> Result<Vec<ResourceContents>, ConnectorError> {
        Err(ConnectorError::ResourceNotFound)
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        Ok(ListToolsResult {
            tools: tool_list(),
            next_cursor: None,
        })
    }

    /// Argument mistakes and unknown folders come back as error results the
    /// agent can read; everything else is a protocol error.
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        let args = request.arguments.unwrap_or_default();
        match self.dispatch(&request.name, &args).await {
            Err(e) if e.is_user_correctable() => {
                warn!(tool = %request.name, error = %e, "tool call rejected");
                Ok(error_result(&e))
            }
            other => other,
        }
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult, ConnectorError> {
        Ok(ListPromptsResult {
            prompts: vec![],
            next_cursor: None,
        })
    }

    async fn get_prompt(&self, _name: &str) -> Result<Prompt, ConnectorError> {
        Err(ConnectorError::InvalidParams("Prompt not found".to_string()))
    }

    async fn get_auth_details(&self) -> Result<AuthDetails, ConnectorError> {
        Ok(self.tokens.overrides())
    }

    async fn set_auth_details(&mut self, details: AuthDetails) -> Result<(), ConnectorError> {
        self.tokens.set_overrides(details);
        Ok(())
    }

    /// Fetch the signed-in user's profile with the current token.
    async fn test_auth(&self) -> Result<(), ConnectorError> {
        let request = GraphRequest::get("me")
            .with_query(QueryParams::new().with(SELECT, "id,userPrincipalName"));
        self.api.send(request).await.map(|_| ())
    }

    fn config_schema(&self) -> ConnectorConfigSchema {
        ConnectorConfigSchema {
            fields: vec![
                Field::new("tenant_id", "Tenant ID", FieldType::Text)
                    .describe("Entra tenant ID or domain; defaults to common."),
                Field::new("client_id", "Client ID", FieldType::Text)
                    .describe("App registration client ID (public client, device code enabled)."),
                Field::new("client_secret", "Client Secret", FieldType::Secret)
                    .describe("Only for confidential clients."),
                Field::new("access_token", "Access Token", FieldType::Secret)
                    .describe("Bearer token for Microsoft Graph, if obtained elsewhere."),
                Field::new("refresh_token", "Refresh Token", FieldType::Secret),
            ],
        }
    }
}
