use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{count_arg, OutlookConnector};
use crate::error::ConnectorError;
use crate::graph::{GraphRequest, QueryParams, ORDER_BY, SELECT, TOP};
use crate::mail::format::{
    format_attempts, format_email_detail, format_email_list, format_folder_tree,
    format_search_summary,
};
use crate::mail::{
    Email, Folder, FilterTerms, FolderResolver, ProgressiveSearch, SearchTerms,
    EMAIL_DETAIL_FIELDS, EMAIL_SELECT_FIELDS,
};
use crate::utils::{arg_bool, arg_list, arg_str, require_str, structured_result_with_text};
use rmcp::model::CallToolResult;

const IMPORTANCE_LEVELS: &[&str] = &["low", "normal", "high"];

fn folder_label(folder: Option<&str>) -> String {
    match folder {
        Some(f) => format!("folder \"{}\"", f),
        None => "inbox".to_string(),
    }
}

fn message_path(id: &str) -> String {
    format!("me/messages/{}", urlencoding::encode(id))
}

/// A 404 on a message id is the caller's mistake, not an upstream fault.
fn not_found_as_params(err: ConnectorError, what: &str, id: &str) -> ConnectorError {
    match err {
        ConnectorError::Upstream { status: 404, .. } => {
            ConnectorError::InvalidParams(format!("{} {} not found", what, id))
        }
        other => other,
    }
}

fn recipients(addresses: &[String]) -> Result<Vec<Value>, ConnectorError> {
    addresses
        .iter()
        .map(|a| {
            if a.contains('@') {
                Ok(json!({"emailAddress": {"address": a}}))
            } else {
                Err(ConnectorError::InvalidParams(format!(
                    "'{}' is not an email address",
                    a
                )))
            }
        })
        .collect()
}

impl OutlookConnector {
    pub(super) async fn list_emails(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let folder = arg_str(args, "folder");
        let count = count_arg(args);
        let endpoint = FolderResolver::new(self.api()).resolve(folder).await?;

        let query = QueryParams::new()
            .with(TOP, count.to_string())
            .with(ORDER_BY, "receivedDateTime desc")
            .with(SELECT, EMAIL_SELECT_FIELDS);
        let values = self
            .api()
            .send_paginated(GraphRequest::get(endpoint).with_query(query), count)
            .await?;
        let emails = Email::from_values(values);

        let label = folder_label(folder);
        let text = if emails.is_empty() {
            format!("No emails found in {}.", label)
        } else {
            format!(
                "Found {} email(s) in {}:\n\n{}",
                emails.len(),
                label,
                format_email_list(&emails)
            )
        };
        structured_result_with_text(
            &json!({"folder": folder.unwrap_or("inbox"), "count": emails.len(), "emails": emails}),
            Some(text),
        )
    }

    pub(super) async fn search_emails(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let terms = SearchTerms {
            query: arg_str(args, "query").map(str::to_string),
            from: arg_str(args, "from").map(str::to_string),
            to: arg_str(args, "to").map(str::to_string),
            subject: arg_str(args, "subject").map(str::to_string),
        };
        let filters = FilterTerms {
            has_attachments: arg_bool(args, "hasAttachments").unwrap_or(false),
            unread_only: arg_bool(args, "unreadOnly").unwrap_or(false),
        };
        if terms.is_empty() && filters.is_empty() {
            return self.list_emails(args).await;
        }

        let folder = arg_str(args, "folder");
        let count = count_arg(args);
        let endpoint = FolderResolver::new(self.api()).resolve(folder).await?;
        let report = ProgressiveSearch::new(self.api())
            .search(&endpoint, &terms, &filters, count)
            .await?;

        let mut text = format_search_summary(&report, &folder_label(folder));
        if report.failed || report.attempts.len() > 1 {
            text.push_str("\n\nStrategies tried:\n");
            text.push_str(&format_attempts(&report));
        }
        structured_result_with_text(
            &json!({
                "folder": folder.unwrap_or("inbox"),
                "count": report.items.len(),
                "strategy": report.winning_strategy(),
                "attempts": report.attempts,
                "failed": report.failed,
                "emails": report.items,
            }),
            Some(text),
        )
    }

    pub(super) async fn read_email(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let id = require_str(args, "id")?;
        let request = GraphRequest::get(message_path(id))
            .with_query(QueryParams::new().with(SELECT, EMAIL_DETAIL_FIELDS));
        let value = self
            .api()
            .send(request)
            .await
            .map_err(|e| not_found_as_params(e, "Email", id))?;
        let email: Email = serde_json::from_value(value)?;
        let text = format_email_detail(&email);
        structured_result_with_text(&email, Some(text))
    }

    pub(super) async fn send_email(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let to = arg_list(args, "to");
        if to.is_empty() {
            return Err(ConnectorError::InvalidParams(
                "at least one recipient is required in 'to'".to_string(),
            ));
        }
        let subject = require_str(args, "subject")?;
        let body = require_str(args, "body")?;
        let importance = arg_str(args, "importance")
            .unwrap_or("normal")
            .to_lowercase();
        if !IMPORTANCE_LEVELS.contains(&importance.as_str()) {
            return Err(ConnectorError::InvalidParams(format!(
                "importance must be one of {}",
                IMPORTANCE_LEVELS.join(", ")
            )));
        }
        let content_type = if body.to_ascii_lowercase().starts_with("<html") {
            "HTML"
        } else {
            "Text"
        };

        let to_recipients = recipients(&to)?;
        let mut message = json!({
            "subject": subject,
            "body": {"contentType": content_type, "content": body},
            "toRecipients": to_recipients,
            "importance": importance,
        });
        let cc = arg_list(args, "cc");
        if !cc.is_empty() {
            message["ccRecipients"] = Value::Array(recipients(&cc)?);
        }
        let bcc = arg_list(args, "bcc");
        if !bcc.is_empty() {
            message["bccRecipients"] = Value::Array(recipients(&bcc)?);
        }
        let payload = json!({
            "message": message,
            "saveToSentItems": arg_bool(args, "saveToSentItems").unwrap_or(true),
        });

        self.api()
            .send(GraphRequest::post("me/sendMail").with_body(payload))
            .await?;
        info!(recipients = to.len() + cc.len() + bcc.len(), "email sent");

        let text = format!(
            "Email sent.\n\nSubject: {}\nRecipients: {}",
            subject,
            to.len() + cc.len() + bcc.len()
        );
        structured_result_with_text(&json!({"status": "sent", "subject": subject}), Some(text))
    }

    pub(super) async fn mark_as_read(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let id = require_str(args, "id")?;
        let is_read = arg_bool(args, "isRead").unwrap_or(true);
        self.api()
            .send(GraphRequest::patch(message_path(id)).with_body(json!({"isRead": is_read})))
            .await
            .map_err(|e| not_found_as_params(e, "Email", id))?;
        let state = if is_read { "read" } else { "unread" };
        structured_result_with_text(
            &json!({"id": id, "isRead": is_read}),
            Some(format!("Email marked as {}.", state)),
        )
    }

    pub(super) async fn list_folders(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let include_counts = arg_bool(args, "includeItemCounts").unwrap_or(false);
        let include_children = arg_bool(args, "includeChildren").unwrap_or(false);
        let resolver = FolderResolver::new(self.api());
        let folders: Vec<Folder> = if include_children {
            resolver.list_all_folders().await?
        } else {
            resolver.list_folders(None).await?
        };

        let text = if folders.is_empty() {
            "No folders found.".to_string()
        } else {
            format!(
                "Found {} folder(s):\n\n{}",
                folders.len(),
                format_folder_tree(&folders, include_counts)
            )
        };
        structured_result_with_text(&json!({"folders": folders}), Some(text))
    }

    pub(super) async fn create_folder(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let name = require_str(args, "name")?;
        let resolver = FolderResolver::new(self.api());
        let parent_id = match arg_str(args, "parentFolder") {
            Some(parent) => Some(resolver.resolve_folder_id(parent).await?),
            None => None,
        };

        if resolver
            .find_child(parent_id.as_deref(), name)
            .await?
            .is_some()
        {
            return Err(ConnectorError::InvalidParams(format!(
                "A folder named \"{}\" already exists there",
                name
            )));
        }

        let path = match &parent_id {
            Some(id) => format!("me/mailFolders/{}/childFolders", urlencoding::encode(id)),
            None => "me/mailFolders".to_string(),
        };
        let created = self
            .api()
            .send(GraphRequest::post(path).with_body(json!({"displayName": name})))
            .await?;
        let folder: Folder = serde_json::from_value(created)?;

        let location = match arg_str(args, "parentFolder") {
            Some(parent) => format!(" under \"{}\"", parent),
            None => String::new(),
        };
        let text = format!("Created folder \"{}\"{}.", folder.display_name, location);
        structured_result_with_text(&folder, Some(text))
    }

    pub(super) async fn move_emails(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let ids = arg_list(args, "emailIds");
        if ids.is_empty() {
            return Err(ConnectorError::InvalidParams(
                "emailIds must list at least one email ID".to_string(),
            ));
        }
        let target = require_str(args, "targetFolder")?;
        let destination = FolderResolver::new(self.api())
            .resolve_folder_id(target)
            .await?;

        let mut moved: Vec<&str> = Vec::new();
        let mut failed: Vec<Value> = Vec::new();
        for id in &ids {
            let request = GraphRequest::post(format!("{}/move", message_path(id)))
                .with_body(json!({"destinationId": destination}));
            match self.api().send(request).await {
                Ok(_) => moved.push(id),
                Err(e @ ConnectorError::Authentication(_)) => return Err(e),
                Err(e) => {
                    warn!(id = %id, error = %e, "move failed");
                    failed.push(json!({"id": id, "error": e.to_string()}));
                }
            }
        }

        let mut text = format!(
            "Moved {} of {} email(s) to \"{}\".",
            moved.len(),
            ids.len(),
            target
        );
        for f in &failed {
            text.push_str(&format!(
                "\nFailed {}: {}",
                f["id"].as_str().unwrap_or_default(),
                f["error"].as_str().unwrap_or_default()
            ));
        }
        structured_result_with_text(
            &json!({"moved": moved, "failed": failed, "destination": destination}),
            Some(text),
        )
    }
}
