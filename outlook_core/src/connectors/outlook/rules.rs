use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::OutlookConnector;
use crate::error::ConnectorError;
use crate::mail::FolderResolver;
use crate::graph::GraphRequest;
use crate::utils::{arg_bool, arg_list, arg_str, arg_u64, require_str, structured_result_with_text};

const RULES_PATH: &str = "me/mailFolders/inbox/messageRules";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRule {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub sequence: Option<u32>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub conditions: Option<Value>,
    #[serde(default)]
    pub actions: Option<Value>,
}

fn describe_conditions(c: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(from) = c.get("fromAddresses").and_then(|v| v.as_array()) {
        let addrs: Vec<&str> = from
            .iter()
            .filter_map(|a| a.pointer("/emailAddress/address").and_then(|s| s.as_str()))
            .collect();
        if !addrs.is_empty() {
            out.push(format!("from {}", addrs.join(", ")));
        }
    }
    if let Some(words) = c.get("subjectContains").and_then(|v| v.as_array()) {
        let words: Vec<&str> = words.iter().filter_map(|w| w.as_str()).collect();
        if !words.is_empty() {
            out.push(format!("subject contains \"{}\"", words.join("\", \"")));
        }
    }
    if c.get("hasAttachments").and_then(|v| v.as_bool()) == Some(true) {
        out.push("has attachments".to_string());
    }
    out
}

fn describe_actions(a: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(folder) = a.get("moveToFolder").and_then(|v| v.as_str()) {
        out.push(format!("move to folder {}", folder));
    }
    if a.get("markAsRead").and_then(|v| v.as_bool()) == Some(true) {
        out.push("mark as read".to_string());
    }
    if a.get("delete").and_then(|v| v.as_bool()) == Some(true) {
        out.push("delete".to_string());
    }
    out
}

fn format_rules(rules: &[MessageRule], details: bool) -> String {
    let mut out = String::new();
    for (i, r) in rules.iter().enumerate() {
        let state = if r.is_enabled == Some(false) { "disabled" } else { "enabled" };
        out.push_str(&format!(
            "{}. {} (sequence {}, {})\n",
            i + 1,
            r.display_name,
            r.sequence.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            state
        ));
        if details {
            let conditions = r.conditions.as_ref().map(describe_conditions).unwrap_or_default();
            let actions = r.actions.as_ref().map(describe_actions).unwrap_or_default();
            if !conditions.is_empty() {
                out.push_str(&format!("   When: {}\n", conditions.join("; ")));
            }
            if !actions.is_empty() {
                out.push_str(&format!("   Then: {}\n", actions.join("; ")));
            }
        }
    }
    out
}

/// Next free sequence number: one past the current highest, at least 1.
fn next_sequence(rules: &[MessageRule]) -> u32 {
    rules
        .iter()
        .filter_map(|r| r.sequence)
        .max()
        .map(|m| m.saturating_add(1))
        .unwrap_or(1)
        .max(1)
}

fn parse_sequence(raw: u64) -> Result<u32, ConnectorError> {
    match u32::try_from(raw) {
        Ok(s) if s >= 1 => Ok(s),
        _ => Err(ConnectorError::InvalidParams(format!(
            "sequence must be between 1 and {}",
            u32::MAX
        ))),
    }
}

impl OutlookConnector {
    async fn fetch_rules(&self) -> Result<Vec<MessageRule>, ConnectorError> {
        let values = self
            .api()
            .send_paginated(GraphRequest::get(RULES_PATH), usize::MAX)
            .await?;
        let mut rules: Vec<MessageRule> = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        rules.sort_by_key(|r| r.sequence.unwrap_or(u32::MAX));
        Ok(rules)
    }

    pub(super) async fn list_rules(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let details = arg_bool(args, "includeDetails").unwrap_or(false);
        let rules = self.fetch_rules().await?;
        let text = if rules.is_empty() {
            "No inbox rules.".to_string()
        } else {
            format!("{} inbox rule(s):\n\n{}", rules.len(), format_rules(&rules, details))
        };
        structured_result_with_text(&json!({"rules": rules}), Some(text))
    }

    pub(super) async fn create_rule(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let name = require_str(args, "name")?;

        let mut conditions = Map::new();
        let from = arg_list(args, "fromAddresses");
        if !from.is_empty() {
            conditions.insert(
                "fromAddresses".into(),
                Value::Array(
                    from.iter()
                        .map(|a| json!({"emailAddress": {"address": a}}))
                        .collect(),
                ),
            );
        }
        if let Some(subject) = arg_str(args, "containsSubject") {
            conditions.insert("subjectContains".into(), json!([subject]));
        }
        if arg_bool(args, "hasAttachments") == Some(true) {
            conditions.insert("hasAttachments".into(), json!(true));
        }

        let mut actions = Map::new();
        if let Some(folder) = arg_str(args, "moveToFolder") {
            let id = FolderResolver::new(self.api()).resolve_folder_id(folder).await?;
            actions.insert("moveToFolder".into(), json!(id));
        }
        if arg_bool(args, "markAsRead") == Some(true) {
            actions.insert("markAsRead".into(), json!(true));
        }

        if conditions.is_empty() {
            return Err(ConnectorError::InvalidParams(
                "a rule needs at least one condition: fromAddresses, containsSubject or hasAttachments".to_string(),
            ));
        }
        if actions.is_empty() {
            return Err(ConnectorError::InvalidParams(
                "a rule needs at least one action: moveToFolder or markAsRead".to_string(),
            ));
        }

        let sequence = match arg_u64(args, "sequence") {
            Some(s) => parse_sequence(s)?,
            None => next_sequence(&self.fetch_rules().await?),
        };

        let payload = json!({
            "displayName": name,
            "sequence": sequence,
            "isEnabled": arg_bool(args, "isEnabled").unwrap_or(true),
            "conditions": conditions,
            "actions": actions,
        });
        let created = self
            .api()
            .send(GraphRequest::post(RULES_PATH).with_body(payload))
            .await?;
        let rule: MessageRule = serde_json::from_value(created)?;
        let text = format!("Created rule \"{}\" with sequence {}.", name, sequence);
        structured_result_with_text(&rule, Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, sequence: Option<u32>) -> MessageRule {
        MessageRule {
            id: name.to_lowercase(),
            display_name: name.to_string(),
            sequence,
            ..Default::default()
        }
    }

    #[test]
    fn next_sequence_follows_highest() {
        assert_eq!(next_sequence(&[]), 1);
        assert_eq!(next_sequence(&[rule("A", Some(2)), rule("B", Some(7)), rule("C", None)]), 8);
    }

    #[test]
    fn next_sequence_saturates() {
        assert_eq!(next_sequence(&[rule("A", Some(u32::MAX))]), u32::MAX);
    }

    #[test]
    fn sequence_must_fit_u32() {
        assert_eq!(parse_sequence(3).unwrap(), 3);
        assert!(matches!(parse_sequence(0), Err(ConnectorError::InvalidParams(_))));
        assert!(matches!(
            parse_sequence(u64::from(u32::MAX) + 1),
            Err(ConnectorError::InvalidParams(_))
        ));
    }

    #[test]
    fn details_describe_conditions_and_actions() {
        let mut r = rule("Invoices", Some(1));
        r.conditions = Some(json!({
            "fromAddresses": [{"emailAddress": {"address": "billing@contoso.com"}}],
            "subjectContains": ["invoice"]
        }));
        r.actions = Some(json!({"moveToFolder": "AAMkF", "markAsRead": true}));
        let text = format_rules(&[r], true);
        assert!(text.starts_with("1. Invoices (sequence 1, enabled)\n"));
        assert!(text.contains("When: from billing@contoso.com; subject contains \"invoice\""));
        assert!(text.contains("Then: move to folder AAMkF; mark as read"));
    }
}
