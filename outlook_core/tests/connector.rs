mod common;

use std::sync::Arc;

use common::{connector, folder, message, messages, page, ScriptedGraph};
use outlook_core::error::ConnectorError;
use outlook_core::graph::{FILTER, ORDER_BY, SEARCH};
use outlook_core::{CallToolRequestParam, CallToolResult, Connector};
use serde_json::{json, Value};

fn call(name: &'static str, args: Value) -> CallToolRequestParam {
    CallToolRequestParam {
        name: name.into(),
        arguments: args.as_object().cloned(),
    }
}

fn text_of(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok())
        .filter_map(|v| v["text"].as_str().map(str::to_string))
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn lists_every_tool() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(page(vec![]))));
    let tools = connector(graph).list_tools(None).await.unwrap().tools;
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
    for expected in [
        "list_emails",
        "search_emails",
        "read_email",
        "send_email",
        "mark_as_read",
        "list_folders",
        "create_folder",
        "move_emails",
        "list_events",
        "create_event",
        "accept_event",
        "decline_event",
        "cancel_event",
        "delete_event",
        "list_rules",
        "create_rule",
        "auth_start",
        "auth_poll",
    ] {
        assert!(names.contains(&expected), "missing tool {expected}");
    }
}

#[tokio::test]
async fn search_reports_winning_strategy() {
    let graph = Arc::new(ScriptedGraph::new(|req| {
        if req.query.get(SEARCH).is_some() {
            Ok(page(messages(2)))
        } else {
            Ok(page(vec![]))
        }
    }));
    let result = connector(graph.clone())
        .call_tool(call("search_emails", json!({"from": "a@b.com", "count": 5})))
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(false));
    let data = result.structured_content.clone().unwrap();
    assert_eq!(data["strategy"], "kql-combined-search");
    assert_eq!(data["count"], 2);
    assert_eq!(data["attempts"][0]["strategy"], "filter-from-exact");
    assert_eq!(data["attempts"][0]["outcome"]["status"], "empty");
    let text = text_of(&result);
    assert!(text.contains("Found 2 email(s) in inbox (strategy: kql-combined-search)"));
    assert!(text.contains("filter-from-exact: no results"));
}

#[tokio::test]
async fn search_without_criteria_lists_folder() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(page(messages(3)))));
    let result = connector(graph.clone())
        .call_tool(call("search_emails", json!({"folder": "sent"})))
        .await
        .unwrap();

    let requests = graph.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "me/mailFolders/sentitems/messages");
    assert_eq!(requests[0].query.get(ORDER_BY), Some("receivedDateTime desc"));
    assert_eq!(requests[0].query.get(SEARCH), None);
    assert_eq!(requests[0].query.get(FILTER), None);
    assert_eq!(result.structured_content.unwrap()["count"], 3);
}

#[tokio::test]
async fn failed_search_suggests_simplifying() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(page(vec![]))));
    let result = connector(graph)
        .call_tool(call("search_emails", json!({"subject": "Quarterly"})))
        .await
        .unwrap();

    assert_eq!(result.structured_content.clone().unwrap()["failed"], true);
    let text = text_of(&result);
    assert!(text.starts_with("No emails found in inbox."));
    assert!(text.contains("list_emails"));
}

#[tokio::test]
async fn unknown_folder_is_a_tool_error() {
    let graph = Arc::new(ScriptedGraph::new(|req| {
        if req.query.get(FILTER).is_some() {
            Ok(page(vec![]))
        } else {
            Ok(page(vec![folder("x", "Other", 0)]))
        }
    }));
    let result = connector(graph)
        .call_tool(call("list_emails", json!({"folder": "Nowhere"})))
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(true));
    assert!(text_of(&result).contains("list_folders"));
    assert_eq!(result.structured_content.unwrap()["error"], "folder_not_found");
}

#[tokio::test]
async fn auth_failures_are_protocol_errors() {
    let graph = Arc::new(ScriptedGraph::new(|_| {
        Err(ConnectorError::Authentication("not signed in".into()))
    }));
    let err = connector(graph)
        .call_tool(call("list_emails", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Authentication(_)));
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(Value::Null)));
    let err = connector(graph)
        .call_tool(call("archive_everything", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::ToolNotFound));
}

#[tokio::test]
async fn read_email_converts_html_body() {
    let graph = Arc::new(ScriptedGraph::new(|_| {
        let mut m = message("m1", "Welcome");
        m["body"] = json!({"contentType": "html", "content": "<html><body><!-- header --><p>Hello there</p></body></html>"});
        Ok(m)
    }));
    let result = connector(graph.clone())
        .call_tool(call("read_email", json!({"id": "m1"})))
        .await
        .unwrap();
    let text = text_of(&result);
    assert!(text.ends_with("Hello there"));
    assert!(!text.contains("header"));
    assert_eq!(graph.requests()[0].path, "me/messages/m1");
}

#[tokio::test]
async fn send_email_builds_graph_payload() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(Value::Null)));
    let result = connector(graph.clone())
        .call_tool(call(
            "send_email",
            json!({
                "to": "ann@contoso.com, bob@contoso.com",
                "cc": "carol@contoso.com",
                "subject": "Hi",
                "body": "<html><body>Hello</body></html>",
                "importance": "High"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(false));

    let req = &graph.requests()[0];
    assert_eq!(req.method, reqwest::Method::POST);
    assert_eq!(req.path, "me/sendMail");
    let body = req.body.clone().unwrap();
    assert_eq!(body["message"]["body"]["contentType"], "HTML");
    assert_eq!(body["message"]["importance"], "high");
    assert_eq!(body["message"]["toRecipients"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["message"]["ccRecipients"][0]["emailAddress"]["address"],
        "carol@contoso.com"
    );
    assert_eq!(body["saveToSentItems"], true);
}

#[tokio::test]
async fn send_email_requires_recipients() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(Value::Null)));
    let result = connector(graph.clone())
        .call_tool(call("send_email", json!({"subject": "Hi", "body": "x"})))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert_eq!(graph.calls(), 0);
}

#[tokio::test]
async fn move_emails_reports_partial_failures() {
    let graph = Arc::new(ScriptedGraph::new(|req| {
        if req.path.starts_with("me/messages/bad") {
            Err(ConnectorError::Upstream {
                status: 404,
                message: "not found".into(),
            })
        } else {
            Ok(json!({"id": "moved"}))
        }
    }));
    let result = connector(graph.clone())
        .call_tool(call(
            "move_emails",
            json!({"emailIds": "m1,bad,m2", "targetFolder": "archive"}),
        ))
        .await
        .unwrap();

    let data = result.structured_content.clone().unwrap();
    assert_eq!(data["moved"], json!(["m1", "m2"]));
    assert_eq!(data["failed"][0]["id"], "bad");
    assert_eq!(data["destination"], "archive");
    assert!(text_of(&result).starts_with("Moved 2 of 3 email(s)"));
    assert_eq!(graph.requests()[0].body.clone().unwrap()["destinationId"], "archive");
}

#[tokio::test]
async fn create_folder_refuses_duplicates() {
    let graph = Arc::new(ScriptedGraph::new(|_| {
        Ok(page(vec![folder("p", "Projects", 0)]))
    }));
    let result = connector(graph.clone())
        .call_tool(call("create_folder", json!({"name": "projects"})))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert!(graph.requests().iter().all(|r| r.method == reqwest::Method::GET));
}

#[tokio::test]
async fn create_folder_under_parent() {
    let graph = Arc::new(ScriptedGraph::new(|req| {
        if req.method == reqwest::Method::POST {
            Ok(json!({"id": "new-id", "displayName": "Receipts"}))
        } else {
            Ok(page(vec![]))
        }
    }));
    let result = connector(graph.clone())
        .call_tool(call(
            "create_folder",
            json!({"name": "Receipts", "parentFolder": "Inbox"}),
        ))
        .await
        .unwrap();

    assert_eq!(text_of(&result), "Created folder \"Receipts\" under \"Inbox\".");
    let post = graph
        .requests()
        .into_iter()
        .find(|r| r.method == reqwest::Method::POST)
        .unwrap();
    assert_eq!(post.path, "me/mailFolders/inbox/childFolders");
    assert_eq!(post.body.unwrap()["displayName"], "Receipts");
}

#[tokio::test]
async fn create_rule_needs_condition_and_action() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(page(vec![]))));
    let result = connector(graph.clone())
        .call_tool(call(
            "create_rule",
            json!({"name": "Bills", "fromAddresses": "billing@contoso.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert!(text_of(&result).contains("action"));
}

#[tokio::test]
async fn create_rule_appends_after_highest_sequence() {
    let graph = Arc::new(ScriptedGraph::new(|req| {
        if req.method == reqwest::Method::POST {
            let mut created = req.body.clone().unwrap();
            created["id"] = json!("rule-new");
            Ok(created)
        } else {
            Ok(page(vec![
                json!({"id": "r1", "displayName": "A", "sequence": 1}),
                json!({"id": "r4", "displayName": "B", "sequence": 4}),
            ]))
        }
    }));
    let result = connector(graph.clone())
        .call_tool(call(
            "create_rule",
            json!({
                "name": "Bills",
                "containsSubject": "invoice",
                "markAsRead": true
            }),
        ))
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(false));
    let post = graph
        .requests()
        .into_iter()
        .find(|r| r.method == reqwest::Method::POST)
        .unwrap();
    assert_eq!(post.path, "me/mailFolders/inbox/messageRules");
    let body = post.body.unwrap();
    assert_eq!(body["sequence"], 5);
    assert_eq!(body["isEnabled"], true);
    assert_eq!(body["conditions"]["subjectContains"], json!(["invoice"]));
    assert_eq!(body["actions"]["markAsRead"], true);
}

#[tokio::test]
async fn list_events_asks_for_configured_time_zone() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(page(vec![]))));
    let result = connector(graph.clone())
        .call_tool(call("list_events", json!({"count": 3})))
        .await
        .unwrap();

    assert_eq!(text_of(&result), "No upcoming events.");
    let req = &graph.requests()[0];
    assert_eq!(req.path, "me/calendar/events");
    assert_eq!(req.header("Prefer"), Some("outlook.timezone=\"UTC\""));
    assert!(req.query.get(FILTER).unwrap().starts_with("start/dateTime ge '"));
}

#[tokio::test]
async fn create_event_rejects_reversed_times() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(Value::Null)));
    let result = connector(graph.clone())
        .call_tool(call(
            "create_event",
            json!({"subject": "Review", "start": "2024-05-01T10:00", "end": "2024-05-01T09:00"}),
        ))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert_eq!(graph.calls(), 0);
}

#[tokio::test]
async fn create_rule_rejects_oversized_sequence() {
    let graph = Arc::new(ScriptedGraph::new(|_| Ok(page(vec![]))));
    let result = connector(graph.clone())
        .call_tool(call(
            "create_rule",
            json!({
                "name": "Bills",
                "containsSubject": "invoice",
                "markAsRead": true,
                "sequence": 4_294_967_297u64
            }),
        ))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert!(text_of(&result).contains("sequence"));
    assert!(graph
        .requests()
        .iter()
        .all(|r| r.method != reqwest::Method::POST));
}
