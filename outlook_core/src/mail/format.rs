//! Plain-text renderings of mail objects for tool output.

use std::collections::{HashMap, HashSet};

use super::search::{AttemptOutcome, SearchReport};
use super::{Email, Folder, Recipient};
use crate::utils::html_to_text;

fn display_recipient(r: &Recipient) -> String {
    let name = r.email_address.name.as_deref().unwrap_or("").trim();
    let addr = r.email_address.address.as_deref().unwrap_or("").trim();
    match (name.is_empty(), addr.is_empty()) {
        (false, false) if !name.eq_ignore_ascii_case(addr) => format!("{} ({})", name, addr),
        (false, _) => name.to_string(),
        (true, false) => addr.to_string(),
        (true, true) => "Unknown".to_string(),
    }
}

fn display_recipients(list: &[Recipient]) -> String {
    list.iter()
        .map(display_recipient)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `2024-05-01T09:30:00Z` -> `2024-05-01 09:30`.
fn short_timestamp(raw: Option<&str>) -> String {
    match raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => raw.unwrap_or("unknown date").to_string(),
    }
}

pub fn format_email_list(emails: &[Email]) -> String {
    let mut out = String::new();
    for (i, email) in emails.iter().enumerate() {
        let unread = if email.is_read == Some(false) { "[UNREAD] " } else { "" };
        let attach = if email.has_attachments == Some(true) { " [+attachments]" } else { "" };
        let from = email
            .from
            .as_ref()
            .map(display_recipient)
            .unwrap_or_else(|| "Unknown".to_string());
        out.push_str(&format!(
            "{}. {}{} - From: {}\n   Subject: {}{}\n   ID: {}\n",
            i + 1,
            unread,
            short_timestamp(email.received_date_time.as_deref()),
            from,
            email.subject.as_deref().unwrap_or("(no subject)"),
            attach,
            email.id
        ));
    }
    out
}

pub fn format_email_detail(email: &Email) -> String {
    let mut out = String::new();
    let from = email
        .from
        .as_ref()
        .map(display_recipient)
        .unwrap_or_else(|| "Unknown".to_string());
    out.push_str(&format!("From: {}\n", from));
    out.push_str(&format!("To: {}\n", display_recipients(&email.to_recipients)));
    if !email.cc_recipients.is_empty() {
        out.push_str(&format!("CC: {}\n", display_recipients(&email.cc_recipients)));
    }
    if !email.bcc_recipients.is_empty() {
        out.push_str(&format!("BCC: {}\n", display_recipients(&email.bcc_recipients)));
    }
    out.push_str(&format!(
        "Subject: {}\n",
        email.subject.as_deref().unwrap_or("(no subject)")
    ));
    out.push_str(&format!(
        "Date: {}\n",
        short_timestamp(email.received_date_time.as_deref())
    ));
    if let Some(importance) = email.importance.as_deref() {
        out.push_str(&format!("Importance: {}\n", importance));
    }
    out.push_str(&format!(
        "Has Attachments: {}\n\n",
        if email.has_attachments == Some(true) { "Yes" } else { "No" }
    ));

    let body = match &email.body {
        Some(b) if b.content_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("html")) => {
            html_to_text(b.content.as_deref().unwrap_or(""))
        }
        Some(b) => b.content.clone().unwrap_or_default(),
        None => email.body_preview.clone().unwrap_or_default(),
    };
    out.push_str(body.trim());
    out
}

/// Summary line for a search, suggesting simplification when every strategy failed.
pub fn format_search_summary(report: &SearchReport, folder_label: &str) -> String {
    if report.failed {
        let tried = report.attempt_log().join(", ");
        let mut msg = format!(
            "No emails found in {}. All search strategies were exhausted",
            folder_label
        );
        if !tried.is_empty() {
            msg.push_str(&format!(" (tried: {})", tried));
        }
        msg.push_str(
            ". Try fewer or simpler terms, a sender's full email address, or list_emails to browse the folder.",
        );
        return msg;
    }
    if report.items.is_empty() {
        return format!("No emails in {} match the given filters.", folder_label);
    }
    let strategy = report.winning_strategy().unwrap_or("unknown");
    format!(
        "Found {} email(s) in {} (strategy: {}):\n\n{}",
        report.items.len(),
        folder_label,
        strategy,
        format_email_list(&report.items)
    )
}

/// Per-attempt diagnostics, one line each.
pub fn format_attempts(report: &SearchReport) -> String {
    report
        .attempts
        .iter()
        .map(|a| match &a.outcome {
            AttemptOutcome::Found { count } => format!("{}: {} result(s)", a.strategy, count),
            AttemptOutcome::Empty => format!("{}: no results", a.strategy),
            AttemptOutcome::Failed { message, .. } => format!("{}: error - {}", a.strategy, message),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indented folder tree. Folders whose parent is not in the list are roots.
pub fn format_folder_tree(folders: &[Folder], include_counts: bool) -> String {
    let ids: HashSet<&str> = folders.iter().map(|f| f.id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&Folder>> = HashMap::new();
    let mut roots: Vec<&Folder> = Vec::new();
    for f in folders {
        match f.parent_folder_id.as_deref() {
            Some(p) if ids.contains(p) && p != f.id => children.entry(p).or_default().push(f),
            _ => roots.push(f),
        }
    }

    fn render(
        f: &Folder,
        depth: usize,
        include_counts: bool,
        children: &HashMap<&str, Vec<&Folder>>,
        out: &mut String,
    ) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&f.display_name);
        if include_counts {
            out.push_str(&format!(
                " - {} items, {} unread",
                f.total_item_count.unwrap_or(0),
                f.unread_item_count.unwrap_or(0)
            ));
        }
        out.push('\n');
        if let Some(kids) = children.get(f.id.as_str()) {
            for kid in kids {
                render(kid, depth + 1, include_counts, children, out);
            }
        }
    }

    let mut out = String::new();
    for root in roots {
        render(root, 0, include_counts, &children, &mut out);
    }
    out
}
