//! Mail core: folder resolution, query building and the progressive search planner.

pub mod folders;
pub mod format;
pub mod query;
pub mod search;

use serde::{Deserialize, Serialize};

pub use folders::{Folder, FolderResolver};
pub use query::{add_boolean_filters, add_boolean_filters_to_filter, FilterTerms};
pub use search::{ProgressiveSearch, SearchReport, SearchTerms};

/// Projection requested for message listings and searches.
pub const EMAIL_SELECT_FIELDS: &str =
    "id,subject,from,toRecipients,ccRecipients,receivedDateTime,bodyPreview,hasAttachments,importance,isRead";

/// Fields requested when reading a single message in full.
pub const EMAIL_DETAIL_FIELDS: &str =
    "id,subject,from,toRecipients,ccRecipients,bccRecipients,receivedDateTime,body,hasAttachments,importance,isRead,internetMessageHeaders";

pub const INBOX_ENDPOINT: &str = "me/mailFolders/inbox/messages";

/// Aliases users type for the default folders, with the Graph well-known name
/// each maps to.
pub const WELL_KNOWN_FOLDERS: &[(&str, &str)] = &[
    ("inbox", "inbox"),
    ("drafts", "drafts"),
    ("sent", "sentitems"),
    ("deleted", "deleteditems"),
    ("junk", "junkemail"),
    ("archive", "archive"),
];

/// Messages endpoint for a folder id or well-known name.
pub fn messages_endpoint(folder_id: &str) -> String {
    format!(
        "me/mailFolders/{}/messages",
        urlencoding::encode(folder_id)
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "emailAddress", default)]
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemBody {
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A message as returned by Graph for the selected fields. Everything except
/// `id` is optional because the projection varies between calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub cc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub bcc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub has_attachments: Option<bool>,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub is_read: Option<bool>,
}

impl Email {
    /// Parse Graph items, dropping any that do not carry an id.
    pub fn from_values(values: Vec<serde_json::Value>) -> Vec<Email> {
        values
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<Email>(v) {
                Ok(email) => Some(email),
                Err(e) => {
                    tracing::warn!("skipping malformed message: {}", e);
                    None
                }
            })
            .collect()
    }
}
