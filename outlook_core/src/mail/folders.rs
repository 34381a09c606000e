//! Mapping human folder names onto mailbox folders.
//!
//! Resolution goes from cheapest to most permissive: empty input and
//! well-known aliases need no remote call; anything else is looked up with an
//! exact server-side filter, then a case-insensitive scan of the top-level
//! folders, then a scan of the whole tree (top level plus one level of
//! children). Nothing is cached between resolutions.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::query::escape_odata;
use super::{messages_endpoint, INBOX_ENDPOINT, WELL_KNOWN_FOLDERS};
use crate::error::ConnectorError;
use crate::graph::{GraphApi, GraphRequest, QueryParams, FILTER, SELECT, TOP};

/// Page size cap for folder listings.
pub const FOLDER_PAGE_LIMIT: usize = 100;

const FOLDER_SELECT_FIELDS: &str =
    "id,displayName,parentFolderId,childFolderCount,totalItemCount,unreadItemCount";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub child_folder_count: u32,
    #[serde(default)]
    pub total_item_count: Option<u64>,
    #[serde(default)]
    pub unread_item_count: Option<u64>,
}

impl Folder {
    fn matches(&self, wanted_lower: &str) -> bool {
        self.display_name.to_lowercase() == wanted_lower
    }
}

/// Graph well-known folder name for a user alias (`sent` -> `sentitems`).
pub fn well_known_name(alias: &str) -> Option<&'static str> {
    let lower = alias.trim().to_lowercase();
    WELL_KNOWN_FOLDERS
        .iter()
        .find(|(a, _)| *a == lower)
        .map(|(_, name)| *name)
}

/// Treat a failed lookup step as "no match", except for auth failures which
/// no later step can fix.
fn absorb<T>(step: &str, result: Result<T, ConnectorError>) -> Result<Option<T>, ConnectorError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e @ ConnectorError::Authentication(_)) => Err(e),
        Err(e) => {
            warn!(step, error = %e, "folder lookup step failed, continuing");
            Ok(None)
        }
    }
}

pub struct FolderResolver<'a> {
    api: &'a dyn GraphApi,
}

impl<'a> FolderResolver<'a> {
    pub fn new(api: &'a dyn GraphApi) -> Self {
        Self { api }
    }

    /// Messages endpoint for a folder name or alias. `None` or blank means the inbox.
    pub async fn resolve(&self, name: Option<&str>) -> Result<String, ConnectorError> {
        let name = match name.map(str::trim) {
            None | Some("") => return Ok(INBOX_ENDPOINT.to_string()),
            Some(n) => n,
        };
        if let Some(known) = well_known_name(name) {
            return Ok(messages_endpoint(known));
        }
        let folder = self.find_folder(name).await?;
        Ok(messages_endpoint(&folder.id))
    }

    /// Folder id (or Graph well-known name) for a folder name or alias.
    pub async fn resolve_folder_id(&self, name: &str) -> Result<String, ConnectorError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok("inbox".to_string());
        }
        if let Some(known) = well_known_name(name) {
            return Ok(known.to_string());
        }
        Ok(self.find_folder(name).await?.id)
    }

    /// Locate a folder by display name anywhere in the (two-level) tree.
    pub async fn find_folder(&self, name: &str) -> Result<Folder, ConnectorError> {
        if let Some(Some(folder)) = absorb("exact", self.exact_top_level(name).await)? {
            debug!(folder = %folder.id, "resolved folder by exact match");
            return Ok(folder);
        }

        let wanted = name.to_lowercase();
        if let Some(top) = absorb("top-level scan", self.list_folders(None).await)? {
            if let Some(folder) = top.into_iter().find(|f| f.matches(&wanted)) {
                debug!(folder = %folder.id, "resolved folder case-insensitively");
                return Ok(folder);
            }
        }

        if let Some(all) = absorb("tree scan", self.list_all_folders().await)? {
            if let Some(folder) = all.into_iter().find(|f| f.matches(&wanted)) {
                debug!(folder = %folder.id, "resolved folder from full tree");
                return Ok(folder);
            }
        }

        Err(ConnectorError::FolderNotFound(name.to_string()))
    }

    async fn exact_top_level(&self, name: &str) -> Result<Option<Folder>, ConnectorError> {
        let query = QueryParams::new()
            .with(FILTER, format!("displayName eq '{}'", escape_odata(name)))
            .with(SELECT, FOLDER_SELECT_FIELDS);
        let resp = self
            .api
            .send(GraphRequest::get("me/mailFolders").with_query(query))
            .await?;
        Ok(parse_folders(&resp).into_iter().next())
    }

    /// One page (at most 100) of folders under `parent_id`, or the top level.
    pub async fn list_folders(&self, parent_id: Option<&str>) -> Result<Vec<Folder>, ConnectorError> {
        let path = match parent_id {
            Some(id) => format!("me/mailFolders/{}/childFolders", urlencoding::encode(id)),
            None => "me/mailFolders".to_string(),
        };
        let query = QueryParams::new()
            .with(TOP, FOLDER_PAGE_LIMIT.to_string())
            .with(SELECT, FOLDER_SELECT_FIELDS);
        let resp = self
            .api
            .send(GraphRequest::get(path).with_query(query))
            .await?;
        Ok(parse_folders(&resp))
    }

    /// Top-level folders followed by their direct children. Child listings are
    /// fetched concurrently; a parent whose children cannot be listed is skipped.
    pub async fn list_all_folders(&self) -> Result<Vec<Folder>, ConnectorError> {
        let top = self.list_folders(None).await?;
        let parents: Vec<&Folder> = top.iter().filter(|f| f.child_folder_count > 0).collect();

        let children = join_all(parents.iter().map(|p| self.list_folders(Some(&p.id)))).await;

        let mut all = top.clone();
        for (parent, result) in parents.iter().zip(children) {
            match result {
                Ok(mut kids) => {
                    for kid in kids.iter_mut() {
                        if kid.parent_folder_id.is_none() {
                            kid.parent_folder_id = Some(parent.id.clone());
                        }
                    }
                    all.extend(kids);
                }
                Err(e @ ConnectorError::Authentication(_)) => return Err(e),
                Err(e) => warn!(parent = %parent.display_name, error = %e, "child folder listing failed"),
            }
        }
        Ok(all)
    }

    /// Direct child of `parent_id` (or of the root) with this display name.
    pub async fn find_child(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<Folder>, ConnectorError> {
        let wanted = name.to_lowercase();
        Ok(self
            .list_folders(parent_id)
            .await?
            .into_iter()
            .find(|f| f.matches(&wanted)))
    }
}

fn parse_folders(resp: &serde_json::Value) -> Vec<Folder> {
    resp.get("value")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<Folder>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_case_insensitive() {
        assert_eq!(well_known_name("Inbox"), Some("inbox"));
        assert_eq!(well_known_name(" SENT "), Some("sentitems"));
        assert_eq!(well_known_name("Deleted"), Some("deleteditems"));
        assert_eq!(well_known_name("junk"), Some("junkemail"));
        assert_eq!(well_known_name("Invoices"), None);
    }

    #[test]
    fn parse_skips_entries_without_id() {
        let resp = serde_json::json!({"value": [
            {"id": "f1", "displayName": "Projects", "childFolderCount": 2},
            {"displayName": "broken"}
        ]});
        let folders = parse_folders(&resp);
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].child_folder_count, 2);
        assert!(folders[0].parent_folder_id.is_none());
    }
}
