//! OData parameter construction for mail queries.

use serde::{Deserialize, Serialize};

use crate::graph::{QueryParams, FILTER};

/// Boolean message filters that can be combined with any search strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterTerms {
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub unread_only: bool,
}

impl FilterTerms {
    pub fn is_empty(&self) -> bool {
        !self.has_attachments && !self.unread_only
    }

    /// The applicable clauses joined with `and`, or `None` when no filter is set.
    pub fn clause(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if self.has_attachments {
            clauses.push("hasAttachments eq true");
        }
        if self.unread_only {
            clauses.push("isRead eq false");
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" and "))
        }
    }
}

/// OData string-literal escaping: a single quote becomes two.
pub fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}

/// `field:"value"` clause for `$search`. Embedded double quotes are passed
/// through untouched.
pub fn kql_clause(field: &str, value: &str) -> String {
    format!("{}:\"{}\"", field, value)
}

/// Bare quoted free text for `$search`.
pub fn kql_text(value: &str) -> String {
    format!("\"{}\"", value)
}

/// Set `$filter` to the boolean clauses, for parameter sets that carry no
/// filter of their own (the `$search` strategies). Any existing `$filter` is
/// replaced.
pub fn add_boolean_filters(mut params: QueryParams, filters: &FilterTerms) -> QueryParams {
    if let Some(clause) = filters.clause() {
        params.set(FILTER, clause);
    }
    params
}

/// Conjoin the boolean clauses with an existing `$filter`, parenthesising the
/// original so its precedence survives.
pub fn add_boolean_filters_to_filter(mut params: QueryParams, filters: &FilterTerms) -> QueryParams {
    let Some(clause) = filters.clause() else {
        return params;
    };
    let merged = match params.get(FILTER) {
        Some(existing) if !existing.trim().is_empty() => format!("({}) and {}", existing, clause),
        _ => clause,
    };
    params.set(FILTER, merged);
    params
}
