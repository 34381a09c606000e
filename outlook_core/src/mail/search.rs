//! Progressive email search.
//!
//! Graph supports several incompatible ways to query messages (`$filter`,
//! KQL `$search`, and `$orderby` only with some of them). A request is tried
//! against an ordered table of [`Strategy`] descriptors; the first one that
//! returns messages wins. Errors from a strategy count as "no results" and the
//! cascade moves on, except authentication failures which abort it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::query::{
    add_boolean_filters, add_boolean_filters_to_filter, escape_odata, kql_clause, kql_text,
    FilterTerms,
};
use super::{Email, EMAIL_SELECT_FIELDS};
use crate::error::ConnectorError;
use crate::graph::{GraphApi, GraphRequest, QueryParams, COUNT, FILTER, ORDER_BY, SEARCH, SELECT, TOP};

/// Graph's page size ceiling for message queries.
pub const MAX_PAGE_SIZE: usize = 50;

const NEWEST_FIRST: &str = "receivedDateTime desc";

/// Free-text and field search terms. Blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTerms {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermField {
    Query,
    From,
    To,
    Subject,
}

impl TermField {
    fn kql_name(self) -> &'static str {
        match self {
            TermField::Query => "query",
            TermField::From => "from",
            TermField::To => "to",
            TermField::Subject => "subject",
        }
    }
}

impl SearchTerms {
    pub fn get(&self, field: TermField) -> Option<&str> {
        let value = match field {
            TermField::Query => &self.query,
            TermField::From => &self.from,
            TermField::To => &self.to,
            TermField::Subject => &self.subject,
        };
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        [TermField::Query, TermField::From, TermField::To, TermField::Subject]
            .iter()
            .all(|f| self.get(*f).is_none())
    }
}

/// Parameters and headers for one strategy's request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub params: QueryParams,
    pub headers: Vec<(&'static str, &'static str)>,
}

impl PlannedQuery {
    fn new(params: QueryParams) -> Self {
        Self {
            params,
            headers: Vec::new(),
        }
    }
}

/// One entry of the cascade. `terminal` strategies end the search with
/// whatever they return, empty or not.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub tag: &'static str,
    pub applies: fn(&SearchTerms, &FilterTerms) -> bool,
    pub build: fn(&SearchTerms, &FilterTerms, usize) -> PlannedQuery,
    pub terminal: bool,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("tag", &self.tag)
            .field("terminal", &self.terminal)
            .finish()
    }
}

pub const DEFAULT_STRATEGIES: &[Strategy] = &[
    Strategy {
        tag: "filter-from-exact",
        applies: sender_is_address,
        build: sender_exact,
        terminal: false,
    },
    Strategy {
        tag: "filter-subject-prefix",
        applies: has_subject,
        build: subject_prefix,
        terminal: false,
    },
    Strategy {
        tag: "kql-combined-search",
        applies: has_any_term,
        build: combined_kql,
        terminal: false,
    },
    Strategy {
        tag: "kql-single-subject",
        applies: has_subject,
        build: single_subject,
        terminal: false,
    },
    Strategy {
        tag: "kql-single-from",
        applies: has_from,
        build: single_from,
        terminal: false,
    },
    Strategy {
        tag: "kql-single-to",
        applies: has_to,
        build: single_to,
        terminal: false,
    },
    Strategy {
        tag: "kql-single-query",
        applies: has_query,
        build: single_query,
        terminal: false,
    },
    Strategy {
        tag: "filters-only",
        applies: has_boolean_filters,
        build: filters_only,
        terminal: true,
    },
];

fn sender_is_address(t: &SearchTerms, _: &FilterTerms) -> bool {
    t.get(TermField::From).is_some_and(|f| f.contains('@'))
}

fn has_subject(t: &SearchTerms, _: &FilterTerms) -> bool {
    t.get(TermField::Subject).is_some()
}

fn has_from(t: &SearchTerms, _: &FilterTerms) -> bool {
    t.get(TermField::From).is_some()
}

fn has_to(t: &SearchTerms, _: &FilterTerms) -> bool {
    t.get(TermField::To).is_some()
}

fn has_query(t: &SearchTerms, _: &FilterTerms) -> bool {
    t.get(TermField::Query).is_some()
}

fn has_any_term(t: &SearchTerms, _: &FilterTerms) -> bool {
    !t.is_empty()
}

fn has_boolean_filters(_: &SearchTerms, f: &FilterTerms) -> bool {
    !f.is_empty()
}

fn base_params(top: usize) -> QueryParams {
    QueryParams::new()
        .with(TOP, top.to_string())
        .with(SELECT, EMAIL_SELECT_FIELDS)
}

/// Exact sender address. Advanced query mode (`$count` plus the eventual
/// consistency header) is required for filtering on `sender`, and that mode
/// does not reliably accept `$orderby`, so none is sent.
fn sender_exact(t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    let from = t.get(TermField::From).unwrap_or_default().to_lowercase();
    let params = base_params(top)
        .with(
            FILTER,
            format!("sender/emailAddress/address eq '{}'", escape_odata(&from)),
        )
        .with(COUNT, "true");
    let mut planned = PlannedQuery::new(add_boolean_filters_to_filter(params, f));
    planned.headers.push(("ConsistencyLevel", "eventual"));
    planned
}

fn subject_prefix(t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    let subject = t.get(TermField::Subject).unwrap_or_default();
    let params = base_params(top)
        .with(
            FILTER,
            format!("startswith(subject,'{}')", escape_odata(subject)),
        )
        .with(ORDER_BY, NEWEST_FIRST);
    PlannedQuery::new(add_boolean_filters_to_filter(params, f))
}

fn combined_kql(t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    let mut parts: Vec<String> = Vec::new();
    if let Some(q) = t.get(TermField::Query) {
        parts.push(q.to_string());
    }
    for field in [TermField::Subject, TermField::From, TermField::To] {
        if let Some(v) = t.get(field) {
            parts.push(kql_clause(field.kql_name(), v));
        }
    }
    let params = base_params(top)
        .with(SEARCH, parts.join(" "))
        .with(ORDER_BY, NEWEST_FIRST);
    PlannedQuery::new(add_boolean_filters(params, f))
}

fn single_term(field: TermField, t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    let value = t.get(field).unwrap_or_default();
    let search = match field {
        TermField::Query => kql_text(value),
        other => kql_clause(other.kql_name(), value),
    };
    let params = base_params(top)
        .with(SEARCH, search)
        .with(ORDER_BY, NEWEST_FIRST);
    PlannedQuery::new(add_boolean_filters(params, f))
}

fn single_subject(t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    single_term(TermField::Subject, t, f, top)
}

fn single_from(t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    single_term(TermField::From, t, f, top)
}

fn single_to(t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    single_term(TermField::To, t, f, top)
}

fn single_query(t: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    single_term(TermField::Query, t, f, top)
}

fn filters_only(_: &SearchTerms, f: &FilterTerms, top: usize) -> PlannedQuery {
    let params = base_params(top).with(ORDER_BY, NEWEST_FIRST);
    PlannedQuery::new(add_boolean_filters(params, f))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Api { status: u16 },
    Decode,
    Other,
}

impl FailureKind {
    fn classify(err: &ConnectorError) -> Self {
        match err {
            ConnectorError::HttpRequest(_) | ConnectorError::Timeout(_) => FailureKind::Transport,
            ConnectorError::Upstream { status, .. } => FailureKind::Api { status: *status },
            ConnectorError::SerdeJson(_) | ConnectorError::ParseError => FailureKind::Decode,
            _ => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Found { count: usize },
    Empty,
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchAttempt {
    pub strategy: &'static str,
    pub outcome: AttemptOutcome,
}

/// Result of one search call. `failed` is set when no strategy produced
/// results and the filters-only fallback did not complete.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub items: Vec<Email>,
    pub attempts: Vec<SearchAttempt>,
    pub failed: bool,
}

impl SearchReport {
    /// Strategy tags in the order they were tried.
    pub fn attempt_log(&self) -> Vec<&'static str> {
        self.attempts.iter().map(|a| a.strategy).collect()
    }

    pub fn winning_strategy(&self) -> Option<&'static str> {
        self.attempts
            .iter()
            .find(|a| matches!(a.outcome, AttemptOutcome::Found { .. }))
            .map(|a| a.strategy)
    }
}

pub struct ProgressiveSearch<'a> {
    api: &'a dyn GraphApi,
    strategies: &'a [Strategy],
}

impl<'a> ProgressiveSearch<'a> {
    pub fn new(api: &'a dyn GraphApi) -> Self {
        Self::with_strategies(api, DEFAULT_STRATEGIES)
    }

    pub fn with_strategies(api: &'a dyn GraphApi, strategies: &'a [Strategy]) -> Self {
        Self { api, strategies }
    }

    /// Run the cascade against a messages `endpoint`. Only authentication
    /// failures are returned as errors.
    pub async fn search(
        &self,
        endpoint: &str,
        terms: &SearchTerms,
        filters: &FilterTerms,
        max_results: usize,
    ) -> Result<SearchReport, ConnectorError> {
        let max_results = max_results.max(1);
        let top = max_results.min(MAX_PAGE_SIZE);
        let mut attempts: Vec<SearchAttempt> = Vec::new();

        for strategy in self.strategies {
            if !(strategy.applies)(terms, filters) {
                continue;
            }
            let planned = (strategy.build)(terms, filters, top);
            debug!(strategy = strategy.tag, params = ?planned.params, "trying search strategy");

            let mut request = GraphRequest::get(endpoint).with_query(planned.params);
            for (name, value) in planned.headers {
                request = request.with_header(name, value);
            }

            match self.api.send_paginated(request, max_results).await {
                Ok(values) => {
                    let items = Email::from_values(values);
                    if !items.is_empty() {
                        info!(strategy = strategy.tag, count = items.len(), "search strategy matched");
                        attempts.push(SearchAttempt {
                            strategy: strategy.tag,
                            outcome: AttemptOutcome::Found { count: items.len() },
                        });
                        return Ok(SearchReport {
                            items,
                            attempts,
                            failed: false,
                        });
                    }
                    attempts.push(SearchAttempt {
                        strategy: strategy.tag,
                        outcome: AttemptOutcome::Empty,
                    });
                    if strategy.terminal {
                        return Ok(SearchReport {
                            items,
                            attempts,
                            failed: false,
                        });
                    }
                }
                Err(e @ ConnectorError::Authentication(_)) => return Err(e),
                Err(e) => {
                    warn!(strategy = strategy.tag, error = %e, "search strategy failed, falling through");
                    attempts.push(SearchAttempt {
                        strategy: strategy.tag,
                        outcome: AttemptOutcome::Failed {
                            kind: FailureKind::classify(&e),
                            message: e.to_string(),
                        },
                    });
                }
            }
        }

        info!(tried = attempts.len(), "all search strategies exhausted");
        Ok(SearchReport {
            items: Vec::new(),
            attempts,
            failed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(query: Option<&str>, from: Option<&str>, to: Option<&str>, subject: Option<&str>) -> SearchTerms {
        SearchTerms {
            query: query.map(String::from),
            from: from.map(String::from),
            to: to.map(String::from),
            subject: subject.map(String::from),
        }
    }

    fn applicable(t: &SearchTerms, f: &FilterTerms) -> Vec<&'static str> {
        DEFAULT_STRATEGIES
            .iter()
            .filter(|s| (s.applies)(t, f))
            .map(|s| s.tag)
            .collect()
    }

    #[test]
    fn sender_exact_lowercases_and_escapes() {
        let t = terms(None, Some("Pat.O'Brien@Contoso.com"), None, None);
        let planned = sender_exact(&t, &FilterTerms::default(), 10);
        assert_eq!(
            planned.params.get(FILTER),
            Some("sender/emailAddress/address eq 'pat.o''brien@contoso.com'")
        );
        assert_eq!(planned.params.get(COUNT), Some("true"));
        assert_eq!(planned.params.get(ORDER_BY), None);
        assert_eq!(planned.headers, vec![("ConsistencyLevel", "eventual")]);
    }

    #[test]
    fn sender_exact_conjoins_boolean_filters() {
        let t = terms(None, Some("a@b.com"), None, None);
        let f = FilterTerms {
            has_attachments: true,
            unread_only: true,
        };
        let planned = sender_exact(&t, &f, 10);
        assert_eq!(
            planned.params.get(FILTER),
            Some("(sender/emailAddress/address eq 'a@b.com') and hasAttachments eq true and isRead eq false")
        );
    }

    #[test]
    fn subject_prefix_is_ordered_and_escaped() {
        let t = terms(None, None, None, Some("O'Brien's report"));
        let planned = subject_prefix(&t, &FilterTerms::default(), 25);
        assert_eq!(
            planned.params.get(FILTER),
            Some("startswith(subject,'O''Brien''s report')")
        );
        assert_eq!(planned.params.get(ORDER_BY), Some(NEWEST_FIRST));
        assert_eq!(planned.params.get(TOP), Some("25"));
        assert!(planned.headers.is_empty());
    }

    #[test]
    fn combined_kql_joins_all_terms() {
        let t = terms(Some("budget"), Some("Ann"), Some("bob@x.com"), Some("Q3"));
        let unread = FilterTerms {
            unread_only: true,
            ..Default::default()
        };
        let planned = combined_kql(&t, &unread, 10);
        assert_eq!(
            planned.params.get(SEARCH),
            Some("budget subject:\"Q3\" from:\"Ann\" to:\"bob@x.com\"")
        );
        assert_eq!(planned.params.get(FILTER), Some("isRead eq false"));
        assert_eq!(planned.params.get(SELECT), Some(EMAIL_SELECT_FIELDS));
    }

    #[test]
    fn single_query_is_bare_quoted_text() {
        let t = terms(Some("offsite agenda"), None, None, None);
        let planned = single_query(&t, &FilterTerms::default(), 10);
        assert_eq!(planned.params.get(SEARCH), Some("\"offsite agenda\""));
        let t = terms(None, None, Some("team@x.com"), None);
        assert_eq!(
            single_to(&t, &FilterTerms::default(), 10).params.get(SEARCH),
            Some("to:\"team@x.com\"")
        );
    }

    #[test]
    fn filters_only_has_no_text_predicate() {
        let f = FilterTerms {
            unread_only: true,
            ..Default::default()
        };
        let planned = filters_only(&SearchTerms::default(), &f, 10);
        assert_eq!(planned.params.get(FILTER), Some("isRead eq false"));
        assert_eq!(planned.params.get(SEARCH), None);
        assert_eq!(planned.params.get(ORDER_BY), Some(NEWEST_FIRST));
    }

    #[test]
    fn preconditions_select_strategies() {
        let none = FilterTerms::default();
        assert_eq!(
            applicable(&terms(None, Some("a@b.com"), None, None), &none),
            vec!["filter-from-exact", "kql-combined-search", "kql-single-from"]
        );
        assert_eq!(
            applicable(&terms(None, Some("Ann"), None, Some("Hi")), &none),
            vec![
                "filter-subject-prefix",
                "kql-combined-search",
                "kql-single-subject",
                "kql-single-from"
            ]
        );
        let unread = FilterTerms {
            unread_only: true,
            ..Default::default()
        };
        assert_eq!(
            applicable(&SearchTerms::default(), &unread),
            vec!["filters-only"]
        );
        assert!(applicable(&terms(Some("  "), None, None, None), &none).is_empty());
    }
}
