//! Ranked-retrieval planning and the host-facing search boundary.
//!
//! The planner turns a [`SearchRequest`] into two parameterized statements in
//! the active dialect: the ranked, paginated id query and its clone-and-count
//! twin. Predicates OR-combine across the columns one keyword resolves to and
//! AND-combine across keyword entries; scores are the sum of every
//! contributing per-field rank term.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::search::dao::Dao;
use crate::search::dialect::RankingDialect;
use crate::search::schema::TABLE_NAME;

/// Logical search-field identifiers exposed to the host search pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Author,
    Title,
    Abstract,
    Galley,
    Discipline,
    Subject,
    Keyword,
    Type,
    Coverage,
    /// Generic query matched against every indexed column; unknown field tags
    /// resolve here as well.
    All,
}

/// Every indexed column, in the order an unmapped tag searches them.
const ALL_COLUMNS: [&str; 9] = [
    "authors",
    "title",
    "abstract",
    "galley_text",
    "disciplines",
    "subjects",
    "keywords",
    "type",
    "coverage",
];

impl SearchField {
    /// The single column this field maps to, or `None` for the all-column
    /// union.
    pub fn column(self) -> Option<&'static str> {
        match self {
            SearchField::Author => Some("authors"),
            SearchField::Title => Some("title"),
            SearchField::Abstract => Some("abstract"),
            SearchField::Galley => Some("galley_text"),
            SearchField::Discipline => Some("disciplines"),
            SearchField::Subject => Some("subjects"),
            SearchField::Keyword => Some("keywords"),
            SearchField::Type => Some("type"),
            SearchField::Coverage => Some("coverage"),
            SearchField::All => None,
        }
    }

    /// Resolve a host-supplied field tag; unknown tags search every column.
    pub fn from_tag(tag: &str) -> SearchField {
        match tag.to_ascii_lowercase().as_str() {
            "author" => SearchField::Author,
            "title" => SearchField::Title,
            "abstract" => SearchField::Abstract,
            "galley" => SearchField::Galley,
            "discipline" => SearchField::Discipline,
            "subject" => SearchField::Subject,
            "keyword" => SearchField::Keyword,
            "type" => SearchField::Type,
            "coverage" => SearchField::Coverage,
            _ => SearchField::All,
        }
    }

    fn resolve_columns(self) -> Vec<&'static str> {
        match self.column() {
            Some(column) => vec![column],
            None => ALL_COLUMNS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A ranked-retrieval request against the index.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Scope to one context, or search across all contexts.
    pub context_id: Option<i64>,
    /// Keyword queries keyed by field.
    pub keywords: BTreeMap<SearchField, String>,
    /// Requested sort key. Only `score` is supported; anything else falls
    /// back to score.
    pub order_by: Option<String>,
    pub order_dir: SortDirection,
    /// Submission ids never to return, regardless of match strength.
    pub exclude: Vec<i64>,
    /// 1-based page number; values below 1 clamp the offset to 0.
    pub page: i64,
    pub per_page: i64,
    pub published_from: Option<NaiveDate>,
    pub published_to: Option<NaiveDate>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            context_id: None,
            keywords: BTreeMap::new(),
            order_by: None,
            order_dir: SortDirection::Desc,
            exclude: Vec::new(),
            page: 1,
            per_page: 25,
            published_from: None,
            published_to: None,
        }
    }
}

/// A bind parameter of a planned statement, in bind order.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Text(String),
}

/// The two statements a request compiles to.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub sql: String,
    pub params: Vec<Param>,
    pub count_sql: String,
    pub count_params: Vec<Param>,
}

struct Placeholders<'a> {
    dialect: &'a dyn RankingDialect,
    n: usize,
}

impl<'a> Placeholders<'a> {
    fn new(dialect: &'a dyn RankingDialect) -> Self {
        Self { dialect, n: 0 }
    }

    fn next(&mut self) -> String {
        self.n += 1;
        self.dialect.placeholder(self.n)
    }
}

/// Compile a request into its ranked statement and its count twin.
pub fn plan_search(dialect: &dyn RankingDialect, request: &SearchRequest) -> SearchPlan {
    let (sql, params) = compose(dialect, request, true);
    let (count_sql, count_params) = compose(dialect, request, false);
    SearchPlan { sql, params, count_sql, count_params }
}

/// Build one statement. `ranked` selects ids with scores, ordering and
/// pagination; otherwise a bare `COUNT(*)` over the same filters.
///
/// Placeholders are allocated in textual order so the parameter list binds
/// positionally on both engines: score terms first (ranked only), then the
/// filter predicates, then pagination.
fn compose(dialect: &dyn RankingDialect, request: &SearchRequest, ranked: bool) -> (String, Vec<Param>) {
    let mut ph = Placeholders::new(dialect);
    let mut params: Vec<Param> = Vec::new();

    let entries: Vec<(SearchField, &str)> = request
        .keywords
        .iter()
        .map(|(field, query)| (*field, query.trim()))
        .filter(|(_, query)| !query.is_empty())
        .collect();

    let mut sql = if ranked {
        let mut score_terms: Vec<String> = Vec::new();
        for (field, query) in &entries {
            for column in field.resolve_columns() {
                let placeholder = ph.next();
                score_terms.push(dialect.score_term(&format!("fts.{column}"), &placeholder));
                params.push(Param::Text((*query).to_string()));
            }
        }
        if score_terms.is_empty() {
            score_terms.push("1".to_string());
        }
        format!(
            "SELECT fts.submission_id, {} AS score FROM {TABLE_NAME} AS fts",
            score_terms.join(" + ")
        )
    } else {
        format!("SELECT COUNT(*) FROM {TABLE_NAME} AS fts")
    };

    if request.published_from.is_some() || request.published_to.is_some() {
        sql.push_str(" JOIN submissions AS s ON s.submission_id = fts.submission_id");
        sql.push_str(" JOIN publications AS p ON p.publication_id = s.current_publication_id");
    }

    let mut conditions: Vec<String> = Vec::new();

    if let Some(context_id) = request.context_id {
        conditions.push(format!("fts.context_id = {}", ph.next()));
        params.push(Param::Int(context_id));
    }

    if !request.exclude.is_empty() {
        let placeholders: Vec<String> = request.exclude.iter().map(|_| ph.next()).collect();
        conditions.push(format!("fts.submission_id NOT IN ({})", placeholders.join(", ")));
        params.extend(request.exclude.iter().map(|&id| Param::Int(id)));
    }

    for (field, query) in &entries {
        let mut predicates: Vec<String> = Vec::new();
        for column in field.resolve_columns() {
            let placeholder = ph.next();
            predicates.push(dialect.match_predicate(&format!("fts.{column}"), &placeholder));
            params.push(Param::Text((*query).to_string()));
        }
        conditions.push(format!("({})", predicates.join(" OR ")));
    }

    if let Some(from) = request.published_from {
        conditions.push(format!("p.date_published >= {}", ph.next()));
        params.push(Param::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = request.published_to {
        conditions.push(format!("p.date_published <= {}", ph.next()));
        params.push(Param::Text(to.format("%Y-%m-%d").to_string()));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if ranked {
        sql.push_str(&format!(" ORDER BY score {}", request.order_dir.as_sql()));
        let offset = ((request.page - 1) * request.per_page).max(0);
        sql.push_str(&format!(" LIMIT {} OFFSET {}", ph.next(), ph.next()));
        params.push(Param::Int(request.per_page));
        params.push(Param::Int(offset));
    }

    (sql, params)
}

/// Outcome of a ranked-retrieval request at the host boundary.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedResults {
    pub submission_ids: Vec<i64>,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Message shown to callers when retrieval fails internally.
pub const SEARCH_UNAVAILABLE_MESSAGE: &str =
    "The search service is currently unavailable. Please try again later.";

/// Host-facing search boundary: never fails, never returns partial results.
#[derive(Clone)]
pub struct SearchService {
    dao: Dao,
}

impl SearchService {
    pub fn new(dao: Dao) -> Self {
        Self { dao }
    }

    /// Execute a request; any internal failure is logged and converted into
    /// the generic message with empty results and zero total.
    pub async fn retrieve_results(&self, request: &SearchRequest) -> RetrievedResults {
        match self.dao.search(request).await {
            Ok((submission_ids, total)) => RetrievedResults { submission_ids, total, error: None },
            Err(err) => {
                error!("search request failed: {err}");
                RetrievedResults {
                    submission_ids: Vec::new(),
                    total: 0,
                    error: Some(SEARCH_UNAVAILABLE_MESSAGE.to_string()),
                }
            }
        }
    }
}
