use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub mod host;
pub mod search;

pub use host::SqlHostRepository;

use search::{SearchError, SearchField, SearchRequest, SortDirection, DEFAULT_LEGACY_SEARCH_TABLES};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct Message {
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

// ============================================================================
// Host Read Model
// ============================================================================

/// Locale-keyed metadata values (locale → value).
pub type Localized = BTreeMap<String, String>;

/// Locale-keyed metadata lists (locale → values).
pub type LocalizedList = BTreeMap<String, Vec<String>>;

/// Submission workflow status as stored by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Queued,
    Published,
    Declined,
    Scheduled,
}

impl SubmissionStatus {
    pub const fn as_i64(self) -> i64 {
        match self {
            SubmissionStatus::Queued => 1,
            SubmissionStatus::Published => 3,
            SubmissionStatus::Declined => 4,
            SubmissionStatus::Scheduled => 5,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            3 => SubmissionStatus::Published,
            4 => SubmissionStatus::Declined,
            5 => SubmissionStatus::Scheduled,
            _ => SubmissionStatus::Queued,
        }
    }
}

/// A tenant/venue scoping submissions.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContextInfo {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Author {
    pub given_name: Localized,
    pub family_name: Localized,
    pub preferred_public_name: Localized,
    pub affiliation: Localized,
}

/// A versioned metadata snapshot of a submission; the current publication
/// holds the live metadata.
#[derive(Debug, Clone, Default)]
pub struct Publication {
    pub id: i64,
    pub title: Localized,
    pub subtitle: Localized,
    pub abstract_text: Localized,
    pub keywords: LocalizedList,
    pub subjects: LocalizedList,
    pub disciplines: LocalizedList,
    pub coverage: Option<String>,
    pub submission_type: Option<String>,
    pub authors: Vec<Author>,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub id: i64,
    pub context_id: i64,
    pub status: SubmissionStatus,
    pub current_publication: Publication,
}

/// Proof-stage files are the galleys picked up by a rebuild.
pub const FILE_STAGE_PROOF: i64 = 10;

#[derive(Debug, Clone)]
pub struct SubmissionFileRef {
    pub id: i64,
    pub submission_id: i64,
    pub file_stage: i64,
    pub path: PathBuf,
    pub mime_type: Option<String>,
}

/// Read model over the host application's submission graph.
///
/// The index core depends only on this seam, never on concrete host types;
/// [`SqlHostRepository`] implements it for deployments where the index shares
/// the host database.
#[async_trait::async_trait]
pub trait HostRepository: Send + Sync {
    /// All contexts, ordered by id.
    async fn contexts(&self) -> Result<Vec<ContextInfo>, SearchError>;

    async fn submission(&self, submission_id: i64) -> Result<Option<Submission>, SearchError>;

    /// Published submissions of one context, with their current publication.
    async fn published_submissions(&self, context_id: i64)
        -> Result<Vec<Submission>, SearchError>;

    /// Proof-stage files of one submission.
    async fn proof_files(&self, submission_id: i64)
        -> Result<Vec<SubmissionFileRef>, SearchError>;

    async fn file(&self, submission_file_id: i64)
        -> Result<Option<SubmissionFileRef>, SearchError>;
}

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Deserialize, Debug, Default)]
pub struct SearchQueryParams {
    /// Scope to one context; omit to search every context.
    pub context_id: Option<i64>,
    /// Keyword matched against every indexed field.
    pub query: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_query: Option<String>,
    pub galley: Option<String>,
    pub discipline: Option<String>,
    pub subject: Option<String>,
    pub keyword: Option<String>,
    #[serde(rename = "type")]
    pub type_query: Option<String>,
    pub coverage: Option<String>,
    pub published_from: Option<NaiveDate>,
    pub published_to: Option<NaiveDate>,
    pub order_by: Option<String>,
    pub order: Option<SortDirection>,
    /// Comma-separated submission ids to exclude.
    pub exclude: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl SearchQueryParams {
    pub fn into_request(self) -> SearchRequest {
        let mut keywords = BTreeMap::new();
        let entries = [
            (SearchField::All, self.query),
            (SearchField::Author, self.author),
            (SearchField::Title, self.title),
            (SearchField::Abstract, self.abstract_query),
            (SearchField::Galley, self.galley),
            (SearchField::Discipline, self.discipline),
            (SearchField::Subject, self.subject),
            (SearchField::Keyword, self.keyword),
            (SearchField::Type, self.type_query),
            (SearchField::Coverage, self.coverage),
        ];
        for (field, value) in entries {
            if let Some(value) = value {
                keywords.insert(field, value);
            }
        }

        let exclude = self
            .exclude
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect();

        SearchRequest {
            context_id: self.context_id,
            keywords,
            order_by: self.order_by,
            order_dir: self.order.unwrap_or_default(),
            exclude,
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(25).min(100),
            published_from: self.published_from,
            published_to: self.published_to,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct RebuildRequest {
    /// Contexts to rebuild; empty means every context.
    #[serde(default)]
    pub context_ids: Vec<i64>,
    /// Also clear the host's legacy search tables.
    #[serde(default)]
    pub clear_legacy_tables: bool,
}

#[derive(Serialize, Debug)]
pub struct RebuildResponse {
    pub contexts: usize,
    pub submissions: usize,
    pub files: usize,
    pub pruned: u64,
}

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<search::Indexer>,
    pub service: search::SearchService,
    pub host: Arc<dyn HostRepository>,
}

// ============================================================================
// Router Setup
// ============================================================================

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health_check))
        .route("/api/search", get(search_submissions))
        .route("/api/contexts", get(get_contexts))
        .route("/api/rebuild", post(rebuild_index))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> &'static str {
    "Submission Search API - v0.1.0"
}

async fn health_check() -> Json<Message> {
    Json(Message {
        message: "Search index is running!".to_string(),
    })
}

/// Ranked retrieval over the index. Internal failures surface as the generic
/// error message with empty results; results are all-or-nothing.
async fn search_submissions(
    State(state): State<AppState>,
    Query(params): Query<SearchQueryParams>,
) -> Json<search::RetrievedResults> {
    let request = params.into_request();
    Json(state.service.retrieve_results(&request).await)
}

async fn get_contexts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ContextInfo>>, (StatusCode, Json<ApiError>)> {
    state.host.contexts().await.map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    })
}

async fn rebuild_index(
    State(state): State<AppState>,
    Json(request): Json<RebuildRequest>,
) -> Result<Json<RebuildResponse>, (StatusCode, Json<ApiError>)> {
    let context_ids: Vec<i64> = if request.context_ids.is_empty() {
        state
            .host
            .contexts()
            .await
            .map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiError {
                        error: e.to_string(),
                    }),
                )
            })?
            .into_iter()
            .map(|context| context.id)
            .collect()
    } else {
        request.context_ids
    };

    let stats = state.indexer.rebuild(&context_ids).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    })?;

    if request.clear_legacy_tables {
        state
            .indexer
            .dao()
            .clear_legacy_search_tables(&DEFAULT_LEGACY_SEARCH_TABLES)
            .await
            .map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiError {
                        error: e.to_string(),
                    }),
                )
            })?;
    }

    Ok(Json(RebuildResponse {
        contexts: stats.contexts,
        submissions: stats.submissions,
        files: stats.files,
        pruned: stats.pruned,
    }))
}
