//! Database-backed full-text indexing and ranked retrieval for submissions.
//!
//! The write path flattens a submission's multi-locale metadata into one row
//! per submission; the read path builds ranked, filtered, paginated queries
//! against that row set in the dialect of the active storage engine.

pub mod dao;
pub mod dialect;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod normalizer;
pub mod query;
pub mod schema;

pub use dao::{Dao, RecordFields, DEFAULT_LEGACY_SEARCH_TABLES};
pub use dialect::{detect_dialect, NaturalLanguageDialect, RankingDialect, TsVectorDialect};
pub use error::SearchError;
pub use extractor::{
    extract_text, DefaultParserFactory, FileParserFactory, PlainTextParser, SearchFileParser,
};
pub use indexer::{Indexer, IndexingEvent, RebuildStats};
pub use normalizer::normalize;
pub use query::{
    plan_search, RetrievedResults, SearchField, SearchRequest, SearchService, SortDirection,
    SEARCH_UNAVAILABLE_MESSAGE,
};
pub use schema::{activate, ensure_schema, has_table, TABLE_NAME};
