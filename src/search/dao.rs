//! Data access for the denormalized search-index table.
//!
//! The `Dao` exclusively owns `full_text_search_plugin_index`; every other
//! component goes through it. All writes are immediately visible and each
//! operation is a single statement, so concurrent metadata and galley writes
//! for one submission interleave without corrupting rows.

use chrono::Utc;
use sqlx::{AnyPool, Row};
use tracing::warn;

use crate::search::dialect::RankingDialect;
use crate::search::error::SearchError;
use crate::search::query::{plan_search, Param, SearchRequest};
use crate::search::schema::TABLE_NAME;
use crate::SubmissionStatus;

/// Legacy host search tables cleared by the one-time migration aid, covering
/// both host API generations.
pub const DEFAULT_LEGACY_SEARCH_TABLES: [&str; 3] = [
    "submission_search_object_keywords",
    "submission_search_objects",
    "submission_search_keyword_list",
];

/// Field values for one index row.
///
/// `None` leaves the stored value untouched on update and defaults to NULL on
/// insert; metadata reindexing therefore never clobbers `galley_text` and
/// file indexing never clobbers the metadata fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFields {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub authors: Option<String>,
    pub keywords: Option<String>,
    pub subjects: Option<String>,
    pub disciplines: Option<String>,
    pub coverage: Option<String>,
    pub submission_type: Option<String>,
    pub galley_text: Option<String>,
}

impl RecordFields {
    /// A write that replaces only the galley text snapshot.
    pub fn galley_only(text: String) -> Self {
        Self { galley_text: Some(text), ..Self::default() }
    }

    /// Present (column, value) pairs in stable column order.
    fn columns(&self) -> Vec<(&'static str, &str)> {
        let pairs = [
            ("title", &self.title),
            ("abstract", &self.abstract_text),
            ("authors", &self.authors),
            ("keywords", &self.keywords),
            ("subjects", &self.subjects),
            ("disciplines", &self.disciplines),
            ("coverage", &self.coverage),
            ("type", &self.submission_type),
            ("galley_text", &self.galley_text),
        ];
        pairs
            .into_iter()
            .filter_map(|(column, value)| value.as_deref().map(|v| (column, v)))
            .collect()
    }
}

fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    params: &'q [Param],
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    for param in params {
        query = match param {
            Param::Int(value) => query.bind(*value),
            Param::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

/// Data access object for the search index table, built around an injected
/// pool handle and the dialect selected at startup.
#[derive(Clone)]
pub struct Dao {
    pool: AnyPool,
    dialect: &'static dyn RankingDialect,
}

impl Dao {
    pub fn new(pool: AnyPool, dialect: &'static dyn RankingDialect) -> Self {
        Self { pool, dialect }
    }

    pub fn dialect(&self) -> &'static dyn RankingDialect {
        self.dialect
    }

    /// Insert or update the row for `submission_id`.
    ///
    /// `created_at` is written on insert only; `updated_at` is refreshed on
    /// every call. Fields absent from `fields` keep their stored values.
    pub async fn upsert(
        &self,
        submission_id: i64,
        context_id: i64,
        fields: &RecordFields,
    ) -> Result<(), SearchError> {
        let now = now_timestamp();
        let present = fields.columns();

        let mut insert_columns = vec!["submission_id", "context_id", "created_at", "updated_at"];
        insert_columns.extend(present.iter().map(|(column, _)| *column));
        let mut update_columns = vec!["context_id", "updated_at"];
        update_columns.extend(present.iter().map(|(column, _)| *column));

        let sql = self.dialect.upsert_sql(TABLE_NAME, &insert_columns, &update_columns);
        let mut query = sqlx::query(&sql)
            .bind(submission_id)
            .bind(context_id)
            .bind(now.as_str())
            .bind(now.as_str());
        for (_, value) in &present {
            query = query.bind(*value);
        }
        query.execute(&self.pool).await.map_err(SearchError::Storage)?;
        Ok(())
    }

    /// Remove the row for `submission_id`; succeeds when no row exists.
    pub async fn delete_by_submission(&self, submission_id: i64) -> Result<(), SearchError> {
        let sql = format!(
            "DELETE FROM {TABLE_NAME} WHERE submission_id = {}",
            self.dialect.placeholder(1)
        );
        sqlx::query(&sql)
            .bind(submission_id)
            .execute(&self.pool)
            .await
            .map_err(SearchError::Storage)?;
        Ok(())
    }

    /// Drop the galley text snapshot for `submission_id`; succeeds when no
    /// row exists.
    pub async fn clear_galley_text(&self, submission_id: i64) -> Result<(), SearchError> {
        let sql = format!(
            "UPDATE {TABLE_NAME} SET galley_text = NULL, updated_at = {} WHERE submission_id = {}",
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );
        sqlx::query(&sql)
            .bind(now_timestamp().as_str())
            .bind(submission_id)
            .execute(&self.pool)
            .await
            .map_err(SearchError::Storage)?;
        Ok(())
    }

    /// Delete every record in the given contexts whose submission is not
    /// published, per the authoritative status in the host's `submissions`
    /// table. Returns the number of rows removed.
    pub async fn prune_unpublished(&self, context_ids: &[i64]) -> Result<u64, SearchError> {
        let sql = format!(
            "DELETE FROM {TABLE_NAME} WHERE submission_id IN \
             (SELECT submission_id FROM submissions WHERE context_id = {} AND status <> {})",
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );
        let mut removed = 0;
        for &context_id in context_ids {
            let result = sqlx::query(&sql)
                .bind(context_id)
                .bind(SubmissionStatus::Published.as_i64())
                .execute(&self.pool)
                .await
                .map_err(SearchError::Storage)?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    /// Delete all rows from the host's legacy search tables.
    ///
    /// The cleared set is caller-supplied since host API generations disagree
    /// on it; see [`DEFAULT_LEGACY_SEARCH_TABLES`].
    pub async fn clear_legacy_search_tables(&self, tables: &[&str]) -> Result<(), SearchError> {
        for table in tables {
            if !is_safe_identifier(table) {
                warn!("skipping legacy search table with invalid name: {table:?}");
                continue;
            }
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await
                .map_err(SearchError::Storage)?;
        }
        Ok(())
    }

    /// Execute a ranked-retrieval request: ordered submission ids plus the
    /// total match count before pagination.
    pub async fn search(&self, request: &SearchRequest) -> Result<(Vec<i64>, i64), SearchError> {
        let plan = plan_search(self.dialect, request);

        let count_row = bind_params(sqlx::query(&plan.count_sql), &plan.count_params)
            .fetch_one(&self.pool)
            .await
            .map_err(SearchError::Query)?;
        let total: i64 = count_row.try_get(0).map_err(SearchError::Query)?;

        let rows = bind_params(sqlx::query(&plan.sql), &plan.params)
            .fetch_all(&self.pool)
            .await
            .map_err(SearchError::Query)?;
        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>(0))
            .collect::<Result<Vec<i64>, _>>()
            .map_err(SearchError::Query)?;

        Ok((ids, total))
    }
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_columns_follow_stable_order() {
        let fields = RecordFields {
            galley_text: Some("body".to_string()),
            title: Some("A title".to_string()),
            ..RecordFields::default()
        };
        let columns: Vec<&str> = fields.columns().into_iter().map(|(c, _)| c).collect();
        assert_eq!(columns, vec!["title", "galley_text"]);
    }

    #[test]
    fn galley_only_touches_nothing_else() {
        let fields = RecordFields::galley_only("extracted".to_string());
        assert_eq!(fields.columns(), vec![("galley_text", "extracted")]);
    }

    #[test]
    fn identifier_check_rejects_injection_shapes() {
        assert!(is_safe_identifier("submission_search_objects"));
        assert!(!is_safe_identifier("objects; DROP TABLE x"));
        assert!(!is_safe_identifier(""));
    }
}
