//! Lazy creation of the index table and its full-text indexes.
//!
//! The table is created on first activation if absent. When creation fails
//! (e.g. insufficient privileges) activation continues in a degraded
//! "not installed" state and every index operation becomes a no-op until the
//! schema exists.

use sqlx::{AnyPool, Row};
use tracing::{error, info};

use crate::search::dialect::RankingDialect;
use crate::search::error::SearchError;

/// The single denormalized index table.
pub const TABLE_NAME: &str = "full_text_search_plugin_index";

/// Fields carrying a full-text index, in creation order.
pub const SEARCHABLE_FIELDS: [&str; 9] = [
    "title",
    "abstract",
    "authors",
    "keywords",
    "subjects",
    "disciplines",
    "coverage",
    "galley_text",
    "type",
];

fn create_table_sql(dialect: &dyn RankingDialect) -> String {
    format!(
        "CREATE TABLE {table} (\
         id {pk}, \
         context_id BIGINT NOT NULL, \
         submission_id BIGINT NOT NULL UNIQUE, \
         title TEXT NULL, \
         abstract TEXT NULL, \
         authors TEXT NULL, \
         keywords TEXT NULL, \
         subjects TEXT NULL, \
         disciplines TEXT NULL, \
         coverage TEXT NULL, \
         galley_text {long_text} NULL, \
         type TEXT NULL, \
         created_at TIMESTAMP NULL, \
         updated_at TIMESTAMP NULL\
         )",
        table = TABLE_NAME,
        pk = dialect.primary_key_column(),
        long_text = dialect.long_text_type(),
    )
}

/// Whether the index table already exists.
pub async fn has_table(pool: &AnyPool, dialect: &dyn RankingDialect) -> Result<bool, SearchError> {
    let row = sqlx::query(&dialect.has_table_sql())
        .bind(TABLE_NAME)
        .fetch_one(pool)
        .await
        .map_err(SearchError::Schema)?;
    let count: i64 = row.try_get(0).map_err(SearchError::Schema)?;
    Ok(count > 0)
}

/// Create the index table and one full-text index per field if missing.
pub async fn ensure_schema(pool: &AnyPool, dialect: &dyn RankingDialect) -> Result<(), SearchError> {
    if has_table(pool, dialect).await? {
        return Ok(());
    }

    sqlx::query(&create_table_sql(dialect))
        .execute(pool)
        .await
        .map_err(SearchError::Schema)?;

    for field in SEARCHABLE_FIELDS {
        sqlx::query(&dialect.fulltext_index_sql(TABLE_NAME, field))
            .execute(pool)
            .await
            .map_err(SearchError::Schema)?;
    }

    info!("created search index table {TABLE_NAME} ({})", dialect.name());
    Ok(())
}

/// Activation entry point: returns whether the index is installed.
///
/// Schema failures are logged, not propagated; the caller keeps running with
/// indexing disabled.
pub async fn activate(pool: &AnyPool, dialect: &dyn RankingDialect) -> bool {
    match ensure_schema(pool, dialect).await {
        Ok(()) => true,
        Err(err) => {
            error!("failed to create the search index schema: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::dialect::{NaturalLanguageDialect, TsVectorDialect};

    #[test]
    fn table_ddl_covers_every_field() {
        let sql = create_table_sql(&TsVectorDialect);
        assert!(sql.contains("submission_id BIGINT NOT NULL UNIQUE"));
        for field in SEARCHABLE_FIELDS {
            assert!(sql.contains(field), "missing column {field}");
        }
        assert!(sql.contains("BIGSERIAL PRIMARY KEY"));

        let sql = create_table_sql(&NaturalLanguageDialect);
        assert!(sql.contains("AUTO_INCREMENT PRIMARY KEY"));
        assert!(sql.contains("galley_text LONGTEXT NULL"));
    }
}
