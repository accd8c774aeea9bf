//! Ranking dialects for the two supported storage engines.
//!
//! The query planner and the schema installer are written entirely against
//! [`RankingDialect`]; the concrete dialect is picked once at startup from the
//! database URL scheme.

use crate::search::error::SearchError;

/// SQL generation strategy for one storage engine's full-text machinery.
pub trait RankingDialect: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    /// Placeholder for the `n`-th bind parameter (1-based).
    fn placeholder(&self, n: usize) -> String;

    /// Predicate matching `column` against the keyword bound at `ph`.
    fn match_predicate(&self, column: &str, ph: &str) -> String;

    /// Rank contribution of `column` for the keyword bound at `ph`.
    fn score_term(&self, column: &str, ph: &str) -> String;

    /// Insert-or-update statement keyed on `submission_id`.
    ///
    /// `update_columns` is the subset of `insert_columns` rewritten when the
    /// row already exists; `created_at` is deliberately not among them.
    fn upsert_sql(&self, table: &str, insert_columns: &[&str], update_columns: &[&str]) -> String;

    /// Full-text index DDL for one field.
    fn fulltext_index_sql(&self, table: &str, column: &str) -> String;

    /// Auto-increment surrogate primary key column definition.
    fn primary_key_column(&self) -> &'static str;

    /// Column type for the extracted galley text.
    fn long_text_type(&self) -> &'static str;

    /// Existence probe for a table in the current schema; takes the table
    /// name as its single bind parameter and returns a count.
    fn has_table_sql(&self) -> String;
}

/// PostgreSQL-class ranking: `tsvector` documents built with the `simple`
/// configuration, matched with `plainto_tsquery` and scored with `ts_rank`.
pub struct TsVectorDialect;

impl RankingDialect for TsVectorDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn match_predicate(&self, column: &str, ph: &str) -> String {
        format!("to_tsvector('simple', coalesce({column}, '')) @@ plainto_tsquery('simple', {ph})")
    }

    fn score_term(&self, column: &str, ph: &str) -> String {
        format!(
            "ts_rank(to_tsvector('simple', coalesce({column}, '')), plainto_tsquery('simple', {ph}))"
        )
    }

    fn upsert_sql(&self, table: &str, insert_columns: &[&str], update_columns: &[&str]) -> String {
        let placeholders: Vec<String> = (1..=insert_columns.len())
            .map(|n| self.placeholder(n))
            .collect();
        let updates: Vec<String> = update_columns
            .iter()
            .map(|column| format!("{column} = EXCLUDED.{column}"))
            .collect();
        format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT (submission_id) DO UPDATE SET {}",
            insert_columns.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        )
    }

    fn fulltext_index_sql(&self, table: &str, column: &str) -> String {
        format!(
            "CREATE INDEX {table}_{column} ON {table} USING GIN (to_tsvector('simple', coalesce({column}, '')))"
        )
    }

    fn primary_key_column(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }

    fn long_text_type(&self) -> &'static str {
        "TEXT"
    }

    fn has_table_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1"
            .to_string()
    }
}

/// MySQL-class ranking: the engine's natural-language relevance match serves
/// as both predicate and score.
pub struct NaturalLanguageDialect;

impl RankingDialect for NaturalLanguageDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn match_predicate(&self, column: &str, ph: &str) -> String {
        format!("MATCH({column}) AGAINST ({ph} IN NATURAL LANGUAGE MODE)")
    }

    fn score_term(&self, column: &str, ph: &str) -> String {
        self.match_predicate(column, ph)
    }

    fn upsert_sql(&self, table: &str, insert_columns: &[&str], update_columns: &[&str]) -> String {
        let placeholders: Vec<String> = insert_columns.iter().map(|_| "?".to_string()).collect();
        let updates: Vec<String> = update_columns
            .iter()
            .map(|column| format!("{column} = VALUES({column})"))
            .collect();
        format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            insert_columns.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        )
    }

    fn fulltext_index_sql(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {table} ADD FULLTEXT {table}_{column} ({column})")
    }

    fn primary_key_column(&self) -> &'static str {
        "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY"
    }

    fn long_text_type(&self) -> &'static str {
        "LONGTEXT"
    }

    fn has_table_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?"
            .to_string()
    }
}

static POSTGRES: TsVectorDialect = TsVectorDialect;
static MYSQL: NaturalLanguageDialect = NaturalLanguageDialect;

/// Select the ranking dialect for the given database URL.
pub fn detect_dialect(database_url: &str) -> Result<&'static dyn RankingDialect, SearchError> {
    let scheme = database_url.split(':').next().unwrap_or("").to_ascii_lowercase();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(&POSTGRES),
        "mysql" | "mariadb" => Ok(&MYSQL),
        _ => Err(SearchError::UnsupportedEngine(scheme)),
    }
}
