//! Storage-level integration tests.
//!
//! These run against a live database named by `DATABASE_URL` (PostgreSQL or
//! MySQL/MariaDB) and skip cleanly when the variable is unset. The suite
//! rebuilds its tables from scratch, so point it at a throwaway database.

use std::collections::BTreeMap;
use std::env;
use std::io::Write;
use std::sync::Arc;

use dotenvy::dotenv;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};

use submission_search::search::{
    detect_dialect, ensure_schema, Dao, DefaultParserFactory, Indexer, IndexingEvent,
    RankingDialect, RecordFields, SearchField, SearchRequest, SearchService, SortDirection,
    SEARCH_UNAVAILABLE_MESSAGE, TABLE_NAME,
};
use submission_search::{HostRepository, SqlHostRepository};

async fn connect() -> Option<(AnyPool, &'static dyn RankingDialect)> {
    dotenv().ok();
    let Ok(url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping database-backed tests");
        return None;
    };
    install_default_drivers();
    let dialect = detect_dialect(&url).expect("DATABASE_URL must name postgres or mysql");
    let pool = AnyPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    Some((pool, dialect))
}

fn ph(dialect: &dyn RankingDialect, n: usize) -> String {
    dialect.placeholder(n)
}

async fn exec(pool: &AnyPool, sql: &str) {
    sqlx::query(sql).execute(pool).await.unwrap_or_else(|e| panic!("{sql}: {e}"));
}

/// Drop and recreate the index table and the host tables the core reads.
async fn reset(pool: &AnyPool, dialect: &'static dyn RankingDialect) {
    for table in [
        TABLE_NAME,
        "submissions",
        "publications",
        "publication_settings",
        "authors",
        "author_settings",
        "submission_files",
        "contexts",
    ] {
        exec(pool, &format!("DROP TABLE IF EXISTS {table}")).await;
    }

    ensure_schema(pool, dialect).await.expect("schema creation");

    exec(pool, "CREATE TABLE contexts (context_id BIGINT PRIMARY KEY, name TEXT)").await;
    exec(
        pool,
        "CREATE TABLE submissions (submission_id BIGINT PRIMARY KEY, context_id BIGINT, \
         status BIGINT, current_publication_id BIGINT)",
    )
    .await;
    exec(
        pool,
        "CREATE TABLE publications (publication_id BIGINT PRIMARY KEY, submission_id BIGINT, \
         date_published DATE NULL)",
    )
    .await;
    exec(
        pool,
        "CREATE TABLE publication_settings (publication_id BIGINT, locale VARCHAR(32), \
         setting_name VARCHAR(64), setting_value TEXT)",
    )
    .await;
    exec(
        pool,
        "CREATE TABLE authors (author_id BIGINT PRIMARY KEY, publication_id BIGINT, seq BIGINT)",
    )
    .await;
    exec(
        pool,
        "CREATE TABLE author_settings (author_id BIGINT, locale VARCHAR(32), \
         setting_name VARCHAR(64), setting_value TEXT)",
    )
    .await;
    exec(
        pool,
        "CREATE TABLE submission_files (submission_file_id BIGINT PRIMARY KEY, \
         submission_id BIGINT, file_stage BIGINT, path TEXT, mime_type VARCHAR(255))",
    )
    .await;
}

async fn insert_submission(
    pool: &AnyPool,
    dialect: &dyn RankingDialect,
    id: i64,
    context_id: i64,
    status: i64,
    publication_id: i64,
) {
    let sql = format!(
        "INSERT INTO submissions (submission_id, context_id, status, current_publication_id) \
         VALUES ({}, {}, {}, {})",
        ph(dialect, 1),
        ph(dialect, 2),
        ph(dialect, 3),
        ph(dialect, 4)
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(context_id)
        .bind(status)
        .bind(publication_id)
        .execute(pool)
        .await
        .expect("insert submission");
}

async fn insert_publication(
    pool: &AnyPool,
    dialect: &dyn RankingDialect,
    id: i64,
    submission_id: i64,
    date_published: Option<&str>,
) {
    match date_published {
        Some(date) => {
            let sql = format!(
                "INSERT INTO publications (publication_id, submission_id, date_published) \
                 VALUES ({}, {}, {})",
                ph(dialect, 1),
                ph(dialect, 2),
                ph(dialect, 3)
            );
            sqlx::query(&sql)
                .bind(id)
                .bind(submission_id)
                .bind(date)
                .execute(pool)
                .await
                .expect("insert publication");
        }
        None => {
            let sql = format!(
                "INSERT INTO publications (publication_id, submission_id) VALUES ({}, {})",
                ph(dialect, 1),
                ph(dialect, 2)
            );
            sqlx::query(&sql)
                .bind(id)
                .bind(submission_id)
                .execute(pool)
                .await
                .expect("insert publication");
        }
    }
}

async fn insert_setting(
    pool: &AnyPool,
    dialect: &dyn RankingDialect,
    table: &str,
    id_column: &str,
    id: i64,
    locale: &str,
    name: &str,
    value: &str,
) {
    let sql = format!(
        "INSERT INTO {table} ({id_column}, locale, setting_name, setting_value) \
         VALUES ({}, {}, {}, {})",
        ph(dialect, 1),
        ph(dialect, 2),
        ph(dialect, 3),
        ph(dialect, 4)
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(locale)
        .bind(name)
        .bind(value)
        .execute(pool)
        .await
        .expect("insert setting");
}

/// Stored value of one column, or `None` when no row exists.
async fn fetch_field(
    pool: &AnyPool,
    dialect: &dyn RankingDialect,
    submission_id: i64,
    column: &str,
) -> Option<Option<String>> {
    let sql = format!(
        "SELECT {column} FROM {TABLE_NAME} WHERE submission_id = {}",
        ph(dialect, 1)
    );
    let row = sqlx::query(&sql)
        .bind(submission_id)
        .fetch_optional(pool)
        .await
        .expect("fetch field");
    row.map(|r| r.try_get::<Option<String>, _>(0).expect("decode field"))
}

fn keywords(pairs: &[(SearchField, &str)]) -> BTreeMap<SearchField, String> {
    pairs.iter().map(|(f, q)| (*f, q.to_string())).collect()
}

fn titled(title: &str) -> RecordFields {
    RecordFields { title: Some(title.to_string()), ..RecordFields::default() }
}

#[tokio::test]
async fn index_lifecycle_and_ranked_retrieval() {
    let Some((pool, dialect)) = connect().await else { return };
    reset(&pool, dialect).await;
    let dao = Dao::new(pool.clone(), dialect);

    partial_upserts_round_trip(&dao, &pool, dialect).await;
    deletion_removes_the_row(&dao, &pool, dialect).await;
    scoping_and_exclusion(&dao).await;
    pagination_and_empty_query(&dao).await;
    ranking_order(&dao).await;
    date_range_filter(&dao, &pool, dialect).await;
    prune_unpublished_rows(&dao, &pool, dialect).await;
    events_drive_the_index(&dao, &pool, dialect).await;
    search_failures_become_the_generic_error(&dao, &pool).await;
}

async fn partial_upserts_round_trip(dao: &Dao, pool: &AnyPool, dialect: &dyn RankingDialect) {
    dao.upsert(101, 1, &titled("Deep sea mining")).await.expect("upsert title");
    dao.upsert(
        101,
        1,
        &RecordFields { abstract_text: Some("Nodule harvesting".to_string()), ..RecordFields::default() },
    )
    .await
    .expect("upsert abstract");

    assert_eq!(
        fetch_field(pool, dialect, 101, "title").await,
        Some(Some("Deep sea mining".to_string()))
    );
    assert_eq!(
        fetch_field(pool, dialect, 101, "abstract").await,
        Some(Some("Nodule harvesting".to_string()))
    );
    // unspecified on insert defaults to null
    assert_eq!(fetch_field(pool, dialect, 101, "galley_text").await, Some(None));

    // indexing the same state twice leaves the stored fields byte-identical
    dao.upsert(101, 1, &titled("Deep sea mining")).await.expect("reindex");
    assert_eq!(
        fetch_field(pool, dialect, 101, "title").await,
        Some(Some("Deep sea mining".to_string()))
    );
}

async fn deletion_removes_the_row(dao: &Dao, pool: &AnyPool, dialect: &dyn RankingDialect) {
    dao.upsert(102, 1, &titled("Ephemeral entry")).await.expect("upsert");
    dao.delete_by_submission(102).await.expect("delete");
    assert_eq!(fetch_field(pool, dialect, 102, "title").await, None);

    // deleting again is a no-op, not an error
    dao.delete_by_submission(102).await.expect("repeat delete");

    let (ids, _) = dao.search(&SearchRequest::default()).await.expect("search");
    assert!(!ids.contains(&102));
}

async fn scoping_and_exclusion(dao: &Dao) {
    dao.upsert(201, 2, &titled("Quantum sensing advances")).await.expect("upsert");
    dao.upsert(202, 2, &titled("Quantum sensing methods")).await.expect("upsert");
    dao.upsert(301, 3, &titled("Quantum sensing review")).await.expect("upsert");

    let request = SearchRequest {
        context_id: Some(2),
        keywords: keywords(&[(SearchField::Title, "quantum")]),
        ..SearchRequest::default()
    };
    let (ids, total) = dao.search(&request).await.expect("scoped search");
    assert_eq!(total, 2);
    assert!(ids.contains(&201) && ids.contains(&202));
    assert!(!ids.contains(&301));

    let request = SearchRequest { exclude: vec![202], ..request };
    let (ids, total) = dao.search(&request).await.expect("excluded search");
    assert_eq!((ids, total), (vec![201], 1));
}

async fn pagination_and_empty_query(dao: &Dao) {
    for n in 0..25 {
        dao.upsert(700 + n, 7, &titled(&format!("Glacier survey part {n}")))
            .await
            .expect("upsert");
    }

    let request = SearchRequest {
        context_id: Some(7),
        keywords: keywords(&[(SearchField::Title, "glacier")]),
        per_page: 10,
        ..SearchRequest::default()
    };
    let (page1, total) = dao.search(&request).await.expect("page 1");
    assert_eq!((page1.len(), total), (10, 25));

    let request3 = SearchRequest { page: 3, ..request.clone() };
    let (page3, total) = dao.search(&request3).await.expect("page 3");
    assert_eq!((page3.len(), total), (5, 25));

    // page below 1 clamps the offset to 0
    let request0 = SearchRequest { page: 0, ..request };
    let (page0, total) = dao.search(&request0).await.expect("page 0");
    assert_eq!((page0.len(), total), (10, 25));

    // no keywords at all: every in-scope row matches with the default score
    let empty = SearchRequest { context_id: Some(7), per_page: 100, ..SearchRequest::default() };
    let (ids, total) = dao.search(&empty).await.expect("empty query");
    assert_eq!((ids.len(), total), (25, 25));
}

async fn ranking_order(dao: &Dao) {
    dao.upsert(801, 8, &titled("Fusion fusion fusion reactors fusion")).await.expect("upsert");
    dao.upsert(802, 8, &titled("Fusion power and something else entirely")).await.expect("upsert");

    let request = SearchRequest {
        context_id: Some(8),
        keywords: keywords(&[(SearchField::Title, "fusion")]),
        order_dir: SortDirection::Desc,
        ..SearchRequest::default()
    };
    let (ids, total) = dao.search(&request).await.expect("ranked search");
    assert_eq!(total, 2);
    assert_eq!(ids, vec![801, 802]);

    let request = SearchRequest { order_dir: SortDirection::Asc, ..request };
    let (ids, _) = dao.search(&request).await.expect("ranked search asc");
    assert_eq!(ids, vec![802, 801]);
}

async fn date_range_filter(dao: &Dao, pool: &AnyPool, dialect: &dyn RankingDialect) {
    dao.upsert(901, 9, &titled("Orbital dynamics survey")).await.expect("upsert");
    dao.upsert(902, 9, &titled("Orbital dynamics handbook")).await.expect("upsert");
    insert_submission(pool, dialect, 901, 9, 3, 9010).await;
    insert_submission(pool, dialect, 902, 9, 3, 9020).await;
    insert_publication(pool, dialect, 9010, 901, Some("2024-06-15")).await;
    insert_publication(pool, dialect, 9020, 902, Some("2020-01-01")).await;

    let request = SearchRequest {
        context_id: Some(9),
        keywords: keywords(&[(SearchField::Title, "orbital")]),
        published_from: chrono::NaiveDate::from_ymd_opt(2024, 1, 1),
        published_to: chrono::NaiveDate::from_ymd_opt(2024, 12, 31),
        ..SearchRequest::default()
    };
    let (ids, total) = dao.search(&request).await.expect("date-filtered search");
    assert_eq!((ids, total), (vec![901], 1));
}

async fn prune_unpublished_rows(dao: &Dao, pool: &AnyPool, dialect: &dyn RankingDialect) {
    dao.upsert(1001, 10, &titled("Withdrawn manuscript")).await.expect("upsert");
    dao.upsert(1002, 10, &titled("Published manuscript")).await.expect("upsert");
    insert_submission(pool, dialect, 1001, 10, 1, 10010).await;
    insert_submission(pool, dialect, 1002, 10, 3, 10020).await;

    let pruned = dao.prune_unpublished(&[10]).await.expect("prune");
    assert_eq!(pruned, 1);
    assert_eq!(fetch_field(pool, dialect, 1001, "title").await, None);
    assert!(fetch_field(pool, dialect, 1002, "title").await.is_some());
}

async fn events_drive_the_index(dao: &Dao, pool: &AnyPool, dialect: &'static dyn RankingDialect) {
    insert_submission(pool, dialect, 1101, 11, 3, 11010).await;
    insert_publication(pool, dialect, 11010, 1101, None).await;
    insert_setting(pool, dialect, "publication_settings", "publication_id", 11010, "en", "title", "Thermal storage methods").await;
    insert_setting(pool, dialect, "publication_settings", "publication_id", 11010, "en", "abstract", "<p>Heat batteries.</p>").await;
    insert_setting(pool, dialect, "publication_settings", "publication_id", 11010, "en", "keywords", "thermal").await;
    insert_setting(pool, dialect, "publication_settings", "publication_id", 11010, "en", "keywords", "storage").await;
    exec(pool, "INSERT INTO authors (author_id, publication_id, seq) VALUES (501, 11010, 0)").await;
    insert_setting(pool, dialect, "author_settings", "author_id", 501, "en", "givenName", "Ada").await;
    insert_setting(pool, dialect, "author_settings", "author_id", 501, "en", "familyName", "Lovelace").await;

    let dir = tempfile::tempdir().expect("tempdir");
    let galley_path = dir.path().join("galley.txt");
    let mut galley = std::fs::File::create(&galley_path).expect("create galley");
    write!(galley, "solar sail deployment").expect("write galley");
    let path_sql = format!(
        "INSERT INTO submission_files (submission_file_id, submission_id, file_stage, path, mime_type) \
         VALUES ({}, {}, {}, {}, {})",
        ph(dialect, 1), ph(dialect, 2), ph(dialect, 3), ph(dialect, 4), ph(dialect, 5)
    );
    sqlx::query(&path_sql)
        .bind(601i64)
        .bind(1101i64)
        .bind(10i64)
        .bind(galley_path.to_str().expect("utf8 path"))
        .bind("text/plain")
        .execute(pool)
        .await
        .expect("insert submission file");

    let host = Arc::new(SqlHostRepository::new(pool.clone(), dialect));
    let indexer = Indexer::new(dao.clone(), host.clone(), Arc::new(DefaultParserFactory), true);

    let submission = host.submission(1101).await.expect("load").expect("exists");
    indexer.handle(IndexingEvent::MetadataChanged { submission: submission.clone() }).await;
    assert_eq!(
        fetch_field(pool, dialect, 1101, "title").await,
        Some(Some("Thermal storage methods".to_string()))
    );
    assert_eq!(
        fetch_field(pool, dialect, 1101, "abstract").await,
        Some(Some("Heat batteries.".to_string()))
    );
    assert_eq!(
        fetch_field(pool, dialect, 1101, "keywords").await,
        Some(Some("storage thermal".to_string()))
    );
    assert_eq!(
        fetch_field(pool, dialect, 1101, "authors").await,
        Some(Some("Ada Lovelace".to_string()))
    );

    // reindexing the same metadata state is byte-identical
    indexer.handle(IndexingEvent::MetadataChanged { submission }).await;
    assert_eq!(
        fetch_field(pool, dialect, 1101, "title").await,
        Some(Some("Thermal storage methods".to_string()))
    );

    indexer
        .handle(IndexingEvent::FileChanged { submission_id: 1101, file_stage: 10, file_id: 601 })
        .await;
    assert_eq!(
        fetch_field(pool, dialect, 1101, "galley_text").await,
        Some(Some("solar sail deployment".to_string()))
    );
    // galley indexing left the metadata untouched
    assert_eq!(
        fetch_field(pool, dialect, 1101, "title").await,
        Some(Some("Thermal storage methods".to_string()))
    );

    indexer.handle(IndexingEvent::FileDeleted { submission_id: 1101 }).await;
    assert_eq!(fetch_field(pool, dialect, 1101, "galley_text").await, Some(None));

    // a rebuild restores metadata and galley text, then is safe to repeat
    let stats = indexer.rebuild(&[11]).await.expect("rebuild");
    assert_eq!((stats.submissions, stats.files), (1, 1));
    assert_eq!(
        fetch_field(pool, dialect, 1101, "galley_text").await,
        Some(Some("solar sail deployment".to_string()))
    );
    indexer.rebuild(&[11]).await.expect("repeat rebuild");

    // a not-installed indexer ignores events entirely
    let disabled = Indexer::new(dao.clone(), host, Arc::new(DefaultParserFactory), false);
    disabled.handle(IndexingEvent::SubmissionDeleted { submission_id: 1101 }).await;
    assert!(fetch_field(pool, dialect, 1101, "title").await.is_some());

    indexer.handle(IndexingEvent::SubmissionDeleted { submission_id: 1101 }).await;
    assert_eq!(fetch_field(pool, dialect, 1101, "title").await, None);
}

async fn search_failures_become_the_generic_error(dao: &Dao, pool: &AnyPool) {
    // force a storage failure: the index table is gone
    exec(pool, &format!("DROP TABLE {TABLE_NAME}")).await;

    let service = SearchService::new(dao.clone());
    let results = service.retrieve_results(&SearchRequest::default()).await;
    assert!(results.submission_ids.is_empty());
    assert_eq!(results.total, 0);
    assert_eq!(results.error.as_deref(), Some(SEARCH_UNAVAILABLE_MESSAGE));
}
