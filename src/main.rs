use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use dotenvy::dotenv;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use tracing::{info, warn};

use submission_search::search::{self, DefaultParserFactory};
use submission_search::{create_app, AppState, HostRepository, SqlHostRepository};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let dialect = search::detect_dialect(&database_url).expect("unsupported database engine");

    install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to create pool");

    info!("connected ({} ranking dialect)", dialect.name());

    let installed = search::activate(&pool, dialect).await;
    if !installed {
        warn!("search index schema is not installed; indexing is disabled");
    }

    let dao = search::Dao::new(pool.clone(), dialect);
    let host: Arc<dyn HostRepository> = Arc::new(SqlHostRepository::new(pool, dialect));
    let indexer = Arc::new(search::Indexer::new(
        dao.clone(),
        Arc::clone(&host),
        Arc::new(DefaultParserFactory),
        installed,
    ));
    let service = search::SearchService::new(dao);

    let app = create_app(AppState { indexer, service, host });

    let addr = SocketAddr::from(([127, 0, 0, 1], 8000));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
