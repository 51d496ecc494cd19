mod auth;
mod handlers;
mod models;
mod origin;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use common::db;
use common::github::ReqwestFetcher;
use common::repositories::{
    PackageRepositoryImpl, RateLimitRepositoryImpl, SyncStateRepository, SyncStateRepositoryImpl,
};
use common::services::github_import::{GithubImportService, GithubImportServiceImpl};
use common::services::publish::{PublishService, PublishServiceImpl};
use common::services::rate_limit::RateLimiter;
use common::settings::Settings;
use common::storage::S3Storage;
use origin::AllowedOrigins;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub struct AppState {
    pub settings: Settings,
    pub publish: Arc<dyn PublishService>,
    pub import: Arc<dyn GithubImportService>,
    pub rate_limiter: RateLimiter,
    pub sync_state: Arc<dyn SyncStateRepository>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new().expect("Failed to load configuration");

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "api=debug,common=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Arc::new(db::establish_connection(&settings.database.url).await?);
    let storage = Arc::new(S3Storage::new(&settings.s3).await);
    let fetcher = Arc::new(ReqwestFetcher::new(settings.github.token.as_deref())?);

    let publish: Arc<dyn PublishService> = Arc::new(PublishServiceImpl::new(
        Arc::new(PackageRepositoryImpl::new(db.clone())),
        storage,
    ));
    let import = Arc::new(GithubImportServiceImpl::new(
        fetcher,
        publish.clone(),
        settings.github.endpoints(),
        settings.import.clone(),
    ));

    let state = Arc::new(AppState {
        settings: settings.clone(),
        publish,
        import,
        rate_limiter: RateLimiter::new(Arc::new(RateLimitRepositoryImpl::new(db.clone()))),
        sync_state: Arc::new(SyncStateRepositoryImpl::new(db)),
    });

    let app = build_router(state).layer(build_cors(&settings));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "ClawHub API" }))
        .route("/api/import/github/preview", post(handlers::preview_import))
        .route(
            "/api/import/github/candidate",
            post(handlers::preview_import_candidate),
        )
        .route("/api/import/github", post(handlers::import_from_github))
        .route("/api/packages/:kind/publish", post(handlers::publish_package))
        .route("/api/packages/:kind/:slug", get(handlers::get_package))
        .route("/api/admin/backup/:key", get(handlers::get_backup_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors(settings: &Settings) -> CorsLayer {
    let origins = AllowedOrigins::from_setting(settings.auth.frontend_origin.as_deref());

    if settings.debug || origins.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request| origins.allows(origin),
        ))
        .allow_credentials(true)
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
}
