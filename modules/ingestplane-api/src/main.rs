use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    routing::{get, post},
    Router,
};
use ingestplane_common::Config;
use ingestplane_repo::Repo;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod auth;
mod error;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ingestplane=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("../ingestplane-repo/migrations").run(&pool).await?;

    let host = config.web_host.clone();
    let port = config.web_port;

    let state = Arc::new(AppState {
        repo: Repo::new(pool),
        config,
        http: reqwest::Client::new(),
    });

    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::PUT])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::PUT])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/discoveries", post(routes::discoveries::create_discovery))
        .route("/evidence", post(routes::evidence::record_evidence))
        .route("/jobs", get(routes::jobs::list_jobs))
        .route("/jobs/{id}/claim", post(routes::jobs::claim_job))
        .route("/jobs/{id}/result", post(routes::jobs::submit_job_result))
        .route("/jobs/reap-expired", post(routes::jobs::reap_expired))
        .route("/jobs/enqueue-freshness", post(routes::jobs::enqueue_freshness))
        .route("/postings", get(routes::postings::list_postings))
        .route(
            "/postings/{id}",
            get(routes::postings::get_posting).patch(routes::postings::update_posting_status),
        )
        .route("/candidates", get(routes::candidates::list_candidates))
        .route("/candidates/facets", get(routes::candidates::candidate_facets))
        .route(
            "/candidates/{id}",
            get(routes::candidates::get_candidate).patch(routes::candidates::patch_candidate),
        )
        .route("/candidates/{id}/events", get(routes::candidates::candidate_events))
        .route("/candidates/{id}/merge-decisions", get(routes::candidates::candidate_merge_decisions))
        .route("/candidates/{id}/override", post(routes::candidates::override_candidate))
        .route("/candidates/{id}/merge", post(routes::candidates::merge_candidates))
        .route(
            "/admin/modules",
            get(routes::admin::list_modules).post(routes::admin::create_module),
        )
        .route("/admin/modules/{id}/credentials", post(routes::admin::rotate_module_credential))
        .route("/admin/jobs/reap-expired", post(routes::admin::reap_expired))
        .route(
            "/admin/source-trust-policies",
            get(routes::admin::list_source_trust_policies).put(routes::admin::upsert_source_trust_policy),
        )
        .route(
            "/admin/url-overrides",
            get(routes::admin::list_url_overrides).put(routes::admin::upsert_url_override),
        )
        .with_state(state)
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .fallback(|| async { (StatusCode::NOT_FOUND, "not found") });

    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "ingestplane api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
