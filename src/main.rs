use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post, put},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

mod cache;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod services;

use cache::Cache;
use config::Config;
use middleware::rate_limit::RateLimiter;
use services::github::GitHubClient;
use services::mailer::EmailClient;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub cache: Cache,
    pub config: Arc<Config>,
    pub mailer: Option<EmailClient>,
    pub github: Option<GitHubClient>,
    pub rate_limiter: RateLimiter,
}

/// Configured CORS origins; `None` means a `*` entry asked for wildcard.
fn allowed_origins(origins: &[String]) -> Option<Vec<HeaderValue>> {
    if origins.iter().any(|o| o == "*") {
        return None;
    }
    Some(origins.iter().filter_map(|o| o.parse().ok()).collect())
}

fn build_router(state: AppState) -> Router {
    let cors = match allowed_origins(&state.config.cors_origins) {
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        Some(origins) => CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    };

    // --- Auth routes (no session required) ---
    let auth_routes = Router::new()
        .route(
            "/organization-signup",
            post(routes::auth::organization_signup),
        )
        .route(
            "/verify-organization-signup",
            post(routes::auth::verify_organization_signup),
        )
        .route("/sign-in/github", get(routes::auth::github_sign_in))
        .route("/callback/github", get(routes::auth::github_callback))
        .route("/email-otp/send", post(routes::auth::send_otp))
        .route("/sign-in/email-otp", post(routes::auth::sign_in_with_otp))
        .route("/sign-out", post(routes::auth::sign_out));

    let session_routes = Router::new()
        .route("/session", get(routes::auth::get_session))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    // --- Organization routes (authenticated) ---
    let org_routes = Router::new()
        .route("/", get(routes::organization::get_org))
        .route("/create", post(routes::organization::create_org))
        .route("/invite", post(routes::organization::invite))
        .route(
            "/accept-invitation",
            post(routes::organization::accept_invitation),
        )
        .route("/leave", post(routes::organization::leave))
        .route("/remove-member", post(routes::organization::remove_member))
        .route("/update", put(routes::organization::update_org))
        .route("/members", get(routes::organization::get_members))
        .route("/invitations", get(routes::organization::get_invitations))
        .route(
            "/invitation/cancel",
            post(routes::organization::cancel_invitation),
        )
        .route("/activity", get(routes::organization::get_activity))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    Router::new()
        .nest("/api/auth", auth_routes.merge(session_routes))
        .nest("/organization", org_routes)
        .route("/health", get(routes::health::health))
        // Global middleware
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let pool = db::create_pool(&config).await;
    let cache = Cache::new(&config).await;
    let mailer = EmailClient::new(&config.email);
    let github = GitHubClient::new(&config.github, &config.session.secret);
    let rate_limiter =
        RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);

    if mailer.is_none() {
        tracing::warn!("EMAIL_API_KEY not set, outgoing email disabled");
    }
    if github.is_none() {
        tracing::warn!("GitHub OAuth credentials not set, GitHub sign-in disabled");
    }

    let port = config.port;
    let state = AppState {
        db: pool,
        cache,
        config: Arc::new(config),
        mailer,
        github,
        rate_limiter,
    };

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("LearnStack API listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_entry_means_any_origin() {
        assert!(allowed_origins(&["*".to_string()]).is_none());
        assert!(allowed_origins(&["http://localhost:3000".into(), "*".into()]).is_none());
    }

    #[test]
    fn explicit_origins_are_parsed() {
        let origins = allowed_origins(&[
            "http://localhost:3000".to_string(),
            "https://app.learnstack.example".to_string(),
        ])
        .unwrap();
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "http://localhost:3000");
    }

    #[test]
    fn unparseable_origins_are_dropped() {
        let origins =
            allowed_origins(&["https://ok.example".to_string(), "not a header\u{0}".to_string()])
                .unwrap();
        assert_eq!(origins.len(), 1);
    }
}
