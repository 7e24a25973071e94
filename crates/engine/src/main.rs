//! Plaza Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plaza_engine::api::websocket::{ws_handler, WsState};
use plaza_engine::config::EngineConfig;
use plaza_engine::infrastructure::auth::{GuestVerifier, HttpAuthVerifier};
use plaza_engine::infrastructure::openai::OpenAiClient;
use plaza_engine::infrastructure::ports::{AuthPort, NoRosterStore, RosterStorePort};
use plaza_engine::infrastructure::roster_http::HttpRosterStore;
use plaza_engine::room::{DelegateResponder, RetryConfig, RoomDeps, RoomRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plaza_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Plaza Engine");

    let config = EngineConfig::from_env();

    // Delegate responder over the generation endpoint
    let chat = Arc::new(OpenAiClient::new(
        &config.delegate_base_url,
        &config.delegate_model,
        config.delegate_api_key.clone(),
    ));
    let retry = RetryConfig::default();
    tracing::info!(
        "Delegate configured: model={}, max_attempts={}, base_delay_ms={}",
        config.delegate_model,
        retry.max_attempts,
        retry.base_delay.as_millis()
    );
    let responder = Arc::new(DelegateResponder::new(
        chat,
        config.delegate_max_tokens,
        retry,
    ));

    // Roster store (synthetic participants)
    let roster: Arc<dyn RosterStorePort> = match &config.roster_base_url {
        Some(url) => {
            tracing::info!("Roster store at {}", url);
            Arc::new(HttpRosterStore::new(url, config.roster_poll_interval))
        }
        None => {
            tracing::info!("No roster store configured, rooms run without synthetic participants");
            Arc::new(NoRosterStore)
        }
    };

    // Token verification
    let auth: Arc<dyn AuthPort> = match &config.auth_verify_url {
        Some(url) => {
            tracing::info!("Auth verifier at {}", url);
            Arc::new(HttpAuthVerifier::new(url))
        }
        None => {
            tracing::info!("No auth verifier configured, admitting guests");
            Arc::new(GuestVerifier)
        }
    };

    let registry = RoomRegistry::new(RoomDeps {
        responder,
        roster,
        fallback_prompt: config.fallback_prompt.clone(),
    });
    let ws_state = Arc::new(WsState { registry, auth });

    let mut router = axum::Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler).with_state(ws_state))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = build_cors_layer(&config) {
        router = router.layer(cors);
    }

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer(config: &EngineConfig) -> Option<CorsLayer> {
    let allowed_origins = config.cors_allowed_origins.as_deref()?;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    if allowed_origins == "*" {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();

        if origins.is_empty() {
            return None;
        }

        cors = cors.allow_origin(origins);
    }

    Some(cors)
}
