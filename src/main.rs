use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{http::Method, response::Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use nexachat_api::config::MpesaConfig;
use nexachat_api::database::connection::get_db_client;
use nexachat_api::database::messages::MongoMessageStore;
use nexachat_api::database::transactions::MongoTransactionStore;
use nexachat_api::errors::AppError;
use nexachat_api::routes;
use nexachat_api::services::mpesa_service::MpesaService;
use nexachat_api::services::payment_coordinator::PaymentCoordinator;
use nexachat_api::socket::directory::ConnectionDirectory;
use nexachat_api::socket::ws_handler;
use nexachat_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let db = get_db_client().await;
    let app_state = initialize_app_state(db).await;

    let app = build_router(app_state);
    start_server(app).await;
}

async fn initialize_app_state(db: mongodb::Database) -> AppState {
    let directory = Arc::new(ConnectionDirectory::new());
    let state = AppState::new(db.clone(), directory.clone());

    match MpesaConfig::from_env() {
        Ok(config) => {
            tracing::info!("✅ M-Pesa config loaded ({} environment)", config.environment);
            let gateway = Arc::new(MpesaService::new(config));
            let coordinator = Arc::new(PaymentCoordinator::new(
                gateway,
                Arc::new(MongoTransactionStore::new(&db)),
                Arc::new(MongoMessageStore::new(&db)),
                directory,
            ));
            state.with_coordinator(coordinator)
        }
        Err(AppError::MissingConfig(missing)) => {
            // Chat and payment-request surfaces stay up; payment endpoints
            // answer with the missing variable names.
            tracing::warn!(
                "M-Pesa credentials missing ({}), payment endpoints disabled",
                missing.join(", ")
            );
            state.with_missing_credentials(missing)
        }
        Err(e) => {
            tracing::error!("❌ Failed to load M-Pesa config: {}", e);
            state
        }
    }
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .nest("/api/mpesa", routes::mpesa::mpesa_routes())
        .nest(
            "/api/payment-requests",
            routes::payment_requests::payment_request_routes(),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router) {
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "5001".to_string());
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 5001)));

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "💬 NexaChat Payments API"
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.coordinator.is_some(),
        "onlineUsers": state.directory.online_users().await.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
