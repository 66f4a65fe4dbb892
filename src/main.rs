use axum::extract::{State, WebSocketUpgrade};
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use hexhaven::{WebSocketService, PROTOCOL_VERSION, VERSION};

#[derive(Parser, Debug)]
#[command(name = "hexhaven-server", about = "Authoritative settlement game server")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

type SharedService = Arc<WebSocketService>;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "hexhaven",
        "version": VERSION,
        "protocol": PROTOCOL_VERSION,
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<SharedService>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        service.handle_connection(socket).await;
    })
}

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let args = Args::parse();
    let service: SharedService = Arc::new(WebSocketService::new());

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/", get(health))
        .route("/ws", get(ws_handler))
        .with_state(service)
        .layer(cors);

    let addr = format!("{}:{}", args.host, args.port);
    log::info!("Starting hexhaven server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    axum::serve(listener, app)
        .await
        .expect("server error");
}
