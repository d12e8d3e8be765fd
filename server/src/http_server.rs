use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, Request, State, ws::WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::sync_server::SyncServer;
use crate::ws_server::handle_websocket;

#[derive(Clone)]
struct AppState {
    sync: Arc<SyncServer>,
    static_dir: PathBuf,
}

/// WebSocket upgrades at `/` and `/ws`, scene assets from `static_dir` everywhere else.
pub fn create_router(sync: Arc<SyncServer>, static_dir: &Path) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        sync,
        static_dir: static_dir.to_path_buf(),
    };

    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(websocket_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browsers connect to the bare origin, so the root takes upgrades and otherwise serves the index.
async fn root_handler(
    ws: Option<WebSocketUpgrade>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    request: Request,
) -> Response {
    match ws {
        Some(ws) => upgrade(ws, addr, state.sync),
        None => {
            let served: Result<_, Infallible> =
                ServeDir::new(&state.static_dir).oneshot(request).await;
            match served {
                Ok(response) => response.into_response(),
                Err(never) => match never {},
            }
        }
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, addr, state.sync)
}

fn upgrade(ws: WebSocketUpgrade, addr: SocketAddr, sync: Arc<SyncServer>) -> Response {
    info!("Client connecting: {}", addr);
    ws.on_upgrade(move |socket| handle_websocket(socket, addr, sync))
}
