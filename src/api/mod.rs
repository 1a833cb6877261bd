//! REST API and WebSocket server of the topology hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Shared handles** (`TopologyStore`, `StatusCache`, `BroadcastHandle`) in [`ApiState`]
//! - **WebSocket** sync sessions fed by the broadcaster
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/properties` - Full state of every property
//! - `POST /api/properties` - Create a property
//! - `POST /api/properties/save` - Write a whole document
//! - `GET|DELETE /api/properties/:id` - Fetch or delete one property
//! - `POST|DELETE /api/properties/:id/nodes` - Add a node or remove them all
//! - `PATCH|DELETE /api/properties/:id/nodes/:node` - Edit or delete a node
//! - `PUT /api/properties/:id/nodes/:node/parent` - Assign or clear a parent
//! - `GET /api/node-status/:address` - Health of a probe address
//! - `WS /api/stream` - Change notifications

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::{Ipv4Addr, SocketAddr};

use axum::{
    Router,
    routing::{get, patch, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:3000")
    pub bind_addr: SocketAddr,

    /// Optional authentication token
    pub auth_token: Option<String>,

    /// Enable CORS for browser clients
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 3000)),
            auth_token: None,
            enable_cors: true,
        }
    }
}

/// Build the router with every route and layer
pub fn router(state: ApiState, config: &ApiConfig) -> Router {
    let mut app = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route(
            "/api/properties",
            get(routes::properties::list_properties).post(routes::properties::create_property),
        )
        .route("/api/properties/save", post(routes::properties::save_property))
        .route(
            "/api/properties/:id",
            get(routes::properties::get_property).delete(routes::properties::delete_property),
        )
        .route(
            "/api/properties/:id/nodes",
            post(routes::nodes::add_node).delete(routes::nodes::clear_nodes),
        )
        .route(
            "/api/properties/:id/nodes/:node",
            patch(routes::nodes::update_node).delete(routes::nodes::delete_node),
        )
        .route(
            "/api/properties/:id/nodes/:node/parent",
            put(routes::nodes::set_parent),
        )
        .route("/api/node-status/:address", get(routes::status::node_status))
        .route("/api/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    // Outermost, so preflight requests are answered without a token
    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
