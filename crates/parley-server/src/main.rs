mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use parley_api::{AppState, AppStateInner};
use parley_db::{ConversationStore, Database};
use parley_gateway::connection::{self, SubscriptionGuard};
use parley_gateway::Dispatcher;
use parley_messaging::MessagingCore;

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    jwt_secret: String,
    guard: Arc<dyn SubscriptionGuard>,
}

/// Course topics are open to course members only.
struct MembershipGuard {
    store: Arc<dyn ConversationStore>,
}

impl SubscriptionGuard for MembershipGuard {
    fn may_subscribe(&self, user_id: Uuid, course_id: Uuid) -> bool {
        match self.store.course_role(course_id, user_id) {
            Ok(role) => role.is_some(),
            Err(e) => {
                warn!(%course_id, %user_id, "membership lookup failed: {}", e);
                false
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let store: Arc<dyn ConversationStore> = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let core = MessagingCore::with_course_authorization(store.clone(), Arc::new(dispatcher.clone()));
    let app_state: AppState = Arc::new(AppStateInner {
        core,
        jwt_secret: config.jwt_secret.clone(),
    });

    let gateway = GatewayState {
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
        guard: Arc::new(MembershipGuard { store }),
    };

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(parley_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.jwt_secret, state.guard))
}
