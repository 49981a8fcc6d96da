use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use lifeline_api::middleware::require_auth;
use lifeline_api::{AppState, AppStateInner, alerts, appointments, emergency, profile, providers};
use lifeline_dispatch::alert::AlertDispatcher;
use lifeline_dispatch::notifier::AppointmentNotifier;
use lifeline_dispatch::policy::DispatchPolicy;
use lifeline_gateway::connection;
use lifeline_gateway::registry::Registry;

#[derive(Clone)]
struct ServerState {
    db: Arc<lifeline_db::Database>,
    registry: Registry,
    jwt_secret: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn policy_from_env() -> DispatchPolicy {
    let defaults = DispatchPolicy::default();
    DispatchPolicy {
        initial_radius_km: env_or("LIFELINE_EMERGENCY_RADIUS_KM", defaults.initial_radius_km),
        escalation_factor: env_or("LIFELINE_RADIUS_ESCALATION", defaults.escalation_factor),
        max_attempts: env_or("LIFELINE_MAX_SEARCH_ATTEMPTS", defaults.max_attempts),
        min_recipients: env_or("LIFELINE_MIN_RECIPIENTS", defaults.min_recipients),
        reminder_lead: chrono::Duration::hours(env_or("LIFELINE_REMINDER_LEAD_HOURS", 24)),
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
                .unwrap_or_else(|_| "lifeline=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("LIFELINE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("LIFELINE_DB_PATH").unwrap_or_else(|_| "lifeline.db".into());
    let host = std::env::var("LIFELINE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LIFELINE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let policy = policy_from_env();
    info!(
        "Dispatch policy: {} km start, x{} up to {} attempts, min {} recipients",
        policy.initial_radius_km, policy.escalation_factor, policy.max_attempts,
        policy.min_recipients
    );

    // Init database
    let db = Arc::new(lifeline_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: the connection registry is created once here and
    // injected everywhere that publishes.
    let registry = Registry::new();
    let dispatcher = AlertDispatcher::new(db.clone(), registry.clone(), policy);
    let notifier = AppointmentNotifier::new(dispatcher.clone(), db.clone());

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher,
        notifier,
    });

    let state = ServerState { db, registry, jwt_secret };

    // Routes
    let public_routes = Router::new().route("/healthz", get(healthz));

    let protected_routes = Router::new()
        .route("/emergency", post(emergency::raise_emergency))
        .route("/providers/nearby", get(providers::nearby))
        .route("/providers/me/availability", put(providers::set_availability))
        .route("/appointments", post(appointments::create))
        .route("/appointments/{appointment_id}/status", post(appointments::transition))
        .route("/alerts", get(alerts::inbox))
        .route("/alerts/{alert_id}/read", post(alerts::mark_read))
        .route("/me/location", put(profile::update_location))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Lifeline server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.registry, state.db, state.jwt_secret)
    })
}
