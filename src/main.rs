use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use printflow_server::auth::{self, AppState, SharedState};
use printflow_server::config::Settings;
use printflow_server::persist::{DefaultOwner, SaveFile};
use printflow_server::{api, live};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

fn init_tracing() {
    #[cfg(feature = "profile-console")]
    {
        console_subscriber::init();
    }

    #[cfg(not(feature = "profile-console"))]
    {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("printflow_server=info,tower_http=info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let settings = Settings::load()?;

    // ── Boot the World ─────────────────────────────────────────
    let save_file = SaveFile::open(&settings.save_file)?;
    let mut world = save_file.load_world()?;

    let owner = DefaultOwner {
        username: &settings.default_owner_username,
        password: &settings.default_owner_password,
        org_id: settings.default_org_id,
    };
    if save_file.ensure_default_owner(&mut world, &owner)? {
        tracing::warn!(
            username = %settings.default_owner_username,
            "created default owner account, change its password"
        );
    }

    tracing::info!(
        tasks = world.tasks.len(),
        accounts = world.accounts.len(),
        revision = world.revision,
        "world loaded"
    );

    // ── Broadcast channel ──────────────────────────────────────
    let (live_tx, _) = broadcast::channel(256);

    let addr = settings.bind_addr();
    let static_dir = settings.static_dir.clone();
    let state: SharedState = Arc::new(AppState {
        world: RwLock::new(world),
        save_file,
        live_tx,
        settings,
    });

    // ── Router ─────────────────────────────────────────────────
    let protected = Router::new()
        .route("/api/tasks", get(api::list_tasks))
        .route("/api/tasks/queue", get(api::production_queue))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_middleware));

    let app = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/health", get(api::health))
        .route("/api/live", get(live::ws_handler))
        .merge(protected)
        .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // ── Start ──────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
