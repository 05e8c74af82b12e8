use serde::Deserialize;
use server::ServerState;
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU16,
    sync::Arc,
};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use umkreis_common::{
    model::radius::{DEFAULT_RADIUS_METERS, InvalidRadiusError, Radius},
    snowflake::{ProcessId, WorkerId},
};
use umkreis_db::{
    client::DbClient,
    engine::{EngineConfig, PostEngine},
    error::{IndexError, OpenError},
    lifecycle::DEFAULT_INDEX_NAME,
    memory::MemoryStore,
    spatial::GridIndex,
    store::Backend,
};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid default radius: {0}")]
    DefaultRadius(#[from] InvalidRadiusError),
    #[error("Error connecting to the database: {0}")]
    Connect(#[from] IndexError),
    #[error("Error opening the post index: {0}")]
    Open(#[from] OpenError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    /// Without a database everything is kept in memory.
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default = "default_index_name")]
    index_name: String,
    #[serde(default)]
    worker_id: WorkerId,
    #[serde(default)]
    process_id: ProcessId,
    /// Grid resolution of the in-memory spatial index.
    #[serde(default = "default_cells_per_degree")]
    grid_cells_per_degree: NonZeroU16,
    #[serde(default = "default_radius_meters")]
    default_radius_meters: f64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_owned()
}

fn default_cells_per_degree() -> NonZeroU16 {
    GridIndex::DEFAULT_CELLS_PER_DEGREE
}

fn default_radius_meters() -> f64 {
    DEFAULT_RADIUS_METERS
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "umkreis_api=debug,\
                umkreis_db=debug,\
                umkreis_common=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .env file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn backend(env: &Env) -> Result<Arc<dyn Backend>, InitError> {
    let Some(database_url) = &env.database_url else {
        warn!("DATABASE_URL is not set, posts are only kept in memory");
        let store = MemoryStore::with_ids(env.index_name.clone(), env.worker_id, env.process_id)
            .with_cells_per_degree(env.grid_cells_per_degree);
        return Ok(Arc::new(store));
    };

    let client = DbClient::connect(
        database_url,
        env.database_max_connections,
        env.index_name.clone(),
        env.worker_id,
        env.process_id,
    )
    .await?;

    Ok(Arc::new(client))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "Could not listen for ctrl-c, serving until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let config = EngineConfig {
        default_radius: Radius::from_meters(env.default_radius_meters)?,
    };
    let engine = PostEngine::open(backend(&env).await?, config).await?;

    let state = ServerState {
        engine: Arc::new(engine),
    };
    let tracing_layer = TraceLayer::new_for_http();
    let app = server::routes().with_state(state).layer(tracing_layer);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
