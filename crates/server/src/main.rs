use casework_server::config::{ServerConfig, StartupError};
use casework_server::http;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = serve().await {
        eprintln!("STARTUP_ERROR {}", err);
        std::process::exit(1);
    }
}

async fn serve() -> Result<(), StartupError> {
    let config = ServerConfig::load()?;
    let bind_addr = config.bind_addr;
    let app = http::router(config)?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|err| StartupError {
            code: "ERR_BIND_FAILED",
            message: format!("failed to bind {}: {}", bind_addr, err),
        })?;
    tracing::info!(%bind_addr, "casework-server listening");

    axum::serve(listener, app).await.map_err(|err| StartupError {
        code: "ERR_SERVER_FAILED",
        message: err.to_string(),
    })
}
