mod configuration;
mod error;
mod routes;
mod state;

use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tunesmith::credentials::CredentialValidator;
use tunesmith::housekeeping::free_port;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = configuration::Settings::new()?;
    let addr = settings.server.socket_addr().await?;

    // Clear out a previous instance still holding the port
    let port = settings.server.port;
    let freed = tokio::task::spawn_blocking(move || free_port(port)).await?;
    if !freed.is_empty() {
        warn!(port, pids = ?freed, "terminated stale processes on port");
    }

    let report = CredentialValidator::new()?.check_env().await;
    if !report.all_valid() {
        warn!(spotify = %report.spotify, groq = %report.groq, "credential check failed");
    }

    let agent = match state::build_agent(&settings).await {
        Ok(agent) => {
            info!("agent initialized");
            Some(agent)
        }
        Err(e) => {
            error!(error = %e, "agent failed to initialize; /chat will report it");
            None
        }
    };

    let app = routes::configure(state::AppState::new(agent));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
