//! HTTP server exposing the safety engine.
//!
//! ```text
//! RUST_LOG=info safety-server --config engine.toml --responders police-stations.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use safety_engine::{http, EngineConfig, Incident, ResponderDirectory, SafetyEngine};

#[derive(Parser)]
#[command(name = "safety-server", about = "Geospatial safety intelligence API")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Engine configuration (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Responder dataset (JSON array)
    #[arg(long)]
    responders: Option<PathBuf>,

    /// Incidents to index at start-up (JSON array)
    #[arg(long)]
    incidents: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    let purge_every = config.cache.ttl().max(Duration::from_secs(1));
    let engine = SafetyEngine::new(config)?;

    if let Some(path) = &cli.responders {
        let directory = ResponderDirectory::from_json_str(&std::fs::read_to_string(path)?)?;
        engine.replace_responders(directory.snapshot().as_ref().clone());
    }

    if let Some(path) = &cli.incidents {
        let incidents: Vec<Incident> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        engine.hydrate(incidents);
    }

    let purger = engine.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        loop {
            ticker.tick().await;
            let purged = purger.cache().purge_expired();
            if purged > 0 {
                log::debug!("Purged {purged} expired heatmap entries");
            }
        }
    });

    let app = http::router(engine);

    log::info!("Safety engine listening on http://{}", cli.bind);
    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await?;

    Ok(())
}
