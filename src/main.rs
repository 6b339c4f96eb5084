//! Mockhost - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mockhost::{build_listener, load_services, Listener};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mockhost",
    about = "Mock backend services over REST, SOAP, TCP, and serial transports",
    version
)]
struct Args {
    /// Path to the services configuration file
    #[arg(default_value = "services.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    info!(path = ?args.config, "Loading configuration");
    let services = load_services(&args.config)?;

    // Validate and exit if requested
    if args.validate {
        for service in &services {
            service.validate()?;
            println!(
                "  {} '{}' on {} ({} endpoints)",
                service.transport,
                service.name,
                service.port,
                service.endpoints.len()
            );
        }
        println!("Configuration is valid ({} services defined)", services.len());
        return Ok(());
    }

    // Start every service; one failing service does not block the others
    let mut listeners: Vec<Arc<dyn Listener>> = Vec::new();
    for service in services {
        let name = service.name.clone();
        let listener = match build_listener(service) {
            Ok(listener) => listener,
            Err(e) => {
                error!(service = %name, error = %e, "Skipping service");
                continue;
            }
        };
        if let Err(e) = listener.start().await {
            error!(service = %name, error = %e, "Failed to start service");
            continue;
        }
        listeners.push(listener);
    }

    if listeners.is_empty() {
        anyhow::bail!("no service could be started");
    }

    info!(services = listeners.len(), "Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    for listener in &listeners {
        listener.stop().await;
    }

    Ok(())
}
