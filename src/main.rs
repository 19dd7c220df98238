use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod geometry;
mod gpx;
mod lang;
mod loader;
mod server;
mod wiki;

use config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "routemap",
    about = "Web map service for waymarked hiking and cycling routes"
)]
struct Cli {
    /// Path to the SQLite route database
    #[arg(long, default_value = "routes.db")]
    db: PathBuf,

    /// Import a JSON route extract into the database
    #[arg(long)]
    import: Option<PathBuf>,

    /// Start the web server (default when no import is requested)
    #[arg(long)]
    serve: bool,

    /// Bind address for the web server
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env if present
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    let config = Config::from_env();

    let mut conn = database::open(&args.db)?;

    if let Some(path) = &args.import {
        let stats = loader::import_file(&mut conn, path)?;
        info!(
            "imported {} routes, {} segments, {} hierarchy rows from {}",
            stats.routes,
            stats.segments,
            stats.hierarchy,
            path.display()
        );
    }

    if args.serve || args.import.is_none() {
        server::serve(conn, config, &args.bind).await?;
    }

    Ok(())
}
