//! atomize service - plan and apply atomic commits over HTTP.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use atomize::io::config::{ConfigOverrides, resolve_config};
use atomize::logging::{self, LogFormat};
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "atomize-server")]
#[command(about = "HTTP service for planning and applying atomic commits")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Config file (defaults to `ATOMIZE_CONFIG`, then the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value = "compact")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_format);

    let config = resolve_config(args.config.as_deref(), &ConfigOverrides::default())
        .context("load config")?;
    info!(
        diff_mode = %config.diff_mode,
        generator = config.generator.command.first().map(String::as_str).unwrap_or("<unset>"),
        "starting atomize-server"
    );

    let state = AppState::new(config);
    let shutdown = state.shutdown.clone();

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
