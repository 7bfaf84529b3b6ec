#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

mod cli;
mod inference_endpoint;
mod responses;
mod routes;
mod workers;

use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Cli::parse();

    let app = Router::new()
        .route("/health", get(health))
        .merge(routes::fill_mask::router(&args)?);

    let listener = tokio::net::TcpListener::bind(args.host()).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}
