//! Scripted step service for running the client locally.
//!
//! Usage:
//!   cargo run -p stepsim_tests --bin mock_service -- [--addr 127.0.0.1:8000] [--echo-ids]
//!                                                   [--entities "Amy,Bob"] [--seed 7]

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use stepsim_tests::{MockBehavior, MockService};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut addr: SocketAddr = "127.0.0.1:8000".parse().context("parse default addr")?;
    let mut behavior = MockBehavior::default();

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                addr = args[i + 1].parse().context("parse --addr")?;
                i += 2;
            }
            "--entities" if i + 1 < args.len() => {
                behavior.entities = args[i + 1]
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                behavior.seed = args[i + 1].parse().context("parse --seed")?;
                i += 2;
            }
            "--echo-ids" => {
                behavior.echo_step_id = true;
                i += 1;
            }
            _ => i += 1,
        }
    }

    let mut service = MockService::bind(addr, behavior).await?;
    info!(url = %service.url(), "Mock service listening");

    while let Some(request) = service.recv_request().await {
        info!(?request, "Request");
    }
    Ok(())
}
