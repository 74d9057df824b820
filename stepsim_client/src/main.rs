//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p stepsim_client -- [--url ws://localhost:8000/ws] [--config session.json]
//!                                  [--reconnect-ms 5000] [--auto-ms 1000] [--frame-hz 60]
//!
//! The client connects to the simulation service, animates entities at the
//! frame rate, and prints status events as they happen.
//!
//! Console commands:
//!   step              - Advance one step
//!   reset             - Reset the simulation
//!   auto on [ms]      - Enable auto mode (optionally with a delay)
//!   auto off          - Disable auto mode
//!   delay <ms>        - Change the auto-advance delay
//!   status            - Show session status
//!   entities          - List tracked entities
//!   quit              - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use stepsim_client::SessionFacade;
use stepsim_shared::config::SessionConfig;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

fn parse_args() -> anyhow::Result<SessionConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            SessionConfig::load(&PathBuf::from(path))?
        }
        None => SessionConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" if i + 1 < args.len() => {
                cfg.service_url = args[i + 1].clone();
                i += 2;
            }
            "--reconnect-ms" if i + 1 < args.len() => {
                cfg.reconnect_delay_ms = args[i + 1].parse().context("parse --reconnect-ms")?;
                i += 2;
            }
            "--auto-ms" if i + 1 < args.len() => {
                cfg.auto_delay_ms = args[i + 1].parse().context("parse --auto-ms")?;
                i += 2;
            }
            "--frame-hz" if i + 1 < args.len() => {
                cfg.frame_hz = args[i + 1].parse().context("parse --frame-hz")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Runs one console line. Returns false when the client should exit.
fn exec_console(facade: &mut SessionFacade, line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = tokens.first() else {
        return true;
    };

    match command {
        "step" => {
            facade.advance();
        }
        "reset" => {
            facade.reset();
        }
        "auto" => match tokens.get(1).copied() {
            Some("on") => {
                let delay = tokens
                    .get(2)
                    .and_then(|ms| ms.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(facade.auto_delay());
                facade.set_auto_mode(true, delay);
            }
            Some("off") => {
                let delay = facade.auto_delay();
                facade.set_auto_mode(false, delay);
            }
            _ => println!("Usage: auto on [ms] | auto off"),
        },
        "delay" => match tokens.get(1).and_then(|ms| ms.parse().ok()) {
            Some(ms) => facade.set_auto_delay(Duration::from_millis(ms)),
            None => println!("Usage: delay <ms>"),
        },
        "status" => match serde_json::to_string_pretty(&facade.status()) {
            Ok(text) => println!("{text}"),
            Err(e) => println!("Error: {e}"),
        },
        "entities" => {
            let cell = facade.config().cell_size;
            for entity in facade.entities() {
                let grid = entity.position.to_grid(cell);
                let activity = entity
                    .activity
                    .as_ref()
                    .map(|a| format!("{} @ {}", a.task, a.location))
                    .or_else(|| entity.description.clone())
                    .unwrap_or_default();
                println!(
                    "{:<20} ({:>4},{:>4}) {} {}",
                    entity.id, grid.x, grid.y, entity.annotation, activity
                );
            }
        }
        "quit" | "exit" => return false,
        other => println!("Unknown command: {other}"),
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args().context("parse arguments")?;
    info!(url = %cfg.service_url, frame_hz = cfg.frame_hz, "Starting client");

    let mut frames = tokio::time::interval(cfg.frame_interval());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut facade = SessionFacade::new(cfg);
    facade.start();

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Type 'step' to advance, 'auto on' for auto mode, 'status' for info, 'quit' to exit.");
    println!();

    let mut last_frame = Instant::now();
    loop {
        tokio::select! {
            Some(event) = facade.next_event() => facade.dispatch(event),
            now = frames.tick() => {
                facade.tick(now - last_frame);
                last_frame = now;
            }
            line = console_rx.recv() => match line {
                Some(line) => {
                    if !exec_console(&mut facade, &line) {
                        break;
                    }
                }
                None => break,
            },
        }

        for event in facade.drain_events() {
            println!("{event}");
        }
    }

    facade.close();
    info!("Client exiting");
    Ok(())
}
