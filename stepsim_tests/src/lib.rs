//! Test support for the session crates.
//!
//! `MockService` is a scripted WebSocket step service:
//! - greets every connection with the handshake sentinel,
//! - answers `next_step` with entities wandering one cell per step,
//! - records every request it receives,
//! - can inject raw frames and drop all connections on demand.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use stepsim_client::SessionFacade;
use stepsim_shared::{
    config::SessionConfig,
    math::GridPos,
    protocol::{EntityUpdate, StepMeta, StepRequest, StepResponse, HANDSHAKE_SENTINEL},
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// How the mock service answers.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Reply to `next_step` requests. Can be flipped later with `set_answering`.
    pub answer_steps: bool,
    /// Echo the request's `step_id` in responses.
    pub echo_step_id: bool,
    /// Entities present in every response.
    pub entities: Vec<String>,
    /// Seed for the wander movements.
    pub seed: u64,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            answer_steps: true,
            echo_step_id: false,
            entities: vec!["Isabella Rodriguez".to_string(), "Klaus Mueller".to_string()],
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
enum Control {
    Raw(String),
    DropConnections,
}

struct Shared {
    behavior: MockBehavior,
    answering: AtomicBool,
    requests: mpsc::UnboundedSender<StepRequest>,
}

impl Shared {
    fn reply_to(&self, request: &StepRequest) -> Option<String> {
        let StepRequest::NextStep {
            step_id,
            environment,
        } = request
        else {
            return None;
        };
        if !self.answering.load(Ordering::SeqCst) {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(self.behavior.seed ^ step_id);
        let entities = self
            .behavior
            .entities
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let spawn = GridPos::new(10 + 2 * i as i32, 10);
                let from = environment.get(id).copied().unwrap_or(spawn);
                let mut update = EntityUpdate::new(
                    from.x + rng.gen_range(-1..=1),
                    from.y + rng.gen_range(-1..=1),
                );
                update.annotation = Some("🚶".to_string());
                update.description = Some(format!("wandering @ office:floor:{i}"));
                (id.clone(), update)
            })
            .collect();

        let response = StepResponse {
            entities,
            meta: StepMeta {
                curr_time: Some(format!("step {step_id}")),
                processing_time: Some("0.00s".to_string()),
            },
            step_id: self.behavior.echo_step_id.then_some(*step_id),
        };
        serde_json::to_string(&response).ok()
    }
}

/// Running mock service.
pub struct MockService {
    addr: SocketAddr,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedReceiver<StepRequest>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockService {
    /// Binds to an ephemeral localhost port.
    pub async fn spawn(behavior: MockBehavior) -> anyhow::Result<Self> {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)), behavior).await
    }

    pub async fn bind(addr: SocketAddr, behavior: MockBehavior) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        let addr = listener.local_addr().context("local_addr")?;

        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(16);
        let connections = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(Shared {
            answering: AtomicBool::new(behavior.answer_steps),
            behavior,
            requests: requests_tx,
        });

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            control.clone(),
            Arc::clone(&connections),
        ));

        Ok(Self {
            addr,
            shared,
            requests,
            control,
            connections,
            task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn set_answering(&self, on: bool) {
        self.shared.answering.store(on, Ordering::SeqCst);
    }

    /// Sends a raw text frame to every open connection.
    pub fn send_raw(&self, frame: impl Into<String>) {
        let _ = self.control.send(Control::Raw(frame.into()));
    }

    /// Drops every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::DropConnections);
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn recv_request(&mut self) -> Option<StepRequest> {
        self.requests.recv().await
    }

    /// Next recorded request, waiting at most `within`.
    pub async fn next_request(&mut self, within: Duration) -> Option<StepRequest> {
        tokio::time::timeout(within, self.requests.recv())
            .await
            .ok()
            .flatten()
    }

    /// Every request recorded and not yet taken.
    pub fn take_requests(&mut self) -> Vec<StepRequest> {
        let mut out = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            out.push(request);
        }
        out
    }
}

impl Drop for MockService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        connections.fetch_add(1, Ordering::SeqCst);
        info!(%peer, "Client connected to mock service");

        let shared = Arc::clone(&shared);
        let control = control.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, shared, control).await {
                debug!(%peer, error = %e, "Connection ended with error");
            }
        });
    }
}

async fn serve(
    stream: TcpStream,
    shared: Arc<Shared>,
    mut control: broadcast::Receiver<Control>,
) -> anyhow::Result<()> {
    let mut ws = accept_async(stream).await.context("websocket accept")?;
    ws.send(Message::Text(HANDSHAKE_SENTINEL.to_string()))
        .await
        .context("send handshake")?;

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let request: StepRequest = match serde_json::from_str(&text) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(error = %e, "Ignoring unparseable request");
                            continue;
                        }
                    };
                    let reply = shared.reply_to(&request);
                    let _ = shared.requests.send(request);
                    if let Some(reply) = reply {
                        ws.send(Message::Text(reply)).await.context("send reply")?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("websocket read"),
            },
            ctl = control.recv() => match ctl {
                Ok(Control::Raw(text)) => ws.send(Message::Text(text)).await.context("send raw")?,
                Ok(Control::DropConnections) | Err(broadcast::error::RecvError::Closed) => {
                    return Ok(());
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// Session config pointed at `url` with short delays for tests.
pub fn session_config(url: &str) -> SessionConfig {
    SessionConfig {
        service_url: url.to_string(),
        reconnect_delay_ms: 100,
        auto_delay_ms: 50,
        ..SessionConfig::default()
    }
}

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Runs the session's event loop until `done` holds.
pub async fn pump_until<F>(
    facade: &mut SessionFacade,
    within: Duration,
    mut done: F,
) -> anyhow::Result<()>
where
    F: FnMut(&SessionFacade) -> bool,
{
    tokio::time::timeout(within, async {
        while !done(&*facade) {
            anyhow::ensure!(facade.pump().await, "session event loop closed");
        }
        Ok(())
    })
    .await
    .context("condition not reached in time")?
}

/// Runs the session's event loop for a fixed duration.
pub async fn pump_for(facade: &mut SessionFacade, duration: Duration) {
    let _ = tokio::time::timeout(duration, async {
        while facade.pump().await {}
    })
    .await;
}
