//! Connection to the simulation service.
//!
//! The connection owns one logical WebSocket channel:
//! - `open()` spawns a socket task that reports back through the event loop.
//! - Inbound frames are validated here; only well-formed step responses
//!   travel further up.
//! - A dropped channel is reopened after a fixed delay, forever, until
//!   `close()` is called.
//!
//! Every socket task is tagged with an epoch so events from a superseded
//! channel are ignored.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use stepsim_shared::protocol::{decode_frame, encode_request, Inbound, StepRequest, StepResponse};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::{
    events::{ChannelEvent, LoopEvent, LoopSender},
    session::StepLink,
    timer::{TimerId, TimerKind, TimerSlot},
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// What the owner of a connection gets told.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionNotice {
    Opened,
    Closed,
    Message(StepResponse),
}

/// Reconnecting WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    url: String,
    state: ConnectionState,
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
    reconnect: TimerSlot,
    reconnect_delay: Duration,
    auto_reconnect: bool,
    loop_tx: LoopSender,
}

impl Connection {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, loop_tx: LoopSender) -> Self {
        Self {
            url: url.into(),
            state: ConnectionState::Disconnected,
            epoch: 0,
            outbound: None,
            task: None,
            reconnect: TimerSlot::new(TimerKind::Reconnect),
            reconnect_delay,
            auto_reconnect: false,
            loop_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true while a reconnect is scheduled.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_pending()
    }

    /// Starts connecting unless already open or connecting.
    pub fn open(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            return;
        }

        self.auto_reconnect = true;
        self.reconnect.cancel();
        self.epoch += 1;
        self.state = ConnectionState::Connecting;
        info!(url = %self.url, epoch = self.epoch, "Connecting to simulation service");

        self.task = Some(tokio::spawn(run_channel(
            self.url.clone(),
            self.epoch,
            self.loop_tx.clone(),
        )));
    }

    /// Tears the channel down and stops reconnecting until `open()` is called.
    pub fn close(&mut self) {
        self.auto_reconnect = false;
        self.reconnect.cancel();

        match self.state {
            ConnectionState::Open => {
                // Dropping the sender makes the socket task send a close frame.
                self.state = ConnectionState::Closing;
                self.outbound = None;
            }
            ConnectionState::Connecting => {
                if let Some(task) = self.task.take() {
                    task.abort();
                }
                self.epoch += 1;
                self.state = ConnectionState::Disconnected;
            }
            ConnectionState::Closing | ConnectionState::Disconnected => {}
        }
        info!(url = %self.url, "Connection closed by client");
    }

    /// Serializes and transmits a request. Returns false unless the channel is
    /// open and accepted the frame.
    pub fn send(&mut self, request: &StepRequest) -> bool {
        if self.state != ConnectionState::Open {
            debug!(state = ?self.state, "Refusing to send on a channel that is not open");
            return false;
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return false;
        };

        let text = match encode_request(request) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize request");
                return false;
            }
        };
        outbound.send(text).is_ok()
    }

    /// Applies one event from a socket task.
    pub fn handle_channel_event(
        &mut self,
        epoch: u64,
        event: ChannelEvent,
    ) -> Option<ConnectionNotice> {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "Ignoring event from stale channel");
            return None;
        }

        match event {
            ChannelEvent::Opened { outbound } => {
                self.state = ConnectionState::Open;
                self.outbound = Some(outbound);
                info!(url = %self.url, epoch, "Connected to simulation service");
                Some(ConnectionNotice::Opened)
            }
            ChannelEvent::Frame(text) if self.state != ConnectionState::Open => {
                debug!(
                    state = ?self.state,
                    len = text.len(),
                    "Dropping frame on a channel that is not open"
                );
                None
            }
            ChannelEvent::Frame(text) => match decode_frame(&text) {
                Ok(Inbound::Handshake) => {
                    debug!("Handshake acknowledged");
                    None
                }
                Ok(Inbound::Step(response)) => Some(ConnectionNotice::Message(response)),
                Err(e) => {
                    warn!(error = %e, len = text.len(), "Dropping inbound frame");
                    None
                }
            },
            ChannelEvent::Closed { reason } => {
                self.state = ConnectionState::Disconnected;
                self.outbound = None;
                self.task = None;
                if self.auto_reconnect {
                    self.reconnect.schedule(self.reconnect_delay, &self.loop_tx);
                    info!(
                        %reason,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "Disconnected; reconnect scheduled"
                    );
                } else {
                    info!(%reason, "Disconnected");
                }
                Some(ConnectionNotice::Closed)
            }
        }
    }

    /// Handles a fired reconnect timer.
    pub fn on_reconnect_timer(&mut self, id: TimerId) {
        if self.reconnect.claim(id) {
            self.open();
        }
    }
}

impl StepLink for Connection {
    fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    fn send(&mut self, request: &StepRequest) -> bool {
        Connection::send(self, request)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_channel(url: String, epoch: u64, tx: LoopSender) {
    let reason = match connect_async(url.as_str()).await {
        Ok((socket, _)) => {
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let opened = LoopEvent::Channel {
                epoch,
                event: ChannelEvent::Opened {
                    outbound: outbound_tx,
                },
            };
            if tx.send(opened).is_err() {
                return;
            }
            pump_socket(socket, outbound_rx, epoch, &tx).await
        }
        Err(e) => format!("connect failed: {e}"),
    };

    let _ = tx.send(LoopEvent::Channel {
        epoch,
        event: ChannelEvent::Closed { reason },
    });
}

/// Shuttles frames until either side ends. Returns the reason it stopped.
async fn pump_socket(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    epoch: u64,
    tx: &LoopSender,
) -> String {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = LoopEvent::Channel { epoch, event: ChannelEvent::Frame(text) };
                    if tx.send(event).is_err() {
                        return "event loop gone".to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => format!("closed by service: {} {}", frame.code, frame.reason),
                        None => "closed by service".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return format!("channel error: {e}"),
                None => return "channel ended".to_string(),
            },
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return format!("send failed: {e}");
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return "closed by client".to_string();
                }
            },
        }
    }
}
