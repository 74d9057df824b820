//! Events.
//!
//! Two kinds of events exist:
//! - `LoopEvent`: posted by channel and timer tasks into the session's single
//!   event loop. Only the loop owner mutates session state in response.
//! - `SessionEvent`: published by the facade for the UI layer to drain.

use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use stepsim_shared::{error::StepError, protocol::Activity};
use tokio::sync::mpsc;

use crate::timer::{TimerId, TimerKind};

pub type LoopSender = mpsc::UnboundedSender<LoopEvent>;
pub type LoopReceiver = mpsc::UnboundedReceiver<LoopEvent>;

/// Input to the session event loop.
#[derive(Debug)]
pub enum LoopEvent {
    /// Something happened on the channel opened in `epoch`.
    Channel { epoch: u64, event: ChannelEvent },
    /// A one-shot timer elapsed.
    Timer { kind: TimerKind, id: TimerId },
}

/// Low-level channel activity reported by the socket task.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Handshake finished; frames pushed into `outbound` are written in order.
    Opened { outbound: mpsc::UnboundedSender<String> },
    /// One inbound text frame, not yet validated.
    Frame(String),
    /// Connect failed or the channel ended.
    Closed { reason: String },
}

/// Summary of one completed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: u64,
    pub curr_time: Option<String>,
    pub processing_time: Option<String>,
    /// Task/location per entity, for entities whose description carried one.
    pub activities: BTreeMap<String, Activity>,
    /// Time between sending the request and accepting the response.
    pub round_trip: Duration,
    pub completed_at: DateTime<Utc>,
}

/// Status stream consumed by the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    StepStarted { step_id: u64 },
    StepCompleted(StepReport),
    /// A step could not be started, or was given up on.
    StepFailed(StepError),
    /// The connection dropped while the step was in flight.
    StepAborted { step_id: u64 },
    AutoModeChanged { enabled: bool },
    ResetSent,
    ResetFailed(StepError),
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Connected => write!(f, "Connected to server - Ready for simulation"),
            SessionEvent::Disconnected => write!(f, "Disconnected from server"),
            SessionEvent::StepStarted { step_id } => write!(f, "Processing step {step_id}..."),
            SessionEvent::StepCompleted(report) => {
                write!(f, "Step {} completed", report.step)?;
                if let Some(t) = &report.processing_time {
                    write!(f, " (last step: {t})")?;
                }
                if let Some(t) = &report.curr_time {
                    write!(f, " at {t}")?;
                }
                Ok(())
            }
            SessionEvent::StepFailed(StepError::NotConnected) => {
                write!(f, "Error: Not connected to server")
            }
            SessionEvent::StepFailed(StepError::SendFailed) => {
                write!(f, "Error: Failed to send step request")
            }
            SessionEvent::StepFailed(err) => write!(f, "Error: {err}"),
            SessionEvent::StepAborted { step_id } => {
                write!(f, "Step {step_id} aborted: connection lost")
            }
            SessionEvent::AutoModeChanged { enabled: true } => write!(f, "Auto mode enabled"),
            SessionEvent::AutoModeChanged { enabled: false } => write!(f, "Auto mode disabled"),
            SessionEvent::ResetSent => write!(f, "Simulation reset - Ready for next step"),
            SessionEvent::ResetFailed(StepError::NotConnected) => {
                write!(f, "Error: Not connected to server")
            }
            SessionEvent::ResetFailed(_) => write!(f, "Error: Failed to send reset request"),
        }
    }
}
