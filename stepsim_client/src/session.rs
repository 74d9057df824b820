//! Step session.
//!
//! At most one step request is in flight at a time. The next step response
//! that arrives is taken as its answer (program order); if the service echoes
//! `step_id`, a mismatching echo marks the response as stale and it is
//! dropped instead.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use chrono::Utc;
use stepsim_shared::{
    error::StepError,
    protocol::{Environment, StepRequest, StepResponse},
};
use tracing::{debug, info, warn};

use crate::{
    connection::Connection,
    events::{LoopSender, StepReport},
    motion::EntityMotionEngine,
    timer::{TimerId, TimerKind, TimerSlot},
};

/// The channel a session sends requests through.
pub trait StepLink {
    fn is_open(&self) -> bool;
    /// Transmits a request; false if it could not be handed to the channel.
    fn send(&mut self, request: &StepRequest) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Idle,
    AwaitingResponse,
}

#[derive(Debug)]
struct InFlight {
    step_id: u64,
    sent_at: Instant,
}

/// Request/response state machine on top of a link.
#[derive(Debug)]
pub struct StepSession<L = Connection> {
    link: L,
    step_counter: u64,
    in_flight: Option<InFlight>,
    step_timeout: Option<Duration>,
    timeout: TimerSlot,
    loop_tx: LoopSender,
}

impl<L: StepLink> StepSession<L> {
    pub fn new(link: L, step_timeout: Option<Duration>, loop_tx: LoopSender) -> Self {
        Self {
            link,
            step_counter: 0,
            in_flight: None,
            step_timeout,
            timeout: TimerSlot::new(TimerKind::StepTimeout),
            loop_tx,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn state(&self) -> StepState {
        if self.in_flight.is_some() {
            StepState::AwaitingResponse
        } else {
            StepState::Idle
        }
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Number of responses accepted since the last reset.
    pub fn step_counter(&self) -> u64 {
        self.step_counter
    }

    pub fn in_flight_step(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.step_id)
    }

    /// Sends the next step request. Returns its step id.
    pub fn advance(&mut self, environment: Environment) -> Result<u64, StepError> {
        if !self.link.is_open() {
            return Err(StepError::NotConnected);
        }
        if self.in_flight.is_some() {
            return Err(StepError::AlreadyInFlight);
        }

        let step_id = self.step_counter + 1;
        let entities = environment.len();
        let request = StepRequest::NextStep {
            step_id,
            environment,
        };
        self.in_flight = Some(InFlight {
            step_id,
            sent_at: Instant::now(),
        });

        if !self.link.send(&request) {
            self.in_flight = None;
            warn!(step_id, "Failed to send step request");
            return Err(StepError::SendFailed);
        }

        if let Some(timeout) = self.step_timeout {
            self.timeout.schedule(timeout, &self.loop_tx);
        }
        debug!(step_id, entities, "Step request sent");
        Ok(step_id)
    }

    /// Applies a response to the in-flight step and pushes new targets into
    /// `motion`. Returns `None` if the response was discarded.
    pub fn on_response(
        &mut self,
        response: StepResponse,
        motion: &mut EntityMotionEngine,
    ) -> Option<StepReport> {
        let Some(expected) = self.in_flight_step() else {
            warn!(
                entities = response.entities.len(),
                "Discarding step response received while idle"
            );
            return None;
        };
        if let Some(echoed) = response.step_id {
            if echoed != expected {
                warn!(echoed, expected, "Discarding stale step response");
                return None;
            }
        }

        let in_flight = self.in_flight.take()?;
        self.timeout.cancel();
        self.step_counter += 1;

        let mut activities = BTreeMap::new();
        for (id, update) in response.entities {
            let target = update.target_cell().to_world(motion.cell_size());
            if motion.set_target(&id, target) {
                debug!(entity = %id, "Tracking new entity");
            }
            if let Some(annotation) = update.annotation.as_deref().filter(|a| !a.is_empty()) {
                motion.set_annotation(&id, annotation);
            }
            if let Some(description) = update.description.as_deref() {
                motion.set_description(&id, description);
            }
            if let Some(activity) = update.activity() {
                activities.insert(id, activity);
            }
        }

        let round_trip = in_flight.sent_at.elapsed();
        info!(
            step = self.step_counter,
            round_trip_ms = round_trip.as_millis() as u64,
            processing_time = response.meta.processing_time.as_deref().unwrap_or("-"),
            "Step completed"
        );

        Some(StepReport {
            step: self.step_counter,
            curr_time: response.meta.curr_time,
            processing_time: response.meta.processing_time,
            activities,
            round_trip,
            completed_at: Utc::now(),
        })
    }

    /// Asks the service to reset. Local state is cleared only once the request
    /// has been handed to the channel.
    pub fn reset(&mut self, motion: &mut EntityMotionEngine) -> Result<(), StepError> {
        if !self.link.is_open() {
            return Err(StepError::NotConnected);
        }
        if !self.link.send(&StepRequest::Reset) {
            warn!("Failed to send reset request");
            return Err(StepError::SendFailed);
        }

        if let Some(in_flight) = self.in_flight.take() {
            info!(step_id = in_flight.step_id, "Dropping in-flight step on reset");
        }
        self.timeout.cancel();
        self.step_counter = 0;
        motion.clear_all();
        info!("Simulation reset");
        Ok(())
    }

    /// The link went down. Returns the step that was in flight, if any.
    pub fn on_link_closed(&mut self) -> Option<u64> {
        self.timeout.cancel();
        let in_flight = self.in_flight.take()?;
        warn!(step_id = in_flight.step_id, "Connection lost with step in flight");
        Some(in_flight.step_id)
    }

    /// A step timeout fired. Returns the step given up on, if it still applies.
    pub fn on_timeout(&mut self, id: TimerId) -> Option<u64> {
        if !self.timeout.claim(id) {
            return None;
        }
        let in_flight = self.in_flight.take()?;
        warn!(step_id = in_flight.step_id, "Step timed out");
        Some(in_flight.step_id)
    }
}
