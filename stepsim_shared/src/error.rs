//! Error taxonomy for the step session.
//!
//! None of these are fatal: each one either rolls the session back to a
//! consistent state or is dropped after logging.

use thiserror::Error;

/// Why a step or reset request was not carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StepError {
    /// The channel is not open; retry later or wait for the reconnect.
    #[error("not connected to the simulation service")]
    NotConnected,
    /// A step is already awaiting its response.
    #[error("a step is already in flight")]
    AlreadyInFlight,
    /// The channel refused the request; the session was rolled back.
    #[error("failed to send request")]
    SendFailed,
    /// The service did not answer within the configured step timeout.
    #[error("step {step_id} timed out")]
    TimedOut { step_id: u64 },
}

/// An inbound frame that could not be turned into a step response.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is missing the `{0}` object")]
    MissingShape(&'static str),
}
