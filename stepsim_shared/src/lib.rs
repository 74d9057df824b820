//! `stepsim_shared`
//!
//! Shared libraries used by the session client and its test service.
//!
//! Design goals:
//! - Keep the wire format explicit and validated at the edge.
//! - Deterministic math with no hidden state.
//! - Typed, recoverable errors.
//! - No `unsafe`.

pub mod config;
pub mod error;
pub mod math;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::math::*;
    pub use crate::protocol::*;
}
