//! `stepsim_client`
//!
//! Client-side systems for driving a remote simulation one step at a time:
//! - Connection management with fixed-delay reconnection
//! - Step request/response correlation (one step in flight)
//! - Auto-advance scheduling
//! - Entity motion toward asynchronously arriving targets
//! - A facade tying these together on one event loop

pub mod connection;
pub mod events;
pub mod facade;
pub mod motion;
pub mod scheduler;
pub mod session;
pub mod timer;

pub use connection::ConnectionState;
pub use events::SessionEvent;
pub use facade::{SessionFacade, SessionStatus};
