//! Session facade.
//!
//! The only surface the rendering and UI layers talk to. It owns the
//! connection (through the step session), the auto-advance scheduler and the
//! motion engine, and runs them on one event loop:
//! - `next_event()` waits for channel or timer activity,
//! - `dispatch()` applies it,
//! - `tick()` is called once per rendered frame.
//!
//! Nothing here returns an error to the caller; failures become
//! `SessionEvent`s that the UI drains with `drain_events()`.

use std::{collections::VecDeque, time::Duration};

use serde::Serialize;
use stepsim_shared::{config::SessionConfig, error::StepError, protocol::Environment};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionNotice, ConnectionState},
    events::{LoopEvent, LoopReceiver, SessionEvent},
    motion::{Entity, EntityMotionEngine},
    scheduler::AutoAdvanceScheduler,
    session::{StepLink, StepSession},
    timer::TimerKind,
};

/// Point-in-time view of the session for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub step_counter: u64,
    pub processing: bool,
    pub auto_mode_enabled: bool,
    pub connection_state: ConnectionState,
}

/// Step-based simulation session.
pub struct SessionFacade {
    config: SessionConfig,
    session: StepSession<Connection>,
    scheduler: AutoAdvanceScheduler,
    motion: EntityMotionEngine,
    events: VecDeque<SessionEvent>,
    loop_rx: LoopReceiver,
}

impl SessionFacade {
    /// Builds a session. Nothing connects until `start()`.
    pub fn new(config: SessionConfig) -> Self {
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let connection = Connection::new(
            config.service_url.clone(),
            config.reconnect_delay(),
            loop_tx.clone(),
        );
        let session = StepSession::new(connection, config.step_timeout(), loop_tx.clone());
        let scheduler = AutoAdvanceScheduler::new(config.auto_delay(), loop_tx);
        let motion = EntityMotionEngine::new(config.cell_size);

        Self {
            config,
            session,
            scheduler,
            motion,
            events: VecDeque::new(),
            loop_rx,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens the connection. Reconnects happen automatically from here on.
    pub fn start(&mut self) {
        self.session.link_mut().open();
    }

    /// Closes the connection and stops reconnecting.
    pub fn close(&mut self) {
        self.scheduler.cancel();
        self.session.link_mut().close();
    }

    /// Requests the next step using the entities' on-screen cells as the
    /// environment. Returns true if a request went out.
    pub fn advance(&mut self) -> bool {
        let environment = self.motion.snapshot();
        match self.session.advance(environment) {
            Ok(step_id) => {
                self.emit(SessionEvent::StepStarted { step_id });
                true
            }
            Err(StepError::AlreadyInFlight) => {
                debug!("Step already in flight; advance ignored");
                false
            }
            Err(e) => {
                warn!(error = %e, "Step not started");
                self.emit(SessionEvent::StepFailed(e));
                false
            }
        }
    }

    /// Resets the simulation. Auto mode is switched off first.
    pub fn reset(&mut self) -> bool {
        if self.session.link().is_open() && self.scheduler.is_enabled() {
            self.scheduler.set_enabled(false, false);
            self.emit(SessionEvent::AutoModeChanged { enabled: false });
        }

        match self.session.reset(&mut self.motion) {
            Ok(()) => {
                self.emit(SessionEvent::ResetSent);
                true
            }
            Err(e) => {
                warn!(error = %e, "Reset not sent");
                self.emit(SessionEvent::ResetFailed(e));
                false
            }
        }
    }

    /// Enables or disables auto mode with the given delay between steps.
    pub fn set_auto_mode(&mut self, enabled: bool, delay: Duration) {
        self.scheduler.set_delay(delay);
        let was_enabled = self.scheduler.is_enabled();
        let ready = !self.session.is_processing() && self.session.link().is_open();
        self.scheduler.set_enabled(enabled, ready);

        if was_enabled != enabled {
            info!(enabled, delay_ms = delay.as_millis() as u64, "Auto mode changed");
            self.emit(SessionEvent::AutoModeChanged { enabled });
        }
    }

    pub fn auto_delay(&self) -> Duration {
        self.scheduler.delay()
    }

    /// Changes the auto-advance delay without toggling auto mode.
    pub fn set_auto_delay(&mut self, delay: Duration) {
        self.scheduler.set_delay(delay);
    }

    /// Advances entity motion by one rendered frame of length `dt`.
    pub fn tick(&mut self, dt: Duration) {
        self.motion.tick(self.config.move_speed * dt.as_secs_f32());
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            step_counter: self.session.step_counter(),
            processing: self.session.is_processing(),
            auto_mode_enabled: self.scheduler.is_enabled(),
            connection_state: self.session.link().state(),
        }
    }

    /// Grid cells of all tracked entities.
    pub fn snapshot(&self) -> Environment {
        self.motion.snapshot()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.motion.entities()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.motion.entity(id)
    }

    /// Removes and returns all queued status events, oldest first.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// Waits for the next channel or timer event.
    pub async fn next_event(&mut self) -> Option<LoopEvent> {
        self.loop_rx.recv().await
    }

    /// Waits for one event and applies it. Returns false if the loop closed.
    pub async fn pump(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Applies one event-loop event.
    pub fn dispatch(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Channel { epoch, event } => {
                let notice = self.session.link_mut().handle_channel_event(epoch, event);
                match notice {
                    Some(ConnectionNotice::Opened) => self.emit(SessionEvent::Connected),
                    Some(ConnectionNotice::Closed) => {
                        if let Some(step_id) = self.session.on_link_closed() {
                            self.emit(SessionEvent::StepAborted { step_id });
                        }
                        self.emit(SessionEvent::Disconnected);
                    }
                    Some(ConnectionNotice::Message(response)) => {
                        if let Some(report) = self.session.on_response(response, &mut self.motion)
                        {
                            self.scheduler
                                .on_step_completed(!self.session.is_processing());
                            self.emit(SessionEvent::StepCompleted(report));
                        }
                    }
                    None => {}
                }
            }
            LoopEvent::Timer { kind, id } => match kind {
                TimerKind::Reconnect => self.session.link_mut().on_reconnect_timer(id),
                TimerKind::AutoAdvance => {
                    if self.scheduler.on_timer(id) && !self.session.is_processing() {
                        debug!("Auto-advancing");
                        self.advance();
                    }
                }
                TimerKind::StepTimeout => {
                    if let Some(step_id) = self.session.on_timeout(id) {
                        self.emit(SessionEvent::StepFailed(StepError::TimedOut { step_id }));
                    }
                }
            },
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use stepsim_shared::math::GridPos;

    use super::*;
    use crate::events::ChannelEvent;

    /// A facade whose connection was marked open by hand; frames the session
    /// writes land in the returned receiver.
    fn open_facade(config: SessionConfig) -> (SessionFacade, mpsc::UnboundedReceiver<String>) {
        let mut facade = SessionFacade::new(config);
        let (outbound, frames) = mpsc::unbounded_channel();
        facade.dispatch(LoopEvent::Channel {
            epoch: 0,
            event: ChannelEvent::Opened { outbound },
        });
        assert_eq!(facade.drain_events(), vec![SessionEvent::Connected]);
        (facade, frames)
    }

    fn deliver(facade: &mut SessionFacade, frame: Value) {
        facade.dispatch(LoopEvent::Channel {
            epoch: 0,
            event: ChannelEvent::Frame(frame.to_string()),
        });
    }

    fn step_frame(x: i32, y: i32) -> Value {
        json!({
            "persona": {"Amy": {"movement": [x, y], "description": "filing @ office:desk"}},
            "meta": {"curr_time": "09:00", "processing_time": "0.1s"}
        })
    }

    fn next_request(frames: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&frames.try_recv().expect("request frame")).unwrap()
    }

    #[test]
    fn advance_while_disconnected_reports_error() {
        let mut facade = SessionFacade::new(SessionConfig::default());
        assert!(!facade.advance());
        assert_eq!(
            facade.drain_events(),
            vec![SessionEvent::StepFailed(StepError::NotConnected)]
        );
        assert_eq!(facade.status().connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn step_roundtrip_through_facade() {
        let (mut facade, mut frames) = open_facade(SessionConfig::default());

        assert!(facade.advance());
        assert!(!facade.advance(), "second advance must be ignored");
        assert_eq!(
            next_request(&mut frames),
            json!({"action": "next_step", "step_id": 1, "environment": {}})
        );
        assert!(frames.try_recv().is_err());
        assert!(facade.status().processing);

        deliver(&mut facade, step_frame(2, 2));
        let status = facade.status();
        assert_eq!(status.step_counter, 1);
        assert!(!status.processing);
        assert_eq!(facade.snapshot()["Amy"], GridPos::new(2, 2));

        let events = facade.drain_events();
        assert_eq!(events[0], SessionEvent::StepStarted { step_id: 1 });
        let SessionEvent::StepCompleted(report) = &events[1] else {
            panic!("expected step completion, got {events:?}");
        };
        assert_eq!(report.step, 1);
        assert_eq!(report.activities["Amy"].task, "filing");

        assert!(facade.advance());
        assert_eq!(
            next_request(&mut frames),
            json!({"action": "next_step", "step_id": 2, "environment": {"Amy": {"x": 2, "y": 2}}})
        );
    }

    #[test]
    fn tick_walks_entities_at_move_speed() {
        let (mut facade, _frames) = open_facade(SessionConfig::default());
        facade.advance();
        deliver(&mut facade, step_frame(0, 0));
        facade.advance();
        deliver(&mut facade, step_frame(1, 0));

        // 120 units/s for 1/60 s is 2 units per frame.
        facade.tick(Duration::from_secs_f32(1.0 / 60.0));
        let amy = facade.entity("Amy").unwrap();
        assert!((amy.position.x - 2.0).abs() < 1e-4);
        for _ in 0..20 {
            facade.tick(Duration::from_secs_f32(1.0 / 60.0));
        }
        assert_eq!(facade.snapshot()["Amy"], GridPos::new(1, 0));
    }

    #[test]
    fn malformed_frame_changes_nothing() {
        let (mut facade, _frames) = open_facade(SessionConfig::default());
        facade.advance();
        facade.dispatch(LoopEvent::Channel {
            epoch: 0,
            event: ChannelEvent::Frame(r#"{"persona": {"Amy": {"movem"#.to_string()),
        });
        let status = facade.status();
        assert_eq!(status.step_counter, 0);
        assert!(status.processing);
        assert_eq!(status.connection_state, ConnectionState::Open);
    }

    #[test]
    fn reset_clears_counter_entities_and_auto_mode() {
        let (mut facade, mut frames) = open_facade(SessionConfig::default());
        facade.advance();
        deliver(&mut facade, step_frame(3, 3));
        let _ = next_request(&mut frames);
        facade.drain_events();

        assert!(facade.reset());
        assert_eq!(next_request(&mut frames), json!({"action": "reset"}));
        let status = facade.status();
        assert_eq!(status.step_counter, 0);
        assert!(!status.auto_mode_enabled);
        assert_eq!(facade.entities().count(), 0);
        assert_eq!(facade.drain_events(), vec![SessionEvent::ResetSent]);
    }

    #[test]
    fn connection_loss_aborts_in_flight_step() {
        let (mut facade, _frames) = open_facade(SessionConfig::default());
        facade.advance();
        facade.drain_events();

        facade.close();
        facade.dispatch(LoopEvent::Channel {
            epoch: 0,
            event: ChannelEvent::Closed {
                reason: "closed by client".to_string(),
            },
        });
        assert_eq!(
            facade.drain_events(),
            vec![
                SessionEvent::StepAborted { step_id: 1 },
                SessionEvent::Disconnected
            ]
        );
        assert!(!facade.status().processing);
    }

    #[tokio::test(start_paused = true)]
    async fn response_queued_behind_close_is_dropped() {
        let (mut facade, _frames) = open_facade(SessionConfig::default());
        facade.set_auto_mode(true, Duration::from_millis(500));
        facade.advance();
        facade.close();
        facade.drain_events();

        deliver(&mut facade, step_frame(2, 2));
        assert_eq!(facade.status().step_counter, 0);
        assert!(facade.entity("Amy").is_none());
        assert!(facade.drain_events().is_empty());

        let fired = tokio::time::timeout(Duration::from_secs(10), facade.next_event()).await;
        assert!(fired.is_err(), "auto-advance must stay cancelled after close");
    }

    #[tokio::test(start_paused = true)]
    async fn auto_mode_schedules_exactly_one_advance() {
        let (mut facade, mut frames) = open_facade(SessionConfig::default());
        facade.advance();
        deliver(&mut facade, step_frame(1, 1));
        let _ = next_request(&mut frames);

        facade.set_auto_mode(true, Duration::from_millis(1000));
        assert!(facade.status().auto_mode_enabled);
        let event = facade.next_event().await.expect("timer event");
        facade.dispatch(event);
        assert_eq!(next_request(&mut frames)["step_id"], json!(2));
        assert!(frames.try_recv().is_err());

        // No response yet: nothing else may be scheduled.
        let idle = tokio::time::timeout(Duration::from_secs(10), facade.next_event()).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_mode_before_fire_prevents_advance() {
        let (mut facade, mut frames) = open_facade(SessionConfig::default());
        facade.advance();
        deliver(&mut facade, step_frame(1, 1));
        let _ = next_request(&mut frames);

        facade.set_auto_mode(true, Duration::from_millis(1000));
        facade.set_auto_mode(false, Duration::from_millis(1000));

        let fired = tokio::time::timeout(Duration::from_secs(10), facade.next_event()).await;
        assert!(fired.is_err());
        assert!(frames.try_recv().is_err());
        assert_eq!(
            facade.drain_events().last(),
            Some(&SessionEvent::AutoModeChanged { enabled: false })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_mode_keeps_stepping_after_each_completion() {
        let (mut facade, mut frames) = open_facade(SessionConfig::default());
        facade.set_auto_mode(true, Duration::from_millis(200));

        for expected in 1..=3u64 {
            let event = facade.next_event().await.expect("timer event");
            facade.dispatch(event);
            assert_eq!(next_request(&mut frames)["step_id"], json!(expected));
            deliver(&mut facade, step_frame(expected as i32, 0));
        }
        assert_eq!(facade.status().step_counter, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_returns_to_idle() {
        let config = SessionConfig {
            step_timeout_ms: Some(2000),
            ..SessionConfig::default()
        };
        let (mut facade, _frames) = open_facade(config);
        facade.advance();
        facade.drain_events();

        let event = facade.next_event().await.expect("timeout event");
        facade.dispatch(event);
        assert!(!facade.status().processing);
        assert_eq!(
            facade.drain_events(),
            vec![SessionEvent::StepFailed(StepError::TimedOut { step_id: 1 })]
        );
        assert!(facade.advance());
    }
}
