//! Configuration system.
//!
//! Loads session configuration from JSON strings or files. Every field has a
//! default so partial files are accepted.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration for a step session client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint of the simulation service, e.g. `ws://localhost:8000/ws`.
    pub service_url: String,
    /// Fixed delay before reconnecting after the channel drops.
    pub reconnect_delay_ms: u64,
    /// Initial auto-advance delay.
    pub auto_delay_ms: u64,
    /// Edge length of one grid cell in world units.
    pub cell_size: f32,
    /// Entity movement speed in world units per second.
    pub move_speed: f32,
    /// Render/tick rate of the host loop.
    pub frame_hz: u32,
    /// Give up on an unanswered step after this long. `None` waits forever.
    pub step_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_url: "ws://localhost:8000/ws".to_string(),
            reconnect_delay_ms: 5000,
            auto_delay_ms: 1000,
            cell_size: 32.0,
            move_speed: 120.0,
            frame_hz: 60,
            step_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the session cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.cell_size > 0.0, "cell_size must be positive");
        anyhow::ensure!(self.move_speed >= 0.0, "move_speed must not be negative");
        anyhow::ensure!(self.frame_hz > 0, "frame_hz must be positive");
        anyhow::ensure!(self.auto_delay_ms > 0, "auto_delay_ms must be positive");
        anyhow::ensure!(
            self.reconnect_delay_ms > 0,
            "reconnect_delay_ms must be positive"
        );
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn auto_delay(&self) -> Duration {
        Duration::from_millis(self.auto_delay_ms)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.frame_hz as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = SessionConfig::from_json_str(
            r#"{"service_url":"ws://10.0.0.2:9000/ws","reconnect_delay_ms":250}"#,
        )
        .unwrap();
        assert_eq!(cfg.service_url, "ws://10.0.0.2:9000/ws");
        assert_eq!(cfg.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(cfg.cell_size, 32.0);
        assert_eq!(cfg.step_timeout(), None);
    }

    #[test]
    fn validate_rejects_zero_cell_size() {
        let cfg = SessionConfig {
            cell_size: 0.0,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_reconnect_delay() {
        let cfg = SessionConfig::from_json_str(r#"{"reconnect_delay_ms": 0}"#).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_delay_ms"));
    }
}
