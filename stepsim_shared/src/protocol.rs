//! Wire protocol spoken with the simulation service.
//!
//! Frames are WebSocket text messages. Requests are JSON objects tagged by
//! `action`. Inbound frames are either the literal handshake sentinel or a JSON
//! step response, which must carry an object under `persona` and an object
//! under `meta` before it is accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::FrameError, math::GridPos};

/// Text frame the service sends once the channel is established.
pub const HANDSHAKE_SENTINEL: &str = "connected";

/// Separator between the task and location halves of a description.
pub const ACTIVITY_SEPARATOR: &str = " @ ";

/// Grid position of every tracked entity, keyed by entity id.
pub type Environment = BTreeMap<String, GridPos>;

/// Client -> service request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepRequest {
    /// Advance the simulation by one step from the given environment.
    NextStep { step_id: u64, environment: Environment },
    /// Return the simulation to its initial state.
    Reset,
}

impl StepRequest {
    pub fn step_id(&self) -> Option<u64> {
        match self {
            StepRequest::NextStep { step_id, .. } => Some(*step_id),
            StepRequest::Reset => None,
        }
    }
}

/// Service -> client answer to a `next_step` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StepResponse {
    #[serde(rename = "persona")]
    pub entities: BTreeMap<String, EntityUpdate>,
    pub meta: StepMeta,
    /// Echo of the request's step id, when the service supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<u64>,
}

/// New target and labels for one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityUpdate {
    /// Target grid cell as `[x, y]`.
    #[serde(rename = "movement")]
    pub target: [i32; 2],
    #[serde(rename = "pronunciatio", default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EntityUpdate {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            target: [x, y],
            annotation: None,
            description: None,
        }
    }

    pub fn target_cell(&self) -> GridPos {
        GridPos::new(self.target[0], self.target[1])
    }

    /// Task/location pair parsed from the description, if it has one.
    pub fn activity(&self) -> Option<Activity> {
        self.description.as_deref().and_then(Activity::parse)
    }
}

/// Timing metadata attached to a step response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StepMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curr_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<String>,
}

/// What an entity is doing and where, split from `"task @ location"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub task: String,
    pub location: String,
}

impl Activity {
    /// Splits a description into exactly two halves; anything else yields `None`.
    pub fn parse(description: &str) -> Option<Self> {
        let mut parts = description.split(ACTIVITY_SEPARATOR);
        let task = parts.next()?;
        let location = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            task: task.to_string(),
            location: location.to_string(),
        })
    }
}

/// A successfully framed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The handshake sentinel; carries no payload.
    Handshake,
    Step(StepResponse),
}

/// Encodes a request as a text frame.
pub fn encode_request(request: &StepRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

/// Frames one inbound text message.
pub fn decode_frame(text: &str) -> Result<Inbound, FrameError> {
    if text == HANDSHAKE_SENTINEL {
        return Ok(Inbound::Handshake);
    }

    let value: Value = serde_json::from_str(text)?;
    if !value.get("persona").is_some_and(Value::is_object) {
        return Err(FrameError::MissingShape("persona"));
    }
    if !value.get("meta").is_some_and(Value::is_object) {
        return Err(FrameError::MissingShape("meta"));
    }
    Ok(Inbound::Step(serde_json::from_value(value)?))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn next_step_request_wire_format() {
        let mut environment = Environment::new();
        environment.insert("Amy".to_string(), GridPos::new(3, 4));
        let req = StepRequest::NextStep {
            step_id: 7,
            environment,
        };

        let value: Value = serde_json::from_str(&encode_request(&req).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"action": "next_step", "step_id": 7, "environment": {"Amy": {"x": 3, "y": 4}}})
        );
    }

    #[test]
    fn reset_request_wire_format() {
        assert_eq!(
            encode_request(&StepRequest::Reset).unwrap(),
            r#"{"action":"reset"}"#
        );
    }

    #[test]
    fn sentinel_is_handshake() {
        assert_eq!(decode_frame("connected").unwrap(), Inbound::Handshake);
    }

    #[test]
    fn decodes_full_response() {
        let text = r#"{
            "persona": {
                "Michael Scott": {
                    "movement": [11, 15],
                    "pronunciatio": "📋",
                    "description": "reviewing reports @ office:manager_office:desk",
                    "chat": null
                }
            },
            "meta": {"curr_time": "February 13, 2023, 14:00:00", "processing_time": "0.42s"}
        }"#;

        let Inbound::Step(resp) = decode_frame(text).unwrap() else {
            panic!("expected step response");
        };
        let update = &resp.entities["Michael Scott"];
        assert_eq!(update.target_cell(), GridPos::new(11, 15));
        assert_eq!(update.annotation.as_deref(), Some("📋"));
        assert_eq!(
            update.activity(),
            Some(Activity {
                task: "reviewing reports".to_string(),
                location: "office:manager_office:desk".to_string(),
            })
        );
        assert_eq!(resp.meta.processing_time.as_deref(), Some("0.42s"));
        assert_eq!(resp.step_id, None);
    }

    #[test]
    fn truncated_json_is_malformed() {
        let err = decode_frame(r#"{"persona": {"Amy": {"movement": [1,"#).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn shape_check_requires_persona_and_meta_objects() {
        assert!(matches!(
            decode_frame(r#"{"meta": {}}"#),
            Err(FrameError::MissingShape("persona"))
        ));
        assert!(matches!(
            decode_frame(r#"{"persona": [], "meta": {}}"#),
            Err(FrameError::MissingShape("persona"))
        ));
        assert!(matches!(
            decode_frame(r#"{"persona": {}}"#),
            Err(FrameError::MissingShape("meta"))
        ));
        assert!(matches!(
            decode_frame(r#""connected""#),
            Err(FrameError::MissingShape("persona"))
        ));
    }

    #[test]
    fn activity_needs_exactly_two_halves() {
        assert_eq!(Activity::parse("idle"), None);
        assert_eq!(Activity::parse("a @ b @ c"), None);
        assert!(Activity::parse("sleeping @ home").is_some());
    }
}
