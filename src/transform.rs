//! JSON map body transformation (§6, §4.7 [NEW]).
//!
//! The only body transformation in scope (§1 Non-goals excludes others).
//! Grounded on the `serde`/`serde_json` stack used throughout the
//! retrieved pack for structured payloads.

use serde_json::{Map, Value};

use crate::error::{Result, StompError};
use crate::frame::Frame;

pub const HEADER: &str = "transformation";
pub const JMS_MAP_JSON: &str = "jms-map-json";

/// Whether `frame` carries `transformation: jms-map-json` (case-insensitive
/// per §6).
pub fn is_map_json(frame: &Frame) -> bool {
    frame
        .header_ci(HEADER)
        .is_some_and(|v| v.eq_ignore_ascii_case(JMS_MAP_JSON))
}

/// Decodes a map-json frame's body into a JSON object.
pub fn decode(frame: &Frame) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(&frame.body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StompError::Protocol(
            "jms-map-json body did not decode to a JSON object".into(),
        )),
        Err(e) => Err(StompError::Protocol(format!("invalid jms-map-json body: {e}"))),
    }
}

/// Builds a frame body from a JSON map and sets the transformation header.
pub fn encode(command: impl Into<String>, map: &Map<String, Value>) -> Result<Frame> {
    let body = serde_json::to_vec(map).map_err(|e| StompError::Protocol(format!("failed to encode jms-map-json: {e}")))?;
    Ok(Frame::new(command).with_header(HEADER, JMS_MAP_JSON).with_body(body))
}
