//! Wire payloads: client input records and per-peer server snapshots.
//!
//! The textual contract is JSON on the unsequenced data channel. Inputs are
//! parsed length-aware straight from the received slice; nothing is copied
//! into an intermediate buffer first. `clientTick` and `seq` are required,
//! everything else defaults to zero and the axes are clamped on ingress so
//! the simulation never sees an out-of-range or non-finite value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single client input, bound to the peer that sent it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientInput {
    pub client_id: u32,
    pub client_tick: u32,
    pub client_seq: u32,
    pub buttons: u32,
    pub axis_x: f32,
    pub axis_y: f32,
}

/// Per-peer acknowledgement snapshot emitted every network tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "serverTick")]
    pub server_tick: u64,
    #[serde(rename = "ackApplied")]
    pub ack_applied: u32,
    #[serde(rename = "ackRecv")]
    pub ack_recv: u32,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON in {len}-byte payload: {source}")]
    Json {
        len: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing or invalid required field `{field}` in {len}-byte payload")]
    Schema { field: &'static str, len: usize },
}

/// Outbound input record as the client writes it.
#[derive(Serialize)]
struct InputWire {
    #[serde(rename = "clientTick")]
    client_tick: u32,
    seq: u32,
    buttons: u32,
    ax: f32,
    ay: f32,
}

/// Clamp an axis to `[-1, 1]`; non-finite values collapse to a bound.
#[inline]
fn clamp_axis(v: f64) -> f32 {
    if v.is_nan() {
        return -1.0;
    }
    v.clamp(-1.0, 1.0) as f32
}

fn required_u32(obj: &Value, field: &'static str, len: usize) -> Result<u32, ParseError> {
    obj.get(field)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(ParseError::Schema { field, len })
}

fn optional_u32(obj: &Value, field: &str) -> u32 {
    obj.get(field)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn optional_axis(obj: &Value, field: &str) -> f32 {
    obj.get(field)
        .and_then(Value::as_f64)
        .map_or(0.0, clamp_axis)
}

/// Parse an input payload received from `client_id`.
///
/// Unknown fields are ignored; optional fields default to zero. The caller
/// decides what to do with the error (the receiver logs and drops).
pub fn parse_input(bytes: &[u8], client_id: u32) -> Result<ClientInput, ParseError> {
    let len = bytes.len();
    let value: Value =
        serde_json::from_slice(bytes).map_err(|source| ParseError::Json { len, source })?;

    let client_tick = required_u32(&value, "clientTick", len)?;
    let client_seq = required_u32(&value, "seq", len)?;

    Ok(ClientInput {
        client_id,
        client_tick,
        client_seq,
        buttons: optional_u32(&value, "buttons"),
        axis_x: optional_axis(&value, "ax"),
        axis_y: optional_axis(&value, "ay"),
    })
}

/// Encode an input record for the wire. Counterpart of [`parse_input`].
pub fn encode_input(input: &ClientInput) -> Vec<u8> {
    let wire = InputWire {
        client_tick: input.client_tick,
        seq: input.client_seq,
        buttons: input.buttons,
        ax: input.axis_x,
        ay: input.axis_y,
    };
    serde_json::to_vec(&wire).expect("input record serialization cannot fail")
}

pub fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    serde_json::to_vec(snapshot).expect("snapshot serialization cannot fail")
}

pub fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot, ParseError> {
    let len = bytes.len();
    serde_json::from_slice(bytes).map_err(|source| ParseError::Json { len, source })
}
