//! The four hooks a game host registers with the engine.

use crate::codec::ClientInput;
use crate::engine::{EngineContext, EngineError};
use std::sync::Arc;

/// Capability surface the engine drives. The engine never introspects what
/// the host does inside these hooks; it only guarantees when they fire.
pub trait GameCallbacks {
    /// Called once before the loop starts. This is where the host creates
    /// its transport and spawns the receiver worker. A failure here aborts
    /// startup (fatal).
    fn load(&mut self, ctx: &Arc<EngineContext>) -> Result<(), EngineError>;

    /// Called once after the loop exits. The host must stop and join its
    /// receiver worker here, before the transport is torn down.
    fn unload(&mut self);

    /// Called exactly once per simulation tick with the fixed timestep and
    /// the inputs scheduled for this tick, in arrival order. Fires on empty
    /// ticks too, with an empty slice.
    fn simulation_update(&mut self, dt_fixed: f64, inputs: &[ClientInput]);

    /// Called exactly once per network tick. The host reads the ack table
    /// through `ctx` and pushes outbound state to its transport.
    fn network_update(&mut self, ctx: &EngineContext);
}
