//! tickstep: an authoritative fixed-timestep multiplayer server engine.
//!
//! The engine decouples a deterministic simulation clock from a network
//! clock, feeds client inputs through a receiver worker into a
//! tick-scheduled ring, and reports per-client acknowledgement sequences
//! back in snapshots. See the `engine` module for the loop itself and
//! `net` for the transport adapter and the reference client.

#![allow(clippy::new_without_default)]

pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod net;

pub use codec::{ClientInput, ParseError, Snapshot};
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use engine::{
    AckTable, Engine, EngineContext, EngineError, GameCallbacks, HandoffQueue, InputRing,
    QueuedInput,
};
pub use net::{ClientConnection, HostEvent, NetError, PeerId, ReceiverWorker, UdpHost};
