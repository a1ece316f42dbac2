//! deckhand – a tick-driven remote-control engine for frame-stepped card game simulations
//!
//! A controller connects over TCP and sends newline-delimited JSON commands.
//! The engine runs inside the simulation's frame loop:
//! - Non-blocking transport polled once per tick, one connection at a time
//! - Validated command table with per-command phase and argument rules
//! - Deferred responses: mutations are answered once the simulation settles
//! - Depth-bounded, cycle-safe JSON snapshots of the live state graph
//! - Chained run logs for replay and named checkpoints for save/restore

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Engine core: errors, scheduling, snapshots, persistence
pub mod runtime;

/// Command service: transport, codec, registry and handlers
pub mod service;

/// Simulation boundary and the headless reference simulation
pub mod sim;

// Re-export key types for convenience
pub use runtime::{ApiError, ErrorCode, RuntimeConfig};
pub use service::Service;
pub use sim::{HeadlessSim, Phase, Simulation};

/// Current version of deckhand
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the wire protocol
pub const PROTOCOL_VERSION: &str = "1.0.0";
