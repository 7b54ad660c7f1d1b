// src/connection/mod.rs

//! Manages the lifecycle of a single hub connection: the per-socket actor,
//! its read and write pumps, and the transport seam they run against.

// Declare the sub-modules of the `connection` module.
mod actor;
pub mod memory;
pub mod transport;

// Publicly re-export the primary types from the sub-modules.
pub use actor::Connection;
pub use transport::{Frame, Ready, Transport, TransportReader, TransportWriter, Upgrade};
