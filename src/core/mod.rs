// src/core/mod.rs

//! The central module containing the core logic and data structures of Switchboard.

pub mod errors;
pub mod hub;
pub mod protocol;

pub use errors::HubError;
pub use hub::Hub;
pub use protocol::{Command, ConnectionId};
