//! GattPool Library
//!
//! Drives the interactive `gatttool` shell: a pool of subprocess sessions,
//! a state machine per session that orders GATT commands, and a decoder
//! that turns the tool's output into listener callbacks.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::domain::error::{GattPoolError, GattPoolResult};
pub use crate::domain::config::{GattPoolConfig, ToolConfig};
pub use crate::core::protocol::{ChannelListener, GattEvent, GattResponseDecoder, GattToolListener, ResultDispatcher};
pub use crate::core::session::{Session, SessionPool, Status};
