use crate::core::protocol::grammar::Prompt;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Lowest attribute handle
pub const HANDLE_MIN: u16 = 0x0001;
/// Highest attribute handle
pub const HANDLE_MAX: u16 = 0xffff;

/// Command state of one tool session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    PrimaryDiscovery,
    PrimaryDiscoveryByUuid,
    CharDiscovery,
    CharDescriptorDiscovery,
    CharReadByUuid,
    CharReadByHandle,
    CharWriteRequest,
    CharWriteCommand,
    SetSecLevel,
    SetMtu,
}

impl Status {
    pub const ALL: [Status; 14] = [
        Status::Idle,
        Status::Connecting,
        Status::Connected,
        Status::Disconnecting,
        Status::PrimaryDiscovery,
        Status::PrimaryDiscoveryByUuid,
        Status::CharDiscovery,
        Status::CharDescriptorDiscovery,
        Status::CharReadByUuid,
        Status::CharReadByHandle,
        Status::CharWriteRequest,
        Status::CharWriteCommand,
        Status::SetSecLevel,
        Status::SetMtu,
    ];

    /// A command has been sent and its outcome has not arrived yet
    pub fn is_command_in_flight(&self) -> bool {
        !matches!(self, Status::Idle | Status::Connected)
    }

    /// State after a generic "command completed" event, if it changes.
    ///
    /// Connect and disconnect only resolve through their own events.
    pub fn after_command_completed(self) -> Option<Status> {
        match self {
            Status::Idle | Status::Connecting | Status::Disconnecting => None,
            _ => Some(Status::Connected),
        }
    }

    /// State implied by a freshly printed prompt, if it changes.
    pub fn after_prompt(self, prompt: &Prompt) -> Option<Status> {
        if prompt.is_connected() && matches!(self, Status::Idle | Status::Connecting) {
            return Some(Status::Connected);
        }
        if prompt.is_blank() && self != Status::Idle {
            return Some(Status::Idle);
        }
        None
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Connecting => "connecting",
            Status::Connected => "connected",
            Status::Disconnecting => "disconnecting",
            Status::PrimaryDiscovery => "primary discovery",
            Status::PrimaryDiscoveryByUuid => "primary discovery by uuid",
            Status::CharDiscovery => "characteristic discovery",
            Status::CharDescriptorDiscovery => "descriptor discovery",
            Status::CharReadByUuid => "read by uuid",
            Status::CharReadByHandle => "read by handle",
            Status::CharWriteRequest => "write request",
            Status::CharWriteCommand => "write command",
            Status::SetSecLevel => "setting security level",
            Status::SetMtu => "setting mtu",
        };
        f.write_str(name)
    }
}

/// Link security requested with `sec-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Low => write!(f, "low"),
            SecurityLevel::Medium => write!(f, "medium"),
            SecurityLevel::High => write!(f, "high"),
        }
    }
}

/// A state-changing command and its wire form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattCommand {
    Connect { address: String, address_type: String },
    Disconnect,
    PrimaryDiscovery,
    PrimaryDiscoveryByUuid(Uuid),
    CharDiscovery { start: u16, end: u16 },
    CharDescriptorDiscovery { start: u16, end: u16 },
    CharReadByUuid { uuid: Uuid, start: u16, end: u16 },
    CharReadByHandle(u16),
    CharWriteRequest { handle: u16, value: Vec<u8> },
    CharWriteCommand { handle: u16, value: Vec<u8> },
    SetSecLevel(SecurityLevel),
    SetMtu(u16),
}

impl GattCommand {
    pub fn name(&self) -> &'static str {
        match self {
            GattCommand::Connect { .. } => "connect",
            GattCommand::Disconnect => "disconnect",
            GattCommand::PrimaryDiscovery => "primary discovery",
            GattCommand::PrimaryDiscoveryByUuid(_) => "primary discovery by uuid",
            GattCommand::CharDiscovery { .. } => "characteristic discovery",
            GattCommand::CharDescriptorDiscovery { .. } => "descriptor discovery",
            GattCommand::CharReadByUuid { .. } => "read by uuid",
            GattCommand::CharReadByHandle(_) => "read by handle",
            GattCommand::CharWriteRequest { .. } => "write request",
            GattCommand::CharWriteCommand { .. } => "write command",
            GattCommand::SetSecLevel(_) => "set security level",
            GattCommand::SetMtu(_) => "set mtu",
        }
    }

    /// The single state this command may be issued from
    pub fn required_status(&self) -> Status {
        match self {
            GattCommand::Connect { .. } => Status::Idle,
            _ => Status::Connected,
        }
    }

    /// The state the session enters once the command is written
    pub fn next_status(&self) -> Status {
        match self {
            GattCommand::Connect { .. } => Status::Connecting,
            GattCommand::Disconnect => Status::Disconnecting,
            GattCommand::PrimaryDiscovery => Status::PrimaryDiscovery,
            GattCommand::PrimaryDiscoveryByUuid(_) => Status::PrimaryDiscoveryByUuid,
            GattCommand::CharDiscovery { .. } => Status::CharDiscovery,
            GattCommand::CharDescriptorDiscovery { .. } => Status::CharDescriptorDiscovery,
            GattCommand::CharReadByUuid { .. } => Status::CharReadByUuid,
            GattCommand::CharReadByHandle(_) => Status::CharReadByHandle,
            GattCommand::CharWriteRequest { .. } => Status::CharWriteRequest,
            GattCommand::CharWriteCommand { .. } => Status::CharWriteCommand,
            GattCommand::SetSecLevel(_) => Status::SetSecLevel,
            GattCommand::SetMtu(_) => Status::SetMtu,
        }
    }

    /// Command text as typed into the interactive shell, without newline
    pub fn to_line(&self) -> String {
        match self {
            GattCommand::Connect { address, address_type } if address_type.is_empty() => {
                format!("connect {}", address)
            }
            GattCommand::Connect { address, address_type } => {
                format!("connect {} {}", address, address_type)
            }
            GattCommand::Disconnect => "disconnect".to_string(),
            GattCommand::PrimaryDiscovery => "primary".to_string(),
            GattCommand::PrimaryDiscoveryByUuid(uuid) => format!("primary {}", uuid),
            GattCommand::CharDiscovery { start, end } => {
                format!("characteristics 0x{:04x} 0x{:04x}", start, end)
            }
            GattCommand::CharDescriptorDiscovery { start, end } => {
                format!("char-desc 0x{:04x} 0x{:04x}", start, end)
            }
            GattCommand::CharReadByUuid { uuid, start, end } => {
                format!("char-read-uuid {} 0x{:04x} 0x{:04x}", uuid, start, end)
            }
            GattCommand::CharReadByHandle(handle) => format!("char-read-hnd 0x{:04x}", handle),
            GattCommand::CharWriteRequest { handle, value } => {
                format!("char-write-req 0x{:04x} {}", handle, hex::encode(value))
            }
            GattCommand::CharWriteCommand { handle, value } => {
                format!("char-write-cmd 0x{:04x} {}", handle, hex::encode(value))
            }
            GattCommand::SetSecLevel(level) => format!("sec-level {}", level),
            GattCommand::SetMtu(mtu) => format!("mtu {}", mtu),
        }
    }
}

/// Why a command was refused by the state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Caller bug: the session has no connection
    #[error("not connected")]
    NotConnected,

    /// Another command is still running; try again later
    #[error("a command is already running ({current})")]
    CommandInFlight { current: Status },

    /// Caller bug: the call makes no sense in the current state
    #[error("{operation} is not valid while {current}")]
    InvalidOrder { operation: &'static str, current: Status },
}

impl TransitionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransitionError::CommandInFlight { .. })
    }
}

/// Decide whether `command` may be issued from `current`.
pub fn check_transition(current: Status, command: &GattCommand) -> Result<Status, TransitionError> {
    let required = command.required_status();
    if current == required {
        return Ok(command.next_status());
    }
    if current.is_command_in_flight() {
        return Err(TransitionError::CommandInFlight { current });
    }
    if current == Status::Idle {
        return Err(TransitionError::NotConnected);
    }
    Err(TransitionError::InvalidOrder {
        operation: command.name(),
        current,
    })
}
