use crate::cli::args::OutputFormat;
use crate::core::protocol::GattEvent;
use crate::core::session::SessionSummary;
use crate::domain::config::GattPoolConfig;
use std::io;
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_event(&self, event: &GattEvent) -> Result<(), OutputError>;
    fn write_sessions(&self, sessions: &[SessionSummary]) -> Result<(), OutputError>;
    fn write_config(&self, config: &GattPoolConfig) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::GattPoolError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_event(&self, event: &GattEvent) -> Result<(), OutputError> {
        match self.format {
            // one JSON object per line so output can be streamed
            OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
            OutputFormat::Text | OutputFormat::Table => println!("{}", describe_event(event)),
        }
        Ok(())
    }

    fn write_sessions(&self, sessions: &[SessionSummary]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for session in sessions {
                    println!("Session: {}", session.id);
                    println!("  Status: {}", session.status);
                    println!("  Busy: {}", session.busy);
                    if let Some(pid) = session.pid {
                        println!("  Process: {}", pid);
                    }
                    if let Some(address) = &session.last_address {
                        println!("  Last address: {}", address);
                    }
                    println!();
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(sessions)?);
            }
            OutputFormat::Table => {
                if !sessions.is_empty() {
                    let rows: Vec<SessionTableRow> = sessions.iter().map(SessionTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &GattPoolConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Text | OutputFormat::Table => print!("{}", toml::to_string_pretty(config)?),
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "message": message }));
            }
            OutputFormat::Text | OutputFormat::Table => println!("{}", message),
        }
        Ok(())
    }
}

/// Table row for session summary
#[derive(Tabled)]
struct SessionTableRow {
    id: usize,
    status: String,
    busy: bool,
    pid: String,
    address: String,
}

impl From<&SessionSummary> for SessionTableRow {
    fn from(session: &SessionSummary) -> Self {
        Self {
            id: session.id,
            status: session.status.to_string(),
            busy: session.busy,
            pid: session.pid.map(|p| p.to_string()).unwrap_or_default(),
            address: session.last_address.clone().unwrap_or_default(),
        }
    }
}

fn bytes(value: &[u8]) -> String {
    value.chunks(1).map(hex::encode).collect::<Vec<_>>().join(" ")
}

/// One line of human-readable text per listener event
pub fn describe_event(event: &GattEvent) -> String {
    match event {
        GattEvent::Notification { address, handle, value } => {
            format!("{} notification 0x{:04x}: {}", address, handle, bytes(value))
        }
        GattEvent::Indication { address, handle, value } => {
            format!("{} indication 0x{:04x}: {}", address, handle, bytes(value))
        }
        GattEvent::Connected { address, status } => format!("{} connected (status {})", address, status),
        GattEvent::Disconnected { address } => format!("{} disconnected", address),
        GattEvent::PrimaryAll { address, start, end, uuid } => {
            format!("{} service 0x{:04x}-0x{:04x} {}", address, start, end, uuid)
        }
        GattEvent::PrimaryUuid { address, start, end } => {
            format!("{} service 0x{:04x}-0x{:04x}", address, start, end)
        }
        GattEvent::Characteristic { address, handle, properties, value_handle, uuid } => format!(
            "{} characteristic 0x{:04x} properties 0x{:02x} value 0x{:04x} {}",
            address, handle, properties, value_handle, uuid
        ),
        GattEvent::CharacteristicDescriptor { address, handle, uuid } => {
            format!("{} descriptor 0x{:04x} {}", address, handle, uuid)
        }
        GattEvent::ValueByHandle { address, value, status } => {
            format!("{} value (status {}): {}", address, status, bytes(value))
        }
        GattEvent::ValueByUuid { address, handle, value } => {
            format!("{} value 0x{:04x}: {}", address, handle, bytes(value))
        }
        GattEvent::PrimaryAllEnd { address, status }
        | GattEvent::PrimaryUuidEnd { address, status }
        | GattEvent::CharacteristicEnd { address, status }
        | GattEvent::CharacteristicDescriptorEnd { address, status }
        | GattEvent::ValueByHandleEnd { address, status }
        | GattEvent::ValueByUuidEnd { address, status } => format!("{} done (status {})", address, status),
        GattEvent::WriteResult { address, status } => format!("{} write (status {})", address, status),
        GattEvent::SecurityLevelResult { address, status } => {
            format!("{} security level (status {})", address, status)
        }
        GattEvent::MtuResult { address, status } => format!("{} mtu (status {})", address, status),
        GattEvent::ProcessExit { code } => format!("gatttool exited with code {}", code),
        GattEvent::ProcessStreamClosed => "gatttool closed its output while still running".to_string(),
        GattEvent::ShellError { error } => format!("shell error: {:?}", error),
        GattEvent::ToolError { code, subcode } => format!("gatttool error ({}, {})", code, subcode),
    }
}
