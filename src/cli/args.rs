use crate::core::protocol::dispatcher::{parse_handle, parse_uuid};
use crate::core::session::state::{SecurityLevel, HANDLE_MAX, HANDLE_MIN};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command line arguments for GattPool
#[derive(Parser, Debug)]
#[command(
    name = "gattpool",
    version = env!("CARGO_PKG_VERSION"),
    about = "Drive BLE devices through the interactive gatttool shell",
    long_about = "Runs gatttool in interactive mode behind a pool of exclusive sessions, issues one GATT operation and prints the results the tool reports."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress logging
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover primary services
    Primary {
        #[command(flatten)]
        device: DeviceArgs,
        /// Only services with this UUID
        #[arg(long, value_parser = uuid_arg)]
        uuid: Option<Uuid>,
    },
    /// Discover characteristics in a handle range
    Characteristics {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Discover characteristic descriptors in a handle range
    Descriptors {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Read a characteristic value by handle
    Read {
        #[command(flatten)]
        device: DeviceArgs,
        /// Attribute handle (hex)
        #[arg(value_parser = handle_arg)]
        handle: u16,
    },
    /// Read characteristic values by UUID
    ReadUuid {
        #[command(flatten)]
        device: DeviceArgs,
        /// Characteristic UUID (16, 32 or 128 bit)
        #[arg(value_parser = uuid_arg)]
        uuid: Uuid,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Write a characteristic value
    Write {
        #[command(flatten)]
        device: DeviceArgs,
        /// Attribute handle (hex)
        #[arg(value_parser = handle_arg)]
        handle: u16,
        /// Value to write
        data: String,
        /// Value format
        #[arg(short, long, value_enum, default_value = "hex")]
        format: DataFormat,
        /// Write without response
        #[arg(long)]
        no_response: bool,
    },
    /// Change the link security level
    SecLevel {
        #[command(flatten)]
        device: DeviceArgs,
        #[arg(value_enum)]
        level: SecurityLevelArg,
    },
    /// Exchange the ATT MTU
    Mtu {
        #[command(flatten)]
        device: DeviceArgs,
        mtu: u16,
    },
    /// Start a session pool, show its sessions and shut it down
    Pool {
        /// Number of sessions (defaults to the configured pool size)
        #[arg(short, long)]
        size: Option<usize>,
    },
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Target device
#[derive(ClapArgs, Debug, Clone)]
pub struct DeviceArgs {
    /// Device address, XX:XX:XX:XX:XX:XX
    pub address: String,

    /// Address type passed to connect (public or random)
    #[arg(short = 't', long, default_value = "")]
    pub address_type: String,
}

/// Handle range for discovery and reads
#[derive(ClapArgs, Debug, Clone)]
pub struct RangeArgs {
    /// First handle (hex)
    #[arg(long, value_parser = handle_arg, default_value = "0x0001")]
    pub start: u16,

    /// Last handle (hex)
    #[arg(long, value_parser = handle_arg, default_value = "0xffff")]
    pub end: u16,
}

impl Default for RangeArgs {
    fn default() -> Self {
        Self {
            start: HANDLE_MIN,
            end: HANDLE_MAX,
        }
    }
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Create a project configuration in the current directory
    Init,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// Data format for write values
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DataFormat {
    Text,
    Hex,
    Base64,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SecurityLevelArg {
    Low,
    Medium,
    High,
}

impl From<SecurityLevelArg> for SecurityLevel {
    fn from(level: SecurityLevelArg) -> Self {
        match level {
            SecurityLevelArg::Low => Self::Low,
            SecurityLevelArg::Medium => Self::Medium,
            SecurityLevelArg::High => Self::High,
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Text
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFormat::Text => write!(f, "text"),
            DataFormat::Hex => write!(f, "hex"),
            DataFormat::Base64 => write!(f, "base64"),
        }
    }
}

fn handle_arg(value: &str) -> Result<u16, String> {
    parse_handle(value).ok_or_else(|| format!("'{}' is not a hex handle", value))
}

fn uuid_arg(value: &str) -> Result<Uuid, String> {
    parse_uuid(value).ok_or_else(|| format!("'{}' is not a UUID", value))
}
