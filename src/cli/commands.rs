use crate::cli::args::{Args, Command, ConfigCommand, DataFormat, DeviceArgs, RangeArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::protocol::{ChannelListener, GattEvent};
use crate::core::session::{SecurityLevel, Session, SessionPool, Status};
use crate::domain::config::GattPoolConfig;
use crate::domain::error::{GattPoolError, GattPoolResult};
use crate::infrastructure::{config::ConfigManager, logging::init_logging};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

const STATUS_POLL: Duration = Duration::from_millis(20);

/// Execute CLI command
pub async fn execute_command(args: Args) -> Result<(), GattPoolError> {
    let writer = ConsoleWriter::new(args.output);

    let config_manager = ConfigManager::new()?;
    let config = if let Some(config_path) = &args.config {
        config_manager.load_config_from_path(config_path.as_ref())?
    } else {
        config_manager.load_config()?
    };

    if !args.quiet {
        init_logging(Some(config.global.log_level.as_str()), args.verbose).map_err(|e| GattPoolError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;
    }

    match args.command {
        Command::Primary { device, uuid } => {
            run_device_operation(&config, &writer, &device, Operation::Primary(uuid)).await
        }
        Command::Characteristics { device, range } => {
            run_device_operation(&config, &writer, &device, Operation::Characteristics(range)).await
        }
        Command::Descriptors { device, range } => {
            run_device_operation(&config, &writer, &device, Operation::Descriptors(range)).await
        }
        Command::Read { device, handle } => {
            run_device_operation(&config, &writer, &device, Operation::Read(handle)).await
        }
        Command::ReadUuid { device, uuid, range } => {
            run_device_operation(&config, &writer, &device, Operation::ReadUuid(uuid, range)).await
        }
        Command::Write { device, handle, data, format, no_response } => {
            let value = parse_data(&data, format)?;
            let operation = Operation::Write { handle, value, no_response };
            run_device_operation(&config, &writer, &device, operation).await
        }
        Command::SecLevel { device, level } => {
            run_device_operation(&config, &writer, &device, Operation::SecLevel(level.into())).await
        }
        Command::Mtu { device, mtu } => {
            run_device_operation(&config, &writer, &device, Operation::Mtu(mtu)).await
        }
        Command::Pool { size } => {
            let pool = SessionPool::new(config.tool.clone());
            pool.initialize(size.unwrap_or(config.global.pool_size)).await?;
            let summaries = pool.summaries().await;
            pool.shutdown().await;
            writer.write_sessions(&summaries)?;
            Ok(())
        }
        Command::Config(config_args) => match config_args.command {
            ConfigCommand::Show => {
                writer.write_config(&config)?;
                Ok(())
            }
            ConfigCommand::Init => {
                let current_dir = std::env::current_dir()?;
                let path = config_manager.init_project_config(&current_dir)?;
                writer.write_message(&format!("Created {}", path.display()))?;
                Ok(())
            }
        },
        Command::Version => {
            writer.write_message(&format!("gattpool {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

/// One GATT operation issued on a connected session
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    Primary(Option<Uuid>),
    Characteristics(RangeArgs),
    Descriptors(RangeArgs),
    Read(u16),
    ReadUuid(Uuid, RangeArgs),
    Write { handle: u16, value: Vec<u8>, no_response: bool },
    SecLevel(SecurityLevel),
    Mtu(u16),
}

impl Operation {
    async fn issue(&self, session: &Session) -> GattPoolResult<()> {
        match self {
            Operation::Primary(None) => session.primary_discovery().await,
            Operation::Primary(Some(uuid)) => session.primary_discovery_by_uuid(*uuid).await,
            Operation::Characteristics(range) => session.characteristic_discovery(range.start, range.end).await,
            Operation::Descriptors(range) => session.descriptor_discovery(range.start, range.end).await,
            Operation::Read(handle) => session.read_by_handle(*handle).await,
            Operation::ReadUuid(uuid, range) => session.read_by_uuid(*uuid, range.start, range.end).await,
            Operation::Write { handle, value, no_response: false } => session.write_request(*handle, value).await,
            Operation::Write { handle, value, no_response: true } => session.write_command(*handle, value).await,
            Operation::SecLevel(level) => session.set_security_level(*level).await,
            Operation::Mtu(mtu) => session.set_mtu(*mtu).await,
        }
    }

    /// A write without response gets no answer from the tool
    fn expects_result(&self) -> bool {
        !matches!(self, Operation::Write { no_response: true, .. })
    }
}

/// Pool of one: acquire, connect, run `operation`, print what comes back,
/// release. The whole exchange is bounded by the configured timeout.
pub(crate) async fn run_device_operation(
    config: &GattPoolConfig,
    writer: &dyn OutputWriter,
    device: &DeviceArgs,
    operation: Operation,
) -> GattPoolResult<()> {
    let pool = SessionPool::new(config.tool.clone());
    pool.initialize(1).await?;

    let result = match pool.acquire().await {
        Some(session) => {
            let outcome = tokio::time::timeout(
                config.global.timeout(),
                drive(&session, writer, device, &operation),
            )
            .await
            .unwrap_or(Err(GattPoolError::Timeout));
            pool.release(&session).await;
            outcome
        }
        None => Err(GattPoolError::InvalidInput("no free session".to_string())),
    };

    pool.shutdown().await;
    result
}

async fn drive(
    session: &Arc<Session>,
    writer: &dyn OutputWriter,
    device: &DeviceArgs,
    operation: &Operation,
) -> GattPoolResult<()> {
    let (listener, mut events) = ChannelListener::new();
    session.set_listener(Arc::new(listener)).await;

    session.connect(&device.address, &device.address_type).await?;
    wait_for_connection(session, writer, &mut events, &device.address).await?;
    debug!("Connected to {}, issuing {:?}", device.address, operation);

    operation.issue(session).await?;
    if operation.expects_result() {
        while let Some(event) = events.recv().await {
            writer.write_event(&event)?;
            if event.is_terminal() {
                break;
            }
        }
    }
    session.command_completed().await;
    Ok(())
}

async fn wait_for_connection(
    session: &Session,
    writer: &dyn OutputWriter,
    events: &mut mpsc::UnboundedReceiver<GattEvent>,
    address: &str,
) -> GattPoolResult<()> {
    let failed = || GattPoolError::ConnectFailed { address: address.to_string() };

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = event.ok_or_else(failed)?;
                writer.write_event(&event)?;
                if event.is_terminal() {
                    return Err(failed());
                }
            }
            _ = tokio::time::sleep(STATUS_POLL) => {}
        }

        match session.status().await {
            Status::Connected => return Ok(()),
            Status::Idle => return Err(failed()),
            _ => {}
        }
    }
}

fn parse_data(data: &str, format: DataFormat) -> Result<Vec<u8>, GattPoolError> {
    match format {
        DataFormat::Text => Ok(data.as_bytes().to_vec()),
        DataFormat::Hex => {
            let cleaned = data.replace([' ', '\n'], "");
            let cleaned = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
            hex::decode(cleaned)
                .map_err(|e| GattPoolError::InvalidInput(format!("Invalid hex data: {}", e)))
        }
        DataFormat::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.decode(data)
                .map_err(|e| GattPoolError::InvalidInput(format!("Invalid base64 data: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::OutputFormat;
    use crate::domain::config::ToolConfig;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    /// Shell script that answers like gatttool for a handful of commands
    const FAKE_GATTTOOL: &str = r#"
while read cmd rest; do
  case "$cmd" in
    connect) echo "[CON][AA:BB:CC:DD:EE:FF][LE]>" ;;
    char-read-hnd)
      echo "CHAR-VAL-DESC: AA:BB:CC:DD:EE:FF 0 48 69"
      echo "CHAR-VAL-DESC-END: AA:BB:CC:DD:EE:FF 0" ;;
    mtu) echo "MTU: AA:BB:CC:DD:EE:FF 0" ;;
    disconnect) echo "[   ][AA:BB:CC:DD:EE:FF][LE]>" ;;
  esac
done
"#;

    const REFUSING_GATTTOOL: &str = r#"
while read cmd rest; do
  echo "[   ][AA:BB:CC:DD:EE:FF][LE]>"
done
"#;

    fn config_for(script: &str, timeout_ms: u64) -> GattPoolConfig {
        let mut config = GattPoolConfig::default();
        config.tool = ToolConfig::new("sh", vec!["-c".to_string(), script.to_string()]);
        config.global.timeout_ms = timeout_ms;
        config
    }

    fn device() -> DeviceArgs {
        DeviceArgs { address: ADDR.to_string(), address_type: String::new() }
    }

    #[tokio::test]
    async fn test_read_against_scripted_tool() {
        let config = config_for(FAKE_GATTTOOL, 5000);
        let writer = ConsoleWriter::new(OutputFormat::Text);
        run_device_operation(&config, &writer, &device(), Operation::Read(0x10)).await.unwrap();
        run_device_operation(&config, &writer, &device(), Operation::Mtu(247)).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_without_response_does_not_wait() {
        let config = config_for(FAKE_GATTTOOL, 5000);
        let writer = ConsoleWriter::new(OutputFormat::Json);
        let operation = Operation::Write { handle: 0x10, value: vec![1], no_response: true };
        run_device_operation(&config, &writer, &device(), operation).await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let config = config_for(REFUSING_GATTTOOL, 5000);
        let writer = ConsoleWriter::new(OutputFormat::Text);
        let result = run_device_operation(&config, &writer, &device(), Operation::Read(1)).await;
        assert!(matches!(result, Err(GattPoolError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_silent_tool_times_out() {
        let config = config_for("while read line; do :; done", 300);
        let writer = ConsoleWriter::new(OutputFormat::Text);
        let result = run_device_operation(&config, &writer, &device(), Operation::Read(1)).await;
        assert!(matches!(result, Err(GattPoolError::Timeout)));
    }

    #[tokio::test]
    async fn test_invalid_address_is_reported() {
        let config = config_for(FAKE_GATTTOOL, 5000);
        let writer = ConsoleWriter::new(OutputFormat::Text);
        let device = DeviceArgs { address: "nope".to_string(), address_type: String::new() };
        let result = run_device_operation(&config, &writer, &device, Operation::Read(1)).await;
        assert!(matches!(result, Err(GattPoolError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_data_formats() {
        assert_eq!(parse_data("01 0a ff", DataFormat::Hex).unwrap(), vec![0x01, 0x0a, 0xff]);
        assert_eq!(parse_data("0x0100", DataFormat::Hex).unwrap(), vec![0x01, 0x00]);
        assert_eq!(parse_data("hi", DataFormat::Text).unwrap(), b"hi".to_vec());
        assert_eq!(parse_data("aGk=", DataFormat::Base64).unwrap(), b"hi".to_vec());
        assert!(matches!(parse_data("zz", DataFormat::Hex), Err(GattPoolError::InvalidInput(_))));
    }
}
