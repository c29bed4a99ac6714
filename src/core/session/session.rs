use crate::core::protocol::{
    grammar::{is_device_address, parse_line, ParsedLine, Prompt, ResultLine},
    GattToolListener, ResultDispatcher, ShellError,
};
use crate::core::session::state::{check_transition, GattCommand, SecurityLevel, Status, TransitionError};
use crate::domain::{config::ToolConfig, error::{GattPoolError, GattPoolResult}};
use crate::infrastructure::process::{CommandWriter, LineReader, ProcessChannel, ReaderEvent, ToolProcess};
use serde::Serialize;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Smallest ATT MTU a link can use
pub const MIN_MTU: u16 = 23;

/// State guarded by the session lock
#[derive(Debug)]
struct SessionCore {
    status: Status,
    busy: bool,
    last_address: Option<String>,
}

struct SessionTasks {
    reader: LineReader,
    handler: JoinHandle<()>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: usize,
    pub status: Status,
    pub busy: bool,
    pub last_address: Option<String>,
    pub pid: Option<u32>,
}

/// One gatttool subprocess and the command state machine in front of it.
///
/// Commands are only accepted while a caller holds the session (see
/// [`SessionPool::acquire`](crate::core::session::SessionPool::acquire)) and
/// only from the single state each command is legal in. Tool output is read
/// by a background [`LineReader`] and applied by one event task, so state
/// updates from the tool never interleave with each other.
pub struct Session {
    id: usize,
    core: Mutex<SessionCore>,
    writer: Mutex<CommandWriter>,
    listener: RwLock<Option<Arc<dyn GattToolListener>>>,
    dispatcher: Arc<dyn ResultDispatcher>,
    process: Mutex<Box<dyn ToolProcess>>,
    pid: Option<u32>,
    exit_grace: Duration,
    tasks: OnceLock<SessionTasks>,
}

impl Session {
    /// Spawn the tool described by `config` and start reading its output.
    pub fn spawn(
        id: usize,
        config: &ToolConfig,
        dispatcher: Arc<dyn ResultDispatcher>,
    ) -> GattPoolResult<Arc<Self>> {
        let channel = ProcessChannel::spawn(config)?;
        Ok(Self::with_channel(id, channel, config.exit_grace(), dispatcher))
    }

    /// Build a session on top of an existing channel. Must be called inside
    /// a tokio runtime; the reader starts immediately.
    pub fn with_channel(
        id: usize,
        channel: ProcessChannel,
        exit_grace: Duration,
        dispatcher: Arc<dyn ResultDispatcher>,
    ) -> Arc<Self> {
        let pid = channel.pid();
        let (writer, outputs, process) = channel.into_parts();

        let session = Arc::new(Self {
            id,
            core: Mutex::new(SessionCore {
                status: Status::Idle,
                busy: false,
                last_address: None,
            }),
            writer: Mutex::new(writer),
            listener: RwLock::new(None),
            dispatcher,
            process: Mutex::new(process),
            pid,
            exit_grace,
            tasks: OnceLock::new(),
        });

        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let reader = LineReader::start(outputs, event_sender);
        let handler = tokio::spawn(run_event_loop(Arc::downgrade(&session), event_receiver));
        let _ = session.tasks.set(SessionTasks { reader, handler });

        info!("Session {} started (pid {:?})", id, pid);
        session
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn status(&self) -> Status {
        self.core.lock().await.status
    }

    pub async fn is_busy(&self) -> bool {
        self.core.lock().await.busy
    }

    /// Address from the most recent prompt, if any prompt was seen
    pub async fn last_address(&self) -> Option<String> {
        self.core.lock().await.last_address.clone()
    }

    pub async fn summary(&self) -> SessionSummary {
        let core = self.core.lock().await;
        SessionSummary {
            id: self.id,
            status: core.status,
            busy: core.busy,
            last_address: core.last_address.clone(),
            pid: self.pid,
        }
    }

    pub async fn set_listener(&self, listener: Arc<dyn GattToolListener>) {
        *self.listener.write().await = Some(listener);
    }

    pub async fn clear_listener(&self) {
        *self.listener.write().await = None;
    }

    async fn listener(&self) -> Option<Arc<dyn GattToolListener>> {
        self.listener.read().await.clone()
    }

    // Caller operations

    /// Connect to `address`; `address_type` may be empty to let the tool
    /// pick its default.
    pub async fn connect(&self, address: &str, address_type: &str) -> GattPoolResult<()> {
        if !is_device_address(address) {
            return Err(GattPoolError::InvalidInput(format!(
                "'{}' is not a device address",
                address
            )));
        }
        self.issue(GattCommand::Connect {
            address: address.to_ascii_uppercase(),
            address_type: address_type.trim().to_string(),
        })
        .await
    }

    pub async fn disconnect(&self) -> GattPoolResult<()> {
        self.issue(GattCommand::Disconnect).await
    }

    pub async fn primary_discovery(&self) -> GattPoolResult<()> {
        self.issue(GattCommand::PrimaryDiscovery).await
    }

    pub async fn primary_discovery_by_uuid(&self, uuid: Uuid) -> GattPoolResult<()> {
        self.issue(GattCommand::PrimaryDiscoveryByUuid(uuid)).await
    }

    pub async fn characteristic_discovery(&self, start: u16, end: u16) -> GattPoolResult<()> {
        check_range(start, end)?;
        self.issue(GattCommand::CharDiscovery { start, end }).await
    }

    pub async fn descriptor_discovery(&self, start: u16, end: u16) -> GattPoolResult<()> {
        check_range(start, end)?;
        self.issue(GattCommand::CharDescriptorDiscovery { start, end }).await
    }

    pub async fn read_by_uuid(&self, uuid: Uuid, start: u16, end: u16) -> GattPoolResult<()> {
        check_range(start, end)?;
        self.issue(GattCommand::CharReadByUuid { uuid, start, end }).await
    }

    pub async fn read_by_handle(&self, handle: u16) -> GattPoolResult<()> {
        check_range(handle, handle)?;
        self.issue(GattCommand::CharReadByHandle(handle)).await
    }

    /// Write with response (`char-write-req`)
    pub async fn write_request(&self, handle: u16, value: &[u8]) -> GattPoolResult<()> {
        check_write(handle, value)?;
        self.issue(GattCommand::CharWriteRequest { handle, value: value.to_vec() }).await
    }

    /// Write without response (`char-write-cmd`)
    pub async fn write_command(&self, handle: u16, value: &[u8]) -> GattPoolResult<()> {
        check_write(handle, value)?;
        self.issue(GattCommand::CharWriteCommand { handle, value: value.to_vec() }).await
    }

    pub async fn set_security_level(&self, level: SecurityLevel) -> GattPoolResult<()> {
        self.issue(GattCommand::SetSecLevel(level)).await
    }

    pub async fn set_mtu(&self, mtu: u16) -> GattPoolResult<()> {
        if mtu < MIN_MTU {
            return Err(GattPoolError::InvalidInput(format!("MTU {} is below {}", mtu, MIN_MTU)));
        }
        self.issue(GattCommand::SetMtu(mtu)).await
    }

    /// Check the command against the state machine, write it, and only then
    /// move to the command's state. A failed write leaves the state as it was.
    async fn issue(&self, command: GattCommand) -> GattPoolResult<()> {
        let mut core = self.core.lock().await;
        if !core.busy {
            error!("Session {}: {} on a session nobody holds", self.id, command.name());
            return Err(GattPoolError::SessionNotHeld(self.id));
        }

        let next = check_transition(core.status, &command).map_err(|e| {
            self.log_rejection(&command, &e);
            e
        })?;

        let line = command.to_line();
        self.write_line(&line).await.map_err(|e| {
            error!("Session {}: failed to send '{}': {}", self.id, line, e);
            GattPoolError::CommandWrite(e)
        })?;

        debug!("Session {}: sent '{}' ({} -> {})", self.id, line, core.status, next);
        core.status = next;
        Ok(())
    }

    fn log_rejection(&self, command: &GattCommand, rejection: &TransitionError) {
        match rejection {
            TransitionError::CommandInFlight { current } => {
                debug!("Session {}: {} deferred, still {}", self.id, command.name(), current)
            }
            TransitionError::NotConnected | TransitionError::InvalidOrder { .. } => {
                error!("Session {}: {} rejected: {}", self.id, command.name(), rejection)
            }
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        self.writer.lock().await.write_line(line).await
    }

    // Events

    /// The running command finished without a terminal result line.
    pub async fn command_completed(&self) {
        let mut core = self.core.lock().await;
        match core.status.after_command_completed() {
            Some(next) => {
                debug!("Session {}: command completed ({} -> {})", self.id, core.status, next);
                core.status = next;
            }
            None if core.status == Status::Idle => {
                warn!("Session {}: command completed while idle", self.id);
            }
            None => debug!("Session {}: command completed while {}", self.id, core.status),
        }
    }

    pub async fn connected(&self) {
        self.core.lock().await.status = Status::Connected;
    }

    pub async fn disconnected(&self) {
        self.core.lock().await.status = Status::Idle;
    }

    // Tool output

    /// Apply one line of tool output.
    pub async fn handle_line(&self, line: &str) {
        match parse_line(line) {
            ParsedLine::Prompt(prompt) => self.apply_prompt(prompt).await,
            ParsedLine::Result(result) => self.apply_result(result).await,
            ParsedLine::ShellError { code, subcode } => {
                warn!("Session {}: tool error ({}, {}): {}", self.id, code, subcode, line);
                if let Some(listener) = self.listener().await {
                    listener.tool_error(code, subcode);
                }
            }
            ParsedLine::Unrecognized => debug!("Session {}: ignoring '{}'", self.id, line),
        }
    }

    async fn apply_prompt(&self, prompt: Prompt) {
        let mut core = self.core.lock().await;
        if let Some(next) = core.status.after_prompt(&prompt) {
            debug!("Session {}: prompt [{}] ({} -> {})", self.id, prompt.state, core.status, next);
            core.status = next;
        }
        core.last_address = Some(prompt.address);
    }

    async fn apply_result(&self, result: ResultLine) {
        let Some(listener) = self.listener().await else {
            debug!("Session {}: {} result with no listener, dropping", self.id, result.token);
            return;
        };

        let expected = self.core.lock().await.last_address.clone();
        if expected.as_deref() != Some(result.address.as_str()) {
            warn!(
                "Session {}: {} for {} but last prompt was {:?}",
                self.id, result.token, result.address, expected
            );
            listener.shell_error(ShellError::AddressChanged);
            return;
        }

        let handled = self
            .dispatcher
            .dispatch(listener.as_ref(), result.token, &result.address, &result.argument);
        if !handled || !result.token.is_end_of_sequence() {
            return;
        }

        let mut core = self.core.lock().await;
        if core.status == Status::Idle {
            warn!("Session {}: {} while idle, ignoring", self.id, result.token);
            return;
        }
        debug!("Session {}: {} ends {}", self.id, result.token, core.status);
        core.status = Status::Connected;
    }

    /// The tool's output closed: report how, and make sure it is gone.
    pub async fn handle_end_of_stream(&self) {
        let listener = self.listener().await;
        let mut process = self.process.lock().await;

        match process.wait_for_exit(self.exit_grace).await {
            Ok(Some(code)) => {
                info!("Session {}: tool exited with {}", self.id, code);
                if let Some(listener) = listener {
                    listener.process_exit(code);
                }
            }
            outcome => {
                if let Err(e) = outcome {
                    error!("Session {}: could not query tool status: {}", self.id, e);
                }
                warn!("Session {}: tool output closed while it is still running", self.id);
                if let Some(listener) = listener {
                    listener.process_stream_closed();
                }
                if let Err(e) = process.terminate().await {
                    error!("Session {}: failed to kill tool: {}", self.id, e);
                }
            }
        }
    }

    // Pool bookkeeping

    pub(crate) async fn try_acquire(&self) -> bool {
        let mut core = self.core.lock().await;
        if core.busy {
            return false;
        }
        core.busy = true;
        true
    }

    /// Hand the session back: always send `disconnect`, whatever the state,
    /// then drop the listener and mark the session free.
    ///
    /// A session that was not idle stays `Disconnecting` until the tool's
    /// blank prompt arrives, so the next holder cannot use the old link.
    pub(crate) async fn release(&self) {
        let mut core = self.core.lock().await;
        if !core.busy {
            warn!("Session {} released while not held", self.id);
            return;
        }
        match self.write_line("disconnect").await {
            Ok(()) if core.status != Status::Idle => {
                debug!("Session {}: release ({} -> {})", self.id, core.status, Status::Disconnecting);
                core.status = Status::Disconnecting;
            }
            Ok(()) => {}
            Err(e) => warn!("Session {}: disconnect on release failed: {}", self.id, e),
        }
        self.clear_listener().await;
        core.busy = false;
        debug!("Session {} released ({})", self.id, core.status);
    }

    /// Stop reading and kill the tool if it is still running.
    pub async fn shutdown(&self) {
        if let Some(tasks) = self.tasks.get() {
            tasks.reader.abort();
            tasks.handler.abort();
        }

        let mut process = self.process.lock().await;
        match process.wait_for_exit(Duration::ZERO).await {
            Ok(Some(code)) => debug!("Session {}: tool already exited with {}", self.id, code),
            _ => {
                if let Err(e) = process.terminate().await {
                    warn!("Session {}: failed to kill tool: {}", self.id, e);
                }
            }
        }
        info!("Session {} shut down", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get() {
            tasks.reader.abort();
            tasks.handler.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

async fn run_event_loop(session: Weak<Session>, mut events: mpsc::UnboundedReceiver<ReaderEvent>) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        match event {
            ReaderEvent::Line(line) => session.handle_line(&line).await,
            ReaderEvent::EndOfStream => {
                session.handle_end_of_stream().await;
                break;
            }
        }
    }
}

fn check_range(start: u16, end: u16) -> GattPoolResult<()> {
    if start == 0 || start > end {
        return Err(GattPoolError::InvalidInput(format!(
            "invalid handle range 0x{:04x}-0x{:04x}",
            start, end
        )));
    }
    Ok(())
}

fn check_write(handle: u16, value: &[u8]) -> GattPoolResult<()> {
    check_range(handle, handle)?;
    if value.is_empty() {
        return Err(GattPoolError::InvalidInput("empty write value".to_string()));
    }
    Ok(())
}
