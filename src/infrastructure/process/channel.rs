use crate::domain::{config::ToolConfig, error::{GattPoolError, GattPoolResult}};
use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info};

pub type ToolWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type ToolReader = Box<dyn AsyncRead + Send + Unpin>;

/// Control over the tool process, separated from its streams
#[async_trait]
pub trait ToolProcess: Send {
    /// Wait up to `grace` for the process to exit. `Ok(None)` means it is
    /// still running.
    async fn wait_for_exit(&mut self, grace: Duration) -> io::Result<Option<i32>>;

    /// Kill the process and reap it
    async fn terminate(&mut self) -> io::Result<()>;

    fn pid(&self) -> Option<u32>;
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[async_trait]
impl ToolProcess for Child {
    async fn wait_for_exit(&mut self, grace: Duration) -> io::Result<Option<i32>> {
        if let Some(status) = self.try_wait()? {
            return Ok(Some(exit_code(status)));
        }
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(status) => Ok(Some(exit_code(status?))),
            Err(_) => Ok(None),
        }
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.kill().await
    }

    fn pid(&self) -> Option<u32> {
        self.id()
    }
}

/// Writes command lines to the tool's stdin
pub struct CommandWriter {
    inner: ToolWriter,
}

impl CommandWriter {
    pub fn new(inner: ToolWriter) -> Self {
        Self { inner }
    }

    /// Write `line` plus a newline and flush it through to the tool.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.inner.write_all(&data).await?;
        self.inner.flush().await
    }
}

/// One tool subprocess: its stdin, its merged output streams and the
/// process handle.
pub struct ProcessChannel {
    writer: ToolWriter,
    outputs: Vec<ToolReader>,
    process: Box<dyn ToolProcess>,
}

impl ProcessChannel {
    /// Spawn the tool in interactive mode with stdout and stderr piped.
    pub fn spawn(config: &ToolConfig) -> GattPoolResult<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GattPoolError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        info!("Spawned '{}' (pid {:?})", config.program, child.id());

        Ok(Self::from_parts(
            Box::new(stdin),
            vec![Box::new(stdout), Box::new(stderr)],
            Box::new(child),
        ))
    }

    /// Assemble a channel from already-open streams.
    ///
    /// `outputs` are read concurrently and merged into one line stream.
    pub fn from_parts(writer: ToolWriter, outputs: Vec<ToolReader>, process: Box<dyn ToolProcess>) -> Self {
        debug!("Process channel with {} output stream(s)", outputs.len());
        Self { writer, outputs, process }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn into_parts(self) -> (CommandWriter, Vec<ToolReader>, Box<dyn ToolProcess>) {
        (CommandWriter::new(self.writer), self.outputs, self.process)
    }
}

fn missing_pipe(name: &str) -> GattPoolError {
    GattPoolError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("tool {} was not captured", name),
    ))
}
