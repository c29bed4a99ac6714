//! In-process stand-in for the gatttool subprocess, used by unit tests.

use crate::core::protocol::{ChannelListener, GattEvent, GattResponseDecoder};
use crate::core::session::{state::Status, Session};
use crate::infrastructure::process::{ProcessChannel, ToolProcess};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub(crate) const ADDR: &str = "AA:BB:CC:DD:EE:FF";
pub(crate) const PROMPT_CONNECTED: &str = "[CON][AA:BB:CC:DD:EE:FF][LE]>";
pub(crate) const PROMPT_BLANK: &str = "[   ][AA:BB:CC:DD:EE:FF][LE]>";

const WAIT: Duration = Duration::from_secs(2);

/// Process handle whose exit is decided by the test
pub(crate) struct FakeProcess {
    exit_code: Arc<StdMutex<Option<i32>>>,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl ToolProcess for FakeProcess {
    async fn wait_for_exit(&mut self, _grace: Duration) -> io::Result<Option<i32>> {
        Ok(*self.exit_code.lock().unwrap())
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        *self.exit_code.lock().unwrap() = Some(-1);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// A session wired to duplex pipes: the test reads what the session sends
/// and writes what the tool would print.
pub(crate) struct FakeTool {
    pub session: Arc<Session>,
    pub events: mpsc::UnboundedReceiver<GattEvent>,
    commands: Option<Lines<BufReader<DuplexStream>>>,
    output: Option<DuplexStream>,
    exit_code: Arc<StdMutex<Option<i32>>>,
    terminated: Arc<AtomicBool>,
}

impl FakeTool {
    /// Acquired, with a [`ChannelListener`] attached
    pub async fn held(id: usize) -> Self {
        Self::build(id, true, false).await
    }

    /// Fresh from the pool: not busy, no listener
    pub async fn unheld(id: usize) -> Self {
        Self::build(id, false, false).await
    }

    /// Held, but the tool's stdin is already closed so every write fails
    pub async fn with_broken_stdin(id: usize) -> Self {
        Self::build(id, true, true).await
    }

    async fn build(id: usize, held: bool, broken_stdin: bool) -> Self {
        let (stdin, tool_stdin) = tokio::io::duplex(4096);
        let (output, stdout) = tokio::io::duplex(4096);
        let exit_code = Arc::new(StdMutex::new(None));
        let terminated = Arc::new(AtomicBool::new(false));

        let process = FakeProcess {
            exit_code: Arc::clone(&exit_code),
            terminated: Arc::clone(&terminated),
        };
        let channel = ProcessChannel::from_parts(Box::new(stdin), vec![Box::new(stdout)], Box::new(process));
        let session = Session::with_channel(id, channel, Duration::from_millis(20), Arc::new(GattResponseDecoder));

        let commands = if broken_stdin {
            drop(tool_stdin);
            None
        } else {
            Some(BufReader::new(tool_stdin).lines())
        };

        let (listener, events) = ChannelListener::new();
        if held {
            assert!(session.try_acquire().await);
            session.set_listener(Arc::new(listener)).await;
        }

        Self {
            session,
            events,
            commands,
            output: Some(output),
            exit_code,
            terminated,
        }
    }

    /// Next line the session wrote to the tool
    pub async fn next_command(&mut self) -> String {
        let commands = self.commands.as_mut().expect("stdin is closed");
        timeout(WAIT, commands.next_line())
            .await
            .expect("no command written")
            .expect("stdin read failed")
            .expect("stdin closed")
    }

    /// Print a line as the tool would
    pub async fn emit(&mut self, line: &str) {
        let output = self.output.as_mut().expect("output is closed");
        output.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
    }

    pub fn close_output(&mut self) {
        self.output.take();
    }

    pub async fn next_event(&mut self) -> GattEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("no listener event")
            .expect("listener channel closed")
    }

    pub fn set_exit_code(&self, code: Option<i32>) {
        *self.exit_code.lock().unwrap() = code;
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub async fn wait_until_terminated(&self) {
        timeout(WAIT, async {
            while !self.was_terminated() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("tool was not terminated");
    }

    pub async fn wait_for_status(&self, status: Status) {
        timeout(WAIT, async {
            while self.session.status().await != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never reached {}", status));
    }
}
