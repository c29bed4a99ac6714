use crate::infrastructure::process::channel::ToolReader;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

/// What the reader reports to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// A non-blank line, without its terminator
    Line(String),
    /// Every output stream of the tool has closed
    EndOfStream,
}

/// Background reader that turns the tool's output streams into lines.
///
/// A line ends at `\n`, at `\r` or at `\r\n`. The shell's prompt redraw
/// puts a bare `\r` between a prompt and the output that follows it.
///
/// One forwarder task per stream pushes lines into the shared queue; a
/// supervisor task emits [`ReaderEvent::EndOfStream`] once all of them
/// have finished. Lines keep their order within one stream. Lines from
/// different streams (stdout and stderr) interleave in arrival order only.
pub struct LineReader {
    forwarders: Vec<AbortHandle>,
    supervisor: JoinHandle<()>,
}

impl LineReader {
    /// Start reading immediately. Must be called inside a tokio runtime.
    pub fn start(outputs: Vec<ToolReader>, events: mpsc::UnboundedSender<ReaderEvent>) -> Self {
        let handles: Vec<JoinHandle<()>> = outputs
            .into_iter()
            .enumerate()
            .map(|(index, output)| tokio::spawn(forward_lines(index, output, events.clone())))
            .collect();
        let forwarders = handles.iter().map(JoinHandle::abort_handle).collect();

        let supervisor = tokio::spawn(async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    if e.is_cancelled() {
                        return;
                    }
                    warn!("Tool output forwarder failed: {}", e);
                }
            }
            debug!("All tool output streams closed");
            let _ = events.send(ReaderEvent::EndOfStream);
        });

        Self { forwarders, supervisor }
    }

    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Stop reading without reporting end-of-stream.
    pub fn abort(&self) {
        self.supervisor.abort();
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn forward_lines(index: usize, output: ToolReader, events: mpsc::UnboundedSender<ReaderEvent>) {
    let mut reader = BufReader::new(output);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match read_terminated(&mut reader, &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\r', '\n']);
                if line.trim().is_empty() {
                    continue;
                }
                debug!("stream {} got line: {}", index, line);
                if events.send(ReaderEvent::Line(line.to_string())).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read tool output stream {}: {}", index, e);
                break;
            }
        }
    }
}

/// Append bytes up to and including the next `\r` or `\n`. Returns 0 at
/// end of stream.
async fn read_terminated<R: AsyncBufRead + Unpin>(reader: &mut R, buffer: &mut Vec<u8>) -> io::Result<usize> {
    let mut read = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read);
        }
        match available.iter().position(|b| matches!(b, b'\r' | b'\n')) {
            Some(end) => {
                buffer.extend_from_slice(&available[..=end]);
                reader.consume(end + 1);
                return Ok(read + end + 1);
            }
            None => {
                let len = available.len();
                buffer.extend_from_slice(available);
                reader.consume(len);
                read += len;
            }
        }
    }
}
