// Process module - tool subprocess and its output reader
pub mod channel;
pub mod reader;

pub use channel::{CommandWriter, ProcessChannel, ToolProcess, ToolReader, ToolWriter};
pub use reader::{LineReader, ReaderEvent};
