// Protocol module - gatttool line grammar and result decoding
pub mod dispatcher;
pub mod grammar;
pub mod listener;

pub use dispatcher::{GattResponseDecoder, ResultDispatcher};
pub use grammar::{parse_line, ParsedLine, Prompt, ResultLine, ResultToken};
pub use listener::{ChannelListener, GattEvent, GattToolListener, ShellError};
