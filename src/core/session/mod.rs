// Session module - gatttool sessions and the pool that owns them
pub mod pool;
pub mod session;
pub mod state;

pub use pool::SessionPool;
pub use session::{Session, SessionSummary};
pub use state::{GattCommand, SecurityLevel, Status, TransitionError};
