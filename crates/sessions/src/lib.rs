pub mod session;
pub mod turn;

pub use session::{ErrorLogEntry, Metrics, RingBuffer, Session, SessionState};
pub use turn::{Turn, TurnEvent};
