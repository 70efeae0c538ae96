//! Stratum v1 server side.
//!
//! `messages` is the wire format, `session` the per-connection state
//! machine and task, and `registry` the process-wide set of live sessions
//! that job broadcasts fan out through.

pub mod messages;
mod registry;
mod session;

pub use registry::{
    SEND_QUEUE_DEPTH, SessionEvent, SessionHandle, SessionRegistry, SessionSnapshot,
};
pub use session::{Session, SessionClose, SessionContext, session_task};
