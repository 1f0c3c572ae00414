pub mod manager;
pub mod state;
pub mod store;

pub use manager::{SessionManager, SessionOptions};
pub use state::{AgentRecord, AgentStatus, Session, TargetDescriptor};
pub use store::{JsonSessionStore, SessionStore, SessionSummary};
