pub mod agent;
pub mod analyst;
pub mod executor;
pub mod registry;
pub mod tools;

pub use agent::{Agent, AgentContext, AgentOutput, AgentPayload, AgentRegistry, Usage};
pub use executor::{AgentExecutor, AgentRun};
pub use registry::{AgentDefinition, AgentKind, AgentName, AGENT_REGISTRY};
