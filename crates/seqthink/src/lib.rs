pub mod agent;
pub mod collector;
pub mod configuration;
pub mod context;
pub mod errors;
pub mod logging;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod session;
pub mod systems;
pub mod termination;

pub use agent::{Agent, AgentOptions, AgentReply, AgentRequest, LoopReport};
pub use context::{RequestContext, StatusUpdate};
pub use errors::RequestError;
pub use termination::TerminationReason;
