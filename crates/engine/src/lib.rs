pub mod bootstrap;
pub mod engine;
pub mod gateway;
pub mod sweep;
pub mod telemetry;

pub use bootstrap::{bootstrap, Application, BootstrapError};
pub use engine::{ApprovalDecision, ApprovalEngine, DecisionAction, EngineSettings};
pub use gateway::EmailActionGateway;
