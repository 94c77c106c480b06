pub mod actor;
pub mod approver;
pub mod history;
pub mod instance;
pub mod token;
pub mod workflow;
