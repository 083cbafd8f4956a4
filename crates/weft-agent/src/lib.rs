pub mod context;
pub mod driver;
pub mod orchestrator;
pub mod scripted;

pub use driver::{ExecutionDriver, PendingQuestion, RunOutcome, RunStatus};
pub use orchestrator::Orchestrator;
pub use scripted::ScriptedAgent;
