pub mod agents;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod task;
pub mod traits;
pub mod types;

pub use agents::AgentRegistry;
pub use config::AppConfig;
pub use error::{Result, WeftError};
pub use event::EventBus;
pub use graph::{GraphSnapshot, TaskGraph, SNAPSHOT_FORMAT_VERSION};
pub use task::*;
pub use types::*;
