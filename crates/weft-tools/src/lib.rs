pub mod builtin;
pub mod registry;
pub mod schema;

pub use registry::{ToolKind, ToolRegistry, ToolSpec};
