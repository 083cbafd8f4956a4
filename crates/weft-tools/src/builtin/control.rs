use serde_json::json;

use crate::registry::ToolSpec;

pub const HANDOFF: &str = "handoff";
pub const ASK_MASTER: &str = "ask_master";

/// Terminal tool: completes the calling node with its arguments.
pub fn handoff() -> ToolSpec {
    ToolSpec::handoff(
        HANDOFF,
        "Return your result to whoever assigned this task. Ends your turn for good.",
        json!({
            "type": "object",
            "properties": {
                "answer": { "description": "The result to hand back" }
            },
            "required": ["answer"]
        }),
    )
}

/// Suspends the calling node until a human answers `question`.
pub fn ask_master() -> ToolSpec {
    ToolSpec::ask_human(
        ASK_MASTER,
        "Ask the human operator a question and wait for the answer.",
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "Question for the human" }
            },
            "required": ["question"]
        }),
    )
}

/// Name of the delegation tool for `target`.
pub fn route_to_name(target: &str) -> String {
    format!("route_to_{}", target)
}

/// Delegation tool that spawns a child task for `target`.
pub fn route_to(target: &str) -> ToolSpec {
    ToolSpec::delegate(
        route_to_name(target),
        format!("Delegate a request to the {} specialist", target),
        json!({
            "type": "object",
            "properties": {
                "request": { "type": "string", "description": "Request to delegate" }
            },
            "required": ["request"]
        }),
        target,
    )
}
