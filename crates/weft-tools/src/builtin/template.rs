use futures::future::BoxFuture;
use serde_json::{json, Value};

use weft_core::error::Result;
use weft_core::traits::ToolHandler;
use weft_core::types::ToolContext;

/// Ordinary handler that answers with a rendered template.
///
/// `{field}` is replaced by the argument of that name. String arguments are
/// inserted bare, everything else as JSON. Unknown placeholders stay as-is.
/// Without a template the arguments are echoed back.
pub struct TemplateReply {
    template: Option<String>,
    timeout_secs: Option<u64>,
}

impl TemplateReply {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            timeout_secs: None,
        }
    }

    pub fn echo() -> Self {
        Self {
            template: None,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, secs: Option<u64>) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn render(&self, template: &str, args: &Value) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match args.get(key) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&other.to_string()),
                        None => {
                            out.push('{');
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl ToolHandler for TemplateReply {
    fn invoke(&self, args: Value, ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            tracing::debug!(node_id = %ctx.node_id, agent = %ctx.agent_id, "template reply");
            match self.template {
                Some(ref template) => Ok(json!({ "result": self.render(template, &args) })),
                None => Ok(json!({ "result": args })),
            }
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }
}
