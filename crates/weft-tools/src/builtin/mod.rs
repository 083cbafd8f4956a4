pub mod control;
pub mod template;

use serde_json::json;

use weft_core::config::{ToolConfig, ToolKindConfig};
use weft_core::error::{Result, WeftError};

use crate::registry::ToolSpec;

pub use control::{ask_master, handoff, route_to, route_to_name, ASK_MASTER, HANDOFF};
pub use template::TemplateReply;

/// Build a tool spec from a `[[tools]]` config entry.
///
/// Entries without a schema accept any object. Ordinary tools without a
/// reply template echo their arguments back.
pub fn spec_from_config(config: &ToolConfig) -> Result<ToolSpec> {
    let schema = config
        .input_schema
        .clone()
        .unwrap_or_else(|| json!({ "type": "object" }));

    let spec = match config.kind {
        ToolKindConfig::Ordinary => {
            let handler = match config.reply {
                Some(ref template) => TemplateReply::new(template.as_str()),
                None => TemplateReply::echo(),
            }
            .with_timeout(config.timeout_secs);
            ToolSpec::ordinary(&config.name, &config.description, schema, handler)
        }
        ToolKindConfig::Delegate => {
            let target = config.target.as_deref().ok_or_else(|| {
                WeftError::Config(format!("delegate tool '{}' needs a target", config.name))
            })?;
            ToolSpec::delegate(&config.name, &config.description, schema, target)
        }
        ToolKindConfig::AskHuman => ToolSpec::ask_human(&config.name, &config.description, schema),
        ToolKindConfig::Handoff => ToolSpec::handoff(&config.name, &config.description, schema),
    };
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolKind;

    fn tool(kind: ToolKindConfig) -> ToolConfig {
        ToolConfig {
            name: "t".into(),
            description: String::new(),
            kind,
            target: None,
            input_schema: None,
            reply: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn delegate_without_target_is_config_error() {
        assert!(matches!(
            spec_from_config(&tool(ToolKindConfig::Delegate)),
            Err(WeftError::Config(_))
        ));
    }

    #[test]
    fn kinds_map_to_variants() {
        let mut delegate = tool(ToolKindConfig::Delegate);
        delegate.target = Some("research_agent".into());
        assert!(matches!(
            spec_from_config(&delegate).unwrap().kind,
            ToolKind::Delegate { .. }
        ));
        assert!(matches!(
            spec_from_config(&tool(ToolKindConfig::AskHuman)).unwrap().kind,
            ToolKind::AskHuman
        ));
        assert!(matches!(
            spec_from_config(&tool(ToolKindConfig::Handoff)).unwrap().kind,
            ToolKind::Handoff
        ));
        let ordinary = spec_from_config(&tool(ToolKindConfig::Ordinary)).unwrap();
        assert!(matches!(ordinary.kind, ToolKind::Ordinary(_)));
        assert_eq!(ordinary.input_schema, json!({"type": "object"}));
    }
}
