//! Tool-call fulfilment through the host skill registry.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::DriverError;
use crate::host::SkillRegistry;
use crate::remote::{ToolCall, ToolCallKind, ToolOutput};

/// Execute every call in a `submit_tool_outputs` batch.
///
/// Each call is caught on its own: a failure becomes `{"error": reason}` as
/// that call's output and never affects its siblings. Outputs keep the
/// order of `calls`.
pub async fn execute_tool_calls(
    calls: &[ToolCall],
    skills: &dyn SkillRegistry,
    agent: &str,
) -> Vec<ToolOutput> {
    join_all(calls.iter().map(|call| execute_one(call, skills, agent))).await
}

async fn execute_one(call: &ToolCall, skills: &dyn SkillRegistry, agent: &str) -> ToolOutput {
    let output = match &call.kind {
        ToolCallKind::Function { function } => {
            debug!(tool_call_id = %call.id, skill = %function.name, "executing tool call");
            match parse_arguments(&function.arguments) {
                Ok(args) => match skills.execute(&function.name, args, agent).await {
                    Ok(result) => render_result(result),
                    Err(e) => {
                        warn!(tool_call_id = %call.id, skill = %function.name, error = %e, "skill execution failed");
                        error_payload(&skill_error_reason(&e))
                    }
                },
                Err(e) => {
                    warn!(tool_call_id = %call.id, skill = %function.name, error = %e, "unparseable tool arguments");
                    error_payload(&format!("invalid arguments: {e}"))
                }
            }
        }
        ToolCallKind::Unsupported => {
            warn!(tool_call_id = %call.id, "unsupported tool call type");
            error_payload("unsupported tool call type")
        }
    };

    ToolOutput {
        tool_call_id: call.id.clone(),
        output,
    }
}

fn parse_arguments(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
}

/// Strings pass through verbatim; everything else is JSON-encoded.
fn render_result(result: serde_json::Value) -> String {
    match result {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn skill_error_reason(err: &DriverError) -> String {
    match err {
        DriverError::Skill { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn error_payload(reason: &str) -> String {
    serde_json::json!({ "error": reason }).to_string()
}
