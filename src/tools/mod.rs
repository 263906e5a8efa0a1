//! Host skill descriptors → remote function-tool schema.

use serde::{Deserialize, Serialize};

use crate::host::SkillRegistry;

/// A function tool as the remote assistant sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Wire form: `{"type": "function", "function": {...}}`.
    pub fn to_remote(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Translate the configured skill names into tool definitions.
///
/// Skills the registry does not know are skipped with a warning.
pub fn translate_skills(skills: &[String], registry: &dyn SkillRegistry) -> Vec<ToolDefinition> {
    skills
        .iter()
        .filter_map(|name| {
            let Some(skill) = registry.get(name) else {
                tracing::warn!(skill = %name, "skill not found in host registry; not exposed as a tool");
                return None;
            };
            Some(ToolDefinition {
                name: name.clone(),
                description: skill.description,
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": skill.parameters,
                    "required": skill.required,
                }),
            })
        })
        .collect()
}
