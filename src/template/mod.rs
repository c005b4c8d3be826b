//! Prompt rendering via minijinja.

use minijinja::Environment;
use serde::Serialize;

use crate::error::{OpError, OpResult};

/// System prompt used by generators unless overridden.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"{% if instructions %}Instructions:
{{ instructions }}
{% endif %}{% if inputs_schema %}
Input schema:
{{ inputs_schema }}
{% endif %}{% if outputs_schema %}
Output schema:
{{ outputs_schema }}
{% endif %}{% if hints %}
Hints:
{% for hint in hints %}- {{ hint }}
{% endfor %}{% endif %}{% if examples %}
Examples:
{% for example in examples %}Input: {{ example.inputs | tojson }}
Output: {{ example.outputs | tojson }}
{% endfor %}{% endif %}"#;

/// Renders prompt templates against serializable variables.
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl PromptRenderer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    /// Check that `template` parses.
    pub fn compile(&self, template: &str) -> OpResult<()> {
        self.env
            .template_from_str(template)
            .map(|_| ())
            .map_err(|e| OpError::TemplateError(format!("Template compile error: {}", e)))
    }

    pub fn render<S: Serialize>(&self, template: &str, variables: &S) -> OpResult<String> {
        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| OpError::TemplateError(format!("Template compile error: {}", e)))?;
        tmpl.render(minijinja::Value::from_serialize(variables))
            .map_err(|e| OpError::TemplateError(format!("Template render error: {}", e)))
    }
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}
