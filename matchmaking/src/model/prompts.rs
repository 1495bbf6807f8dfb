//! Versioned prompt templates.
//!
//! A `PromptRegistry` is built once and handed to each engine by `Arc`.
//! Nothing here is global: two pipelines can run different registries side
//! by side.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::client::{ModelError, ModelRequest, ModelSettings, PromptVariables};

/// Prompt used for the advocate role.
pub const ADVOCATE_PROMPT: &str = "debate.advocate";
/// Prompt used for the skeptic role.
pub const SKEPTIC_PROMPT: &str = "debate.skeptic";

/// A named, versioned prompt with `{{var}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub version: u32,
    pub system: String,
    pub body: String,
    /// Variables that must be bound before rendering.
    pub required: Vec<String>,
}

impl PromptTemplate {
    /// Substitute variables into the body.
    ///
    /// String values are inserted verbatim; other JSON values use their
    /// compact JSON form. Unknown placeholders are left untouched.
    pub fn render(&self, vars: &PromptVariables) -> Result<String, ModelError> {
        for name in &self.required {
            if !vars.contains_key(name) {
                return Err(ModelError::Prompt(format!(
                    "{} v{}: missing variable '{}'",
                    self.name, self.version, name
                )));
            }
        }

        let mut out = self.body.clone();
        for (name, value) in vars {
            let placeholder = format!("{{{{{}}}}}", name);
            if !out.contains(&placeholder) {
                continue;
            }
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&placeholder, &text);
        }
        Ok(out)
    }
}

/// Registry of prompt templates keyed by name; highest version wins.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    templates: HashMap<String, Vec<PromptTemplate>>,
}

impl PromptRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the debate role templates.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(advocate_template());
        registry.register(skeptic_template());
        registry
    }

    /// Add a template. Re-registering a name/version pair replaces it.
    pub fn register(&mut self, template: PromptTemplate) {
        let versions = self.templates.entry(template.name.clone()).or_default();
        versions.retain(|t| t.version != template.version);
        versions.push(template);
        versions.sort_by_key(|t| t.version);
    }

    /// Latest version of a template.
    pub fn latest(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name).and_then(|v| v.last())
    }

    /// A specific template version.
    pub fn version(&self, name: &str, version: u32) -> Option<&PromptTemplate> {
        self.templates
            .get(name)
            .and_then(|v| v.iter().find(|t| t.version == version))
    }

    /// Names of all registered templates.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Render the latest version of `name` into a model request.
    pub fn build_request(
        &self,
        name: &str,
        variables: PromptVariables,
        settings: &ModelSettings,
    ) -> Result<ModelRequest, ModelError> {
        let template = self
            .latest(name)
            .ok_or_else(|| ModelError::Prompt(format!("unknown prompt '{}'", name)))?;
        let rendered = template.render(&variables)?;
        Ok(ModelRequest {
            prompt_name: template.name.clone(),
            prompt_version: template.version,
            variables,
            system: template.system.clone(),
            rendered,
            settings: settings.clone(),
        })
    }
}

const RESPONSE_SCHEMA: &str = r#"Respond with ONLY a JSON object:
{
  "score": <0-100 fit score>,
  "confidence": <0.0-1.0>,
  "reasoning": "<2-4 sentences>",
  "talking_points": [{"topic": "<short tag>", "text": "<point>"}],
  "concerns": [{"topic": "<short tag>", "detail": "<concern>", "severity": "minor|major|dealbreaker", "confirmed": <true if verified against the profile data>}],
  "hard_exclusion": null or "<reason this pair violates an absolute mandate restriction>"
}"#;

fn advocate_template() -> PromptTemplate {
    PromptTemplate {
        name: ADVOCATE_PROMPT.to_string(),
        version: 1,
        system: "You are the advocate in a structured fit debate between an investment \
                 offer and a capital allocator. Build the strongest honest case FOR the \
                 match. Ground every point in the supplied profile data."
            .to_string(),
        body: format!(
            "## Offer\n{{{{offer}}}}\n\n## Allocator\n{{{{demand}}}}\n\n\
             ## Preliminary score\n{{{{preliminary_score}}}}\n\n\
             ## Iteration\n{{{{iteration}}}}\n\n\
             ## Skeptic's previous assessment\n{{{{feedback}}}}\n\n\
             Address each of the skeptic's concerns you can rebut and concede the rest.\n\n{}",
            RESPONSE_SCHEMA
        ),
        required: vec![
            "offer".to_string(),
            "demand".to_string(),
            "iteration".to_string(),
            "feedback".to_string(),
        ],
    }
}

fn skeptic_template() -> PromptTemplate {
    PromptTemplate {
        name: SKEPTIC_PROMPT.to_string(),
        version: 1,
        system: "You are the skeptic in a structured fit debate between an investment \
                 offer and a capital allocator. Find every reason the match could fail: \
                 mandate conflicts, size mismatch, strategy drift, weak track record. \
                 Mark a concern confirmed only when the profile data proves it."
            .to_string(),
        body: format!(
            "## Offer\n{{{{offer}}}}\n\n## Allocator\n{{{{demand}}}}\n\n\
             ## Preliminary score\n{{{{preliminary_score}}}}\n\n\
             ## Iteration\n{{{{iteration}}}}\n\n\
             ## Advocate's previous assessment\n{{{{feedback}}}}\n\n\
             Drop concerns the advocate has convincingly rebutted.\n\n{}",
            RESPONSE_SCHEMA
        ),
        required: vec![
            "offer".to_string(),
            "demand".to_string(),
            "iteration".to_string(),
            "feedback".to_string(),
        ],
    }
}
