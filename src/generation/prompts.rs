//! Prompt templates and fallback values injected into the facade.

use std::collections::HashMap;

/// Template key used when a field type has no template of its own.
pub const GENERIC_FIELD_TYPE: &str = "text";

const GENERIC_TEMPLATE: &str = "Write suitable text for this field. Keep it short and relevant. \
Reply with the text only, without quotes or formatting.";

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        "title",
        "Write a short, engaging title for a website or landing page. Keep it professional. \
Reply with the title only, without quotes or formatting.",
    ),
    (
        "description",
        "Write a clear, engaging description of a website or product in one or two sentences. \
Reply with the description only, without quotes or formatting.",
    ),
    (GENERIC_FIELD_TYPE, GENERIC_TEMPLATE),
    (
        "navbarBrand",
        "Write a memorable, concise brand name for a company or product. \
Reply with the name only, without quotes or formatting.",
    ),
    (
        "navbarButtonText",
        "Write the label for a navigation button, one or two action-oriented words. \
Reply with the label only, without quotes or formatting.",
    ),
    (
        "primaryButtonText",
        "Write the label for a primary call-to-action button, one to three compelling words. \
Reply with the label only, without quotes or formatting.",
    ),
    (
        "secondaryButtonText",
        "Write the label for a secondary button, one to three clear words. \
Reply with the label only, without quotes or formatting.",
    ),
];

const DEFAULT_FALLBACKS: &[(&str, &str)] = &[
    ("title", "Your Amazing Title Here"),
    (
        "description",
        "Your description goes here. This is a sample description that you can edit.",
    ),
    ("navbarBrand", "Your Brand"),
    ("navbarButtonText", "Login"),
    ("primaryButtonText", "Get Started"),
    ("secondaryButtonText", "Learn More"),
];

/// Base prompt per field type.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_TEMPLATES.iter().copied())
    }
}

impl PromptTemplates {
    /// No templates at all; every field type uses the generic sentence.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            templates: pairs
                .into_iter()
                .map(|(field_type, template)| (field_type.to_string(), template.to_string()))
                .collect(),
        }
    }

    pub fn with_template(mut self, field_type: &str, template: impl Into<String>) -> Self {
        self.templates.insert(field_type.to_string(), template.into());
        self
    }

    fn template_for(&self, field_type: &str) -> &str {
        self.templates
            .get(field_type)
            .or_else(|| self.templates.get(GENERIC_FIELD_TYPE))
            .map(String::as_str)
            .unwrap_or(GENERIC_TEMPLATE)
    }

    pub fn build(&self, field_type: &str, current_value: Option<&str>, context: Option<&str>) -> String {
        let mut prompt = self.template_for(field_type).to_string();

        if let Some(current) = current_value.filter(|v| !v.is_empty()) {
            prompt.push_str(&format!(
                " Current value: \"{current}\". Improve or replace this content."
            ));
        }
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            prompt.push_str(&format!(" Context: {context}"));
        }
        prompt
    }
}

/// Values written when generation fails, keyed by field name.
#[derive(Debug, Clone)]
pub struct FallbackValues {
    values: HashMap<String, String>,
}

impl Default for FallbackValues {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_FALLBACKS.iter().copied())
    }
}

impl FallbackValues {
    pub fn empty() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(field, value)| (field.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn with_value(mut self, field_name: &str, value: impl Into<String>) -> Self {
        self.values.insert(field_name.to_string(), value.into());
        self
    }

    pub fn get(&self, field_name: &str) -> Option<&str> {
        self.values.get(field_name).map(String::as_str)
    }

    /// The configured fallback, or `"Generated <field>"`. Never empty.
    pub fn resolve(&self, field_name: &str) -> String {
        match self.get(field_name) {
            Some(value) if !value.trim().is_empty() => value.to_string(),
            _ => format!("Generated {field_name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_type_uses_text_template() {
        let templates = PromptTemplates::default();
        assert_eq!(
            templates.build("carousel", None, None),
            templates.build("text", None, None)
        );
        assert_ne!(
            templates.build("title", None, None),
            templates.build("text", None, None)
        );
    }

    #[test]
    fn current_value_and_context_are_appended_in_order() {
        let templates = PromptTemplates::empty().with_template("title", "Base.");
        let prompt = templates.build("title", Some("Acme Corp"), Some("bakery in Lyon"));
        assert_eq!(
            prompt,
            "Base. Current value: \"Acme Corp\". Improve or replace this content. Context: bakery in Lyon"
        );
        assert_eq!(templates.build("title", Some(""), Some("")), "Base.");
    }

    #[test]
    fn empty_templates_still_produce_a_prompt() {
        assert!(!PromptTemplates::empty().build("title", None, None).is_empty());
    }

    #[test]
    fn fallbacks_resolve_known_and_unknown_fields() {
        let fallbacks = FallbackValues::default();
        assert_eq!(fallbacks.resolve("title"), "Your Amazing Title Here");
        assert_eq!(fallbacks.resolve("navbarButtonText"), "Login");
        assert_eq!(fallbacks.resolve("tagline"), "Generated tagline");
        assert_eq!(
            FallbackValues::empty().with_value("title", "  ").resolve("title"),
            "Generated title"
        );
    }
}
