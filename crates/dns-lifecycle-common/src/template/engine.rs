//! Template engine for manifest rendering
//!
//! Uses minijinja with its standard `{{ }}` / `{% %}` syntax and strict
//! undefined handling: a template that references a value the context does
//! not carry fails instead of rendering an empty string into a manifest.

use minijinja::{Environment, UndefinedBehavior, Value};
use serde::Serialize;

use super::error::TemplateError;
use super::filters;

/// Strict minijinja environment with the manifest filters registered
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        env.add_filter("required", filters::required);
        env.add_filter("base64_encode", filters::base64_encode);
        env.add_filter("to_json", filters::to_json);

        Self { env }
    }

    /// Render a named template source against serializable values
    ///
    /// The name only appears in error messages.
    pub fn render<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        values: &S,
    ) -> Result<String, TemplateError> {
        let ctx = Value::from_serialize(values);
        self.env
            .render_named_str(name, source, ctx)
            .map_err(|e| TemplateError::from_render(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_values() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "cm.yaml",
                "name: {{ extension.name }}-{{ namespace }}",
                &json!({"extension": {"name": "dns"}, "namespace": "kube-system"}),
            )
            .unwrap();
        assert_eq!(out, "name: dns-kube-system");
    }

    #[test]
    fn undefined_values_fail() {
        let engine = TemplateEngine::new();
        let err = engine
            .render("cm.yaml", "value: {{ missing }}", &json!({}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Undefined { .. }));
    }

    #[test]
    fn is_defined_guards_optional_sections() {
        let engine = TemplateEngine::new();
        let src = "{% if providerConfig.target is defined %}target: {{ providerConfig.target.name }}\n{% endif %}rest: 1";
        let with = engine
            .render("t", src, &json!({"providerConfig": {"target": {"name": "api"}}}))
            .unwrap();
        assert!(with.contains("target: api"));

        let without = engine
            .render("t", src, &json!({"providerConfig": {}}))
            .unwrap();
        assert_eq!(without.trim(), "rest: 1");
    }

    #[test]
    fn filters_are_registered() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "t",
                "{{ secret | base64_encode }} '{{ cfg | to_json }}'",
                &json!({"secret": "hello", "cfg": {"a": 1}}),
            )
            .unwrap();
        assert_eq!(out, r#"aGVsbG8= '{"a":1}'"#);
    }

    #[test]
    fn syntax_errors_are_render_errors() {
        let engine = TemplateEngine::new();
        let err = engine.render("t", "{% if %}", &json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }
}
