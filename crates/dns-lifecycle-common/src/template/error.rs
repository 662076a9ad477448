//! Template error types

use thiserror::Error;

/// Errors that can occur during template operations
///
/// Every variant is caused by the template or the values fed into it, so
/// none of them heal on retry.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template rendering failed
    #[error("template {template} failed to render: {source}")]
    Render {
        /// Name of the template being rendered
        template: String,
        /// Underlying minijinja error
        #[source]
        source: minijinja::Error,
    },
    /// A referenced value is missing from the context
    #[error("template {template} references an undefined value: {detail}")]
    Undefined {
        /// Name of the template being rendered
        template: String,
        /// Location and expression details from the engine
        detail: String,
    },
    /// The values could not be turned into a template context
    #[error("invalid template values: {0}")]
    Values(String),
}

impl TemplateError {
    /// Classify a minijinja error raised while rendering `template`
    pub fn from_render(template: &str, err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::UndefinedError => Self::Undefined {
                template: template.to_string(),
                detail: err.to_string(),
            },
            _ => Self::Render {
                template: template.to_string(),
                source: err,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_errors_are_split_out() {
        let err = minijinja::Error::new(minijinja::ErrorKind::UndefinedError, "target is undefined");
        let err = TemplateError::from_render("dnsentry.yaml", err);
        assert!(matches!(err, TemplateError::Undefined { .. }));
        assert!(err.to_string().contains("dnsentry.yaml"));
    }

    #[test]
    fn other_errors_keep_their_source() {
        let err = minijinja::Error::new(minijinja::ErrorKind::SyntaxError, "unexpected end");
        let err = TemplateError::from_render("deployment.yaml", err);
        assert!(matches!(err, TemplateError::Render { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
