//! Manifest templating
//!
//! Templates use standard Jinja syntax rendered by minijinja with strict
//! undefined behavior. Available filters:
//! - `required`: fail the render when a value is missing
//! - `base64_encode`: encode Secret data
//! - `to_json`: embed structured values (e.g. the provider config)

mod engine;
mod error;
mod filters;

pub use engine::TemplateEngine;
pub use error::TemplateError;
