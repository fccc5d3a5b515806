//! contentplate: Handlebars-style templating for document builder content.
//!
//! The engine renders one block of component text against a JSON data
//! context. It does one job: substitute, branch and iterate over a fixed tag
//! grammar, and report what it used, what was missing and what went wrong.
//!
//! Supported tags:
//! - `{{path.to.value}}` field substitution, with `@index`, `@key`,
//!   `@first`, `@last` and `this` inside loops.
//! - `{{helper arg "literal" 42}}` helper calls.
//! - `{{#if path}} .. {{else}} .. {{/if}}` and the same for `#unless`.
//! - `{{#each list}} .. {{/each}}`.
//!
//! Not supported:
//! - User-defined functions, assignment or arithmetic outside the helpers.
//! - Partials and subexpressions.
//!
//! Block bodies are tokenized lazily: each body is handed back to the
//! tokenizer only when it is rendered, so there is no separate tree pass.
//!
//! ```
//! use contentplate::{process, ProcessOptions};
//! use serde_json::json;
//!
//! let result = process("Hi {{name}}!", &json!({ "name": "Ada" }), &ProcessOptions::default());
//! assert_eq!(result.output, "Hi Ada!");
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod helpers;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod result;
pub mod value;

use serde_json::Value;

use crate::error::HelperError;
use crate::eval::{Evaluator, RenderContext};

pub use crate::error::TemplateError;
pub use crate::helpers::{HelperFn, HelperRegistry};
pub use crate::options::{Delimiters, ProcessOptions};
pub use crate::result::{Diagnostic, ProcessingResult, RenderStats};

/// A helper registry plus the `process` entry point.
///
/// Rendering only needs `&self`, so one engine can serve many threads.
/// Registration needs `&mut self` and therefore happens at setup time.
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    helpers: HelperRegistry,
}

impl TemplateEngine {
    /// Engine with the built-in helpers registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(helpers: HelperRegistry) -> Self {
        Self { helpers }
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    /// Register a helper for every later call, replacing any helper of the
    /// same name, built-ins included.
    pub fn register_helper<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, HelperError> + Send + Sync + 'static,
    {
        self.helpers.register(name, f);
    }

    pub fn register_helpers<I, S>(&mut self, helpers: I)
    where
        I: IntoIterator<Item = (S, HelperFn)>,
        S: Into<String>,
    {
        for (name, f) in helpers {
            self.helpers.insert(name, f);
        }
    }

    /// Render `template` against `data`.
    ///
    /// Never panics and never returns early: problems are collected on the
    /// result. In strict mode the first problem aborts the render, the output
    /// is the original template and the error is in
    /// [`ProcessingResult::error`].
    pub fn process(&self, template: &str, data: &Value, options: &ProcessOptions) -> ProcessingResult {
        tracing::debug!(
            len = template.len(),
            strict = options.strict,
            "processing template"
        );

        let mut evaluator = Evaluator::new(self.helpers.scoped(&options.helpers), options);
        let root = RenderContext::root(data);
        let outcome = evaluator.render_span(template, 0, &root);
        let diagnostics = evaluator.into_diagnostics();

        match outcome {
            Ok(output) => {
                let output = if options.trim {
                    output.trim().to_string()
                } else {
                    output
                };
                ProcessingResult::new(output, diagnostics, None)
            }
            Err(error) => {
                tracing::debug!(%error, "strict render aborted");
                ProcessingResult::new(template.to_string(), diagnostics, Some(error))
            }
        }
    }
}

/// Render with a fresh engine holding only the built-in helpers.
pub fn process(template: &str, data: &Value, options: &ProcessOptions) -> ProcessingResult {
    TemplateEngine::new().process(template, data, options)
}
