use indexmap::IndexSet;
use serde::Serialize;

use crate::error::TemplateError;

/// One error or warning entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&TemplateError> for Diagnostic {
    fn from(error: &TemplateError) -> Self {
        Self {
            message: error.to_string(),
            path: error.path().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    pub substitutions: usize,
    pub conditionals_evaluated: usize,
    pub loops_unrolled: usize,
    pub helpers_invoked: usize,
}

/// Everything one `process` call produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    /// Rendered text, or the untouched template when a strict render aborted.
    pub output: String,
    pub used_variables: IndexSet<String>,
    pub missing_variables: IndexSet<String>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub stats: RenderStats,
    /// The error that aborted a strict render.
    #[serde(skip)]
    pub error: Option<TemplateError>,
}

impl ProcessingResult {
    pub(crate) fn new(output: String, diagnostics: Diagnostics, error: Option<TemplateError>) -> Self {
        Self {
            output,
            used_variables: diagnostics.used,
            missing_variables: diagnostics.missing,
            errors: diagnostics.errors,
            warnings: diagnostics.warnings,
            stats: diagnostics.stats,
            error,
        }
    }

    /// False when a strict render was aborted.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<String, TemplateError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.output),
        }
    }
}

/// Accumulator shared by every frame of one render.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    pub used: IndexSet<String>,
    pub missing: IndexSet<String>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub stats: RenderStats,
}

impl Diagnostics {
    pub fn mark_used(&mut self, path: &str) {
        if !self.used.contains(path) {
            self.used.insert(path.to_string());
        }
    }

    pub fn mark_missing(&mut self, path: &str) {
        if !self.missing.contains(path) {
            self.missing.insert(path.to_string());
        }
    }

    pub fn error(&mut self, error: &TemplateError) {
        self.errors.push(Diagnostic::from(error));
    }

    pub fn warning(&mut self, message: String, path: Option<&str>) {
        self.warnings.push(Diagnostic {
            message,
            path: path.map(str::to_string),
        });
    }
}
