use thiserror::Error;

/// Everything that can go wrong while parsing or rendering a template.
///
/// Outside strict mode these end up as diagnostics on the
/// [`ProcessingResult`](crate::ProcessingResult); in strict mode the first one
/// aborts the render and is handed back on the result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("block `#{name}` opened at offset {offset} is never closed")]
    UnclosedBlock { name: String, offset: usize },

    #[error("closing tag `/{name}` at offset {offset} has no matching open block")]
    UnexpectedClose { name: String, offset: usize },

    #[error("`else` at offset {offset} is not inside an `if` or `unless` block")]
    StrayElse { offset: usize },

    #[error("unknown block `#{name}` at offset {offset}")]
    UnknownBlock { name: String, offset: usize },

    #[error("block `#{name}` at offset {offset} has no target")]
    MissingBlockTarget { name: String, offset: usize },

    #[error("missing variable `{path}`")]
    MissingVariable { path: String },

    #[error("missing helper `{name}`")]
    MissingHelper { name: String },

    #[error("`{path}` is not a list and cannot be iterated")]
    NotIterable { path: String },

    #[error("helper `{name}` failed: {message}")]
    Helper { name: String, message: String },

    #[error("blocks nested deeper than {limit} levels")]
    DepthExceeded { limit: usize },
}

impl TemplateError {
    /// The variable or helper path this error is about, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            TemplateError::MissingVariable { path } | TemplateError::NotIterable { path } => {
                Some(path.as_str())
            }
            TemplateError::MissingHelper { name } | TemplateError::Helper { name, .. } => {
                Some(name.as_str())
            }
            _ => None,
        }
    }
}

/// Error returned by a helper function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HelperError {
    pub message: String,
}

impl HelperError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
