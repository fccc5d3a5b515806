use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HelperError;
use crate::helpers::HelperFn;

/// Default cap on nested block depth.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Tag delimiters, `{{` and `}}` unless configured otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new("{{", "}}")
    }
}

/// Per-call settings for [`TemplateEngine::process`](crate::TemplateEngine::process).
#[derive(Clone)]
pub struct ProcessOptions {
    /// Abort on the first resolution or parse failure instead of degrading.
    pub strict: bool,
    /// Substituted for missing fields outside strict mode.
    pub default_value: Option<String>,
    /// Entity-escape `& < > " '` in substituted field values.
    pub escape_html: bool,
    /// Helpers that shadow registry helpers of the same name for this call.
    pub helpers: HashMap<String, HelperFn>,
    /// Trim leading and trailing whitespace from the final output.
    pub trim: bool,
    /// Reserved for partial rendering; currently has no effect.
    pub partial: bool,
    pub delimiters: Delimiters,
    pub max_depth: usize,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            strict: false,
            default_value: None,
            escape_html: false,
            helpers: HashMap::new(),
            trim: false,
            partial: false,
            delimiters: Delimiters::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn escape_html(mut self, escape: bool) -> Self {
        self.escape_html = escape;
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Add a helper for this call only.
    pub fn helper<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, HelperError> + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(f));
        self
    }
}

impl fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut helpers: Vec<&String> = self.helpers.keys().collect();
        helpers.sort();
        f.debug_struct("ProcessOptions")
            .field("strict", &self.strict)
            .field("default_value", &self.default_value)
            .field("escape_html", &self.escape_html)
            .field("helpers", &helpers)
            .field("trim", &self.trim)
            .field("partial", &self.partial)
            .field("delimiters", &self.delimiters)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
