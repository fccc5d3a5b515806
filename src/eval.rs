use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};

use serde_json::{Map, Value};

use crate::ast::*;
use crate::error::TemplateError;
use crate::helpers::{HelperFn, HelperScope};
use crate::options::ProcessOptions;
use crate::parser;
use crate::result::Diagnostics;
use crate::value::{escape_html, is_truthy, number_value, stringify};

/// Position of the current `#each` iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopMeta {
    pub index: usize,
    pub first: bool,
    pub last: bool,
}

impl LoopMeta {
    fn marker(&self, name: &str) -> Option<Value> {
        match name {
            "@index" => Some(Value::from(self.index)),
            "@key" => Some(Value::String(self.index.to_string())),
            "@first" => Some(Value::Bool(self.first)),
            "@last" => Some(Value::Bool(self.last)),
            _ => None,
        }
    }
}

/// One frame of the scope chain. Frames are never modified once built;
/// lookups that miss fall through to the parent.
#[derive(Debug)]
pub struct RenderContext<'a> {
    data: Cow<'a, Value>,
    parent: Option<&'a RenderContext<'a>>,
    meta: Option<LoopMeta>,
}

impl<'a> RenderContext<'a> {
    pub fn root(data: &'a Value) -> Self {
        Self {
            data: Cow::Borrowed(data),
            parent: None,
            meta: None,
        }
    }

    /// Frame for one loop element. Objects become the frame's data directly,
    /// anything else is reachable as `this`.
    pub fn iteration(parent: &'a RenderContext<'a>, item: &'a Value, meta: LoopMeta) -> Self {
        let data = if item.is_object() {
            Cow::Borrowed(item)
        } else {
            let mut scope = Map::new();
            scope.insert("this".to_string(), item.clone());
            Cow::Owned(Value::Object(scope))
        };
        Self {
            data,
            parent: Some(parent),
            meta: Some(meta),
        }
    }

    /// Resolve a dotted path. `None` means undefined; a present `null` comes
    /// back as `Some(Value::Null)`.
    pub fn lookup(&self, path: &str) -> Option<Cow<'_, Value>> {
        let mut segments = path.split('.');
        let mut current = self.lookup_head(segments.next()?)?;
        for segment in segments {
            current = match current {
                Cow::Borrowed(value) => child(value, segment)?,
                Cow::Owned(value) => Cow::Owned(child(&value, segment)?.into_owned()),
            };
        }
        Some(current)
    }

    fn lookup_head(&self, head: &str) -> Option<Cow<'_, Value>> {
        let mut frame = Some(self);
        while let Some(ctx) = frame {
            if let Some(value) = ctx.data.get(head) {
                return Some(Cow::Borrowed(value));
            }
            if let Some(value) = ctx.meta.and_then(|meta| meta.marker(head)) {
                return Some(Cow::Owned(value));
            }
            if head == "this" {
                return Some(Cow::Borrowed(&*ctx.data));
            }
            frame = ctx.parent;
        }
        None
    }
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<Cow<'v, Value>> {
    match value {
        Value::Object(map) => map.get(segment).map(Cow::Borrowed),
        Value::Array(items) if segment == "length" => Some(Cow::Owned(Value::from(items.len()))),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .map(Cow::Borrowed),
        Value::String(s) if segment == "length" => {
            Some(Cow::Owned(Value::from(s.chars().count())))
        }
        _ => None,
    }
}

/// Walks tokens against a context, re-entering the parser for block bodies.
/// One evaluator serves a whole `process` call and owns its diagnostics.
pub(crate) struct Evaluator<'e> {
    helpers: HelperScope<'e>,
    options: &'e ProcessOptions,
    diagnostics: Diagnostics,
    depth: usize,
}

impl<'e> Evaluator<'e> {
    pub fn new(helpers: HelperScope<'e>, options: &'e ProcessOptions) -> Self {
        Self {
            helpers,
            options,
            diagnostics: Diagnostics::default(),
            depth: 0,
        }
    }

    pub(crate) fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    /// Parse and render a span of template text. `offset` is where the span
    /// sits in the top-level template.
    pub fn render_span(
        &mut self,
        text: &str,
        offset: usize,
        ctx: &RenderContext<'_>,
    ) -> Result<String, TemplateError> {
        let tokens = self.parse(text, offset)?;
        self.render(text, &tokens, ctx)
    }

    fn parse<'src>(&mut self, text: &'src str, offset: usize) -> Result<Vec<Token<'src>>, TemplateError> {
        let parsed = parser::parse(text, offset, &self.options.delimiters, &self.helpers);
        if let Some(at) = parsed.unterminated {
            self.warn(format!("unterminated tag at offset {at} left as text"), None);
        }
        for at in parsed.abandoned {
            self.warn(format!("tag opened at offset {at} is reopened before closing, left as text"), None);
        }
        for error in parsed.errors {
            self.report(error)?;
        }
        Ok(parsed.tokens)
    }

    /// Substitute every token's span in order. Each replacement shifts the
    /// spans after it, so the running shift is applied to every token.
    pub fn render(
        &mut self,
        text: &str,
        tokens: &[Token<'_>],
        ctx: &RenderContext<'_>,
    ) -> Result<String, TemplateError> {
        let mut output = text.to_string();
        let mut shift: isize = 0;

        for token in tokens {
            let rendered = self.render_token(token, ctx)?;
            let start = (token.span.start as isize + shift) as usize;
            let end = (token.span.end as isize + shift) as usize;
            output.replace_range(start..end, &rendered);
            shift += rendered.len() as isize - token.span.len() as isize;
        }

        Ok(output)
    }

    fn render_token(&mut self, token: &Token<'_>, ctx: &RenderContext<'_>) -> Result<String, TemplateError> {
        tracing::trace!(raw = token.raw, depth = self.depth, "rendering token");
        match &token.kind {
            TokenKind::Field { path } => self.field(path, ctx),
            TokenKind::Conditional {
                path,
                args,
                then_body,
                else_body,
            } => self.branch(path, args, true, then_body, else_body.as_ref(), ctx),
            TokenKind::Unless {
                path,
                args,
                then_body,
                else_body,
            } => self.branch(path, args, false, then_body, else_body.as_ref(), ctx),
            TokenKind::Loop { path, body } => self.each(path, body, ctx),
            TokenKind::Helper { name, args } => self.helper(name, args, ctx),
        }
    }

    fn field(&mut self, path: &str, ctx: &RenderContext<'_>) -> Result<String, TemplateError> {
        match ctx.lookup(path) {
            Some(value) if !value.is_null() => {
                self.diagnostics.mark_used(path);
                self.diagnostics.stats.substitutions += 1;
                let text = stringify(&value);
                Ok(if self.options.escape_html {
                    escape_html(&text)
                } else {
                    text
                })
            }
            _ => {
                self.missing(TemplateError::MissingVariable {
                    path: path.to_string(),
                })?;
                Ok(self.options.default_value.clone().unwrap_or_default())
            }
        }
    }

    fn branch(
        &mut self,
        path: &str,
        args: &[&str],
        wanted: bool,
        then_body: &Body<'_>,
        else_body: Option<&Body<'_>>,
        ctx: &RenderContext<'_>,
    ) -> Result<String, TemplateError> {
        let condition = self.condition(path, args, ctx)?;
        self.diagnostics.stats.conditionals_evaluated += 1;

        let chosen = if condition == wanted {
            Some(then_body)
        } else {
            else_body
        };
        match chosen {
            Some(body) => self.nested(|this| this.render_span(body.text, body.offset, ctx)),
            None => Ok(String::new()),
        }
    }

    fn condition(&mut self, path: &str, args: &[&str], ctx: &RenderContext<'_>) -> Result<bool, TemplateError> {
        // `{{#if eq a b}}` tests a helper's result.
        if !args.is_empty() {
            let Some(helper) = self.helpers.get(path) else {
                self.missing(TemplateError::MissingHelper {
                    name: path.to_string(),
                })?;
                return Ok(false);
            };
            let value = self.call_helper(path, helper, args, ctx)?;
            return Ok(is_truthy(value.as_ref()));
        }

        let value = ctx.lookup(path);
        if value.is_some() {
            self.diagnostics.mark_used(path);
        }
        Ok(is_truthy(value.as_deref()))
    }

    fn each(&mut self, path: &str, body: &Body<'_>, ctx: &RenderContext<'_>) -> Result<String, TemplateError> {
        let target = ctx.lookup(path);
        let Some(Value::Array(items)) = target.as_deref() else {
            let error = TemplateError::NotIterable {
                path: path.to_string(),
            };
            if self.options.strict {
                self.diagnostics.error(&error);
                return Err(error);
            }
            self.warn(error.to_string(), Some(path));
            return Ok(String::new());
        };
        self.diagnostics.mark_used(path);
        self.diagnostics.stats.loops_unrolled += 1;

        self.nested(|this| {
            // Parsed once, rendered per element.
            let tokens = this.parse(body.text, body.offset)?;
            let mut output = String::new();
            for (index, item) in items.iter().enumerate() {
                let meta = LoopMeta {
                    index,
                    first: index == 0,
                    last: index + 1 == items.len(),
                };
                let frame = RenderContext::iteration(ctx, item, meta);
                output.push_str(&this.render(body.text, &tokens, &frame)?);
            }
            Ok(output)
        })
    }

    fn helper(&mut self, name: &str, args: &[&str], ctx: &RenderContext<'_>) -> Result<String, TemplateError> {
        let Some(helper) = self.helpers.get(name) else {
            self.missing(TemplateError::MissingHelper {
                name: name.to_string(),
            })?;
            return Ok(String::new());
        };
        let value = self.call_helper(name, helper, args, ctx)?;
        Ok(value.as_ref().map(stringify).unwrap_or_default())
    }

    /// Invoke a helper. A failing or panicking helper becomes an error entry
    /// and yields `None`.
    fn call_helper(
        &mut self,
        name: &str,
        helper: &HelperFn,
        args: &[&str],
        ctx: &RenderContext<'_>,
    ) -> Result<Option<Value>, TemplateError> {
        let resolved: Vec<Value> = args.iter().map(|arg| self.argument(arg, ctx)).collect();

        let message = match panic::catch_unwind(AssertUnwindSafe(|| helper(&resolved))) {
            Ok(Ok(value)) => {
                self.diagnostics.stats.helpers_invoked += 1;
                return Ok(Some(value));
            }
            Ok(Err(error)) => error.message,
            Err(payload) => payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "helper panicked".to_string()),
        };

        self.report(TemplateError::Helper {
            name: name.to_string(),
            message,
        })?;
        Ok(None)
    }

    /// Variable first, then quoted literal, then number, then the raw text.
    fn argument(&mut self, raw: &str, ctx: &RenderContext<'_>) -> Value {
        if let Some(value) = ctx.lookup(raw) {
            self.diagnostics.mark_used(raw);
            return value.into_owned();
        }
        if let Some(inner) = unquote(raw) {
            return Value::String(inner.to_string());
        }
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => number_value(n),
            _ => Value::String(raw.to_string()),
        }
    }

    fn nested<F>(&mut self, f: F) -> Result<String, TemplateError>
    where
        F: FnOnce(&mut Self) -> Result<String, TemplateError>,
    {
        if self.depth >= self.options.max_depth {
            self.report(TemplateError::DepthExceeded {
                limit: self.options.max_depth,
            })?;
            return Ok(String::new());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Record an error; in strict mode also abort with it.
    fn report(&mut self, error: TemplateError) -> Result<(), TemplateError> {
        tracing::debug!(%error, strict = self.options.strict, "template error");
        self.diagnostics.error(&error);
        if self.options.strict {
            Err(error)
        } else {
            Ok(())
        }
    }

    /// Record a missing variable or helper; in strict mode this is an error.
    fn missing(&mut self, error: TemplateError) -> Result<(), TemplateError> {
        if let Some(path) = error.path() {
            self.diagnostics.mark_missing(path);
        }
        if self.options.strict {
            self.report(error)
        } else {
            Ok(())
        }
    }

    fn warn(&mut self, message: String, path: Option<&str>) {
        tracing::debug!(%message, "template warning");
        self.diagnostics.warning(message, path);
    }
}

fn unquote(raw: &str) -> Option<&str> {
    let first = raw.chars().next()?;
    if raw.len() >= 2 && (first == '"' || first == '\'') && raw.ends_with(first) {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::HelperRegistry;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn lookup_distinguishes_null_from_undefined() {
        let data = json!({ "a": null, "b": { "c": 1 } });
        let ctx = RenderContext::root(&data);
        assert_eq!(ctx.lookup("a").as_deref(), Some(&Value::Null));
        assert!(ctx.lookup("z").is_none());
        assert_eq!(ctx.lookup("b.c").as_deref(), Some(&json!(1)));
        assert!(ctx.lookup("b.c.d").is_none());
    }

    #[test]
    fn lookup_descends_arrays_and_lengths() {
        let data = json!({ "xs": [10, 20], "s": "héllo" });
        let ctx = RenderContext::root(&data);
        assert_eq!(ctx.lookup("xs.1").as_deref(), Some(&json!(20)));
        assert_eq!(ctx.lookup("xs.length").as_deref(), Some(&json!(2)));
        assert_eq!(ctx.lookup("s.length").as_deref(), Some(&json!(5)));
        assert!(ctx.lookup("xs.9").is_none());
    }

    #[test]
    fn iteration_frames_expose_markers_and_fall_through() {
        let data = json!({ "title": "outer", "items": [{ "name": "x" }, 5] });
        let root = RenderContext::root(&data);
        let items = data["items"].as_array().unwrap();

        let object_frame = RenderContext::iteration(
            &root,
            &items[0],
            LoopMeta { index: 0, first: true, last: false },
        );
        assert_eq!(object_frame.lookup("name").as_deref(), Some(&json!("x")));
        assert_eq!(object_frame.lookup("this.name").as_deref(), Some(&json!("x")));
        assert_eq!(object_frame.lookup("title").as_deref(), Some(&json!("outer")));
        assert_eq!(object_frame.lookup("@first").as_deref(), Some(&json!(true)));
        assert_eq!(object_frame.lookup("@key").as_deref(), Some(&json!("0")));

        let primitive_frame = RenderContext::iteration(
            &root,
            &items[1],
            LoopMeta { index: 1, first: false, last: true },
        );
        assert_eq!(primitive_frame.lookup("this").as_deref(), Some(&json!(5)));
        assert_eq!(primitive_frame.lookup("@index").as_deref(), Some(&json!(1)));
        assert_eq!(primitive_frame.lookup("@last").as_deref(), Some(&json!(true)));
        assert!(root.lookup("@index").is_none());
    }

    #[test]
    fn argument_resolution_order() {
        let registry = HelperRegistry::new();
        let overrides = HashMap::new();
        let options = ProcessOptions::default();
        let mut evaluator = Evaluator::new(registry.scoped(&overrides), &options);
        let data = json!({ "name": "Ada", "7": "seven" });
        let ctx = RenderContext::root(&data);

        assert_eq!(evaluator.argument("name", &ctx), json!("Ada"));
        assert_eq!(evaluator.argument("'name'", &ctx), json!("name"));
        assert_eq!(evaluator.argument("\"a b\"", &ctx), json!("a b"));
        assert_eq!(evaluator.argument("7", &ctx), json!("seven"));
        assert_eq!(evaluator.argument("2.5", &ctx), json!(2.5));
        assert_eq!(evaluator.argument("bare", &ctx), json!("bare"));

        let diagnostics = evaluator.into_diagnostics();
        assert_eq!(diagnostics.used.iter().collect::<Vec<_>>(), vec!["name", "7"]);
    }

    #[test]
    fn unquote_requires_matching_pair() {
        assert_eq!(unquote("'x'"), Some("x"));
        assert_eq!(unquote("\"\""), Some(""));
        assert_eq!(unquote("'x\""), None);
        assert_eq!(unquote("'"), None);
    }
}
