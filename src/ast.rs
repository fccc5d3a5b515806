use std::ops::Range;

/// Unparsed body of a block tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Body<'src> {
    pub text: &'src str,
    /// Absolute offset of `text` in the top-level template.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'src> {
    /// `{{path}}`
    Field { path: &'src str },
    /// `{{#if path}} .. {{else}} .. {{/if}}`
    Conditional {
        path: &'src str,
        args: Vec<&'src str>,
        then_body: Body<'src>,
        else_body: Option<Body<'src>>,
    },
    /// `{{#unless path}} .. {{else}} .. {{/unless}}`
    Unless {
        path: &'src str,
        args: Vec<&'src str>,
        then_body: Body<'src>,
        else_body: Option<Body<'src>>,
    },
    /// `{{#each path}} .. {{/each}}`
    Loop { path: &'src str, body: Body<'src> },
    /// `{{name arg1 arg2}}`
    Helper {
        name: &'src str,
        args: Vec<&'src str>,
    },
}

/// One construct found by the tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind<'src>,
    /// Exact source text, delimiters included. For blocks this runs from the
    /// open tag through the matching close tag.
    pub raw: &'src str,
    /// Byte range of `raw` within the text that was parsed.
    pub span: Range<usize>,
}

impl<'src> Token<'src> {
    /// Variable path or helper name.
    pub fn path(&self) -> &'src str {
        match &self.kind {
            TokenKind::Field { path }
            | TokenKind::Conditional { path, .. }
            | TokenKind::Unless { path, .. }
            | TokenKind::Loop { path, .. } => path,
            TokenKind::Helper { name, .. } => name,
        }
    }

    pub fn args(&self) -> &[&'src str] {
        match &self.kind {
            TokenKind::Conditional { args, .. }
            | TokenKind::Unless { args, .. }
            | TokenKind::Helper { args, .. } => args,
            TokenKind::Field { .. } | TokenKind::Loop { .. } => &[],
        }
    }
}
