use std::ops::Range;

use crate::options::Delimiters;

#[derive(Debug, Clone, PartialEq)]
pub enum TagKind<'src> {
    /// `{{#name arg ...}}`
    Open {
        name: &'src str,
        args: Vec<&'src str>,
    },
    /// `{{/name}}`
    Close { name: &'src str },
    /// `{{else}}`
    Else,
    /// Anything else: a field path or a helper call.
    Expr { words: Vec<&'src str> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag<'src> {
    pub kind: TagKind<'src>,
    /// Byte range of the tag, delimiters included.
    pub span: Range<usize>,
}

/// Splits template text into delimited tags. Text between tags is never
/// materialized; callers slice it out of the input using the spans.
#[derive(Clone)]
pub struct Tokenizer<'a, 'd> {
    input: &'a str,
    cursor: usize,
    open: &'d str,
    close: &'d str,
    unterminated: Option<usize>,
    abandoned: Vec<usize>,
}

impl<'a, 'd> Tokenizer<'a, 'd> {
    pub fn new(input: &'a str, delimiters: &'d Delimiters) -> Self {
        Self {
            input,
            cursor: 0,
            open: &delimiters.open,
            close: &delimiters.close,
            unterminated: None,
            abandoned: Vec::new(),
        }
    }

    /// Offset of an opening delimiter that was never closed, if scanning
    /// stopped on one.
    pub fn unterminated(&self) -> Option<usize> {
        self.unterminated
    }

    /// Offsets of opening delimiters left as text because another opening
    /// delimiter came before their close.
    pub fn abandoned(&self) -> &[usize] {
        &self.abandoned
    }

    pub fn next_tag(&mut self) -> Option<Tag<'a>> {
        if self.open.is_empty() || self.close.is_empty() {
            return None;
        }

        loop {
            let rest = &self.input[self.cursor..];
            let start = self.cursor + rest.find(self.open)?;
            let inner_start = start + self.open.len();

            let Some(len) = self.input[inner_start..].find(self.close) else {
                // Unclosed tag: the rest is literal text.
                self.unterminated = Some(start);
                self.cursor = self.input.len();
                return None;
            };
            let inner_end = inner_start + len;
            if let Some(nested) = self.input[inner_start..inner_end].find(self.open) {
                // `{{a {{b}}`: the outer delimiter is text, rescan from the inner one.
                self.abandoned.push(start);
                self.cursor = inner_start + nested;
                continue;
            }
            let end = inner_end + self.close.len();
            self.cursor = end;

            let inner = self.input[inner_start..inner_end].trim();
            if inner.is_empty() {
                continue;
            }

            return Some(Tag {
                kind: classify(inner),
                span: start..end,
            });
        }
    }
}

impl<'a> Iterator for Tokenizer<'a, '_> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        self.next_tag()
    }
}

fn classify(inner: &str) -> TagKind<'_> {
    if let Some(rest) = inner.strip_prefix('#') {
        let mut words = split_arguments(rest);
        let name = if words.is_empty() { "" } else { words.remove(0) };
        TagKind::Open { name, args: words }
    } else if let Some(rest) = inner.strip_prefix('/') {
        TagKind::Close { name: rest.trim() }
    } else if inner == "else" {
        TagKind::Else
    } else {
        TagKind::Expr {
            words: split_arguments(inner),
        }
    }
}

/// Split on whitespace, keeping single- or double-quoted literals whole
/// (quotes included). An unterminated quote runs to the end of the input.
pub fn split_arguments(input: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut end = input.len();
        if c == '"' || c == '\'' {
            chars.next();
            for (i, ch) in chars.by_ref() {
                if ch == c {
                    end = i + ch.len_utf8();
                    break;
                }
            }
        } else {
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_whitespace() {
                    end = i;
                    break;
                }
                chars.next();
            }
        }
        args.push(&input[start..end]);
    }

    args
}
