use std::collections::HashMap;

use crate::ast::*;
use crate::error::TemplateError;
use crate::helpers::HelperScope;
use crate::lexer::{Tag, TagKind, Tokenizer};
use crate::options::Delimiters;

const BLOCK_NAMES: [&str; 3] = ["if", "unless", "each"];

/// Result of tokenizing one span of template text.
#[derive(Debug, Default)]
pub struct Parsed<'src> {
    /// Top-level tokens, sorted by span and non-overlapping.
    pub tokens: Vec<Token<'src>>,
    /// Pairing problems. The offending tags stay in the text as literals.
    pub errors: Vec<TemplateError>,
    /// Absolute offset of an opening delimiter that was never closed.
    pub unterminated: Option<usize>,
    /// Absolute offsets of opening delimiters reopened before being closed.
    pub abandoned: Vec<usize>,
}

/// Where a block's `else` and closing tag were found.
struct Closing {
    else_at: Option<usize>,
    close: usize,
}

/// Tokenize `text` into top-level tokens. Block bodies are recorded as raw
/// text and left for the caller to parse when they are rendered.
///
/// `base` is the absolute offset of `text` in the top-level template and is
/// only used for error positions and body offsets.
pub fn parse<'src>(
    text: &'src str,
    base: usize,
    delimiters: &Delimiters,
    helpers: &HelperScope<'_>,
) -> Parsed<'src> {
    let mut tokenizer = Tokenizer::new(text, delimiters);
    let tags: Vec<Tag<'src>> = tokenizer.by_ref().collect();
    let mut parsed = Parsed {
        unterminated: tokenizer.unterminated().map(|offset| base + offset),
        abandoned: tokenizer.abandoned().iter().map(|offset| base + offset).collect(),
        ..Parsed::default()
    };

    let mut i = 0;
    while i < tags.len() {
        let tag = &tags[i];
        let offset = base + tag.span.start;
        i += 1;

        let (name, args) = match &tag.kind {
            TagKind::Expr { words } => {
                parsed.tokens.push(Token {
                    kind: expression(words, helpers),
                    raw: &text[tag.span.clone()],
                    span: tag.span.clone(),
                });
                continue;
            }
            TagKind::Else => {
                parsed.errors.push(TemplateError::StrayElse { offset });
                continue;
            }
            TagKind::Close { name } => {
                parsed.errors.push(TemplateError::UnexpectedClose {
                    name: name.to_string(),
                    offset,
                });
                continue;
            }
            TagKind::Open { name, args } => (*name, args),
        };

        if !BLOCK_NAMES.contains(&name) {
            parsed.errors.push(TemplateError::UnknownBlock {
                name: name.to_string(),
                offset,
            });
            continue;
        }

        let Some(closing) = find_close(&tags, i - 1, name) else {
            parsed.errors.push(TemplateError::UnclosedBlock {
                name: name.to_string(),
                offset,
            });
            continue;
        };
        let close = &tags[closing.close];
        i = closing.close + 1;

        let Some((&path, rest)) = args.split_first() else {
            parsed.errors.push(TemplateError::MissingBlockTarget {
                name: name.to_string(),
                offset,
            });
            continue;
        };

        let body = |range: std::ops::Range<usize>| Body {
            text: &text[range.clone()],
            offset: base + range.start,
        };
        let (then_body, else_body) = match closing.else_at.map(|e| &tags[e]) {
            Some(else_tag) => (
                body(tag.span.end..else_tag.span.start),
                Some(body(else_tag.span.end..close.span.start)),
            ),
            None => (body(tag.span.end..close.span.start), None),
        };

        let kind = match name {
            "if" => TokenKind::Conditional {
                path,
                args: rest.to_vec(),
                then_body,
                else_body,
            },
            "unless" => TokenKind::Unless {
                path,
                args: rest.to_vec(),
                then_body,
                else_body,
            },
            _ => TokenKind::Loop {
                path,
                body: then_body,
            },
        };
        let span = tag.span.start..close.span.end;
        parsed.tokens.push(Token {
            kind,
            raw: &text[span.clone()],
            span,
        });
    }

    tracing::trace!(
        tokens = parsed.tokens.len(),
        errors = parsed.errors.len(),
        base,
        "parsed span"
    );
    parsed
}

fn expression<'src>(words: &[&'src str], helpers: &HelperScope<'_>) -> TokenKind<'src> {
    match words {
        &[path] if !path.contains('.') && helpers.contains(path) => TokenKind::Helper {
            name: path,
            args: Vec::new(),
        },
        &[name, ref args @ ..] if !args.is_empty() => TokenKind::Helper {
            name,
            args: args.to_vec(),
        },
        _ => TokenKind::Field {
            path: words.first().copied().unwrap_or_default(),
        },
    }
}

/// Find the close tag pairing with the block opened at `open`. Nested blocks
/// of the same name are counted so the Nth close matches the Nth unmatched
/// open from the innermost. An `else` only belongs to this block when no
/// other block is open around it.
fn find_close(tags: &[Tag<'_>], open: usize, name: &str) -> Option<Closing> {
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut nested = 0usize;
    let mut else_at = None;

    for (j, tag) in tags.iter().enumerate().skip(open + 1) {
        match &tag.kind {
            TagKind::Open { name: inner, .. } if BLOCK_NAMES.contains(inner) => {
                *depth.entry(*inner).or_default() += 1;
                nested += 1;
            }
            TagKind::Close { name: inner } => match depth.get_mut(inner) {
                Some(d) if *d > 0 => {
                    *d -= 1;
                    nested -= 1;
                }
                // Stray closes of other names inside the body get reported
                // when the body itself is parsed.
                _ if *inner == name => return Some(Closing { else_at, close: j }),
                _ => {}
            },
            TagKind::Else if nested == 0 && else_at.is_none() && name != "each" => {
                else_at = Some(j);
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::HelperRegistry;

    fn parse_default(text: &str) -> Parsed<'_> {
        let registry = HelperRegistry::new();
        let overrides = HashMap::new();
        parse(text, 0, &Delimiters::default(), &registry.scoped(&overrides))
    }

    #[test]
    fn plain_text_has_no_tokens() {
        let parsed = parse_default("Hello, world!");
        assert!(parsed.tokens.is_empty());
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn field_and_helper_classification() {
        let parsed = parse_default("{{user.name}} {{upper name}} {{upper}} {{nobody x}} {{title}}");
        let kinds: Vec<_> = parsed.tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Field { path: "user.name" },
                TokenKind::Helper { name: "upper", args: vec!["name"] },
                TokenKind::Helper { name: "upper", args: vec![] },
                TokenKind::Helper { name: "nobody", args: vec!["x"] },
                TokenKind::Field { path: "title" },
            ]
        );
    }

    #[test]
    fn tokens_are_sorted_and_carry_raw_text() {
        let text = "a{{x}}b{{#if y}}c{{/if}}d";
        let parsed = parse_default(text);
        assert_eq!(parsed.tokens.len(), 2);
        assert_eq!(parsed.tokens[0].raw, "{{x}}");
        assert_eq!(parsed.tokens[0].span, 1..6);
        assert_eq!(parsed.tokens[1].raw, "{{#if y}}c{{/if}}");
        assert_eq!(&text[parsed.tokens[1].span.clone()], parsed.tokens[1].raw);
    }

    #[test]
    fn else_splits_conditional_bodies() {
        let parsed = parse_default("{{#if a}}yes{{else}}no{{/if}}");
        match &parsed.tokens[0].kind {
            TokenKind::Conditional { path, then_body, else_body, .. } => {
                assert_eq!(*path, "a");
                assert_eq!(then_body.text, "yes");
                assert_eq!(then_body.offset, 9);
                assert_eq!(else_body.map(|b| b.text), Some("no"));
            }
            other => panic!("unexpected token {other:?}"),
        }
    }

    #[test]
    fn same_name_nesting_pairs_innermost_first() {
        let parsed = parse_default("{{#if a}}A{{#if b}}B{{else}}b{{/if}}{{else}}x{{/if}}tail");
        assert_eq!(parsed.tokens.len(), 1);
        match &parsed.tokens[0].kind {
            TokenKind::Conditional { then_body, else_body, .. } => {
                assert_eq!(then_body.text, "A{{#if b}}B{{else}}b{{/if}}");
                assert_eq!(else_body.map(|b| b.text), Some("x"));
            }
            other => panic!("unexpected token {other:?}"),
        }
    }

    #[test]
    fn else_inside_other_nested_block_is_not_split() {
        let parsed = parse_default("{{#if a}}{{#unless b}}1{{else}}2{{/unless}}{{/if}}");
        match &parsed.tokens[0].kind {
            TokenKind::Conditional { then_body, else_body, .. } => {
                assert_eq!(then_body.text, "{{#unless b}}1{{else}}2{{/unless}}");
                assert!(else_body.is_none());
            }
            other => panic!("unexpected token {other:?}"),
        }
    }

    #[test]
    fn each_keeps_else_in_body() {
        let parsed = parse_default("{{#each xs}}a{{else}}b{{/each}}");
        match &parsed.tokens[0].kind {
            TokenKind::Loop { path, body } => {
                assert_eq!(*path, "xs");
                assert_eq!(body.text, "a{{else}}b");
            }
            other => panic!("unexpected token {other:?}"),
        }
    }

    #[test]
    fn conditional_keeps_helper_arguments() {
        let parsed = parse_default(r#"{{#if eq status "done"}}ok{{/if}}"#);
        assert_eq!(parsed.tokens[0].path(), "eq");
        assert_eq!(parsed.tokens[0].args(), &["status", "\"done\""]);
    }

    // Unmatched tags are reported and left as literal text; scanning resumes
    // right after them so sibling content still renders.
    #[test]
    fn unmatched_tags_are_reported_and_scanning_continues() {
        let parsed = parse_default("{{#if a}}x {{name}} {{/each}} {{else}}");
        assert_eq!(
            parsed.errors,
            vec![
                TemplateError::UnclosedBlock { name: "if".into(), offset: 0 },
                TemplateError::UnexpectedClose { name: "each".into(), offset: 20 },
                TemplateError::StrayElse { offset: 30 },
            ]
        );
        assert_eq!(parsed.tokens.len(), 1);
        assert_eq!(parsed.tokens[0].kind, TokenKind::Field { path: "name" });
    }

    #[test]
    fn unknown_and_targetless_blocks_are_errors() {
        let parsed = parse_default("{{#with a}}{{/with}}{{#if}}x{{/if}}");
        assert_eq!(
            parsed.errors,
            vec![
                TemplateError::UnknownBlock { name: "with".into(), offset: 0 },
                TemplateError::UnexpectedClose { name: "with".into(), offset: 11 },
                TemplateError::MissingBlockTarget { name: "if".into(), offset: 20 },
            ]
        );
        assert!(parsed.tokens.is_empty());
    }

    #[test]
    fn error_offsets_are_absolute() {
        let registry = HelperRegistry::new();
        let overrides = HashMap::new();
        let parsed = parse("{{else}}", 100, &Delimiters::default(), &registry.scoped(&overrides));
        assert_eq!(parsed.errors, vec![TemplateError::StrayElse { offset: 100 }]);
    }

    #[test]
    fn unterminated_delimiter_is_flagged() {
        let parsed = parse_default("ok {{name");
        assert!(parsed.tokens.is_empty());
        assert_eq!(parsed.unterminated, Some(3));
    }
}
