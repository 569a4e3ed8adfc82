//! Tokenizer for the restricted source surface (SPEC_FULL §4.0). `logos` drives recognition of
//! intra-line tokens; indentation (the source language's off-side-rule block syntax) is tracked
//! by a manual pre-pass over logical lines, since indentation sensitivity is not a regular-
//! language property `logos` alone can express.

use logos::Logos;

use crate::error::{Error, Result, Span};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+")]
#[logos(skip r"#[^\n]*")]
pub enum RawToken {
    #[token("def")]
    Def,
    #[token("class")]
    Class,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("return")]
    Return,
    #[token("pass")]
    Pass,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    None,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| strip_quotes(lex.slice()))]
    Str(String),

    #[regex(r#"f"([^"\\]|\\.)*""#, |lex| strip_quotes(&lex.slice()[1..]))]
    FStr(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("@")]
    At,
    #[token("=")]
    Assign,

    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("//")]
    FloorDiv,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("&")]
    Amp,
}

fn strip_quotes(s: &str) -> String {
    s.trim_start_matches('"').trim_end_matches('"').to_owned()
}

/// A token plus its logical line/column, and synthetic `Indent`/`Dedent`/`Newline` markers the
/// raw per-line `logos` scan cannot itself produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Raw(RawToken),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenizes an entire source unit up front into a flat vector, resolving indentation.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>> {
    let mut out = Vec::new();
    let mut indent_stack: Vec<usize> = vec![0];

    for (line_no, raw_line) in source.lines().enumerate() {
        let line_no = (line_no + 1) as u32;
        let trimmed = raw_line.trim_end();
        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }

        let indent_width = trimmed.len() - trimmed.trim_start_matches(' ').len();
        let content = &trimmed[indent_width..];

        if indent_width > *indent_stack.last().unwrap() {
            indent_stack.push(indent_width);
            out.push(SpannedToken {
                token: Token::Indent,
                span: Span {
                    line: line_no,
                    column: 1,
                },
            });
        }
        while indent_width < *indent_stack.last().unwrap() {
            indent_stack.pop();
            out.push(SpannedToken {
                token: Token::Dedent,
                span: Span {
                    line: line_no,
                    column: 1,
                },
            });
        }
        if indent_width != *indent_stack.last().unwrap() {
            return Err(Error::syntax(
                Span {
                    line: line_no,
                    column: 1,
                },
                "inconsistent indentation",
            ));
        }

        let mut lexer = RawToken::lexer(content);
        while let Some(result) = lexer.next() {
            let column = indent_width as u32 + lexer.span().start as u32 + 1;
            let raw = result.map_err(|_| {
                Error::syntax(
                    Span {
                        line: line_no,
                        column,
                    },
                    format!("unrecognized token near `{}`", lexer.slice()),
                )
            })?;
            out.push(SpannedToken {
                token: Token::Raw(raw),
                span: Span {
                    line: line_no,
                    column,
                },
            });
        }

        out.push(SpannedToken {
            token: Token::Newline,
            span: Span {
                line: line_no,
                column: (trimmed.len() + 1) as u32,
            },
        });
    }

    while indent_stack.len() > 1 {
        indent_stack.pop();
        out.push(SpannedToken {
            token: Token::Dedent,
            span: Span {
                line: (source.lines().count() + 1) as u32,
                column: 1,
            },
        });
    }
    out.push(SpannedToken {
        token: Token::Eof,
        span: Span {
            line: (source.lines().count() + 1) as u32,
            column: 1,
        },
    });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_def() {
        let toks = tokenize("def f():\n    return 0\n").unwrap();
        assert!(matches!(
            toks[0].token,
            Token::Raw(RawToken::Def)
        ));
        assert!(toks.iter().any(|t| t.token == Token::Indent));
        assert!(toks.iter().any(|t| t.token == Token::Dedent));
    }

    #[test]
    fn rejects_inconsistent_indentation() {
        let err = tokenize("def f():\n   return 0\n  return 1\n");
        assert!(err.is_err());
    }
}
