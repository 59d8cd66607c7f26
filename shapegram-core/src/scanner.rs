//! Lexical scanner driven by an ordered table of regular patterns.
//!
//! The scanner is grammar-agnostic: it is configured with a list of
//! `(terminal id, name, pattern)` entries and an optional *ignore* terminal.
//! At each byte offset the patterns are tried in declaration order and the
//! first one that matches wins — declaration order, not longest match, is
//! the tie-break. Matches of the ignore terminal (whitespace, comments) are
//! dropped from the output stream.
//!
//! Scanning fails with a [`LexError`] at the first offset where no pattern
//! matches; zero-length matches are treated as non-matches so the scanner
//! always makes progress.

use regex::Regex;

use crate::error::{LexBuildError, LexError};
use crate::token::{line_at, Span, TermId, Token};

// ---------------------------------------------------------------------------
// Pattern table
// ---------------------------------------------------------------------------

/// One entry of the scanner's pattern table.
#[derive(Debug, Clone, Copy)]
pub struct PatternDef {
    /// Terminal id produced on a match.
    pub term: TermId,
    /// Terminal name, for diagnostics.
    pub name: &'static str,
    /// Regular expression, matched at the current offset.
    pub pattern: &'static str,
}

struct CompiledPattern {
    term: TermId,
    regex: Regex,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// A table-driven scanner.
pub struct Scanner {
    patterns: Vec<CompiledPattern>,
    ignore: Option<TermId>,
}

impl Scanner {
    /// Compile a pattern table.
    ///
    /// Each pattern is anchored at the current scan offset; `ignore` names
    /// the terminal whose matches are discarded.
    pub fn new(defs: &[PatternDef], ignore: Option<TermId>) -> Result<Self, LexBuildError> {
        let mut patterns = Vec::with_capacity(defs.len());
        for def in defs {
            let anchored = format!(r"\A(?:{})", def.pattern);
            let regex = Regex::new(&anchored).map_err(|e| LexBuildError {
                name: def.name.to_owned(),
                message: e.to_string(),
            })?;
            patterns.push(CompiledPattern {
                term: def.term,
                regex,
            });
        }
        Ok(Self { patterns, ignore })
    }

    /// Scan `source` into a token stream.
    ///
    /// Fails at the first byte offset matching no pattern.
    pub fn scan(&self, source: &str) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut pos = 0;

        while pos < source.len() {
            match self.match_at(source, pos) {
                Some((term, len)) => {
                    if self.ignore != Some(term) {
                        let span = Span::new(pos, pos + len);
                        tokens.push(Token::new(term, &source[pos..pos + len], span));
                    }
                    pos += len;
                }
                None => {
                    return Err(LexError {
                        span: Span::new(pos, pos + 1),
                        line: line_at(source, pos),
                    });
                }
            }
        }

        Ok(tokens)
    }

    /// First pattern (in declaration order) with a non-empty match at `pos`.
    fn match_at(&self, source: &str, pos: usize) -> Option<(TermId, usize)> {
        let rest = &source[pos..];
        for p in &self.patterns {
            if let Some(m) = p.regex.find(rest) {
                if m.end() > 0 {
                    return Some((p.term, m.end()));
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WS: TermId = 0;
    const WORD: TermId = 1;
    const NUM: TermId = 2;
    const DASH: TermId = 3;

    fn scanner() -> Scanner {
        Scanner::new(
            &[
                PatternDef {
                    term: WS,
                    name: "Ws",
                    pattern: r"\s+",
                },
                PatternDef {
                    term: WORD,
                    name: "Word",
                    pattern: r"[a-z]+",
                },
                PatternDef {
                    term: NUM,
                    name: "Num",
                    pattern: r"-?[0-9]+",
                },
                PatternDef {
                    term: DASH,
                    name: "Dash",
                    pattern: r"-",
                },
            ],
            Some(WS),
        )
        .unwrap()
    }

    fn terms(input: &str) -> Vec<TermId> {
        scanner().scan(input).unwrap().iter().map(|t| t.term).collect()
    }

    // -- basics --

    #[test]
    fn empty_input() {
        assert!(terms("").is_empty());
    }

    #[test]
    fn ignore_dropped() {
        assert_eq!(terms("  ab  cd  "), vec![WORD, WORD]);
    }

    #[test]
    fn spans_and_text() {
        let tokens = scanner().scan("ab 12").unwrap();
        assert_eq!(tokens[0].text, "ab");
        assert_eq!(tokens[0].span, Span::new(0, 2));
        assert_eq!(tokens[1].text, "12");
        assert_eq!(tokens[1].span, Span::new(3, 5));
    }

    // -- ordering is the tie-break --

    #[test]
    fn declaration_order_wins() {
        // `-3` matches Num (declared before Dash) even though Dash also
        // matches at the same offset
        assert_eq!(terms("-3"), vec![NUM]);
        // `- 3` cannot match Num at the dash, so Dash wins
        assert_eq!(terms("- 3"), vec![DASH, NUM]);
    }

    // -- failure --

    #[test]
    fn unmatched_byte_is_fatal() {
        let err = scanner().scan("ab ? cd").unwrap_err();
        assert_eq!(err.span.start, 3);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn error_line_number() {
        let err = scanner().scan("ab\ncd\n?").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn bad_pattern_rejected() {
        let result = Scanner::new(
            &[PatternDef {
                term: 0,
                name: "Broken",
                pattern: r"(",
            }],
            None,
        );
        assert!(result.is_err());
    }
}
