//! Component B: a byte-streaming tokenizer plus a tiny parser state machine that
//! extracts `import Module.Name` declarations from the *prefix* of a source file.
//!
//! Imports are required to appear before any other top-level declaration, so the
//! [`ImportParser`] only ever needs to see a short prefix of the file (a single
//! 2 KiB read is the expected common case) before it reaches a terminal
//! [`ParserState::NonImport`] state and the caller can stop feeding bytes.
//!
//! Mirrors the `Spanned<T>`-wrapped, AST-with-regex-fallback shape of
//! `SolData::parse`/`capture_imports` (`crates/compilers/src/resolver/parse.rs`),
//! adapted from an AST parse to a from-scratch byte tokenizer since this crate's
//! source language has no available parser crate in the corpus.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

pub const PREFIX_READ_SIZE: usize = 2048;

/// A value together with the byte range it was read from, for diagnostics and for
/// adjusting positions after a rewrite (see [`crate::inject`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub data: T,
    pub span: Range<usize>,
}

impl<T> Spanned<T> {
    pub fn new(data: T, span: Range<usize>) -> Self {
        Self { data, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenizerState {
    Initial,
    MaybeSingleLineCommentSecondDash,
    MaybeMultiLineCommentOpen,
    MultiLineComment,
    MultiLineCommentDashSeen,
    MultiLineCommentNestOpen,
    SingleLineComment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    NewChunk,
    Word(String),
}

/// Byte-at-a-time tokenizer: whitespace/newlines, `--` line comments, nested `{- -}`
/// block comments, and maximal runs of non-whitespace/non-comment bytes ("words").
struct Tokenizer {
    state: TokenizerState,
    comment_depth: u32,
    word: String,
    pos: usize,
    word_start: usize,
    at_line_start: bool,
    blank_line_pending: bool,
}

impl Tokenizer {
    fn new() -> Self {
        Self {
            state: TokenizerState::Initial,
            comment_depth: 0,
            word: String::new(),
            pos: 0,
            word_start: 0,
            at_line_start: true,
            blank_line_pending: false,
        }
    }

    fn flush_word(&mut self, out: &mut Vec<Token>) {
        if !self.word.is_empty() {
            out.push(Token::Word(std::mem::take(&mut self.word)));
        }
    }

    /// Feeds one byte, appending zero or more tokens to `out`.
    fn feed(&mut self, byte: u8, out: &mut Vec<Token>) {
        match self.state {
            TokenizerState::SingleLineComment => {
                if byte == b'\n' {
                    self.state = TokenizerState::Initial;
                    self.on_newline(out);
                }
                self.pos += 1;
                return;
            }
            TokenizerState::MultiLineComment => {
                if byte == b'-' {
                    self.state = TokenizerState::MultiLineCommentDashSeen;
                } else if byte == b'{' {
                    self.state = TokenizerState::MultiLineCommentNestOpen;
                }
                self.pos += 1;
                return;
            }
            TokenizerState::MultiLineCommentDashSeen => {
                if byte == b'}' {
                    self.comment_depth -= 1;
                    self.state = if self.comment_depth == 0 {
                        TokenizerState::Initial
                    } else {
                        TokenizerState::MultiLineComment
                    };
                } else if byte != b'-' {
                    self.state = TokenizerState::MultiLineComment;
                }
                self.pos += 1;
                return;
            }
            TokenizerState::MultiLineCommentNestOpen => {
                if byte == b'-' {
                    self.comment_depth += 1;
                    self.state = TokenizerState::MultiLineComment;
                } else {
                    self.state = TokenizerState::MultiLineComment;
                }
                self.pos += 1;
                return;
            }
            TokenizerState::MaybeSingleLineCommentSecondDash => {
                if byte == b'-' {
                    // Saw `--`: the word buffer held only the first dash, discard it.
                    self.word.clear();
                    self.state = TokenizerState::SingleLineComment;
                    self.pos += 1;
                    return;
                }
                self.state = TokenizerState::Initial;
            }
            TokenizerState::MaybeMultiLineCommentOpen => {
                if byte == b'-' {
                    self.word.clear();
                    self.comment_depth = 1;
                    self.state = TokenizerState::MultiLineComment;
                    self.pos += 1;
                    return;
                }
                self.state = TokenizerState::Initial;
            }
            TokenizerState::Initial => {}
        };

        match byte {
            b'\n' => {
                self.flush_word(out);
                self.on_newline(out);
            }
            b' ' | b'\t' | b'\r' => {
                self.flush_word(out);
            }
            b'-' if self.word.is_empty() => {
                self.word.push('-');
                self.state = TokenizerState::MaybeSingleLineCommentSecondDash;
            }
            b'{' if self.word.is_empty() => {
                self.word.push('{');
                self.state = TokenizerState::MaybeMultiLineCommentOpen;
            }
            other => {
                if self.word.is_empty() {
                    if self.at_line_start && self.blank_line_pending {
                        out.push(Token::NewChunk);
                    }
                    self.blank_line_pending = false;
                    self.at_line_start = false;
                    self.word_start = self.pos;
                }
                self.word.push(other as char);
            }
        }
        self.pos += 1;
    }

    fn on_newline(&mut self, _out: &mut [Token]) {
        if self.at_line_start {
            self.blank_line_pending = true;
        }
        self.at_line_start = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    StartOfFile,
    Import,
    NewChunk,
    Ignore,
    NonImport,
}

impl ParserState {
    pub fn is_non_import(self) -> bool {
        matches!(self, Self::NonImport)
    }
}

static MODULE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{Lu}][\p{L}\p{N}_]*(?:\.[\p{Lu}][\p{L}\p{N}_]*)*$").unwrap());

fn is_module_name(word: &str) -> bool {
    MODULE_NAME.is_match(word)
}

/// Drives the [`Tokenizer`] plus the `Import`/`Ignore`/`NonImport` state machine
/// over a byte prefix, collecting the module names named by `import` declarations.
pub struct ImportParser {
    tokenizer: Tokenizer,
    state: ParserState,
    imports: Vec<Spanned<String>>,
    buffered: Vec<Token>,
}

impl Default for ImportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportParser {
    pub fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            state: ParserState::StartOfFile,
            imports: Vec::new(),
            buffered: Vec::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feeds one byte of source. Returns `true` while the caller should keep
    /// reading (i.e. [`ParserState::NonImport`] has not yet been reached).
    pub fn feed_byte(&mut self, byte: u8) -> bool {
        if self.state.is_non_import() {
            return false;
        }
        let start = self.tokenizer.pos;
        self.tokenizer.feed(byte, &mut self.buffered);
        let word_start = start;
        let tokens = std::mem::take(&mut self.buffered);
        for token in tokens {
            self.handle_token(token, word_start);
        }
        !self.state.is_non_import()
    }

    fn handle_token(&mut self, token: Token, approx_pos: usize) {
        use ParserState::*;
        use Token::*;
        self.state = match (self.state, &token) {
            (StartOfFile, Word(w)) if w == "import" => Import,
            (StartOfFile, Word(_)) => Ignore,
            (StartOfFile, NewChunk) => StartOfFile,

            (Ignore, NewChunk) => NewChunk,
            (Ignore, Word(_)) => Ignore,

            (NewChunk, Word(w)) if w == "import" => Import,
            (NewChunk, Word(_)) => NonImport,
            (NewChunk, NewChunk) => NewChunk,

            (Import, NewChunk) => NewChunk,
            (Import, Word(w)) => {
                if is_module_name(w) {
                    let span = approx_pos.saturating_sub(w.len())..approx_pos;
                    self.imports.push(Spanned::new(w.clone(), span));
                }
                Ignore
            }

            (NonImport, _) => NonImport,
        };
    }

    /// Feeds a whole buffer at once, stopping early once [`ParserState::NonImport`]
    /// is reached.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if !self.feed_byte(byte) {
                break;
            }
        }
    }

    pub fn into_imports(self) -> Vec<Spanned<String>> {
        self.imports
    }

    pub fn imports(&self) -> &[Spanned<String>] {
        &self.imports
    }
}

/// Parses the module names imported by `content`, stopping at the first
/// non-import top-level declaration. Convenience wrapper over [`ImportParser`]
/// for callers that already hold the whole prefix in memory.
pub fn parse_imports(content: &str) -> Vec<String> {
    let mut parser = ImportParser::new();
    parser.feed(content.as_bytes());
    parser.into_imports().into_iter().map(|s| s.data).collect()
}

/// Reference extractor used by the property test in §8 ("parser's module-name
/// output equals the set produced by a reference regex-based extractor"):
/// a plain regex scan over lines starting with `import`.
pub fn capture_imports_reference(content: &str) -> Vec<String> {
    static IMPORT_LINE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?m)^import\s+([A-Z][A-Za-z0-9_]*(?:\.[A-Z][A-Za-z0-9_]*)*)").unwrap()
    });
    IMPORT_LINE.captures_iter(content).map(|cap| cap[1].to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_imports() {
        let content = "import Html\nimport Html.Attributes\n\nmain = 1\n";
        assert_eq!(parse_imports(content), vec!["Html", "Html.Attributes"]);
    }

    #[test]
    fn stops_at_first_non_import() {
        let content = "import Html\n\nmain = 1\nimport ShouldNotBeSeen\n";
        let mut parser = ImportParser::new();
        parser.feed(content.as_bytes());
        assert_eq!(parser.state(), ParserState::NonImport);
        assert_eq!(parser.into_imports().into_iter().map(|s| s.data).collect::<Vec<_>>(), vec!["Html"]);
    }

    #[test]
    fn ignores_single_line_comments() {
        let content = "-- import Ignored\nimport Html\n";
        assert_eq!(parse_imports(content), vec!["Html"]);
    }

    #[test]
    fn ignores_nested_block_comments() {
        let content = "{- outer {- inner -} still-in-outer -}\nimport Html\n";
        assert_eq!(parse_imports(content), vec!["Html"]);
    }

    #[test]
    fn matches_reference_extractor() {
        let content = "import Html\nimport Html.Attributes as A\nimport Json.Decode\n\nmain = 1\n";
        let parsed = parse_imports(content);
        let reference = capture_imports_reference(content);
        assert_eq!(parsed, reference);
    }

    #[test]
    fn no_module_name_after_import_is_dropped() {
        let content = "import 42\n";
        assert_eq!(parse_imports(content), Vec::<String>::new());
    }
}
