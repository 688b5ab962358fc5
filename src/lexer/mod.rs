mod keywords;
mod token;

pub use keywords::keyword_lookup;
pub use token::{Token, TokenKind};

/// Scans wide-character source text into a pull-stream of tokens. The
/// source's CJK identifiers and full-width punctuation are ordinary `char`s
/// in Rust (`char` is already a Unicode scalar value), so no transcoding
/// step is needed the way a C implementation would transcode to `wchar_t`.
pub struct Lexer<'a> {
    source: &'a str,
    start: usize,
    current: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
        }
    }

    pub fn scan_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        self.start = self.current;

        let Some(c) = self.advance() else {
            return self.make_token(TokenKind::Eof);
        };

        if is_identifier_start(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            '"' => self.string(),
            '（' => self.make_token(TokenKind::LeftParen),
            '）' => self.make_token(TokenKind::RightParen),
            '「' | '『' => self.make_token(TokenKind::LeftBrace),
            '」' | '』' => self.make_token(TokenKind::RightBrace),
            '【' => self.make_token(TokenKind::LeftBracket),
            '】' => self.make_token(TokenKind::RightBracket),
            '；' => self.make_token(TokenKind::Semicolon),
            '，' => self.make_token(TokenKind::Comma),
            '。' => self.make_token(TokenKind::Dot),
            '：' => self.make_token(TokenKind::Colon),
            '=' => self.make_token(TokenKind::Equal),
            '+' => {
                if self.matches('=') {
                    self.make_token(TokenKind::PlusEqual)
                } else if self.matches('+') {
                    self.make_token(TokenKind::PlusPlus)
                } else {
                    self.make_token(TokenKind::Plus)
                }
            }
            '-' => {
                if self.matches('=') {
                    self.make_token(TokenKind::MinusEqual)
                } else if self.matches('-') {
                    self.make_token(TokenKind::MinusMinus)
                } else {
                    self.make_token(TokenKind::Minus)
                }
            }
            '*' => self.make_token(TokenKind::Star),
            '/' => self.make_token(TokenKind::Slash),
            '%' => self.make_token(TokenKind::Percent),
            '等' => self.make_token(TokenKind::EqualEqual),
            '不' => {
                if self.matches('等') {
                    self.make_token(TokenKind::BangEqual)
                } else {
                    self.make_token(TokenKind::Bang)
                }
            }
            '大' => {
                if self.matches('等') {
                    self.make_token(TokenKind::GreaterEqual)
                } else {
                    self.make_token(TokenKind::Greater)
                }
            }
            '小' => {
                if self.matches('等') {
                    self.make_token(TokenKind::LessEqual)
                } else {
                    self.make_token(TokenKind::Less)
                }
            }
            other => self.error_token(format!("意外的字符 '{other}'")),
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.source[self.current..].chars().next()?;
        self.current += c.len_utf8();
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next()?;
        chars.next()
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() != Some(expected) {
            return false;
        }
        self.current += expected.len_utf8();
        true
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.line += 1;
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn lexeme(&self) -> &'a str {
        &self.source[self.start..self.current]
    }

    fn make_token(&self, kind: TokenKind) -> Token<'a> {
        Token {
            kind,
            lexeme: self.lexeme(),
            line: self.line,
        }
    }

    fn error_token(&self, message: String) -> Token<'a> {
        Token {
            kind: TokenKind::Error(message),
            lexeme: self.lexeme(),
            line: self.line,
        }
    }

    fn identifier(&mut self) -> Token<'a> {
        while let Some(c) = self.peek() {
            if is_identifier_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        let lexeme = self.lexeme();
        match keyword_lookup(lexeme) {
            Some(kind) => self.make_token(kind),
            None => self.make_token(TokenKind::Identifier),
        }
    }

    fn number(&mut self) -> Token<'a> {
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.advance();
        }
        if self.peek() == Some('.')
            && self.peek_next().map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            self.advance();
            while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.advance();
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn string(&mut self) -> Token<'a> {
        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            if c == '\n' {
                self.line += 1;
            }
            self.advance();
        }
        if self.peek().is_none() {
            return self.error_token("未结束的字符串".to_string());
        }
        self.advance();
        self.make_token(TokenKind::String)
    }
}

/// CJK ideographs plus any ASCII letter; digits may continue an identifier
/// but never start one. The four comparison-operator glyphs (等 不 大 小)
/// are intercepted in `scan_token` before identifier scanning begins, so
/// they are reserved the same way keywords are.
fn is_identifier_start(c: char) -> bool {
    ('\u{4E00}'..='\u{2FA1F}').contains(&c) || (c.is_alphabetic() && c.is_ascii())
}

fn is_identifier_continue(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.scan_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_var_declaration() {
        let kinds = kinds("变量 a = 1 + 2；");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn recognizes_compound_comparisons() {
        let kinds = kinds("大等 小等 不等 等");
        assert_eq!(
            kinds,
            vec![
                TokenKind::GreaterEqual,
                TokenKind::LessEqual,
                TokenKind::BangEqual,
                TokenKind::EqualEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tracks_line_numbers_across_newlines() {
        let mut lexer = Lexer::new("变量\na");
        let first = lexer.scan_token();
        let second = lexer.scan_token();
        assert_eq!(first.line, 1);
        assert_eq!(second.line, 2);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut lexer = Lexer::new("\"never closes");
        let tok = lexer.scan_token();
        assert!(matches!(tok.kind, TokenKind::Error(_)));
    }

    #[test]
    fn line_comment_is_skipped() {
        let kinds = kinds("// 这是注释\n真");
        assert_eq!(kinds, vec![TokenKind::True, TokenKind::Eof]);
    }
}
