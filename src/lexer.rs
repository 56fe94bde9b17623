use crate::error::{OpalError, OpalResult, Stage};
use crate::token::{Token, TokenKind};

/// Character-driven scanner. Positions are 1-based and point at the first
/// character of each lexeme; `next_token` returns `Eos` at end of input and
/// keeps returning it thereafter.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> OpalResult<Token> {
        self.skip_whitespace_and_comments();

        let line = self.line;
        let column = self.column;
        let Some(ch) = self.peek_char() else {
            return Ok(Token::new(TokenKind::Eos, "", line, column));
        };

        match ch {
            '(' => Ok(self.single_char_token(TokenKind::LParen)),
            ')' => Ok(self.single_char_token(TokenKind::RParen)),
            ':' => Ok(self.single_char_token(TokenKind::Colon)),
            '.' => Ok(self.single_char_token(TokenKind::Dot)),
            ',' => Ok(self.single_char_token(TokenKind::Comma)),
            '+' => Ok(self.single_char_token(TokenKind::Plus)),
            '-' => Ok(self.single_char_token(TokenKind::Minus)),
            '*' => Ok(self.single_char_token(TokenKind::Multiply)),
            '/' => Ok(self.single_char_token(TokenKind::Divide)),
            '%' => Ok(self.single_char_token(TokenKind::Modulo)),
            '=' => {
                self.consume_char();
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    Ok(Token::new(TokenKind::Equal, "==", line, column))
                } else {
                    Ok(Token::new(TokenKind::Assign, "=", line, column))
                }
            }
            '!' => {
                self.consume_char();
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    Ok(Token::new(TokenKind::NotEqual, "!=", line, column))
                } else {
                    Err(self.error("expected '=' after '!'", line, column))
                }
            }
            '<' => {
                self.consume_char();
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    Ok(Token::new(TokenKind::LessEqual, "<=", line, column))
                } else {
                    Ok(Token::new(TokenKind::Less, "<", line, column))
                }
            }
            '>' => {
                self.consume_char();
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    Ok(Token::new(TokenKind::GreaterEqual, ">=", line, column))
                } else {
                    Ok(Token::new(TokenKind::Greater, ">", line, column))
                }
            }
            '\'' => self.read_char_literal(line, column),
            '"' => self.read_string_literal(line, column),
            c if c.is_ascii_digit() => self.read_number(line, column),
            c if c.is_alphabetic() => Ok(self.read_word(line, column)),
            c => Err(self.error(format!("unexpected character '{c}'"), line, column)),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.consume_char();
                }
                // line comment, consumed through end-of-line
                Some('#') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.consume_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn single_char_token(&mut self, kind: TokenKind) -> Token {
        let line = self.line;
        let column = self.column;
        let ch = self
            .consume_char()
            .expect("single_char_token called at end of input");
        Token::new(kind, ch.to_string(), line, column)
    }

    fn read_char_literal(&mut self, line: u32, column: u32) -> OpalResult<Token> {
        self.consume_char(); // opening quote
        let value = match self.peek_char() {
            Some('\'') => return Err(self.error("empty character literal", line, column)),
            Some(c) if c.is_alphanumeric() => c,
            Some(c) => {
                return Err(self.error(
                    format!("invalid character literal '{c}'"),
                    line,
                    column,
                ));
            }
            None => return Err(self.error("unterminated character literal", line, column)),
        };
        self.consume_char();
        if self.peek_char() != Some('\'') {
            return Err(self.error("unterminated character literal", line, column));
        }
        self.consume_char(); // closing quote
        Ok(Token::new(TokenKind::CharVal, value.to_string(), line, column))
    }

    fn read_string_literal(&mut self, line: u32, column: u32) -> OpalResult<Token> {
        self.consume_char(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek_char() {
                Some('"') => {
                    self.consume_char();
                    return Ok(Token::new(TokenKind::StringVal, value, line, column));
                }
                // strings must terminate on the same line
                Some('\n') | None => {
                    return Err(self.error("unterminated string literal", line, column));
                }
                Some(c) => {
                    value.push(c);
                    self.consume_char();
                }
            }
        }
    }

    fn read_number(&mut self, line: u32, column: u32) -> OpalResult<Token> {
        let start = self.pos;
        let mut is_double = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.consume_char();
            } else if c == '.' {
                if is_double {
                    return Err(self.error("too many decimal points in number", line, column));
                }
                is_double = true;
                self.consume_char();
            } else {
                break;
            }
        }
        let lexeme = &self.input[start..self.pos];
        let kind = if is_double {
            TokenKind::DoubleVal
        } else {
            TokenKind::IntVal
        };
        Ok(Token::new(kind, lexeme, line, column))
    }

    fn read_word(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.consume_char();
            } else {
                break;
            }
        }
        let lexeme = &self.input[start..self.pos];
        let kind = TokenKind::keyword(lexeme).unwrap_or(TokenKind::Id);
        Token::new(kind, lexeme, line, column)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>, line: u32, column: u32) -> OpalError {
        OpalError::at(Stage::Lexer, message, line, column)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = OpalResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) => Some(Ok(token)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Lex the full input, including the trailing `Eos` token.
pub fn tokenize(input: &str) -> OpalResult<Vec<Token>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eos = matches!(token.kind, TokenKind::Eos);
        tokens.push(token);
        if is_eos {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn test_simple_program() {
        let input = indoc! {"
            fun int main()
              var x = 1 + 2
              return x
            end
        "};
        let expected = vec![
            TokenKind::Fun,
            TokenKind::IntType,
            TokenKind::Id,
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::Var,
            TokenKind::Id,
            TokenKind::Assign,
            TokenKind::IntVal,
            TokenKind::Plus,
            TokenKind::IntVal,
            TokenKind::Return,
            TokenKind::Id,
            TokenKind::End,
            TokenKind::Eos,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn reports_one_based_lines_and_columns() {
        let tokens = tokenize("var x = 12\n  y.z = 3.5\n").expect("tokenize should succeed");
        let positions = tokens
            .iter()
            .map(|t| (t.kind, t.line, t.column))
            .collect::<Vec<_>>();
        assert_eq!(
            positions,
            vec![
                (TokenKind::Var, 1, 1),
                (TokenKind::Id, 1, 5),
                (TokenKind::Assign, 1, 7),
                (TokenKind::IntVal, 1, 9),
                (TokenKind::Id, 2, 3),
                (TokenKind::Dot, 2, 4),
                (TokenKind::Id, 2, 5),
                (TokenKind::Assign, 2, 7),
                (TokenKind::DoubleVal, 2, 9),
                (TokenKind::Eos, 3, 1),
            ]
        );
    }

    #[test]
    fn prefers_longest_operator_match() {
        assert_eq!(
            kinds("== = <= < >= > !="),
            vec![
                TokenKind::Equal,
                TokenKind::Assign,
                TokenKind::LessEqual,
                TokenKind::Less,
                TokenKind::GreaterEqual,
                TokenKind::Greater,
                TokenKind::NotEqual,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn errors_on_bare_bang() {
        let err = tokenize("x ! y").expect_err("expected lexing failure");
        assert_eq!(err.stage, Stage::Lexer);
        assert_eq!((err.line, err.column), (Some(1), Some(3)));
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = tokenize("var s = \"abc\nvar t = 1").expect_err("expected lexing failure");
        assert!(err.to_string().contains("unterminated string"));
        assert_eq!((err.line, err.column), (Some(1), Some(9)));
    }

    #[test]
    fn accepts_empty_string_literal() {
        let tokens = tokenize("\"\"").expect("tokenize should succeed");
        assert_eq!(tokens[0].kind, TokenKind::StringVal);
        assert_eq!(tokens[0].lexeme, "");
    }

    #[test]
    fn errors_on_second_decimal_point() {
        let err = tokenize("var d = 1.2.3").expect_err("expected lexing failure");
        assert!(err.to_string().contains("decimal"));
    }

    #[test]
    fn lexes_trailing_dot_double() {
        let tokens = tokenize("123.").expect("tokenize should succeed");
        assert_eq!(tokens[0].kind, TokenKind::DoubleVal);
        assert_eq!(tokens[0].lexeme, "123.");
    }

    #[test]
    fn reads_char_literals() {
        let tokens = tokenize("'a' '7'").expect("tokenize should succeed");
        assert_eq!(tokens[0].kind, TokenKind::CharVal);
        assert_eq!(tokens[0].lexeme, "a");
        assert_eq!(tokens[1].lexeme, "7");
    }

    #[test]
    fn errors_on_bad_char_literals() {
        assert!(tokenize("''").is_err());
        assert!(tokenize("'ab'").is_err());
        assert!(tokenize("'a").is_err());
        assert!(tokenize("'+'").is_err());
    }

    #[test]
    fn skips_comments_to_end_of_line() {
        let input = indoc! {"
            # leading comment
            var x = 1 # trailing comment
            var y = 2
        "};
        assert_eq!(
            kinds(input),
            vec![
                TokenKind::Var,
                TokenKind::Id,
                TokenKind::Assign,
                TokenKind::IntVal,
                TokenKind::Var,
                TokenKind::Id,
                TokenKind::Assign,
                TokenKind::IntVal,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn keywords_use_maximal_munch() {
        let tokens = tokenize("for formula do double end ends").expect("tokenize should succeed");
        let expected = vec![
            (TokenKind::For, "for"),
            (TokenKind::Id, "formula"),
            (TokenKind::Do, "do"),
            (TokenKind::DoubleType, "double"),
            (TokenKind::End, "end"),
            (TokenKind::Id, "ends"),
            (TokenKind::Eos, ""),
        ];
        let actual = tokens
            .iter()
            .map(|t| (t.kind, t.lexeme.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[test]
    fn boolean_and_nil_literals() {
        assert_eq!(
            kinds("true false nil"),
            vec![
                TokenKind::BoolVal,
                TokenKind::BoolVal,
                TokenKind::Nil,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn relexing_joined_lexemes_preserves_kinds() {
        let input = "fun int main() var x = 1 + 2.5 return x end";
        let tokens = tokenize(input).expect("tokenize should succeed");
        let joined = tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eos)
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let relexed = tokenize(&joined).expect("relex should succeed");
        let first = tokens.iter().map(|t| t.kind).collect::<Vec<_>>();
        let second = relexed.iter().map(|t| t.kind).collect::<Vec<_>>();
        assert_eq!(first, second);
    }
}
