//! Tokenizer for strategy expressions.

use crate::strategy::StrategyError;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Token kinds in strategy expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier (`price` or an indicator function name)
    Ident(String),
    /// Numeric literal
    Number(Decimal),
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Gt,
    Lt,
    Ge,
    Le,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
    Eof,
}

/// A token with its byte position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Tokenize a strategy expression.
pub fn tokenize(input: &str) -> Result<Vec<Token>, StrategyError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::LParen, position: pos });
            }
            ')' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::RParen, position: pos });
            }
            '+' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::Plus, position: pos });
            }
            '-' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::Minus, position: pos });
            }
            '*' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::Star, position: pos });
            }
            '/' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::Slash, position: pos });
            }
            '>' => {
                chars.next();
                let kind = if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                };
                tokens.push(Token { kind, position: pos });
            }
            '<' => {
                chars.next();
                let kind = if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                };
                tokens.push(Token { kind, position: pos });
            }
            '=' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token { kind: TokenKind::EqEq, position: pos });
                } else {
                    return Err(StrategyError::UnexpectedChar('=', pos));
                }
            }
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token { kind: TokenKind::NotEq, position: pos });
                } else {
                    return Err(StrategyError::UnexpectedChar('!', pos));
                }
            }
            c if c.is_ascii_digit() => {
                let mut end = pos;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[pos..end];
                let number = Decimal::from_str(literal)
                    .map_err(|_| StrategyError::InvalidNumber(literal.to_string(), pos))?;
                tokens.push(Token { kind: TokenKind::Number(number), position: pos });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = pos;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &input[pos..end];
                let kind = match word {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token { kind, position: pos });
            }
            other => return Err(StrategyError::UnexpectedChar(other, pos)),
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: input.len(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("price > sma(20)"),
            vec![
                TokenKind::Ident("price".into()),
                TokenKind::Gt,
                TokenKind::Ident("sma".into()),
                TokenKind::LParen,
                TokenKind::Number(dec!(20)),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_keywords_and_operators() {
        assert_eq!(
            kinds("not a and b or c >= 1.5 != 2"),
            vec![
                TokenKind::Not,
                TokenKind::Ident("a".into()),
                TokenKind::And,
                TokenKind::Ident("b".into()),
                TokenKind::Or,
                TokenKind::Ident("c".into()),
                TokenKind::Ge,
                TokenKind::Number(dec!(1.5)),
                TokenKind::NotEq,
                TokenKind::Number(dec!(2)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_decimal_literals_are_exact() {
        let tokens = tokenize("0.1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Number(dec!(0.1)));
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(
            tokenize("price $ 2"),
            Err(StrategyError::UnexpectedChar('$', _))
        ));
        assert!(matches!(
            tokenize("a = b"),
            Err(StrategyError::UnexpectedChar('=', _))
        ));
        // Indicator calls take a single argument; there is no comma token.
        assert!(matches!(
            tokenize("sma(2, 3)"),
            Err(StrategyError::UnexpectedChar(',', _))
        ));
    }

    #[test]
    fn test_invalid_number() {
        assert!(matches!(
            tokenize("1.2.3"),
            Err(StrategyError::InvalidNumber(_, _))
        ));
    }
}
