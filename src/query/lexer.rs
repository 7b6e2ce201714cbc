//! Tokenizer for set-algebra queries.

use crate::error::LookupError;

/// One lexical token of a set-algebra query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A key naming a set-valued entry: `[A-Za-z_][A-Za-z0-9_]*`.
    Ident(String),
    /// `|` union operator.
    Pipe,
    /// `&` intersection operator.
    Amp,
    /// `-` difference operator.
    Minus,
    /// `(`
    LParen,
    /// `)`
    RParen,
}

/// Tokenize `input`, skipping ASCII whitespace.
///
/// # Errors
///
/// Returns [`LookupError::InvalidArgument`] on any character outside the
/// grammar.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LookupError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            c if c.is_ascii_whitespace() => {}
            '|' => tokens.push(Token::Pipe),
            '&' => tokens.push(Token::Amp),
            '-' => tokens.push(Token::Minus),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                ident.push(c);
                while let Some((_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '_' {
                        ident.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(LookupError::invalid_argument(format!(
                    "unexpected character '{}' at offset {}",
                    other, pos
                )));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_operators_and_idents() {
        let tokens = tokenize("A | (b_2 & C) - _d").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("A".into()),
                Token::Pipe,
                Token::LParen,
                Token::Ident("b_2".into()),
                Token::Amp,
                Token::Ident("C".into()),
                Token::RParen,
                Token::Minus,
                Token::Ident("_d".into()),
            ]
        );
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").unwrap().is_empty());
        assert!(tokenize("   \t ").unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(tokenize("A + B").is_err());
        assert!(tokenize("1abc").is_err());
        assert!(tokenize("A | \u{00e9}").is_err());
    }
}
