//! Tokenizer.

use logos::Logos;

use crate::telemetry::expr::ExprError;

/// What the lexer recognizes. Payloads are read back from the slice.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"\s+")]
enum Lexeme {
    #[regex("[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[regex(r#""([^"\\]|\\.)*""#)]
    #[regex(r"'([^'\\]|\\.)*'")]
    Str,
    #[regex("[0-9]+")]
    Int,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("??")]
    Coalesce,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("!")]
    Not,
    #[token("+")]
    Plus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Dot,
    Comma,
    LParen,
    RParen,
    Question,
    Colon,
    Coalesce,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Plus,
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier {name:?}"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Int(n) => write!(f, "number {n}"),
            Token::Dot => f.write_str("'.'"),
            Token::Comma => f.write_str("','"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Question => f.write_str("'?'"),
            Token::Colon => f.write_str("':'"),
            Token::Coalesce => f.write_str("'??'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::Not => f.write_str("'!'"),
            Token::Plus => f.write_str("'+'"),
            Token::Eof => f.write_str("end of expression"),
        }
    }
}

/// A token and its byte offset in the source.
pub type Spanned = (Token, usize);

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut lexer = Lexeme::lexer(source);

    while let Some(lexeme) = lexer.next() {
        let offset = lexer.span().start;
        let slice = lexer.slice();
        let token = match lexeme {
            Ok(Lexeme::Ident) => Token::Ident(slice.to_string()),
            Ok(Lexeme::Str) => Token::Str(unescape(&slice[1..slice.len() - 1])),
            Ok(Lexeme::Int) => Token::Int(
                slice
                    .parse()
                    .map_err(|_| ExprError::InvalidNumber(slice.to_string()))?,
            ),
            Ok(Lexeme::Dot) => Token::Dot,
            Ok(Lexeme::Comma) => Token::Comma,
            Ok(Lexeme::LParen) => Token::LParen,
            Ok(Lexeme::RParen) => Token::RParen,
            Ok(Lexeme::Question) => Token::Question,
            Ok(Lexeme::Colon) => Token::Colon,
            Ok(Lexeme::Coalesce) => Token::Coalesce,
            Ok(Lexeme::Eq) => Token::Eq,
            Ok(Lexeme::Ne) => Token::Ne,
            Ok(Lexeme::And) => Token::And,
            Ok(Lexeme::Or) => Token::Or,
            Ok(Lexeme::Not) => Token::Not,
            Ok(Lexeme::Plus) => Token::Plus,
            Err(()) => return Err(lex_error(source, offset)),
        };
        tokens.push((token, offset));
    }

    tokens.push((Token::Eof, source.len()));
    Ok(tokens)
}

fn lex_error(source: &str, offset: usize) -> ExprError {
    match source[offset..].chars().next() {
        Some('"' | '\'') => ExprError::UnterminatedString(offset),
        Some(ch) => ExprError::UnexpectedChar { ch, offset },
        None => ExprError::UnexpectedChar { ch: '\0', offset },
    }
}

/// Resolve escapes inside a quoted literal, quotes already stripped.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(escaped) => out.push(escaped),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn tokenizes_operators() {
        assert_eq!(
            kinds("a ?? b != nil ? 'x' : \"y\""),
            vec![
                Token::Ident("a".into()),
                Token::Coalesce,
                Token::Ident("b".into()),
                Token::Ne,
                Token::Ident("nil".into()),
                Token::Question,
                Token::Str("x".into()),
                Token::Colon,
                Token::Str("y".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn escapes_in_strings() {
        assert_eq!(kinds(r#"'it\'s'"#), vec![Token::Str("it's".into()), Token::Eof]);
    }

    #[test]
    fn rejects_stray_characters() {
        assert_eq!(tokenize("a = b"), Err(ExprError::UnexpectedChar { ch: '=', offset: 2 }));
        assert_eq!(tokenize("'open"), Err(ExprError::UnterminatedString(0)));
        assert!(tokenize("a # b").is_err());
        assert_eq!(tokenize("a & b"), Err(ExprError::UnexpectedChar { ch: '&', offset: 2 }));
    }

    #[test]
    fn numbers_and_offsets() {
        let tokens = tokenize("x + 42").unwrap();
        assert_eq!(tokens[2], (Token::Int(42), 4));
        assert_eq!(tokens[3], (Token::Eof, 6));
        assert_eq!(
            tokenize("99999999999999999999"),
            Err(ExprError::InvalidNumber("99999999999999999999".into()))
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("!a ?? b"),
            vec![
                Token::Not,
                Token::Ident("a".into()),
                Token::Coalesce,
                Token::Ident("b".into()),
                Token::Eof,
            ]
        );
        assert_eq!(kinds(r#""line\n""#), vec![Token::Str("line\n".into()), Token::Eof]);
    }
}
