//! Tokenizer for C declarations.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, VspaceError};

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)(?P<ws>\s+)|(?P<comment>//[^\n]*|/\*.*?\*/)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)*)|(?P<num>0[xX][0-9A-Fa-f]+|[0-9]+)[uUlL]*|(?P<ellipsis>\.\.\.)|(?P<punct>[*\[\](){};,=-])|(?P<bad>.)",
    )
    .expect("valid token regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Ident(String),
    Number(u64),
    Punct(char),
    Ellipsis,
}

/// Token with its byte offset in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn parse_number(text: &str, offset: usize) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|_| VspaceError::Parse {
        message: format!("number '{}' out of range at offset {}", text, offset),
    })
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<Spanned>> {
    let mut out = Vec::new();
    for caps in RE_TOKEN.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let offset = whole.start();
        let token = if caps.name("ws").is_some() || caps.name("comment").is_some() {
            continue;
        } else if let Some(m) = caps.name("ident") {
            Token::Ident(m.as_str().to_string())
        } else if let Some(m) = caps.name("num") {
            Token::Number(parse_number(m.as_str(), offset)?)
        } else if caps.name("ellipsis").is_some() {
            Token::Ellipsis
        } else if let Some(c) = caps.name("punct").and_then(|m| m.as_str().chars().next()) {
            Token::Punct(c)
        } else {
            return Err(VspaceError::Parse {
                message: format!(
                    "unexpected character '{}' at offset {}",
                    whole.as_str(),
                    offset
                ),
            });
        };
        out.push(Spanned { token, offset });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_tokenize_declaration() {
        assert_eq!(
            kinds("unsigned long x[0x10]; // trailing"),
            vec![
                Token::Ident("unsigned".into()),
                Token::Ident("long".into()),
                Token::Ident("x".into()),
                Token::Punct('['),
                Token::Number(16),
                Token::Punct(']'),
                Token::Punct(';'),
            ]
        );
    }

    #[test]
    fn test_tokenize_qualified_names_and_comments() {
        assert_eq!(
            kinds("ns::Type /* c\nc */ *p, ..."),
            vec![
                Token::Ident("ns::Type".into()),
                Token::Punct('*'),
                Token::Ident("p".into()),
                Token::Punct(','),
                Token::Ellipsis,
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_stray_characters() {
        assert!(matches!(tokenize("int @x"), Err(VspaceError::Parse { .. })));
        assert!(tokenize("char c[99999999999999999999]").is_err());
    }
}
