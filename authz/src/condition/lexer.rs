//! Tokenizer for condition expressions.

use crate::error::ConditionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pipe,
    Dot,
    Comma,
    Question,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let spanned = |token: Token| Spanned { token, offset };

        let (token, width) = match (c, next) {
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('!', _) => (Token::Not, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('|', _) => (Token::Pipe, 1),
            ('.', Some(d)) if d.is_ascii_digit() => {
                let (number, end) = read_number(&chars, i, source)?;
                tokens.push(spanned(Token::Number(number)));
                i = end;
                continue;
            }
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            ('?', _) => (Token::Question, 1),
            (':', _) => (Token::Colon, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('\'', _) | ('"', _) => {
                let (text, end) = read_string(&chars, i, c, source)?;
                tokens.push(spanned(Token::Str(text)));
                i = end;
                continue;
            }
            (d, _) if d.is_ascii_digit() => {
                let (number, end) = read_number(&chars, i, source)?;
                tokens.push(spanned(Token::Number(number)));
                i = end;
                continue;
            }
            (a, _) if is_ident_start(a) => {
                let mut end = i;
                while end < chars.len() && is_ident_part(chars[end].1) {
                    end += 1;
                }
                let word: String = chars[i..end].iter().map(|(_, c)| *c).collect();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" | "undefined" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                };
                tokens.push(spanned(token));
                i = end;
                continue;
            }
            (other, _) => {
                return Err(ConditionError::Parse {
                    offset,
                    message: format!("unexpected character '{}'", other),
                })
            }
        };

        tokens.push(spanned(token));
        i += width;
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn byte_offset(chars: &[(usize, char)], index: usize, source: &str) -> usize {
    chars.get(index).map(|(o, _)| *o).unwrap_or(source.len())
}

fn read_number(
    chars: &[(usize, char)],
    start: usize,
    source: &str,
) -> Result<(f64, usize), ConditionError> {
    let mut end = start;
    let mut seen_dot = false;
    while end < chars.len() {
        let c = chars[end].1;
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.'
            && !seen_dot
            && chars
                .get(end + 1)
                .map_or(false, |(_, n)| n.is_ascii_digit())
        {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }

    let text = &source[chars[start].0..byte_offset(chars, end, source)];
    let number = text.parse::<f64>().map_err(|e| ConditionError::Parse {
        offset: chars[start].0,
        message: format!("invalid number '{}': {}", text, e),
    })?;
    Ok((number, end))
}

fn read_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
    source: &str,
) -> Result<(String, usize), ConditionError> {
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((text, i + 1));
        }
        if c == '\\' {
            match chars.get(i + 1).map(|(_, c)| *c) {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some(escaped) => text.push(escaped),
                None => break,
            }
            i += 2;
            continue;
        }
        text.push(c);
        i += 1;
    }

    Err(ConditionError::Parse {
        offset: byte_offset(chars, start, source),
        message: "unterminated string literal".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_comparison_tokens() {
        assert_eq!(
            kinds("employeeRegion == \"MIDWEST\""),
            vec![
                Token::Ident("employeeRegion".into()),
                Token::Eq,
                Token::Str("MIDWEST".into())
            ]
        );
    }

    #[test]
    fn test_pipe_versus_or() {
        assert_eq!(
            kinds("'Report'|incr || x"),
            vec![
                Token::Str("Report".into()),
                Token::Pipe,
                Token::Ident("incr".into()),
                Token::Or,
                Token::Ident("x".into())
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("10001 < 2.5 + .5"),
            vec![
                Token::Number(10001.0),
                Token::Lt,
                Token::Number(2.5),
                Token::Plus,
                Token::Number(0.5)
            ]
        );
    }

    #[test]
    fn test_member_access() {
        assert_eq!(
            kinds("a.b"),
            vec![Token::Ident("a".into()), Token::Dot, Token::Ident("b".into())]
        );
    }

    #[test]
    fn test_escaped_quote() {
        assert_eq!(kinds(r#"'it\'s'"#), vec![Token::Str("it's".into())]);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("true and not_a_keyword or null"),
            vec![
                Token::True,
                Token::And,
                Token::Ident("not_a_keyword".into()),
                Token::Or,
                Token::Null
            ]
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            tokenize("'open"),
            Err(ConditionError::Parse { offset: 0, .. })
        ));
        assert!(matches!(
            tokenize("a # b"),
            Err(ConditionError::Parse { offset: 2, .. })
        ));
    }
}
