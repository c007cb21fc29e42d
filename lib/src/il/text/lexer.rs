use super::ParseError;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Token {
    /// Identifiers, keywords, directives (`.class`), mnemonics (`ldc.i4.s`) and type names
    Ident(String),
    Str(String),
    Int(i64),
    Punct(char),
    DoubleColon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(ident) => f.write_str(ident),
            Token::Str(string) => write!(f, "{:?}", string),
            Token::Int(int) => write!(f, "{}", int),
            Token::Punct(punct) => write!(f, "{}", punct),
            Token::DoubleColon => f.write_str("::"),
        }
    }
}

const PUNCTUATION: &[char] = &['(', ')', '[', ']', '<', '>', ',', ':', '|', '&', '='];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '.' | '!' | '$' | '@')
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '!' | '$' | '@' | '`' | '/' | '-')
}

/// Split one line into tokens (comments start with `//` and run to the end of the line)
pub fn tokenize(source: &str, line: usize) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = vec![];
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let next = chars.get(pos + 1).copied();

        if c.is_whitespace() {
            pos += 1;
        } else if c == '/' && next == Some('/') {
            break;
        } else if c == ':' && next == Some(':') {
            tokens.push(Token::DoubleColon);
            pos += 2;
        } else if c == '"' {
            let (string, end) = lex_string(&chars, pos + 1, line)?;
            tokens.push(Token::Str(string));
            pos = end;
        } else if c.is_ascii_digit() || (c == '-' && next.map_or(false, |n| n.is_ascii_digit())) {
            let start = pos;
            pos += 1;
            while pos < chars.len() && chars[pos].is_ascii_alphanumeric() {
                pos += 1;
            }
            let literal: String = chars[start..pos].iter().collect();
            tokens.push(Token::Int(parse_int(&literal).ok_or_else(|| {
                ParseError::new(line, format!("invalid integer literal '{}'", literal))
            })?));
        } else if is_ident_start(c) {
            let start = pos;
            pos += 1;
            while pos < chars.len() && is_ident_continue(chars[pos]) {
                if chars[pos] == '/' && chars.get(pos + 1) == Some(&'/') {
                    break;
                }
                pos += 1;
            }
            tokens.push(Token::Ident(chars[start..pos].iter().collect()));
        } else if PUNCTUATION.contains(&c) {
            tokens.push(Token::Punct(c));
            pos += 1;
        } else {
            return Err(ParseError::new(
                line,
                format!("unexpected character '{}'", c),
            ));
        }
    }

    Ok(tokens)
}

fn parse_int(literal: &str) -> Option<i64> {
    let (negative, digits) = match literal.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, literal),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Lex the contents of a string literal, returning the position after the closing quote
fn lex_string(chars: &[char], mut pos: usize, line: usize) -> Result<(String, usize), ParseError> {
    let mut string = String::new();
    while pos < chars.len() {
        match chars[pos] {
            '"' => return Ok((string, pos + 1)),
            '\\' => {
                let escaped = match chars.get(pos + 1) {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some(other) => {
                        return Err(ParseError::new(
                            line,
                            format!("unknown escape '\\{}'", other),
                        ))
                    }
                    None => break,
                };
                string.push(escaped);
                pos += 2;
            }
            c => {
                string.push(c);
                pos += 1;
            }
        }
    }
    Err(ParseError::new(line, "unterminated string literal"))
}

/// Render a string as a literal that `tokenize` reads back to the same string
pub fn quote(string: &str) -> String {
    let mut quoted = String::with_capacity(string.len() + 2);
    quoted.push('"');
    for c in string.chars() {
        match c {
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            '\0' => quoted.push_str("\\0"),
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
