/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Single-line tokenizer for the bundled grammar.  `//` starts a comment
//! that runs to the end of the line.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    /// Numeric literal; `text` is kept so time values can insist on an
    /// integer spelling.
    Number { value: f64, text: String },
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{s}'"),
            Token::Number { text, .. } => format!("number {text}"),
            Token::Str(s) => format!("string \"{s}\""),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
            Token::Comma => "','".into(),
            Token::Semicolon => "';'".into(),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
        }
    }
}

/// Tokenizes `line`.  The error string describes the offending character.
pub fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' if line[pos..].starts_with("//") => break,
            '(' | ')' | '{' | '}' | ',' | ';' | '+' | '-' | '*' | '/' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    ';' => Token::Semicolon,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    _ => Token::Slash,
                });
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 'r')) => text.push('\r'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, '"')) => text.push('"'),
                            Some((_, '\\')) => text.push('\\'),
                            Some((_, other)) => return Err(format!("unknown escape '\\{other}'")),
                            None => break,
                        },
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err("unterminated string literal".into());
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                let mut end = pos;
                let mut seen_dot = false;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || (d == '.' && !seen_dot) {
                        seen_dot |= d == '.';
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &line[start..end];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number {
                    value,
                    text: text.to_string(),
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        end = i + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(line[start..end].to_string()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(text: &str) -> Token {
        Token::Number {
            value: text.parse().unwrap(),
            text: text.into(),
        }
    }

    #[test]
    fn timed_entry_tokens() {
        let tokens = tokenize("Lamp(\"on\", 2.5) at 100 for 50 // trailing").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("Lamp".into()),
                Token::LParen,
                Token::Str("on".into()),
                Token::Comma,
                num("2.5"),
                Token::RParen,
                Token::Ident("at".into()),
                num("100"),
                Token::Ident("for".into()),
                num("50"),
            ]
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        let tokens = tokenize(r#""a\"b\\c\n""#).unwrap();
        assert_eq!(tokens, vec![Token::Str("a\"b\\c\n".into())]);
    }

    #[test]
    fn division_is_not_a_comment() {
        let tokens = tokenize("1 / 2").unwrap();
        assert_eq!(tokens, vec![num("1"), Token::Slash, num("2")]);
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(tokenize("\"open").is_err());
        assert!(tokenize("Lamp $").is_err());
    }
}
