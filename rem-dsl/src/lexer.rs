//! Shell-like tokenizer for the REM dialect
//!
//! Splits on whitespace with single- and double-quote grouping and backslash
//! escapes, so multi-word values survive as one token:
//!
//! ```text
//! SEARCH "database migration" table=resources
//!   -> ["SEARCH", "database migration", "table=resources"]
//! ```
//!
//! Quotes may appear mid-token (`where="a AND b"` is one token). A backslash
//! escapes the next character outside single quotes; inside single quotes
//! everything is literal.

use rem_core::ValidationError;

/// Split a query string into shell-like tokens.
pub fn tokenize(input: &str) -> Result<Vec<String>, ValidationError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // Whether `current` holds anything, so `""` produces an empty token.
    let mut in_token = false;
    let mut chars = input.chars();

    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
    }
    let mut mode = Mode::Plain;

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Plain => match ch {
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                '\'' => {
                    mode = Mode::Single;
                    in_token = true;
                }
                '"' => {
                    mode = Mode::Double;
                    in_token = true;
                }
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| ValidationError::Malformed {
                        reason: "trailing backslash".to_string(),
                    })?;
                    current.push(escaped);
                    in_token = true;
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
            Mode::Single => match ch {
                '\'' => mode = Mode::Plain,
                c => current.push(c),
            },
            Mode::Double => match ch {
                '"' => mode = Mode::Plain,
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| ValidationError::Malformed {
                        reason: "trailing backslash".to_string(),
                    })?;
                    // Inside double quotes only \" and \\ are escapes.
                    if escaped != '"' && escaped != '\\' {
                        current.push('\\');
                    }
                    current.push(escaped);
                }
                c => current.push(c),
            },
        }
    }

    if mode != Mode::Plain {
        return Err(ValidationError::Malformed {
            reason: "unterminated quote".to_string(),
        });
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_split() {
        let tokens = tokenize("LOOKUP sarah-chen").unwrap();
        assert_eq!(tokens, vec!["LOOKUP", "sarah-chen"]);
    }

    #[test]
    fn test_double_quotes_group_words() {
        let tokens = tokenize(r#"SEARCH "database migration" table=resources"#).unwrap();
        assert_eq!(
            tokens,
            vec!["SEARCH", "database migration", "table=resources"]
        );
    }

    #[test]
    fn test_quote_mid_token() {
        let tokens = tokenize(r#"SQL table=moments where="moment_type='meeting'""#).unwrap();
        assert_eq!(
            tokens,
            vec!["SQL", "table=moments", "where=moment_type='meeting'"]
        );
    }

    #[test]
    fn test_escaped_quote_inside_double() {
        let tokens = tokenize(r#"FUZZY "say \"hi\"""#).unwrap();
        assert_eq!(tokens, vec!["FUZZY", r#"say "hi""#]);
    }

    #[test]
    fn test_single_quotes_are_literal() {
        let tokens = tokenize(r#"FUZZY 'a \ b'"#).unwrap();
        assert_eq!(tokens, vec!["FUZZY", r"a \ b"]);
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        assert!(tokenize(r#"FUZZY "unclosed"#).is_err());
        assert!(tokenize(r#"FUZZY trailing\"#).is_err());
    }

    #[test]
    fn test_empty_quoted_token() {
        let tokens = tokenize(r#"LOOKUP """#).unwrap();
        assert_eq!(tokens, vec!["LOOKUP", ""]);
    }

    #[test]
    fn test_whitespace_only() {
        assert!(tokenize("   \t ").unwrap().is_empty());
    }
}
