//! Line-level decoding of input files.
//!
//! The reader only splits lines into fields; parsing and validation happen
//! on the worker that picks the record up.

use promosync_core::{InputError, Promotion};

/// Fields per input line: id, price, expiration.
pub const FIELD_COUNT: usize = 3;

/// An input line split into its fields, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the source.
    pub line: u64,
    pub id: String,
    pub price: String,
    pub expiration: String,
}

impl RawRecord {
    /// Split `text` into fields. Anything other than exactly three fields is
    /// an error.
    ///
    /// Fields may be wrapped in double quotes, with `""` standing for a
    /// literal quote and commas inside quotes kept. A quoted field cannot
    /// span lines.
    pub fn split(line: u64, text: &str) -> Result<Self, InputError> {
        let fields = split_fields(text.trim_end_matches(['\r', '\n'])).map_err(|reason| {
            InputError::Quote {
                line,
                reason: reason.to_string(),
            }
        })?;
        match <[String; FIELD_COUNT]>::try_from(fields) {
            Ok([id, price, expiration]) => Ok(Self {
                line,
                id,
                price,
                expiration,
            }),
            Err(other) => Err(InputError::FieldCount {
                line,
                expected: FIELD_COUNT,
                got: other.len(),
            }),
        }
    }

    /// Parse and validate into a [`Promotion`].
    pub fn decode(&self) -> Result<Promotion, InputError> {
        Promotion::parse_fields(&self.id, &self.price, &self.expiration).map_err(|source| {
            InputError::Invalid {
                line: self.line,
                source,
            }
        })
    }
}

/// Split one line on commas, honouring double-quoted fields.
fn split_fields(text: &str) -> Result<Vec<String>, &'static str> {
    let mut fields = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err("unterminated quoted field"),
                }
            }
            match chars.next() {
                None => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(',') => fields.push(field),
                Some(_) => return Err("unexpected character after closing quote"),
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        fields.push(field);
                        return Ok(fields);
                    }
                    Some(',') => {
                        fields.push(field);
                        break;
                    }
                    Some('"') => return Err("bare quote in unquoted field"),
                    Some(c) => field.push(c),
                }
            }
        }
    }
}

/// True for lines that carry no record.
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use promosync_core::ValidationError;

    #[test]
    fn test_split_three_fields() {
        let raw = RawRecord::split(4, "id1,9.99,2024-01-01 00:00:00 +0000 UTC\r").unwrap();
        assert_eq!(raw.line, 4);
        assert_eq!(raw.id, "id1");
        assert_eq!(raw.expiration, "2024-01-01 00:00:00 +0000 UTC");
    }

    #[test]
    fn test_split_wrong_field_count() {
        assert_eq!(
            RawRecord::split(2, "id1,9.99").unwrap_err(),
            InputError::FieldCount {
                line: 2,
                expected: 3,
                got: 2
            }
        );
        assert_eq!(
            RawRecord::split(3, "a,1,2024-01-01 00:00:00 +0000 UTC,extra")
                .unwrap_err()
                .line(),
            Some(3)
        );
    }

    #[test]
    fn test_split_quoted_fields() {
        let raw = RawRecord::split(1, r#""id1","9.99","2024-01-01 00:00:00 +0000 UTC""#).unwrap();
        assert_eq!(raw.id, "id1");
        assert_eq!(raw.price, "9.99");
        assert_eq!(raw.expiration, "2024-01-01 00:00:00 +0000 UTC");

        let promotion = raw.decode().unwrap();
        assert!((promotion.price - 9.99).abs() < f64::EPSILON);
    }

    #[test]
    fn test_split_quoted_comma_and_escaped_quote() {
        let raw = RawRecord::split(1, r#"id1,"1,5","say ""hi""""#).unwrap();
        assert_eq!(raw.price, "1,5");
        assert_eq!(raw.expiration, r#"say "hi""#);

        // A quoted comma does not add a field.
        assert!(RawRecord::split(1, r#""a,b",1,x"#).is_ok());
    }

    #[test]
    fn test_split_malformed_quotes() {
        for text in [
            r#""id1,9.99,2024-01-01 00:00:00 +0000 UTC"#,
            r#""id1"x,9.99,2024-01-01 00:00:00 +0000 UTC"#,
            r#"id"1,9.99,2024-01-01 00:00:00 +0000 UTC"#,
        ] {
            match RawRecord::split(7, text) {
                Err(InputError::Quote { line: 7, .. }) => {}
                other => panic!("{text}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_split_keeps_empty_fields() {
        assert_eq!(
            RawRecord::split(1, "a,,").unwrap(),
            RawRecord {
                line: 1,
                id: "a".into(),
                price: String::new(),
                expiration: String::new(),
            }
        );
    }

    #[test]
    fn test_decode_valid() {
        let promotion = RawRecord::split(1, "id1,9.99,2024-01-01 00:00:00 +0000 UTC")
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(promotion.id, "id1");
        assert!((promotion.price - 9.99).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_invalid_names_line() {
        let err = RawRecord::split(2, "id2,-1,2024-01-01 00:00:00 +0000 UTC")
            .unwrap()
            .decode()
            .unwrap_err();
        match err {
            InputError::Invalid {
                line: 2,
                source: ValidationError::InvalidValue { field, .. },
            } => assert_eq!(field, "price"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_blank_lines() {
        assert!(is_blank(""));
        assert!(is_blank("   \r"));
        assert!(!is_blank("id1,1,x"));
    }
}
