//! Keyword-token text format shared by every persisted object.
//!
//! Files are sequences of whitespace separated tokens. Each structured
//! field is written as `Key: value` and read back by naming the key that
//! must come next, so a loader is an ordered list of `field` calls and a
//! saver the same list of `field` writes.
use std::fmt::{Display, Write as _};
use std::iter::Peekable;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

use anyhow::{Context, Result};

use crate::error::GestureError;
use crate::math::Array2;

const END_OF_INPUT: &str = "<end of input>";

/// Sequential reader over the whitespace separated tokens of a text blob.
pub struct TokenReader<'a> {
    tokens: Peekable<SplitWhitespace<'a>>,
}

impl<'a> TokenReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            tokens: text.split_whitespace().peekable(),
        }
    }

    pub fn peek(&mut self) -> Option<&'a str> {
        self.tokens.peek().copied()
    }

    pub fn next_token(&mut self, expected: &str) -> Result<&'a str> {
        self.tokens.next().ok_or_else(|| {
            GestureError::Format {
                expected: expected.to_string(),
                found: END_OF_INPUT.to_string(),
            }
            .into()
        })
    }

    /// Consumes the next token, failing unless it equals `keyword` exactly.
    pub fn expect(&mut self, keyword: &str) -> Result<()> {
        let token = self.next_token(keyword)?;
        if token != keyword {
            return Err(GestureError::Format {
                expected: keyword.to_string(),
                found: token.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Parses the next token as `T`.
    pub fn value<T: FromStr>(&mut self) -> Result<T> {
        let expected = std::any::type_name::<T>();
        let token = self.next_token(expected)?;
        token.parse::<T>().map_err(|_| {
            GestureError::Format {
                expected: expected.to_string(),
                found: token.to_string(),
            }
            .into()
        })
    }

    /// Reads `key` followed by one value.
    pub fn field<T: FromStr>(&mut self, key: &str) -> Result<T> {
        self.expect(key)?;
        self.value::<T>().with_context(|| format!("Failed to parse value of {}", key))
    }

    /// Boolean field stored as `0` / `1`.
    pub fn flag(&mut self, key: &str) -> Result<bool> {
        Ok(self.field::<u8>(key)? != 0)
    }

    /// Collects free text up to (and consuming) `key`; words are rejoined with single spaces.
    pub fn text_until(&mut self, key: &str) -> Result<String> {
        let mut words = Vec::new();
        loop {
            let token = self.next_token(key)?;
            if token == key {
                return Ok(words.join(" "));
            }
            words.push(token);
        }
    }

    /// Reads `len` values. The buffer grows with the tokens actually read,
    /// so a corrupted count fails at the end of input instead of allocating.
    pub fn vector<T: FromStr>(&mut self, len: usize) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for _ in 0..len {
            out.push(self.value::<T>()?);
        }
        Ok(out)
    }

    pub fn matrix(&mut self, rows: usize, cols: usize) -> Result<Array2<f64>> {
        if Array2::<f64>::checked_len(rows, cols).is_none() {
            return Err(GestureError::Format {
                expected: "addressable matrix shape".to_string(),
                found: format!("{} x {}", rows, cols),
            }
            .into());
        }
        let data = self.vector::<f64>(rows * cols)?;
        Ok(Array2::from_shape_vec((rows, cols), data)?)
    }
}

/// Builder for the keyword-token format; the mirror image of [`TokenReader`].
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: String,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        self.buf.push_str(text);
        self.buf.push('\n');
        self
    }

    pub fn field<T: Display>(&mut self, key: &str, value: T) -> &mut Self {
        let _ = writeln!(self.buf, "{} {}", key, value);
        self
    }

    pub fn flag(&mut self, key: &str, value: bool) -> &mut Self {
        self.field(key, u8::from(value))
    }

    /// One tab separated row.
    pub fn vector<T: Display>(&mut self, values: &[T]) -> &mut Self {
        let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.line(&row.join("\t"))
    }

    pub fn matrix(&mut self, m: &Array2<f64>) -> &mut Self {
        for row in m.rows() {
            self.vector(row);
        }
        self
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

pub fn read_text_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|e| {
        GestureError::Io(format!("Failed to read {}: {}", path.display(), e)).into()
    })
}

pub fn write_text_file<P: AsRef<Path>>(path: P, contents: &str) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, contents).map_err(|e| {
        GestureError::Io(format!("Failed to write {}: {}", path.display(), e)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_kind;

    #[test]
    fn reads_fields_in_order() {
        let mut w = FieldWriter::new();
        w.line("HEADER_V1.0")
            .field("NumStates:", 3)
            .flag("Trained:", true)
            .field("Coeff:", -0.25);
        let text = w.finish();

        let mut r = TokenReader::new(&text);
        r.expect("HEADER_V1.0").unwrap();
        assert_eq!(r.field::<usize>("NumStates:").unwrap(), 3);
        assert!(r.flag("Trained:").unwrap());
        assert_eq!(r.field::<f64>("Coeff:").unwrap(), -0.25);
        assert!(r.peek().is_none());
    }

    #[test]
    fn wrong_keyword_is_a_format_error() {
        let mut r = TokenReader::new("NumState: 3");
        let err = r.field::<usize>("NumStates:").unwrap_err();
        assert!(matches!(
            error_kind(&err),
            Some(GestureError::Format { expected, found }) if expected == "NumStates:" && found == "NumState:"
        ));
    }

    #[test]
    fn free_text_stops_at_key() {
        let mut r = TokenReader::new("InfoText: wave   gestures recorded NumDimensions: 2");
        r.expect("InfoText:").unwrap();
        assert_eq!(r.text_until("NumDimensions:").unwrap(), "wave gestures recorded");
        assert_eq!(r.value::<usize>().unwrap(), 2);
    }

    #[test]
    fn matrix_round_trips_exact_floats() {
        let m = Array2::from_shape_vec((2, 2), vec![0.1, 1.0 / 3.0, -2.5e-9, 7.0]).unwrap();
        let mut w = FieldWriter::new();
        w.matrix(&m);
        let text = w.finish();
        let mut r = TokenReader::new(&text);
        assert_eq!(r.matrix(2, 2).unwrap(), m);
    }

    #[test]
    fn truncated_input_reports_end() {
        let mut r = TokenReader::new("1 2");
        let err = r.vector::<f64>(3).unwrap_err();
        assert!(format!("{:#}", err).contains(END_OF_INPUT));
    }
}
