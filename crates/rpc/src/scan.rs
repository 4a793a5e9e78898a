//! Locates the value of the `result` field in a raw JSON-RPC response body.
//!
//! The body is never parsed as JSON. Characters are read one at a time; every quoted token is
//! compared against `result` (case-insensitive) while it is read, so the scanner keeps constant
//! state no matter how long the tokens before the field are.
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{RESULT_FIELD, SEPARATOR_CHARS};

/// Why the `result` value could not be located.
#[derive(Debug)]
pub(crate) enum ScanError {
    /// The body does not have the expected shape.
    Malformed(&'static str),

    /// Reading the body failed.
    Io(io::Error),
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => {
                ScanError::Malformed("response ended before the result value")
            }
            _ => ScanError::Io(err),
        }
    }
}

/// Matches the token currently being read against the field name.
#[derive(Debug, Default)]
struct TokenMatcher {
    matched: usize,
    mismatch: bool,
}

impl TokenMatcher {
    fn push(&mut self, byte: u8) {
        if self.mismatch {
            return;
        }
        match RESULT_FIELD.get(self.matched) {
            Some(expected) if byte.eq_ignore_ascii_case(expected) => self.matched += 1,
            _ => self.mismatch = true,
        }
    }

    fn is_match(&self) -> bool {
        !self.mismatch && self.matched == RESULT_FIELD.len()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Advances `body` to the first character of the string value of the `result` field.
pub(crate) async fn seek_result_value<R>(body: &mut R) -> Result<(), ScanError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut token = TokenMatcher::default();

    loop {
        let byte = body.read_u8().await?;
        if byte != b'"' {
            token.push(byte);
            continue;
        }

        if token.is_match() {
            read_separators_until(body, b':').await?;
            read_separators_until(body, b'"').await?;
            return Ok(());
        }
        token.reset();
    }
}

/// Consumes characters up to and including `target`, allowing only separators in between.
async fn read_separators_until<R>(body: &mut R, target: u8) -> Result<(), ScanError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        let byte = body.read_u8().await?;
        if !SEPARATOR_CHARS.contains(&byte) {
            return Err(ScanError::Malformed(
                "unexpected character between the result field and its value",
            ));
        }
        if byte == target {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn rest_after_seek(body: &str) -> Result<String, ScanError> {
        block_on(async {
            let mut reader = body.as_bytes();
            seek_result_value(&mut reader).await?;
            let mut rest = String::new();
            reader.read_to_string(&mut rest).await?;
            Ok(rest)
        })
    }

    #[test]
    fn stops_at_first_value_character() {
        let rest = rest_after_seek(r#"{"result":"00ff","error":null,"id":1}"#).expect("must find");
        assert_eq!(rest, r#"00ff","error":null,"id":1}"#);
    }

    #[test]
    fn field_name_is_case_insensitive_and_allows_whitespace() {
        let rest = rest_after_seek("{\"id\":1, \"Result\" :\n\t \"ab\"}").expect("must find");
        assert_eq!(rest, "ab\"}");
    }

    #[test]
    fn longer_tokens_do_not_match() {
        let rest = rest_after_seek(r#"{"results":1,"result":"cd"}"#).expect("must find");
        assert_eq!(rest, "cd\"}");
    }

    #[test]
    fn non_string_value_is_malformed() {
        let err = rest_after_seek(r#"{"result":123,"error":null,"id":1}"#).expect_err("must fail");
        assert!(matches!(err, ScanError::Malformed(_)));
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = rest_after_seek(r#"{"error":null,"id":1}"#).expect_err("must fail");
        assert!(matches!(err, ScanError::Malformed(_)));
    }
}
