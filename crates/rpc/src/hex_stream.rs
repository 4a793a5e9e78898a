//! This module contains [`HexStreamDecoder`], a forward-only byte stream over hex characters.
//!
//! Raw blocks can be hundreds of megabytes. Instead of materializing the hex string returned by
//! the node, the decoder pulls characters from the response body on demand and decodes them into
//! one fixed buffer, so memory stays constant regardless of the payload size.
use std::{
    fmt, io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use hex::FromHexError;
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::constants::HEX_CHUNK_BYTES;

/// Errors surfaced by [`HexStreamDecoder`] as [`io::Error`] payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexStreamError {
    /// The character source ended in the middle of a read.
    #[error("expected {expected} hex characters but only {actual} were available")]
    ShortRead {
        /// Characters requested.
        expected: usize,

        /// Characters available before the source ended.
        actual: usize,
    },

    /// A character that is not a hex digit was found.
    #[error("invalid hex character {character:?} at character offset {offset}")]
    InvalidDigit {
        /// The offending character.
        character: char,

        /// Offset of the character from the start of the value.
        offset: u64,
    },

    /// The token handed to [`HexStreamDecoder::with_cancel`] was cancelled.
    #[error("decoding was cancelled")]
    Cancelled,
}

impl HexStreamError {
    /// Extracts the decoder error carried by `err`, if any.
    pub fn from_io(err: &io::Error) -> Option<&HexStreamError> {
        err.get_ref().and_then(|inner| inner.downcast_ref())
    }
}

impl From<HexStreamError> for io::Error {
    fn from(err: HexStreamError) -> Self {
        let kind = match err {
            HexStreamError::Cancelled => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Decodes a source of hex-pair characters into bytes on demand.
///
/// Each refill requests exactly twice as many characters as the bytes asked for (bounded by an
/// internal chunk size). The value ends at a `"` (the closing quote of a JSON string) or at the end
/// of the source:
///
/// - zero characters left: end of stream;
/// - an odd number of characters left: [`HexStreamError::ShortRead`];
/// - fewer characters than requested and no closing quote: [`HexStreamError::ShortRead`], since a
///   source that is not quote-terminated must be read with exact lengths.
///
/// [`Self::position`] and [`Self::len`] are expressed in decoded bytes, never in characters.
pub struct HexStreamDecoder<R> {
    source: R,
    chars: Box<[u8]>,
    decoded: Box<[u8]>,
    wanted: usize,
    filled: usize,
    out_start: usize,
    out_end: usize,
    position: u64,
    chars_consumed: u64,
    char_len: Option<u64>,
    finished: bool,
    closed: bool,
    cancel: Option<CancellationToken>,
}

// Coverage is disabled because when tests pass, most Debug impls will never be invoked.
#[cfg_attr(coverage_nightly, coverage(off))]
impl<R> fmt::Debug for HexStreamDecoder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HexStreamDecoder")
            .field("position", &self.position)
            .field("len", &self.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<R> HexStreamDecoder<R> {
    /// Creates a decoder over `source`, positioned at its first character.
    pub fn new(source: R) -> Self {
        Self {
            source,
            chars: vec![0; 2 * HEX_CHUNK_BYTES].into_boxed_slice(),
            decoded: vec![0; HEX_CHUNK_BYTES].into_boxed_slice(),
            wanted: 0,
            filled: 0,
            out_start: 0,
            out_end: 0,
            position: 0,
            chars_consumed: 0,
            char_len: None,
            finished: false,
            closed: false,
            cancel: None,
        }
    }

    /// Declares how many hex characters the source holds, which makes [`Self::len`] known.
    pub const fn with_char_len(mut self, char_len: u64) -> Self {
        self.char_len = Some(char_len);
        self
    }

    /// Makes every read fail with [`HexStreamError::Cancelled`] once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Number of decoded bytes handed out so far.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Total number of decoded bytes, if the character length of the source is known.
    pub fn len(&self) -> Option<u64> {
        self.char_len.map(|chars| chars / 2)
    }

    /// Whether the decoded stream is empty, if the character length of the source is known.
    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }

    /// Gives back the character source.
    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: AsyncRead + Unpin> HexStreamDecoder<R> {
    /// Reads up to `2 * requested` characters and decodes them into the output buffer.
    fn poll_fill(&mut self, cx: &mut Context<'_>, requested: usize) -> Poll<io::Result<()>> {
        if self.wanted == 0 {
            self.wanted = 2 * requested.min(HEX_CHUNK_BYTES);
        }

        let mut ended = false;
        while self.filled < self.wanted {
            let mut read_buf = ReadBuf::new(&mut self.chars[self.filled..self.wanted]);
            ready!(Pin::new(&mut self.source).poll_read(cx, &mut read_buf))?;

            let got = read_buf.filled();
            let (count, quote) = (got.len(), got.iter().position(|&c| c == b'"'));

            if let Some(quote) = quote {
                self.filled += quote;
                self.closed = true;
                ended = true;
                break;
            }
            if count == 0 {
                ended = true;
                break;
            }
            self.filled += count;
        }

        let (wanted, filled) = (self.wanted, self.filled);
        self.wanted = 0;
        self.filled = 0;
        self.finished = ended;

        if filled == 0 {
            return Poll::Ready(Ok(()));
        }

        if filled % 2 != 0 || (filled < wanted && !self.closed) {
            self.finished = true;
            return Poll::Ready(Err(HexStreamError::ShortRead {
                expected: wanted,
                actual: filled,
            }
            .into()));
        }

        let bytes = filled / 2;
        if let Err(err) = hex::decode_to_slice(&self.chars[..filled], &mut self.decoded[..bytes]) {
            self.finished = true;
            let err = match err {
                FromHexError::InvalidHexCharacter { c, index } => HexStreamError::InvalidDigit {
                    character: c,
                    offset: self.chars_consumed + index as u64,
                },
                _ => HexStreamError::ShortRead {
                    expected: wanted,
                    actual: filled,
                },
            };
            return Poll::Ready(Err(err.into()));
        }

        self.chars_consumed += filled as u64;
        self.out_start = 0;
        self.out_end = bytes;

        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HexStreamDecoder<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Poll::Ready(Err(HexStreamError::Cancelled.into()));
        }

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.out_start == this.out_end {
            if this.finished {
                return Poll::Ready(Ok(()));
            }
            ready!(this.poll_fill(cx, buf.remaining()))?;
        }

        let count = buf.remaining().min(this.out_end - this.out_start);
        buf.put_slice(&this.decoded[this.out_start..this.out_start + count]);
        this.out_start += count;
        this.position += count as u64;

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use proptest::prelude::*;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn decode_quoted(body: &[u8]) -> io::Result<Vec<u8>> {
        block_on(async {
            let mut decoder = HexStreamDecoder::new(body);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).await?;
            Ok(out)
        })
    }

    proptest! {
        #[test]
        fn quoted_values_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..3 * HEX_CHUNK_BYTES)) {
            let body = format!("{}\",\"error\":null,\"id\":1}}", hex::encode(&bytes));

            let decoded = decode_quoted(body.as_bytes()).expect("must decode");

            prop_assert_eq!(decoded, bytes);
        }

        #[test]
        fn exact_reads_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..3 * HEX_CHUNK_BYTES)) {
            let encoded = hex::encode(&bytes);

            let (decoded, tail) = block_on(async {
                let mut decoder = HexStreamDecoder::new(encoded.as_bytes())
                    .with_char_len(encoded.len() as u64);
                let mut decoded = vec![0; bytes.len()];
                decoder.read_exact(&mut decoded).await.expect("must decode");
                assert_eq!(decoder.position(), bytes.len() as u64);
                assert_eq!(decoder.len(), Some(bytes.len() as u64));

                let mut tail = [0; 16];
                let tail = decoder.read(&mut tail).await.expect("end of stream is not an error");
                (decoded, tail)
            });

            prop_assert_eq!(decoded, bytes);
            prop_assert_eq!(tail, 0);
        }
    }

    #[test]
    fn empty_value_is_an_empty_stream() {
        assert_eq!(decode_quoted(b"\"}").expect("must decode"), Vec::<u8>::new());
        assert_eq!(decode_quoted(b"").expect("must decode"), Vec::<u8>::new());
    }

    #[test]
    fn odd_number_of_characters_is_a_short_read() {
        let err = decode_quoted(b"abc\"").expect_err("must fail");

        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(
            HexStreamError::from_io(&err),
            Some(HexStreamError::ShortRead { actual: 3, .. })
        ));
    }

    #[test]
    fn truncated_source_is_a_short_read() {
        let err = block_on(async {
            let mut decoder = HexStreamDecoder::new(&b"abcd"[..]);
            let mut out = [0; 4];
            decoder.read_exact(&mut out).await.expect_err("must fail")
        });

        assert_eq!(
            HexStreamError::from_io(&err),
            Some(&HexStreamError::ShortRead {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn non_hex_character_is_rejected() {
        let err = decode_quoted(b"00ffzz\"").expect_err("must fail");

        assert_eq!(
            HexStreamError::from_io(&err),
            Some(&HexStreamError::InvalidDigit {
                character: 'z',
                offset: 4
            })
        );
    }

    #[test]
    fn cancelled_decoder_fails_reads() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = block_on(async {
            let mut decoder = HexStreamDecoder::new(&b"00ff\""[..]).with_cancel(cancel);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).await.expect_err("must fail")
        });

        assert_eq!(
            HexStreamError::from_io(&err),
            Some(&HexStreamError::Cancelled)
        );
    }

    #[test]
    fn small_reads_report_decoded_position() {
        block_on(async {
            let mut decoder = HexStreamDecoder::new(&b"0102030405\""[..]);
            let mut two = [0; 2];

            decoder.read_exact(&mut two).await.expect("must decode");
            assert_eq!(two, [1, 2]);
            assert_eq!(decoder.position(), 2);

            let mut rest = Vec::new();
            decoder.read_to_end(&mut rest).await.expect("must decode");
            assert_eq!(rest, vec![3, 4, 5]);
            assert_eq!(decoder.position(), 5);
        });
    }
}
