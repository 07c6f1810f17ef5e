//! CR-terminated line framing for the hub's ASCII protocol.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::HubError;

/// Line terminator used by the hub in both directions.
pub const LINE_TERMINATOR: u8 = b'\r';

/// Longest line accepted from the hub, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Splits the byte stream on `\r` and yields lines without the terminator.
#[derive(Debug, Clone)]
pub struct HubLineCodec {
    // Bytes of `src` already scanned for a terminator.
    next_index: usize,
    max_length: usize,
}

impl HubLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }

    fn to_line(&self, raw: &[u8]) -> String {
        // Tolerate CRLF peers: the LF lands at the front of the next line.
        let raw = raw.strip_prefix(b"\n").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

impl Default for HubLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for HubLineCodec {
    type Item = String;
    type Error = HubError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let found = src[self.next_index..]
            .iter()
            .position(|b| *b == LINE_TERMINATOR);

        match found {
            Some(offset) => {
                let end = self.next_index + offset;
                self.next_index = 0;
                let raw = src.split_to(end + 1);
                let line = self.to_line(&raw[..end]);
                if line.len() > self.max_length {
                    return Err(HubError::LineTooLong {
                        size: line.len(),
                        max: self.max_length,
                    });
                }
                Ok(Some(line))
            }
            None if src.len() > self.max_length + 1 => Err(HubError::LineTooLong {
                size: src.len(),
                max: self.max_length,
            }),
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // A trailing fragment without CR is still a line.
        self.next_index = 0;
        if src.is_empty() || src[..] == [b'\n'] {
            src.clear();
            return Ok(None);
        }
        let raw = src.split_to(src.len());
        Ok(Some(self.to_line(&raw)))
    }
}

impl<T: AsRef<str>> Encoder<T> for HubLineCodec {
    type Error = HubError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.as_ref();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(LINE_TERMINATOR);
        Ok(())
    }
}
