//! Chunked reading of the input stream.
//!
//! Payloads are JSON strings, so chunks must be valid UTF-8: a chunk takes
//! at most the configured byte budget but never splits a multi-byte
//! character. Incomplete trailing bytes wait in the buffer for the next
//! read.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Read granularity from the underlying stream.
const READ_BUFFER_BYTES: usize = 4096;

/// Splits an async byte stream into UTF-8 payload chunks.
#[derive(Debug)]
pub struct ChunkedReader<R> {
    reader: R,
    buf: Vec<u8>,
    eof: bool,
    chunk_bytes: usize,
}

impl<R: AsyncRead + Unpin> ChunkedReader<R> {
    /// Creates a chunker producing chunks of at most `chunk_bytes` bytes.
    ///
    /// # Panics
    /// Panics if `chunk_bytes` cannot hold one UTF-8 character.
    #[must_use]
    pub fn new(reader: R, chunk_bytes: usize) -> Self {
        assert!(chunk_bytes >= 4, "chunk must hold one UTF-8 character");
        Self {
            reader,
            buf: Vec::new(),
            eof: false,
            chunk_bytes,
        }
    }

    /// Returns the next non-empty chunk, or `None` once the stream is
    /// exhausted.
    ///
    /// # Errors
    /// Returns an error on transport failure or if the stream is not valid
    /// UTF-8.
    pub async fn next_chunk(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.buf.len() >= self.chunk_bytes || (self.eof && !self.buf.is_empty()) {
                return self.take_chunk().map(Some);
            }
            if self.eof {
                return Ok(None);
            }

            let mut scratch = [0_u8; READ_BUFFER_BYTES];
            let read = self.reader.read(&mut scratch).await?;
            if read == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&scratch[..read]);
            }
        }
    }

    /// Drains up to one chunk from the buffer, backing off to a character
    /// boundary.
    fn take_chunk(&mut self) -> io::Result<String> {
        let limit = self.chunk_bytes.min(self.buf.len());
        let mut end = limit;
        while end > 0 && !self.is_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // Only continuation bytes in reach: the stream is not UTF-8 (or
            // was truncated mid-character at EOF).
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "input is not valid UTF-8",
            ));
        }

        let chunk: Vec<u8> = self.buf.drain(..end).collect();
        String::from_utf8(chunk)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }

    /// True if `offset` does not land inside a multi-byte character.
    fn is_boundary(&self, offset: usize) -> bool {
        offset >= self.buf.len() || (self.buf[offset] & 0xC0) != 0x80
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn chunks_of(input: &[u8], chunk_bytes: usize) -> io::Result<Vec<String>> {
        let mut chunker = ChunkedReader::new(input, chunk_bytes);
        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.next_chunk().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    #[tokio::test]
    async fn test_exact_chunks() {
        let chunks = chunks_of(b"aaaabbbbcc", 4).await.unwrap();
        assert_eq!(chunks, vec!["aaaa", "bbbb", "cc"]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        assert!(chunks_of(b"", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multibyte_characters_stay_whole() {
        // "é" is two bytes; a five-byte budget cannot split the third one.
        let input = "ééé".as_bytes();
        let chunks = chunks_of(input, 5).await.unwrap();
        assert_eq!(chunks, vec!["éé", "é"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_an_error() {
        let result = chunks_of(&[0xFF, 0xFE, 0x80, 0x80], 4).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_large_input_chunk_count() {
        let input = "x".repeat(3000);
        let chunks = chunks_of(input.as_bytes(), 1000).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.len() == 1000));
    }
}
