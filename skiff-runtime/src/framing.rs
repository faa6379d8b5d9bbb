//! Newline-delimited JSON framing for the stream endpoint.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Reads the next well-formed JSON value from the stream.
///
/// Blank lines and undecodable lines are dropped (logged at debug) rather
/// than surfaced: a malformed message must never take the endpoint down.
/// Returns `None` at end of stream.
///
/// # Errors
/// Returns an error only for transport-level I/O failures.
pub async fn read_json<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str(trimmed) {
            Ok(value) => return Ok(Some(value)),
            Err(error) => debug!(%error, "dropping undecodable message"),
        }
    }
}

/// Writes one value as a JSON line and flushes.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(value)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::{ReplicaId, Term};
    use skiff_raft::{Body, Envelope};

    fn envelope() -> Envelope {
        Envelope::new(
            ReplicaId::new("0001"),
            ReplicaId::new("0000"),
            ReplicaId::broadcast(),
            Body::Vote {
                term: Term::new(1),
                vote: true,
            },
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        write_json(&mut writer, &envelope()).await.unwrap();
        drop(writer);

        let decoded: Envelope = read_json(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, envelope());
        assert!(read_json::<_, Envelope>(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"not json\n\n{\"type\":\"what\"}\n").await.unwrap();
        write_json(&mut writer, &envelope()).await.unwrap();
        drop(writer);

        // The three bad lines are dropped; the good envelope comes through.
        let decoded: Envelope = read_json(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, envelope());
    }
}
