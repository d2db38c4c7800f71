//! Connection streams and newline-delimited request framing.

use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use thiserror::Error;

/// Largest request line accepted from a client, newline included.
pub(crate) const MAX_REQUEST_BYTES: usize = 64 * 1024;

const CHUNK_BYTES: usize = 1024;

/// Stream accepted by the listener.
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Short label for logs.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            #[cfg(unix)]
            Self::Unix(_) => "unix",
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Serves one connection until the client hangs up. Implementations
    /// should avoid panicking.
    fn handle(&self, stream: ConnectionStream);
}

/// Failures framing request lines.
#[derive(Debug, Error)]
pub(crate) enum LineError {
    #[error("request of {size} bytes exceeds the {max_size} byte limit")]
    TooLarge { size: usize, max_size: usize },
    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),
}

/// Splits a byte stream into request lines.
///
/// Bytes after a newline are kept for the next call, so a client may
/// pipeline several requests in one write. A final line without a newline
/// is returned when the peer closes the stream.
pub(crate) struct RequestLines<R> {
    reader: R,
    pending: Vec<u8>,
    max_size: usize,
}

impl<R: Read> RequestLines<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_REQUEST_BYTES)
    }

    pub(crate) fn with_limit(reader: R, max_size: usize) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            max_size,
        }
    }

    /// Returns the next line without its terminator, or `None` at end of
    /// stream.
    pub(crate) fn next_line(&mut self) -> Result<Option<Vec<u8>>, LineError> {
        let mut chunk = [0_u8; CHUNK_BYTES];
        let mut scanned = 0;
        loop {
            if let Some(offset) = self.pending[scanned..].iter().position(|byte| *byte == b'\n') {
                let end = scanned + offset;
                self.enforce_limit(end + 1)?;
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            scanned = self.pending.len();
            self.enforce_limit(scanned)?;

            let read = read_with_retry(&mut self.reader, &mut chunk)?;
            if read == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    /// Returns the underlying reader.
    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    fn enforce_limit(&self, size: usize) -> Result<(), LineError> {
        if size > self.max_size {
            return Err(LineError::TooLarge {
                size,
                max_size: self.max_size,
            });
        }
        Ok(())
    }
}

fn read_with_retry<R: Read>(reader: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn splits_pipelined_requests() {
        let mut lines = RequestLines::new(Cursor::new(b"{\"a\":1}\n{\"b\":2}\r\ntail".to_vec()));
        assert_eq!(lines.next_line().expect("first"), Some(b"{\"a\":1}".to_vec()));
        assert_eq!(lines.next_line().expect("second"), Some(b"{\"b\":2}".to_vec()));
        assert_eq!(lines.next_line().expect("tail"), Some(b"tail".to_vec()));
        assert_eq!(lines.next_line().expect("end"), None);
    }

    #[rstest]
    #[case::unterminated(vec![b'x'; 40])]
    #[case::terminated({
        let mut bytes = vec![b'x'; 40];
        bytes.push(b'\n');
        bytes
    })]
    fn rejects_lines_over_the_limit(#[case] input: Vec<u8>) {
        let mut lines = RequestLines::with_limit(Cursor::new(input), 16);
        let error = lines.next_line().expect_err("line should be too large");
        assert!(matches!(error, LineError::TooLarge { max_size: 16, .. }));
    }

    #[rstest]
    fn empty_stream_has_no_lines() {
        let mut lines = RequestLines::new(Cursor::new(Vec::new()));
        assert_eq!(lines.next_line().expect("read"), None);
    }
}
