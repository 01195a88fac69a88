// Copyright 2026 filecache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The external request collaborator of the server.
//!
//! The server never touches sockets or files itself. A [`RequestHandler`] parses the requested file name out of a
//! connection, reads the file on a cache miss, sends the bytes back and finally tears the connection down.

use std::{
    io::{Read, Write},
    marker::PhantomData,
    path::{Component, Path, PathBuf},
};

use bytes::Bytes;
use filecache_common::error::{Error, ErrorKind, Result};

/// Longest accepted request line in bytes.
pub const MAX_REQUEST_LINE: usize = 8 * 1024;

/// Operations the server consumes from the outside world.
///
/// Implementations are shared by every worker thread.
pub trait RequestHandler: Send + Sync + 'static {
    /// A client connection.
    type Connection: Send + 'static;

    /// Extract the requested file name from the connection.
    ///
    /// Failures are [`ErrorKind::Parse`] errors.
    fn parse(&self, connection: &mut Self::Connection) -> Result<String>;

    /// Read the whole file. Called outside of the cache lock.
    ///
    /// Failures are [`ErrorKind::Io`] or [`ErrorKind::NotFound`] errors.
    fn read_file(&self, name: &str) -> Result<Bytes>;

    /// Send the file bytes to the client.
    ///
    /// Failures are [`ErrorKind::Send`] errors.
    fn send_file(&self, connection: &mut Self::Connection, bytes: &Bytes) -> Result<()>;

    /// Report a failed request to the client before the connection is destroyed.
    ///
    /// Best effort, the default implementation does nothing.
    #[expect(unused_variables)]
    fn send_error(&self, connection: &mut Self::Connection, error: &Error) {}

    /// Tear down the per-request state and the connection.
    fn destroy(&self, connection: Self::Connection) {
        drop(connection);
    }
}

/// A [`RequestHandler`] serving files below a root directory over any byte stream.
///
/// A request is a single line, either `GET <path>` with an optional trailing protocol token, or a bare `<path>`.
/// The response is the raw file bytes. Failed requests are answered with `ERROR <kind>`.
pub struct StreamRequestHandler<S> {
    root: PathBuf,
    _marker: PhantomData<fn() -> S>,
}

impl<S> std::fmt::Debug for StreamRequestHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequestHandler").field("root", &self.root).finish()
    }
}

impl<S> StreamRequestHandler<S> {
    /// Serve files below `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn read_line(stream: &mut impl Read) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    // Read byte by byte so that nothing after the request line is consumed.
    loop {
        match stream.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::new(ErrorKind::Parse, "read request line failed").with_source(e)),
        }
        if line.len() > MAX_REQUEST_LINE {
            return Err(Error::new(ErrorKind::Parse, "request line too long").with_context("limit", MAX_REQUEST_LINE));
        }
    }

    String::from_utf8(line).map_err(|e| Error::new(ErrorKind::Parse, "request line is not utf-8").with_source(e))
}

/// Extract a relative file name from a request line.
pub fn parse_request_line(line: &str) -> Result<String> {
    let mut tokens = line.split_whitespace();
    let path = match tokens.next() {
        Some("GET") => tokens.next(),
        token => token,
    };
    let path = match path {
        Some(path) => path.trim_start_matches('/'),
        None => return Err(Error::new(ErrorKind::Parse, "empty request")),
    };

    if path.is_empty() {
        return Err(Error::new(ErrorKind::Parse, "empty file name").with_context("line", line));
    }
    if !Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::new(ErrorKind::Parse, "file name escapes the root").with_context("file", path));
    }

    Ok(path.to_string())
}

impl<S> RequestHandler for StreamRequestHandler<S>
where
    S: Read + Write + Send + 'static,
{
    type Connection = S;

    fn parse(&self, connection: &mut S) -> Result<String> {
        let line = read_line(connection)?;
        parse_request_line(line.trim_end_matches('\r'))
    }

    fn read_file(&self, name: &str) -> Result<Bytes> {
        let path = self.root.join(name);
        std::fs::read(&path)
            .map(Bytes::from)
            .map_err(|e| Error::io_error(e).with_context("file", path.display()))
    }

    fn send_file(&self, connection: &mut S, bytes: &Bytes) -> Result<()> {
        connection
            .write_all(bytes)
            .and_then(|()| connection.flush())
            .map_err(|e| Error::new(ErrorKind::Send, "send file failed").with_source(e))
    }

    fn send_error(&self, connection: &mut S, error: &Error) {
        let _ = writeln!(connection, "ERROR {}", error.kind()).and_then(|()| connection.flush());
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// An in-memory duplex stream: reads from `input`, writes into `output`.
    #[derive(Debug, Default)]
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: &str) -> Self {
            Self {
                input: Cursor::new(input.as_bytes().to_vec()),
                output: vec![],
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_request_line() {
        assert_eq!(parse_request_line("GET /index.html HTTP/1.0").unwrap(), "index.html");
        assert_eq!(parse_request_line("GET dir/a.txt").unwrap(), "dir/a.txt");
        assert_eq!(parse_request_line("a.txt").unwrap(), "a.txt");
        assert_eq!(parse_request_line("  ./a.txt  ").unwrap(), "./a.txt");

        for line in ["", "GET", "GET /", "/", "GET ../secret", "a/../../b"] {
            let err = parse_request_line(line).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "line: {line:?}");
        }
    }

    #[test]
    fn test_parse_reads_one_line() {
        let handler = StreamRequestHandler::<Duplex>::new("/nonexistent");
        let mut stream = Duplex::new("GET /a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(handler.parse(&mut stream).unwrap(), "a.txt");
        assert_eq!(stream.input.position(), 21);

        let mut stream = Duplex::new("b.txt");
        assert_eq!(handler.parse(&mut stream).unwrap(), "b.txt");

        let mut stream = Duplex::new(&"x".repeat(MAX_REQUEST_LINE + 10));
        assert_eq!(handler.parse(&mut stream).unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_read_and_send_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let handler = StreamRequestHandler::<Duplex>::new(dir.path());
        let bytes = handler.read_file("a.txt").unwrap();
        assert_eq!(&bytes[..], b"hello");

        let err = handler.read_file("missing.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut stream = Duplex::new("");
        handler.send_file(&mut stream, &bytes).unwrap();
        handler.send_error(&mut stream, &err);
        assert_eq!(stream.output, b"helloERROR Not found\n");
    }
}
