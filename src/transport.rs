//! Byte-stream endpoints for engine connections.
//!
//! A session talks to the engine over one of two stream transports: a TCP
//! connection pinned to the loopback interface, or (on unix) a filesystem
//! Unix domain socket. The transport only moves bytes; framing lives in
//! [`crate::framing`] and request/response ordering in
//! [`crate::session`].

use std::fmt;
use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

/// Where a running engine accepts connections.
///
/// TCP endpoints are loopback by construction: the port is the only degree
/// of freedom, and connections always target `127.0.0.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP on `127.0.0.1:<port>`.
    Tcp(u16),
    /// A Unix domain socket at the given path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(port) => write!(f, "127.0.0.1:{}", port),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One connected byte stream to the engine.
///
/// The read half is buffered for the framing decoder; writes are issued
/// frame-at-a-time by the session.
pub(crate) struct Transport {
    pub(crate) reader: BufReader<BoxedReader>,
    pub(crate) writer: BoxedWriter,
}

impl Transport {
    /// Connect to the engine at `endpoint`.
    pub(crate) async fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        debug!("connecting to engine at {}", endpoint);
        match endpoint {
            Endpoint::Tcp(port) => {
                let stream = TcpStream::connect(("127.0.0.1", *port)).await?;
                stream.set_nodelay(true)?;
                let (read_half, write_half) = stream.into_split();
                Ok(Self::from_halves(read_half, write_half))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                let (read_half, write_half) = stream.into_split();
                Ok(Self::from_halves(read_half, write_half))
            }
        }
    }

    fn from_halves<R, W>(read_half: R, write_half: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(read_half)),
            writer: Box::new(write_half),
        }
    }

    /// Shut down the write side, signalling the engine we are done.
    pub(crate) async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("transport shutdown failed (already closed?): {}", e);
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::Tcp(4242).to_string(), "127.0.0.1:4242");
        #[cfg(unix)]
        assert_eq!(
            Endpoint::Unix(PathBuf::from("/tmp/mqi.sock")).to_string(),
            "unix:/tmp/mqi.sock"
        );
    }

    #[tokio::test]
    async fn test_connect_refused_surfaces_io_error() {
        // Bind then drop a listener so the port is known-dead.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Transport::connect(&Endpoint::Tcp(port)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tcp_connect_roundtrip() {
        use crate::framing::{read_frame, write_frame};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let payload = read_frame(&mut reader).await.unwrap();
            write_frame(&mut write_half, &payload).await.unwrap();
        });

        let mut transport = Transport::connect(&Endpoint::Tcp(port)).await.unwrap();
        write_frame(&mut transport.writer, "ping").await.unwrap();
        let echoed = read_frame(&mut transport.reader).await.unwrap();
        assert_eq!(echoed, "ping");

        transport.shutdown().await;
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_connect_roundtrip() {
        use crate::framing::{read_frame, write_frame};

        let path = std::env::temp_dir().join(format!(
            "prolog-mqi-transport-test-{}-{}.sock",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let payload = read_frame(&mut reader).await.unwrap();
            write_frame(&mut write_half, &payload).await.unwrap();
        });

        let mut transport = Transport::connect(&Endpoint::Unix(path.clone()))
            .await
            .unwrap();
        write_frame(&mut transport.writer, "ping").await.unwrap();
        assert_eq!(read_frame(&mut transport.reader).await.unwrap(), "ping");

        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
