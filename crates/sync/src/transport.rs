//! Byte streams underneath a connection: plain TCP, or TCP wrapped in TLS.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use gink_core::{Error, Result};

use crate::looping::{fileno_of, FileNo};

/// Upper bound on any single blocking socket operation.
pub const SOCKET_TIMEOUT: Duration = Duration::from_millis(200);

/// How long to wait for an outgoing TCP connection to be established.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected, non-blocking stream.
pub enum Transport {
    /// Unencrypted TCP
    Plain(TcpStream),
    /// Accepted connection wrapped in TLS
    #[cfg(feature = "tls")]
    TlsServer(Box<rustls::StreamOwned<rustls::ServerConnection, TcpStream>>),
    /// Outgoing connection wrapped in TLS
    #[cfg(feature = "tls")]
    TlsClient(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

/// Put a freshly connected or accepted socket into the mode connections expect.
pub(crate) fn prepare_socket(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_nonblocking(true)?;
    Ok(())
}

/// Open a TCP connection to `host:port`.
pub(crate) fn dial(host: &str, port: u16) -> Result<(TcpStream, SocketAddr)> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                prepare_socket(&stream)?;
                return Ok((stream, addr));
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => Error::IoError(e),
        None => Error::NotFound(format!("no address for {host}:{port}")),
    })
}

impl Transport {
    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            Transport::TlsServer(tls) => tls.get_ref(),
            #[cfg(feature = "tls")]
            Transport::TlsClient(tls) => tls.get_ref(),
        }
    }

    /// File number of the underlying socket.
    pub fn fileno(&self) -> FileNo {
        fileno_of(self.tcp())
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.tcp().peer_addr().ok()
    }

    /// Whether the stream is encrypted.
    pub fn is_secure(&self) -> bool {
        !matches!(self, Transport::Plain(_))
    }

    /// Close both directions.
    pub fn shutdown(&mut self) {
        #[cfg(feature = "tls")]
        match self {
            Transport::TlsServer(tls) => tls.conn.send_close_notify(),
            Transport::TlsClient(tls) => tls.conn.send_close_notify(),
            Transport::Plain(_) => {}
        }
        let _ = self.flush();
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            Transport::TlsServer(tls) => tls.read(buf),
            #[cfg(feature = "tls")]
            Transport::TlsClient(tls) => tls.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            Transport::TlsServer(tls) => tls.write(buf),
            #[cfg(feature = "tls")]
            Transport::TlsClient(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            Transport::TlsServer(tls) => tls.flush(),
            #[cfg(feature = "tls")]
            Transport::TlsClient(tls) => tls.flush(),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("fileno", &self.fileno())
            .field("secure", &self.is_secure())
            .finish()
    }
}
