//! Passive endpoint accepting peer connections.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{info, warn};

use gink_core::Result;

use crate::looping::{fileno_of, FileNo};
use crate::transport::{prepare_socket, Transport};

/// Default port peers listen on.
pub const DEFAULT_PORT: u16 = 8080;

/// A bound, non-blocking listening socket.
pub struct Listener {
    socket: TcpListener,
    #[cfg(feature = "tls")]
    tls: Option<std::sync::Arc<rustls::ServerConfig>>,
    accepted: Vec<(TcpStream, SocketAddr)>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}

impl Listener {
    /// Bind to `addr:port`; port 0 picks a free port.
    pub fn bind(addr: &str, port: u16) -> Result<Self> {
        let addr = if addr.is_empty() { "0.0.0.0" } else { addr };
        let socket = TcpListener::bind((addr, port))?;
        socket.set_nonblocking(true)?;
        info!(addr = %socket.local_addr()?, "listening");
        Ok(Listener {
            socket,
            #[cfg(feature = "tls")]
            tls: None,
            accepted: Vec::new(),
        })
    }

    /// Wrap every accepted connection in TLS.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: std::sync::Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// File number of the listening socket.
    pub fn fileno(&self) -> FileNo {
        fileno_of(&self.socket)
    }

    /// Accept pending connections without blocking; true if any arrived.
    pub fn poll_ready(&mut self) -> bool {
        loop {
            match self.socket.accept() {
                Ok(pair) => self.accepted.push(pair),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
        !self.accepted.is_empty()
    }

    /// Connections accepted since the last call, ready for use.
    ///
    /// Sockets that cannot be prepared are dropped with a warning.
    pub fn take_accepted(&mut self) -> Vec<(Transport, SocketAddr)> {
        let mut ready = Vec::new();
        for (stream, addr) in std::mem::take(&mut self.accepted) {
            if let Err(e) = prepare_socket(&stream) {
                warn!(%addr, error = %e, "dropping accepted connection");
                continue;
            }
            match self.wrap(stream) {
                Ok(transport) => ready.push((transport, addr)),
                Err(e) => warn!(%addr, error = %e, "rejecting connection"),
            }
        }
        ready
    }

    #[cfg(feature = "tls")]
    fn wrap(&self, stream: TcpStream) -> Result<Transport> {
        match &self.tls {
            Some(config) => crate::tls::accept(config, stream),
            None => Ok(Transport::Plain(stream)),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn wrap(&self, stream: TcpStream) -> Result<Transport> {
        Ok(Transport::Plain(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_accepts_without_blocking() {
        let mut listener = Listener::bind("127.0.0.1", 0).unwrap();
        assert!(!listener.poll_ready());
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !listener.poll_ready() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let accepted = listener.take_accepted();
        assert_eq!(accepted.len(), 1);
        assert!(!accepted[0].0.is_secure());
        assert!(listener.take_accepted().is_empty());
    }
}
