//! One framed message channel to a peer
//!
//! A [`Connection`] owns the socket, the frame buffers and everything the
//! protocol tracks per peer:
//!
//! - the peer's [`HasMap`], learned from its greeting and advanced by every
//!   bundle either side sends, which suppresses redundant sends
//! - the bundles sent and not yet acknowledged
//! - the permissions the peer was granted
//!
//! What to do with received messages is up to the relay.
//!
//! # States
//!
//! ```text
//! AwaitingRequest ──(connect request, permissions granted)──▶ Open
//! Open ──(peer hangs up / error / close)──▶ Closed
//! ```
//!
//! Outgoing connections start `Open`: they send their connect request and
//! greeting immediately.

use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use prost::Message;
use tracing::{debug, info, trace, warn};

use gink_core::proto::{sync_message, ConnectRequest, SyncMessage};
use gink_core::{BundleInfo, BundleWrapper, Error, HasMap, Result};

use crate::frame::{encode_frame, FrameReader};
use crate::looping::FileNo;
use crate::permissions::Permissions;
use crate::transport::Transport;

/// Decides what a connecting peer may do.
pub type AuthFunc = Arc<dyn Fn(&ConnectRequest) -> Permissions + Send + Sync>;

/// Produces the greeting for an accepted peer from its requested path,
/// granted permissions and remote address.
pub type SyncFunc = Arc<dyn Fn(&str, Permissions, &str) -> Result<SyncMessage> + Send + Sync>;

/// Grants every connecting peer full access.
pub fn allow_all() -> AuthFunc {
    Arc::new(|_: &ConnectRequest| Permissions::ALL)
}

const READ_CHUNK: usize = 64 * 1024;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted; waiting for the peer's connect request
    AwaitingRequest,
    /// Exchanging messages
    Open,
    /// Done; waiting to be removed from the loop
    Closed,
}

/// Per-connection traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Bundles written to the peer
    pub bundles_sent: usize,
    /// Bundles read from the peer
    pub bundles_received: usize,
    /// Acks read from the peer
    pub acks_received: usize,
    /// Greetings read from the peer
    pub greetings_received: usize,
}

struct Acceptance {
    auth_func: AuthFunc,
    sync_func: SyncFunc,
}

/// A message channel to one peer.
pub struct Connection {
    transport: Transport,
    name: String,
    reader: FrameReader,
    outgoing: Vec<u8>,
    state: ConnectionState,
    permissions: Permissions,
    acceptance: Option<Acceptance>,
    peer_has: Option<HasMap>,
    unacked: HashSet<BundleInfo>,
    stats: ConnectionStats,
    has_input: bool,
    hung_up: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl Connection {
    /// Outgoing connection: sends `request` and then `greeting`.
    ///
    /// The remote end is trusted with everything it asks for.
    pub fn client(
        transport: Transport,
        name: impl Into<String>,
        request: &ConnectRequest,
        greeting: &SyncMessage,
    ) -> Result<Self> {
        let mut connection = Self::new(transport, name.into(), ConnectionState::Open);
        connection.permissions = Permissions::ALL;
        connection.queue(&request.encode_to_vec())?;
        connection.send(greeting)?;
        info!(peer = %connection.name, "connected");
        Ok(connection)
    }

    /// Accepted connection; the first frame must be a connect request.
    pub fn server(
        transport: Transport,
        name: impl Into<String>,
        auth_func: AuthFunc,
        sync_func: SyncFunc,
    ) -> Self {
        let mut connection = Self::new(transport, name.into(), ConnectionState::AwaitingRequest);
        connection.acceptance = Some(Acceptance {
            auth_func,
            sync_func,
        });
        connection
    }

    fn new(transport: Transport, name: String, state: ConnectionState) -> Self {
        Connection {
            transport,
            name,
            reader: FrameReader::new(),
            outgoing: Vec::new(),
            state,
            permissions: Permissions::NONE,
            acceptance: None,
            peer_has: None,
            unacked: HashSet::new(),
            stats: ConnectionStats::default(),
            has_input: false,
            hung_up: false,
        }
    }

    /// File number of the socket.
    pub fn fileno(&self) -> FileNo {
        self.transport.fileno()
    }

    /// Remote address, for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection is finished.
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Whether the peer hung up or the socket failed; input read before
    /// that is still delivered by [`Connection::receive`].
    pub fn hung_up(&self) -> bool {
        self.hung_up
    }

    /// Permissions granted to the peer.
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// What the peer is known to have, once it has greeted us.
    pub fn peer_has(&self) -> Option<&HasMap> {
        self.peer_has.as_ref()
    }

    /// Traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Bundles sent and not yet acknowledged.
    pub fn unacked(&self) -> usize {
        self.unacked.len()
    }

    /// Read whatever the socket has without blocking.
    ///
    /// True when there is something to service: input, a hang-up or an error.
    pub fn poll_ready(&mut self) -> bool {
        if self.is_closed() || self.hung_up {
            return true;
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.name, "peer hung up");
                    self.hung_up = true;
                    return true;
                }
                Ok(n) => {
                    self.reader.extend(&chunk[..n]);
                    self.has_input = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(peer = %self.name, error = %e, "read failed");
                    self.hung_up = true;
                    return true;
                }
            }
        }
        self.has_input
    }

    /// Decode every complete message received so far.
    ///
    /// A connect request is consumed here: it decides the peer's
    /// permissions and, with read access, triggers our greeting.
    pub fn receive(&mut self) -> Result<Vec<SyncMessage>> {
        self.has_input = false;
        let mut messages = Vec::new();
        while let Some(payload) = self.reader.next_frame()? {
            match self.state {
                ConnectionState::AwaitingRequest => {
                    let request = ConnectRequest::decode(payload.as_slice())?;
                    self.accept_request(&request)?;
                }
                ConnectionState::Open => {
                    let message = SyncMessage::decode(payload.as_slice())?;
                    match &message.contents {
                        Some(sync_message::Contents::Bundle(_)) => self.stats.bundles_received += 1,
                        Some(sync_message::Contents::Greeting(_)) => {
                            self.stats.greetings_received += 1
                        }
                        Some(sync_message::Contents::Ack(_)) => self.stats.acks_received += 1,
                        None => {
                            return Err(Error::ProtocolError(format!(
                                "empty message from {}",
                                self.name
                            )))
                        }
                    }
                    messages.push(message);
                }
                ConnectionState::Closed => break,
            }
        }
        Ok(messages)
    }

    fn accept_request(&mut self, request: &ConnectRequest) -> Result<()> {
        let Some(acceptance) = self.acceptance.take() else {
            return Err(Error::ProtocolError("unexpected connect request".to_string()));
        };
        let permissions = (acceptance.auth_func)(request);
        if permissions.is_empty() {
            info!(peer = %self.name, path = %request.path, "connection refused");
            self.close();
            return Ok(());
        }
        self.permissions = permissions;
        self.state = ConnectionState::Open;
        info!(peer = %self.name, path = %request.path, %permissions, "accepted connection");
        if permissions.contains(Permissions::READ) {
            let greeting = (acceptance.sync_func)(&request.path, permissions, &self.name)?;
            self.send(&greeting)?;
        }
        Ok(())
    }

    /// Replace what the peer is known to have (on receipt of its greeting).
    pub fn set_peer_has(&mut self, has_map: HasMap) {
        self.peer_has = Some(has_map);
    }

    /// Record that the peer holds `info` because it sent it to us.
    pub fn note_received(&mut self, info: &BundleInfo) {
        if let Some(peer_has) = self.peer_has.as_mut() {
            peer_has.mark_as_having(info);
        }
    }

    /// Process an acknowledgement; acks for bundles we never sent on this
    /// connection are a protocol violation.
    pub fn note_ack(&mut self, info: &BundleInfo) -> Result<()> {
        if !self.unacked.remove(info) {
            return Err(Error::ProtocolError(format!(
                "{} acked unknown bundle {info}",
                self.name
            )));
        }
        if let Some(peer_has) = self.peer_has.as_mut() {
            peer_has.mark_as_having(info);
        }
        Ok(())
    }

    /// Send a bundle unless the peer already has it.
    ///
    /// Nothing is sent before the peer has greeted us or to a peer without
    /// read access. Returns whether the bundle went out.
    pub fn send_bundle(&mut self, wrapper: &BundleWrapper) -> Result<bool> {
        if self.is_closed() || !self.permissions.contains(Permissions::READ) {
            return Ok(false);
        }
        let info = wrapper.info();
        let Some(peer_has) = self.peer_has.as_mut() else {
            trace!(peer = %self.name, %info, "withholding bundle until greeted");
            return Ok(false);
        };
        if peer_has.has(info) {
            return Ok(false);
        }
        if !peer_has.is_valid_extension(info) {
            return Err(Error::ProtocolError(format!(
                "{info} does not extend what {} has",
                self.name
            )));
        }
        peer_has.mark_as_having(info);
        self.unacked.insert(info.clone());
        self.send(&SyncMessage {
            contents: Some(sync_message::Contents::Bundle(wrapper.bytes().to_vec())),
        })?;
        self.stats.bundles_sent += 1;
        trace!(peer = %self.name, %info, "sent bundle");
        Ok(true)
    }

    /// Queue a message and write as much as the socket accepts.
    pub fn send(&mut self, message: &SyncMessage) -> Result<()> {
        self.queue(&message.encode_to_vec())
    }

    fn queue(&mut self, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ProtocolError(format!("{} is closed", self.name)));
        }
        self.outgoing.extend(encode_frame(payload)?);
        self.flush()
    }

    /// Write queued bytes until the socket would block.
    pub fn flush(&mut self) -> Result<()> {
        let mut written = 0;
        let mut outcome = Ok(());
        while written < self.outgoing.len() {
            match self.transport.write(&self.outgoing[written..]) {
                Ok(0) => {
                    outcome = Err(Error::ProtocolError(format!("{} stopped reading", self.name)));
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    outcome = Err(Error::IoError(e));
                    break;
                }
            }
        }
        self.outgoing.drain(..written);
        if outcome.is_ok() {
            match self.transport.flush() {
                Err(e) if e.kind() != ErrorKind::WouldBlock => outcome = Err(Error::IoError(e)),
                _ => {}
            }
        }
        if outcome.is_err() {
            self.state = ConnectionState::Closed;
        }
        outcome
    }

    /// Flush what can be flushed and hang up.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            let _ = self.flush();
            self.state = ConnectionState::Closed;
        }
        self.transport.shutdown();
        debug!(peer = %self.name, "connection closed");
    }
}
